//! # 磁盘块管理器层
//!
//! 负责卷的格式化与挂载、数据块的分配与回收，
//! 以及按位置访问磁盘上的文件节点。

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::{mem, ptr};

use block_dev::BlockDevice;
use derive_more::{From, Into};
use spin::{Mutex, MutexGuard};

use crate::block_cache::{BlockCache, CachedBlock};
use crate::clock::{Clock, Timestamp};
use crate::error::{Error, Result};
use crate::layout::{Bitmap, FileNode, SuperBlock};
use crate::{BLOCK_SECTORS, BLOCK_SIZE, DISK_MAP_BLOCKS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
#[repr(transparent)]
pub struct BlockId(u32);

impl BlockId {
    /// 0号块不可访问，块号0即空指针
    pub const NULL: Self = Self(0);
    pub const SUPER: Self = Self(1);

    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// 块在设备上的起始扇区
    #[inline]
    pub fn sector(self) -> usize {
        self.0 as usize * BLOCK_SECTORS
    }
}

/// 文件节点在磁盘上的位置：所在**块号**以及**块内偏移**
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NodePos {
    pub block: BlockId,
    pub offset: usize,
}

impl NodePos {
    /// 根目录内嵌在超级块中
    pub const ROOT: Self = Self {
        block: BlockId::SUPER,
        offset: mem::offset_of!(SuperBlock, root),
    };

    #[inline]
    pub fn new(block: BlockId, offset: usize) -> Self {
        Self { block, offset }
    }
}

pub struct EpochFileSystem {
    /// 请求之间互斥
    request: Mutex<()>,
    cache: BlockCache,
    bitmap: Mutex<Bitmap>,
    clock: Clock,
    total_blocks: u32,
}

impl EpochFileSystem {
    /// 在设备上建立一个`total_blocks`块的空卷：
    /// 全部块清零，写入超级块与位图，根目录为空
    pub fn format(device: Arc<dyn BlockDevice>, total_blocks: u32) -> Result<Self> {
        let bitmap = Bitmap::new(total_blocks);
        if total_blocks > DISK_MAP_BLOCKS
            || total_blocks <= bitmap.reserved_end()
            || device.sectors() < total_blocks as usize * BLOCK_SECTORS
        {
            return Err(Error::InvalidArgument);
        }

        let zero = [0u8; BLOCK_SIZE];
        for raw in 0..total_blocks {
            device
                .write_sectors(BlockId(raw).sector(), &zero)
                .unwrap_or_else(|err| panic!("clearing block {raw}: {err}"));
        }

        let fs = Self {
            request: Mutex::new(()),
            cache: BlockCache::new(device, total_blocks),
            bitmap: Mutex::new(bitmap),
            clock: Clock::new(0),
            total_blocks,
        };

        fs.block(BlockId::SUPER)
            .lock()
            .map_mut(0, |super_block: &mut SuperBlock| super_block.init(total_blocks));
        fs.bitmap.lock().format(&fs.cache);
        fs.sync_all();

        log::info!(
            "formatted {total_blocks} blocks, {} bitmap block(s)",
            fs.bitmap.lock().blocks()
        );
        Ok(fs)
    }

    /// 挂载设备上已有的卷。
    ///
    /// 魔数错误、卷过大或位图损坏时 panic。
    pub fn mount(device: Arc<dyn BlockDevice>) -> Self {
        let mut buf = [0u8; BLOCK_SIZE];
        device
            .read_sectors(BlockId::SUPER.sector(), &mut buf)
            .unwrap_or_else(|err| panic!("reading superblock: {err}"));
        // SAFETY: 超级块只由整数与字节数组组成，任意位模式都合法
        let super_block: SuperBlock = unsafe { ptr::read_unaligned(buf.as_ptr().cast()) };

        if !super_block.is_valid() {
            log::error!("bad file system magic number");
            panic!("bad file system magic number");
        }
        if super_block.total_blocks > DISK_MAP_BLOCKS {
            log::error!("file system is too large: {} blocks", super_block.total_blocks);
            panic!("file system is too large");
        }
        log::info!("superblock is good");

        let total_blocks = super_block.total_blocks;
        let fs = Self {
            request: Mutex::new(()),
            cache: BlockCache::new(device, total_blocks),
            bitmap: Mutex::new(Bitmap::new(total_blocks)),
            clock: Clock::new(super_block.last_ts),
            total_blocks,
        };
        fs.bitmap.lock().validate(&fs.cache);
        log::info!("bitmap is good");
        log::info!("last timestamp is {}", super_block.last_ts);

        fs
    }

    #[inline]
    pub fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    #[inline]
    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    #[inline]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// 块是否空闲；0号块与卷外的块永远不空闲
    pub fn is_free(&self, id: BlockId) -> bool {
        self.bitmap.lock().is_free(id, &self.cache)
    }

    /// 分配一个块。新块在缓存中全零，不会从设备读入。
    pub fn alloc_block(&self) -> Result<BlockId> {
        // 位图块写回后才释放位图锁，分配结果即已落盘
        let id = self.bitmap.lock().alloc(&self.cache).ok_or_else(|| {
            log::warn!("no free block on disk");
            Error::OutOfSpace
        })?;
        self.cache.zeroed(id);
        log::trace!("alloc {id:?}");

        Ok(id)
    }

    /// 归还一个块，释放0号块会 panic
    pub fn dealloc_block(&self, id: BlockId) {
        self.bitmap.lock().dealloc(id, &self.cache);
        log::trace!("dealloc {id:?}");
    }

    /// 对数据区中正在使用的缓存块执行一轮回收，返回逐出的块数
    pub fn reclaim(&self) -> usize {
        let reserved_end = self.bitmap.lock().reserved_end();
        let candidates: Vec<BlockId> = self
            .cache
            .resident()
            .into_iter()
            .filter(|&id| u32::from(id) >= reserved_end && !self.is_free(id))
            .collect();

        let evicted = self.cache.reclaim(candidates);
        log::debug!("reclaim evicted {evicted} block(s)");
        evicted
    }

    /// 写回卷上的全部缓存块
    #[inline]
    pub fn sync_all(&self) {
        self.cache.sync_all();
    }
}

impl EpochFileSystem {
    #[inline]
    pub(crate) fn lock_request(&self) -> MutexGuard<'_, ()> {
        self.request.lock()
    }

    #[inline]
    pub(crate) fn block(&self, id: BlockId) -> Arc<Mutex<CachedBlock>> {
        self.cache.get(id)
    }

    /// 推进时钟，并记入超级块
    pub(crate) fn advance_clock(&self) -> Timestamp {
        let now = self.clock.advance();
        self.block(BlockId::SUPER)
            .lock()
            .map_mut(0, |super_block: &mut SuperBlock| super_block.last_ts = now);
        log::debug!("clock advanced to {now}");
        now
    }

    /// 复制出位于`pos`的节点
    #[inline]
    pub(crate) fn node(&self, pos: NodePos) -> FileNode {
        self.with_node(pos, FileNode::clone)
    }

    /// NOTE: `f`执行期间持有节点所在块的锁，`f`不能再访问同一块
    #[inline]
    pub(crate) fn with_node<V>(&self, pos: NodePos, f: impl FnOnce(&FileNode) -> V) -> V {
        self.block(pos.block).lock().map(pos.offset, f)
    }

    #[inline]
    pub(crate) fn with_node_mut<V>(&self, pos: NodePos, f: impl FnOnce(&mut FileNode) -> V) -> V {
        self.block(pos.block).lock().map_mut(pos.offset, f)
    }

    /// 写回节点本身、间接索引块及全部数据块
    pub(crate) fn flush_node(&self, pos: NodePos) {
        let node = self.node(pos);
        for block_index in 0..node.data_blocks() {
            if let Ok(Some(id)) = node.lookup_block(block_index, self) {
                self.cache.flush(id);
            }
        }
        if let Some(indirect) = node.indirect_block() {
            self.cache.flush(indirect);
        }
        self.cache.flush(pos.block);
    }
}
