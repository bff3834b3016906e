//! # 块缓存层
//!
//! 磁盘上的每个块都对应缓存中一个固定的位置（以块号为键），
//! 块在**第一次被访问**时才从设备读入，此前不发生任何I/O。
//!
//! 每个缓存块带有两个标志：
//! - `modified`：经由可变访问写过，写回前为真；
//! - `referenced`：自上次写回以来被访问过。
//!
//! 写回只在显式刷新、整体同步、回收或块缓存被丢弃时发生。

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::mem;
use core::slice;
use core::sync::atomic::{AtomicBool, Ordering};

use block_dev::BlockDevice;
use spin::Mutex;

use crate::{BLOCK_SIZE, BlockId, DataBlock};

/// 一个卷的全部块缓存
pub struct BlockCache {
    /// 底层块设备的引用
    device: Arc<dyn BlockDevice>,
    /// 卷的总块数，访问其外的块说明磁盘结构已损坏
    total_blocks: u32,
    blocks: Mutex<BTreeMap<BlockId, Arc<Mutex<CachedBlock>>>>,
}

#[repr(C, align(8))]
struct Frame(DataBlock);

/// 内存中的块缓存
pub struct CachedBlock {
    /// 缓存的数据
    data: Box<Frame>,
    /// 对应的块号
    id: BlockId,
    device: Arc<dyn BlockDevice>,
    /// 是否为脏块
    modified: bool,
    /// 上次写回后是否被访问过
    referenced: AtomicBool,
}

impl BlockCache {
    pub fn new(device: Arc<dyn BlockDevice>, total_blocks: u32) -> Self {
        Self {
            device,
            total_blocks,
            blocks: Mutex::new(BTreeMap::new()),
        }
    }

    /// 取得块缓存，未命中时从设备读入
    pub fn get(&self, id: BlockId) -> Arc<Mutex<CachedBlock>> {
        self.check(id);
        let mut blocks = self.blocks.lock();
        let block = blocks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(CachedBlock::load(id, self.device.clone()))));
        Arc::clone(block)
    }

    /// 取得一个全零的块缓存，不从设备读入。
    ///
    /// 用于刚分配的块：它原有的内容没有意义。
    pub fn zeroed(&self, id: BlockId) -> Arc<Mutex<CachedBlock>> {
        self.check(id);
        let resident = {
            let mut blocks = self.blocks.lock();
            match blocks.get(&id) {
                Some(block) => Arc::clone(block),
                None => {
                    let block = Arc::new(Mutex::new(CachedBlock::zeroed(id, self.device.clone())));
                    blocks.insert(id, block.clone());
                    return block;
                }
            }
        };

        resident.lock().zeroize();
        resident
    }

    /// 若块已缓存且为脏块，则写回并清除脏标志；否则什么也不做
    pub fn flush(&self, id: BlockId) {
        if let Some(block) = self.resident_block(id) {
            block.lock().sync();
        }
    }

    /// 写回全部缓存块
    pub fn sync_all(&self) {
        let resident: Vec<_> = self.blocks.lock().values().cloned().collect();
        for block in resident {
            block.lock().sync();
        }
    }

    /// 将块移出缓存，脏数据会在块缓存被丢弃时写回。
    /// 正被其它调用者持有的块不会被移出。
    pub fn evict(&self, id: BlockId) -> bool {
        let mut blocks = self.blocks.lock();
        match blocks.get(&id) {
            Some(block) if Arc::strong_count(block) == 1 => {
                blocks.remove(&id);
                true
            }
            _ => false,
        }
    }

    pub fn is_resident(&self, id: BlockId) -> bool {
        self.blocks.lock().contains_key(&id)
    }

    pub fn is_modified(&self, id: BlockId) -> bool {
        self.resident_block(id)
            .is_some_and(|block| block.lock().modified)
    }

    pub fn is_referenced(&self, id: BlockId) -> bool {
        self.resident_block(id)
            .is_some_and(|block| block.lock().referenced.load(Ordering::Relaxed))
    }

    /// 当前驻留的块号，升序
    pub fn resident(&self) -> Vec<BlockId> {
        self.blocks.lock().keys().copied().collect()
    }

    /// 回收：对每个驻留的候选块，记下其访问标志，写回，
    /// 然后逐出**被访问过**的块，未被访问的块留在缓存中。
    ///
    /// NOTE: 与常见的LRU相反，刚被访问的块反而被逐出。
    ///
    /// 正被其它调用者持有的块（包括正在调入的块）会被跳过。
    /// 返回逐出的块数。
    pub fn reclaim(&self, candidates: impl IntoIterator<Item = BlockId>) -> usize {
        let mut blocks = self.blocks.lock();
        let mut evicted = 0;

        for id in candidates {
            let Some(block) = blocks.get(&id) else {
                continue;
            };
            // 没有其它引用的才能回收
            if Arc::strong_count(block) > 1 {
                continue;
            }

            let was_referenced = {
                let mut block = block.lock();
                let was_referenced = block.referenced.load(Ordering::Relaxed);
                block.sync();
                was_referenced
            };

            if was_referenced {
                blocks.remove(&id);
                evicted += 1;
            }
        }

        evicted
    }
}

impl BlockCache {
    fn check(&self, id: BlockId) {
        if id == BlockId::NULL || u32::from(id) >= self.total_blocks {
            log::error!("block {id:?} outside volume of {} blocks", self.total_blocks);
            panic!("bad block number {:#010x}", u32::from(id));
        }
    }

    fn resident_block(&self, id: BlockId) -> Option<Arc<Mutex<CachedBlock>>> {
        self.blocks.lock().get(&id).cloned()
    }
}

impl CachedBlock {
    fn load(id: BlockId, device: Arc<dyn BlockDevice>) -> Self {
        let mut data = Box::new(Frame([0; BLOCK_SIZE]));
        device
            .read_sectors(id.sector(), &mut data.0)
            .unwrap_or_else(|err| panic!("reading block {id:?}: {err}"));

        Self {
            data,
            id,
            device,
            modified: false,
            referenced: AtomicBool::new(false),
        }
    }

    fn zeroed(id: BlockId, device: Arc<dyn BlockDevice>) -> Self {
        Self {
            data: Box::new(Frame([0; BLOCK_SIZE])),
            id,
            device,
            modified: true,
            referenced: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    /// 写回脏块，同时清除脏标志与访问标志
    pub fn sync(&mut self) {
        if self.modified {
            self.modified = false;
            self.referenced.store(false, Ordering::Relaxed);
            self.device
                .write_sectors(self.id.sector(), &self.data.0)
                .unwrap_or_else(|err| panic!("writing block {:?}: {err}", self.id));
        }
    }

    pub fn get<T: Sized>(&self, offset: usize) -> &T {
        let type_size = mem::size_of::<T>();
        assert!(type_size + offset <= BLOCK_SIZE);
        self.touch();
        let addr = self.data.0[offset..].as_ptr().cast();
        unsafe { &*addr }
    }

    pub fn get_mut<T: Sized>(&mut self, offset: usize) -> &mut T {
        let type_size = mem::size_of::<T>();
        assert!(type_size + offset <= BLOCK_SIZE);
        self.touch();
        self.modified = true;
        let addr = self.data.0[offset..].as_mut_ptr().cast();
        unsafe { &mut *addr }
    }

    pub fn as_slice<T>(&self) -> &[T] {
        let type_size = mem::size_of::<T>();
        assert_eq!(0, BLOCK_SIZE % type_size);
        self.touch();
        unsafe { slice::from_raw_parts(self.data.0.as_ptr().cast(), BLOCK_SIZE / type_size) }
    }

    pub fn as_mut_slice<T>(&mut self) -> &mut [T] {
        let type_size = mem::size_of::<T>();
        assert_eq!(0, BLOCK_SIZE % type_size);
        self.touch();
        self.modified = true;
        unsafe {
            slice::from_raw_parts_mut(self.data.0.as_mut_ptr().cast(), BLOCK_SIZE / type_size)
        }
    }

    #[inline]
    pub fn map<T: Sized, V>(&self, offset: usize, f: impl FnOnce(&T) -> V) -> V {
        f(self.get(offset))
    }

    #[inline]
    pub fn map_mut<T: Sized, V>(&mut self, offset: usize, f: impl FnOnce(&mut T) -> V) -> V {
        f(self.get_mut(offset))
    }

    #[inline]
    pub fn map_slice<T, V>(&self, f: impl FnOnce(&[T]) -> V) -> V {
        f(self.as_slice())
    }

    #[inline]
    pub fn map_mut_slice<T, V>(&mut self, f: impl FnOnce(&mut [T]) -> V) -> V {
        f(self.as_mut_slice())
    }

    #[inline]
    pub fn zeroize(&mut self) {
        self.data.0.fill(0);
        self.modified = true;
    }

    #[inline]
    fn touch(&self) {
        self.referenced.store(true, Ordering::Relaxed);
    }
}

impl Drop for CachedBlock {
    fn drop(&mut self) {
        self.sync();
    }
}
