//! 文件节点
//!
//! 每个节点以**直接索引**和**一级间接索引**指向数据块：
//! - 直接：节点内连续存储 NDIRECT 个**块指针**
//! - 间接：一整个块连续存储**块指针**，每个都指向一个**数据块**
//!
//! 目录与胖文件的空间用于存放子节点；普通文件的空间用于存放它的数据。
//!
//! ## 共享的块
//!
//! 胖文件的新版本与旧版本共用数据块，此时新版本持有的指针带有**共享标记**。
//! 每个块恰有一个不带标记的持有者，释放时只释放不带标记的块；
//! 向共享的块写入前先复制一份。

use alloc::vec::Vec;
use core::str;

use enumflags2::{BitFlags, bitflags};

use crate::efs::EpochFileSystem;
use crate::error::{Error, Result};
use crate::{
    BLOCK_SIZE, BlockId, DataBlock, MAX_FILE_SIZE, MAX_NAME_LEN, NDIRECT, NINDIRECT, Timestamp,
};

/// 节点在磁盘上的大小
pub const NODE_SIZE: usize = 256;

/// 补齐到 NODE_SIZE 的填充
const PAD_SIZE: usize = NODE_SIZE - MAX_NAME_LEN - 3 * 4 - (NDIRECT + 1) * 4;

/// 间接索引块
type IndirectBlock = [BlockPtr; NINDIRECT];

/// 块指针：低31位为块号，最高位为共享标记，0为空指针
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct BlockPtr(u32);

/// 节点类型的组成：普通文件两位皆空
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeFlag {
    Directory = 0b01,
    /// 胖文件：数据为一串按时间排列的版本
    Versioned = 0b10,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Regular,
    Directory,
    /// 胖文件本身，而非其中的某个版本
    Versioned,
}

#[derive(Debug, Clone)]
#[repr(C)]
pub struct FileNode {
    /// 以NUL结尾的名字，首字节为0表示空槽
    name: [u8; MAX_NAME_LEN],
    // 不用usize是为了严控布局
    pub size: u32,
    /// 原始的 NodeFlag 位
    ty: u32,
    /// 版本的创建时刻；胖文件则为其最近一次推进纪元的时刻
    pub timestamp: Timestamp,
    direct: [BlockPtr; NDIRECT],
    indirect: BlockPtr,
    _pad: [u8; PAD_SIZE],
}

/// 块指针所在的位置
#[derive(Debug, Clone, Copy)]
enum Slot {
    Direct(usize),
    /// 间接索引块的块号，以及块内的下标
    Indirect(BlockId, usize),
}

impl BlockPtr {
    pub const NULL: Self = Self(0);
    const SHARED: u32 = 1 << 31;

    #[inline]
    pub fn owned(id: BlockId) -> Self {
        Self(u32::from(id))
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 & !Self::SHARED == 0
    }

    #[inline]
    pub fn is_shared(self) -> bool {
        self.0 & Self::SHARED != 0
    }

    /// 同一个块的共享指针
    #[inline]
    pub fn shared(self) -> Self {
        if self.is_null() {
            Self::NULL
        } else {
            Self(self.0 | Self::SHARED)
        }
    }

    #[inline]
    pub fn block(self) -> Option<BlockId> {
        (!self.is_null()).then(|| BlockId::new(self.0 & !Self::SHARED))
    }
}

impl FileNode {
    pub const fn empty() -> Self {
        Self {
            name: [0; MAX_NAME_LEN],
            size: 0,
            ty: 0,
            timestamp: 0,
            direct: [BlockPtr::NULL; NDIRECT],
            indirect: BlockPtr::NULL,
            _pad: [0; PAD_SIZE],
        }
    }

    pub fn new(name: &[u8], flags: BitFlags<NodeFlag>, timestamp: Timestamp) -> Self {
        let mut node = Self::empty();
        node.set_name(name);
        node.ty = flags.bits();
        node.timestamp = timestamp;
        node
    }

    /// 名字过长时截断，总保留结尾的\0
    pub fn set_name(&mut self, name: &[u8]) {
        debug_assert!(name.len() < MAX_NAME_LEN);
        let len = name.len().min(MAX_NAME_LEN - 1);
        self.name.fill(0);
        self.name[..len].copy_from_slice(&name[..len]);
    }

    #[inline]
    pub fn name_bytes(&self) -> &[u8] {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(MAX_NAME_LEN);
        &self.name[..len]
    }

    pub fn name(&self) -> &str {
        str::from_utf8(self.name_bytes()).unwrap_or_default()
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.name[0] == 0
    }

    #[inline]
    pub fn flags(&self) -> BitFlags<NodeFlag> {
        BitFlags::from_bits_truncate(self.ty)
    }

    pub fn kind(&self) -> NodeKind {
        let flags = self.flags();
        if flags.contains(NodeFlag::Versioned) {
            NodeKind::Versioned
        } else if flags.contains(NodeFlag::Directory) {
            NodeKind::Directory
        } else {
            NodeKind::Regular
        }
    }

    /// 是否为（解析后的）目录
    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind() == NodeKind::Directory
    }

    #[inline]
    pub fn is_versioned(&self) -> bool {
        self.flags().contains(NodeFlag::Versioned)
    }

    /// 数据占据的块数
    #[inline]
    pub fn data_blocks(&self) -> usize {
        (self.size as usize).div_ceil(BLOCK_SIZE)
    }

    /// 间接索引块
    #[inline]
    pub fn indirect_block(&self) -> Option<BlockId> {
        self.indirect.block()
    }
}

impl FileNode {
    /// 找到逻辑索引`block_index`的块指针所在的位置，
    /// `alloc`为真时按需分配间接索引块
    fn block_slot(
        &mut self,
        block_index: usize,
        alloc: bool,
        fs: &EpochFileSystem,
    ) -> Result<Slot> {
        if block_index >= NDIRECT + NINDIRECT {
            return Err(Error::InvalidArgument);
        }
        if block_index < NDIRECT {
            return Ok(Slot::Direct(block_index));
        }

        let indirect = match self.indirect.block() {
            Some(id) => id,
            None if !alloc => return Err(Error::NotFound),
            None => {
                let id = fs.alloc_block()?;
                self.indirect = BlockPtr::owned(id);
                id
            }
        };
        // 间接索引块从不共享
        debug_assert!(!self.indirect.is_shared());

        Ok(Slot::Indirect(indirect, block_index - NDIRECT))
    }

    fn slot_ptr(&self, slot: Slot, fs: &EpochFileSystem) -> BlockPtr {
        match slot {
            Slot::Direct(index) => self.direct[index],
            Slot::Indirect(id, index) => fs
                .block(id)
                .lock()
                .map(0, |indirect: &IndirectBlock| indirect[index]),
        }
    }

    fn set_slot(&mut self, slot: Slot, ptr: BlockPtr, fs: &EpochFileSystem) {
        match slot {
            Slot::Direct(index) => self.direct[index] = ptr,
            Slot::Indirect(id, index) => fs
                .block(id)
                .lock()
                .map_mut(0, |indirect: &mut IndirectBlock| indirect[index] = ptr),
        }
    }

    /// 逻辑索引`block_index`处的块号，不分配任何块。
    /// 未分配的块返回`None`。
    pub fn lookup_block(
        &self,
        block_index: usize,
        fs: &EpochFileSystem,
    ) -> Result<Option<BlockId>> {
        if block_index >= NDIRECT + NINDIRECT {
            return Err(Error::InvalidArgument);
        }
        if block_index < NDIRECT {
            return Ok(self.direct[block_index].block());
        }

        let Some(indirect) = self.indirect.block() else {
            return Ok(None);
        };
        Ok(fs
            .block(indirect)
            .lock()
            .map(0, |indirect: &IndirectBlock| indirect[block_index - NDIRECT])
            .block())
    }

    /// 逻辑索引`block_index`处的块号，未分配时分配一块全零的新块
    pub fn get_block(&mut self, block_index: usize, fs: &EpochFileSystem) -> Result<BlockId> {
        let slot = self.block_slot(block_index, true, fs)?;
        if let Some(id) = self.slot_ptr(slot, fs).block() {
            return Ok(id);
        }

        let id = fs.alloc_block()?;
        self.set_slot(slot, BlockPtr::owned(id), fs);
        Ok(id)
    }

    /// 同 [`Self::get_block`]，但保证返回的块为本节点独有：
    /// 共享的块会先被复制
    pub fn get_block_mut(&mut self, block_index: usize, fs: &EpochFileSystem) -> Result<BlockId> {
        let slot = self.block_slot(block_index, true, fs)?;
        let ptr = self.slot_ptr(slot, fs);
        let Some(id) = ptr.block() else {
            let id = fs.alloc_block()?;
            self.set_slot(slot, BlockPtr::owned(id), fs);
            return Ok(id);
        };
        if !ptr.is_shared() {
            return Ok(id);
        }

        let content: DataBlock = *fs.block(id).lock().get::<DataBlock>(0);
        let copy = fs.alloc_block()?;
        fs.block(copy)
            .lock()
            .map_mut(0, |data_block: &mut DataBlock| *data_block = content);
        self.set_slot(slot, BlockPtr::owned(copy), fs);
        log::debug!("{}: block {block_index} copied {id:?} -> {copy:?}", self.name());

        Ok(copy)
    }

    /// 从指定位置(字节偏移)读出数据填充`buf`，返回读出的字节数。
    /// 未分配的块读作全零。
    pub fn read_at(&self, offset: usize, buf: &mut [u8], fs: &EpochFileSystem) -> Result<usize> {
        let mut start = offset;
        let end = offset.saturating_add(buf.len()).min(self.size as usize);

        if start >= end {
            return Ok(0);
        }

        let mut read_size = 0;
        loop {
            let block_index = start / BLOCK_SIZE;
            // 当前块的末地址(字节)
            let current_block_end = ((block_index + 1) * BLOCK_SIZE).min(end);
            let block_read_size = current_block_end - start;
            let dest = &mut buf[read_size..read_size + block_read_size];

            match self.lookup_block(block_index, fs)? {
                Some(id) => fs.block(id).lock().map(0, |data_block: &DataBlock| {
                    // 绝对地址 % 块大小 = 块内偏移
                    let src = &data_block[start % BLOCK_SIZE..start % BLOCK_SIZE + block_read_size];
                    dest.copy_from_slice(src);
                }),
                None => dest.fill(0),
            }

            read_size += block_read_size;

            if current_block_end == end {
                break;
            }

            start = current_block_end;
        }

        Ok(read_size)
    }

    /// 从指定位置写入`buf`，必要时扩大文件。
    /// 写入的块都会成为本节点独有的块。
    pub fn write_at(&mut self, offset: usize, buf: &[u8], fs: &EpochFileSystem) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut start = offset;
        let end = offset.checked_add(buf.len()).ok_or(Error::InvalidArgument)?;
        if end > self.size as usize {
            self.resize(end, fs)?;
        }

        let mut written_size = 0;
        loop {
            let block_index = start / BLOCK_SIZE;
            let current_block_end = ((block_index + 1) * BLOCK_SIZE).min(end);
            let block_write_size = current_block_end - start;

            let id = self.get_block_mut(block_index, fs)?;
            fs.block(id).lock().map_mut(0, |data_block: &mut DataBlock| {
                let src = &buf[written_size..written_size + block_write_size];
                let dest =
                    &mut data_block[start % BLOCK_SIZE..start % BLOCK_SIZE + block_write_size];
                dest.copy_from_slice(src);
            });

            written_size += block_write_size;

            if current_block_end == end {
                break;
            }

            start = current_block_end;
        }

        Ok(written_size)
    }

    /// 改变文件大小：缩小时释放多余的块，扩大时不分配
    pub fn resize(&mut self, new_size: usize, fs: &EpochFileSystem) -> Result<()> {
        if new_size > MAX_FILE_SIZE {
            return Err(Error::InvalidArgument);
        }
        if new_size < self.size as usize {
            self.truncate_blocks(new_size, fs);
        }
        self.size = new_size as u32;

        Ok(())
    }

    /// 释放`new_size`之后的全部块，只有本节点独有的块才归还位图
    pub fn truncate_blocks(&mut self, new_size: usize, fs: &EpochFileSystem) {
        let old_blocks = self.data_blocks();
        let new_blocks = new_size.div_ceil(BLOCK_SIZE);

        for block_index in new_blocks..old_blocks {
            if block_index >= NDIRECT && self.indirect.is_null() {
                break;
            }
            if let Err(err) = self.free_block(block_index, fs) {
                log::warn!("{}: freeing block {block_index}: {err}", self.name());
            }
        }

        if new_blocks <= NDIRECT {
            if let Some(id) = self.indirect.block() {
                if !self.indirect.is_shared() {
                    fs.dealloc_block(id);
                }
            }
            self.indirect = BlockPtr::NULL;
        }
    }

    fn free_block(&mut self, block_index: usize, fs: &EpochFileSystem) -> Result<()> {
        let slot = self.block_slot(block_index, false, fs)?;
        let ptr = self.slot_ptr(slot, fs);
        if let Some(id) = ptr.block() {
            if !ptr.is_shared() {
                fs.dealloc_block(id);
            }
            self.set_slot(slot, BlockPtr::NULL, fs);
        }

        Ok(())
    }

    /// 以共享指针引用`source`的前`count`个块。
    /// 需要时分配自己的间接索引块。
    pub(crate) fn share_blocks(
        &mut self,
        source: &FileNode,
        count: usize,
        fs: &EpochFileSystem,
    ) -> Result<()> {
        for (dst, src) in self.direct.iter_mut().zip(&source.direct).take(count) {
            *dst = src.shared();
        }

        if count <= NDIRECT {
            return Ok(());
        }
        // 源文件的间接部分全是空洞
        let Some(source_indirect) = source.indirect.block() else {
            return Ok(());
        };

        let entries: IndirectBlock = *fs.block(source_indirect).lock().get::<IndirectBlock>(0);
        let indirect = fs.alloc_block()?;
        self.indirect = BlockPtr::owned(indirect);
        fs.block(indirect)
            .lock()
            .map_mut(0, |indirect: &mut IndirectBlock| {
                for (dst, src) in indirect.iter_mut().zip(&entries).take(count - NDIRECT) {
                    *dst = src.shared();
                }
            });

        Ok(())
    }

    /// 数据块的块号，未分配的为0
    pub fn block_numbers(&self, fs: &EpochFileSystem) -> Result<Vec<u32>> {
        (0..self.data_blocks())
            .map(|block_index| {
                Ok(self
                    .lookup_block(block_index, fs)?
                    .map_or(0, u32::from))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{BlockPtr, FileNode, NodeFlag, NodeKind};
    use crate::BlockId;

    #[test]
    fn block_ptr_tag() {
        let ptr = BlockPtr::owned(BlockId::new(42));
        assert!(!ptr.is_shared());
        assert_eq!(Some(BlockId::new(42)), ptr.block());

        let shared = ptr.shared();
        assert!(shared.is_shared());
        assert_eq!(Some(BlockId::new(42)), shared.block());

        assert!(BlockPtr::NULL.shared().is_null());
        assert_eq!(None, BlockPtr::NULL.block());
    }

    #[test]
    fn node_kind() {
        let dir = FileNode::new(b"etc", NodeFlag::Directory.into(), 0);
        assert!(dir.is_dir());
        assert_eq!("etc", dir.name());

        let ff = FileNode::new(b"notes", NodeFlag::Versioned.into(), 3);
        assert_eq!(NodeKind::Versioned, ff.kind());
        assert!(!ff.is_dir());

        assert!(FileNode::empty().is_free());
        assert_eq!(NodeKind::Regular, FileNode::empty().kind());
    }
}
