//! # 磁盘数据结构层
//!
//! epoch-fs 的磁盘布局：
//! 空块(#0) | 超级块(#1) | 位图 | 数据块区域
//!
//! 目录与胖文件的数据块都是紧密排列的 [`FileNode`] 数组。

mod super_block;
pub use super_block::SuperBlock;

mod bitmap;
pub use bitmap::Bitmap;

mod node;
pub use node::{BlockPtr, FileNode, NODE_SIZE, NodeFlag, NodeKind};

#[cfg(test)]
mod tests {
    use core::mem;

    use super::{BlockPtr, FileNode, SuperBlock, NODE_SIZE};
    use crate::BLOCK_SIZE;

    #[test]
    fn layout() {
        assert_eq!(256, NODE_SIZE);
        assert_eq!(NODE_SIZE, mem::size_of::<FileNode>());
        assert_eq!(4, mem::size_of::<BlockPtr>());
        assert_eq!(12, mem::offset_of!(SuperBlock, root));
        assert!(mem::size_of::<SuperBlock>() <= BLOCK_SIZE);
        assert_eq!(0, BLOCK_SIZE % NODE_SIZE);
    }
}
