use super::{FileNode, NodeFlag};
use crate::{MAGIC, Timestamp};

/// 超级块：
/// - 提供文件系统合法性校验；
/// - 保存全局逻辑时钟；
/// - 内嵌根目录的文件节点
#[derive(Debug)]
#[repr(C)]
pub struct SuperBlock {
    /// 魔数：用于校验文件系统合法性
    magic: u32,
    /// 文件系统占据块数
    pub total_blocks: u32,
    /// 最近一次推进后的时钟
    pub last_ts: Timestamp,
    pub root: FileNode,
}

impl SuperBlock {
    #[inline]
    pub fn init(&mut self, total_blocks: u32) {
        *self = Self {
            magic: MAGIC,
            total_blocks,
            last_ts: 0,
            root: FileNode::new(b"/", NodeFlag::Directory.into(), 0),
        };
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC
    }
}
