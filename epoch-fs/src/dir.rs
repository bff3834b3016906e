//! # 目录层
//!
//! 目录与胖文件的数据块是紧密排列的文件节点数组，名字首字节为0的节点是空槽。
//! 目录的大小永远是块大小的整数倍。

use alloc::vec::Vec;

use crate::efs::{EpochFileSystem, NodePos};
use crate::error::{Error, Result};
use crate::layout::{FileNode, NODE_SIZE};
use crate::BLOCK_SIZE;

impl EpochFileSystem {
    /// 在目录`dir`中查找名为`name`的节点
    pub(crate) fn dir_lookup(&self, dir: NodePos, name: &str) -> Result<NodePos> {
        let dir = self.node(dir);
        assert_eq!(dir.size as usize % BLOCK_SIZE, 0);

        for block_index in 0..dir.data_blocks() {
            let Some(block) = dir.lookup_block(block_index, self)? else {
                continue;
            };
            let found = self.block(block).lock().map_slice(|nodes: &[FileNode]| {
                nodes
                    .iter()
                    .position(|node| !node.is_free() && node.name_bytes() == name.as_bytes())
            });
            if let Some(nth) = found {
                return Ok(NodePos::new(block, nth * NODE_SIZE));
            }
        }

        Err(Error::NotFound)
    }

    /// 在目录`dir`中取得一个空槽，没有时将目录扩大一块
    pub(crate) fn dir_alloc(&self, dir: NodePos) -> Result<NodePos> {
        self.with_node_mut(dir, |dir| {
            assert_eq!(dir.size as usize % BLOCK_SIZE, 0);

            let blocks = dir.data_blocks();
            for block_index in 0..blocks {
                let block = dir.get_block(block_index, self)?;
                let free = self
                    .block(block)
                    .lock()
                    .map_slice(|nodes: &[FileNode]| nodes.iter().position(FileNode::is_free));
                if let Some(nth) = free {
                    return Ok(NodePos::new(block, nth * NODE_SIZE));
                }
            }

            dir.size += BLOCK_SIZE as u32;
            match dir.get_block(blocks, self) {
                Ok(block) => Ok(NodePos::new(block, 0)),
                Err(err) => {
                    dir.size -= BLOCK_SIZE as u32;
                    Err(err)
                }
            }
        })
    }

    /// 目录`dir`中的全部有效节点，按存放顺序
    pub(crate) fn dir_entries(&self, dir: NodePos) -> Result<Vec<(NodePos, FileNode)>> {
        let dir = self.node(dir);
        let mut entries = Vec::new();

        for block_index in 0..dir.data_blocks() {
            let Some(block) = dir.lookup_block(block_index, self)? else {
                continue;
            };
            self.block(block).lock().map_slice(|nodes: &[FileNode]| {
                entries.extend(
                    nodes
                        .iter()
                        .enumerate()
                        .filter(|(_, node)| !node.is_free())
                        .map(|(nth, node)| (NodePos::new(block, nth * NODE_SIZE), node.clone())),
                );
            });
        }

        Ok(entries)
    }
}
