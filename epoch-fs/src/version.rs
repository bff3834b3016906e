//! # 版本层
//!
//! 胖文件的数据块是它的**版本日志**：按追加顺序排列的文件节点，
//! 时间戳单调不减。胖文件自身的时间戳记录它最近一次进入新纪元的时刻，
//! 早于当前时钟时，第一次写入前须先复制出一个新版本。
//!
//! 新版本与源版本共用完整的块；源文件末尾不满一块的部分会被深复制，
//! 以免两者在同一块中互相覆盖。

use crate::efs::{EpochFileSystem, NodePos};
use crate::error::{Error, Result};
use crate::layout::FileNode;
use crate::{BLOCK_SIZE, DataBlock, Timestamp};

impl EpochFileSystem {
    /// 日志中最后一个时间戳不晚于`view`的版本
    pub(crate) fn resolve_as_of(
        &self,
        container: NodePos,
        view: Timestamp,
    ) -> Result<Option<NodePos>> {
        Ok(self
            .dir_entries(container)?
            .into_iter()
            .filter(|(_, version)| version.timestamp <= view)
            .map(|(pos, _)| pos)
            .last())
    }

    /// 胖文件是否停留在过去的纪元
    #[inline]
    pub(crate) fn is_stale(&self, container: NodePos) -> bool {
        self.with_node(container, |ff| ff.timestamp) < self.clock().now()
    }

    /// 在胖文件`container`的日志末尾追加一个以`source`为蓝本、
    /// 时间戳为当前时刻的新版本
    pub(crate) fn shallow_duplicate(&self, container: NodePos, source: NodePos) -> Result<NodePos> {
        let source = self.node(source);
        let now = self.clock().now();

        // 目录的块全部共享；普通文件只共享完整的块
        let (shared, tail) = if source.is_dir() {
            (source.data_blocks(), 0)
        } else {
            let size = source.size as usize;
            (size / BLOCK_SIZE, size % BLOCK_SIZE)
        };

        let mut tail_data = [0u8; BLOCK_SIZE];
        if tail > 0 {
            if let Some(id) = source.lookup_block(shared, self)? {
                self.block(id).lock().map(0, |data_block: &DataBlock| {
                    tail_data[..tail].copy_from_slice(&data_block[..tail])
                });
            }
        }

        let pos = self.dir_alloc(container)?;
        self.with_node_mut(pos, |version| {
            // 复制完成前名字保持为空，槽位仍算空闲
            *version = FileNode::new(b"", source.flags(), now);
            let copied = version.share_blocks(&source, shared, self).and_then(|()| {
                version.size = (shared * BLOCK_SIZE) as u32;
                if tail > 0 {
                    let written = version.write_at(shared * BLOCK_SIZE, &tail_data[..tail], self)?;
                    assert_eq!(written, tail);
                }
                Ok(())
            });

            if let Err(err) = copied {
                version.truncate_blocks(0, self);
                *version = FileNode::empty();
                return Err(err);
            }

            assert_eq!(version.size, source.size);
            version.set_name(source.name_bytes());
            Ok(())
        })?;

        log::debug!(
            "{}: new version at {now}, {shared} shared block(s), {tail} byte(s) copied",
            source.name()
        );
        Ok(pos)
    }

    /// 以`source`为蓝本复制出新版本，并把胖文件带入当前纪元
    pub(crate) fn advance_version(&self, container: NodePos, source: NodePos) -> Result<NodePos> {
        let fresh = self.shallow_duplicate(container, source)?;
        let now = self.clock().now();
        self.with_node_mut(container, |ff| ff.timestamp = now);

        Ok(fresh)
    }

    /// 胖文件在当前纪元的版本：过期时先复制出新版本
    pub(crate) fn current_version(&self, container: NodePos, view: Timestamp) -> Result<NodePos> {
        let version = self.resolve_as_of(container, view)?.ok_or(Error::NotFound)?;
        if self.is_stale(container) {
            self.advance_version(container, version)
        } else {
            Ok(version)
        }
    }
}
