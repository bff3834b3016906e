//! # 请求层
//!
//! 文件系统对外的全部操作。请求之间互斥，同一时刻只有一个请求在修改磁盘结构。
//!
//! 打开胖文件得到的句柄记得它所属的胖文件：
//! 胖文件进入新纪元后，经由句柄的第一次写入会先复制出新版本，
//! 句柄随之指向新版本。

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use enumflags2::{BitFlags, bitflags};

use crate::efs::{EpochFileSystem, NodePos};
use crate::error::{Error, Result};
use crate::layout::{FileNode, NodeFlag, NodeKind};
use crate::path::{Walk, WalkMode};
use crate::Timestamp;

#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFlag {
    Write = 0b001,
    /// 不存在时创建普通文件
    Create = 0b010,
    /// 打开后截断为0
    Truncate = 0b100,
}

/// 打开的文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    node: NodePos,
    /// 节点所属的胖文件
    container: Option<NodePos>,
    writable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub name: String,
    pub size: u32,
    pub kind: NodeKind,
    pub timestamp: Timestamp,
    /// 数据块的块号，空洞为0
    pub blocks: Vec<u32>,
}

impl FileHandle {
    #[inline]
    pub fn is_versioned(&self) -> bool {
        self.container.is_some()
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        self.writable
    }
}

impl EpochFileSystem {
    /// 打开`path`。
    ///
    /// 带写标志时以写方式解析路径：途经的过期胖文件会进入当前纪元。
    /// `view`只影响末端的胖文件，缺省为当前时刻。
    pub fn open(
        &self,
        path: &str,
        flags: impl Into<BitFlags<OpenFlag>>,
        view: Option<Timestamp>,
    ) -> Result<FileHandle> {
        let _request = self.lock_request();
        let flags = flags.into();

        let writable = !flags.is_empty();
        let mode = if writable { WalkMode::Write } else { WalkMode::ReadOnly };
        let view = view.unwrap_or_else(|| self.clock().now());

        match self.walk(path, mode, view)? {
            Walk::Found { node, container } => {
                let mut handle = FileHandle {
                    node,
                    container,
                    writable,
                };
                if flags.contains(OpenFlag::Truncate) {
                    self.resize_handle(&mut handle, 0)?;
                }
                Ok(handle)
            }
            Walk::Missing { .. } if flags.contains(OpenFlag::Create) => {
                self.create_node(path, BitFlags::empty())
            }
            Walk::Missing { .. } => Err(Error::NotFound),
        }
    }

    /// 创建`path`，父目录必须存在。
    ///
    /// 带 [`NodeFlag::Versioned`] 或父目录本身是胖文件的版本时，
    /// 创建的是胖文件，返回其首个版本的句柄。
    pub fn create(&self, path: &str, flags: impl Into<BitFlags<NodeFlag>>) -> Result<FileHandle> {
        let _request = self.lock_request();
        self.create_node(path, flags.into())
    }

    /// 从`offset`读出数据填充`buf`，返回读出的字节数。
    /// 目录读出的是其中的节点记录。
    pub fn read(&self, handle: &FileHandle, buf: &mut [u8], offset: usize) -> Result<usize> {
        let _request = self.lock_request();
        self.node(handle.node).read_at(offset, buf, self)
    }

    /// 从`offset`写入`buf`，必要时扩大文件
    pub fn write(&self, handle: &mut FileHandle, buf: &[u8], offset: usize) -> Result<usize> {
        let _request = self.lock_request();
        self.check_writable(handle)?;
        self.prepare_mutation(handle)?;
        self.with_node_mut(handle.node, |node| node.write_at(offset, buf, self))
    }

    pub fn set_size(&self, handle: &mut FileHandle, size: u32) -> Result<()> {
        let _request = self.lock_request();
        self.resize_handle(handle, size)
    }

    /// 句柄的元数据；对胖文件给出`view`时，取该时刻的版本
    pub fn stat(&self, handle: &FileHandle, view: Option<Timestamp>) -> Result<Stat> {
        let _request = self.lock_request();
        let node = match (view, handle.container) {
            (Some(view), Some(container)) => {
                self.resolve_as_of(container, view)?.ok_or(Error::NotFound)?
            }
            _ => handle.node,
        };
        self.stat_node(node)
    }

    /// 写回句柄所指文件的全部数据块以及节点本身
    pub fn flush(&self, handle: &FileHandle) {
        let _request = self.lock_request();
        self.flush_node(handle.node);
        if let Some(container) = handle.container {
            self.cache().flush(container.block);
        }
    }

    /// 删除`path`：释放其独有的块并清空目录中的节点。
    /// 胖文件连同全部版本一起删除。
    pub fn remove(&self, path: &str) -> Result<()> {
        let _request = self.lock_request();

        let now = self.clock().now();
        let Walk::Found { node, container } = self.walk(path, WalkMode::ReadOnly, now)? else {
            return Err(Error::NotFound);
        };
        if node == NodePos::ROOT {
            return Err(Error::InvalidArgument);
        }
        if self.with_node(node, FileNode::is_dir) && !self.dir_entries(node)?.is_empty() {
            return Err(Error::DirectoryNotEmpty);
        }

        let entry = match container {
            None => node,
            Some(container) => {
                for (version, _) in self.dir_entries(container)? {
                    self.with_node_mut(version, |version| version.truncate_blocks(0, self));
                }
                container
            }
        };
        self.with_node_mut(entry, |entry| {
            entry.truncate_blocks(0, self);
            *entry = FileNode::empty();
        });
        self.cache().flush(entry.block);

        log::debug!("removed {path}");
        Ok(())
    }

    /// 目录中的全部项；胖文件按`view`取版本，此时尚不存在的胖文件不列出
    pub fn read_dir(&self, path: &str, view: Option<Timestamp>) -> Result<Vec<Stat>> {
        let _request = self.lock_request();
        let view = view.unwrap_or_else(|| self.clock().now());

        let Walk::Found { node: dir, .. } = self.walk(path, WalkMode::ReadOnly, view)? else {
            return Err(Error::NotFound);
        };
        if !self.with_node(dir, FileNode::is_dir) {
            return Err(Error::NotADirectory);
        }

        let mut entries = Vec::new();
        for (pos, entry) in self.dir_entries(dir)? {
            let pos = if entry.is_versioned() {
                match self.resolve_as_of(pos, view)? {
                    Some(version) => version,
                    None => continue,
                }
            } else {
                pos
            };
            entries.push(self.stat_node(pos)?);
        }

        Ok(entries)
    }

    /// 胖文件的全部版本，按日志顺序
    pub fn history(&self, path: &str) -> Result<Vec<Stat>> {
        let _request = self.lock_request();

        let container = match self.walk(path, WalkMode::ReadOnly, self.clock().now())? {
            Walk::Found {
                container: Some(container),
                ..
            } => container,
            Walk::Found { container: None, .. } => return Err(Error::InvalidArgument),
            Walk::Missing { .. } => return Err(Error::NotFound),
        };

        self.dir_entries(container)?
            .into_iter()
            .map(|(version, _)| self.stat_node(version))
            .collect()
    }

    /// 让胖文件`path`回到`timestamp`时刻的内容：
    /// 推进时钟，并以该时刻的版本为蓝本复制出当前版本
    pub fn restore(&self, path: &str, timestamp: Timestamp) -> Result<FileHandle> {
        let _request = self.lock_request();
        self.restore_node(path, timestamp)
    }

    /// 回到当前版本之前的时刻
    pub fn undo(&self, path: &str) -> Result<FileHandle> {
        let _request = self.lock_request();

        let (node, container) = match self.walk(path, WalkMode::ReadOnly, self.clock().now())? {
            Walk::Found {
                node,
                container: Some(container),
            } => (node, container),
            Walk::Found { container: None, .. } => return Err(Error::InvalidArgument),
            Walk::Missing { .. } => return Err(Error::NotFound),
        };

        let previous = self
            .with_node(node, |version| version.timestamp)
            .checked_sub(1)
            .ok_or(Error::NotFound)?;
        if self.resolve_as_of(container, previous)?.is_none() {
            return Err(Error::NotFound);
        }

        self.restore_node(path, previous)
    }
}

impl EpochFileSystem {
    fn create_node(&self, path: &str, flags: BitFlags<NodeFlag>) -> Result<FileHandle> {
        let now = self.advance_clock();

        let (parent, name, in_version) = match self.walk(path, WalkMode::Write, now)? {
            Walk::Found { .. } => return Err(Error::AlreadyExists),
            Walk::Missing {
                parent,
                name,
                versioned,
            } => (parent, name, versioned),
        };

        let base = flags & NodeFlag::Directory;
        let slot = self.dir_alloc(parent)?;

        if !(in_version || flags.contains(NodeFlag::Versioned)) {
            self.with_node_mut(slot, |node| *node = FileNode::new(name.as_bytes(), base, now));
            self.flush_node(parent);
            log::debug!("created {path}");
            return Ok(FileHandle {
                node: slot,
                container: None,
                writable: true,
            });
        }

        self.with_node_mut(slot, |ff| {
            *ff = FileNode::new(name.as_bytes(), base | NodeFlag::Versioned, now)
        });
        let first = match self.dir_alloc(slot) {
            Ok(first) => first,
            Err(err) => {
                self.with_node_mut(slot, |ff| *ff = FileNode::empty());
                return Err(err);
            }
        };
        self.with_node_mut(first, |version| *version = FileNode::new(name.as_bytes(), base, now));
        self.flush_node(slot);
        self.flush_node(parent);

        log::debug!("created versioned {path} at {now}");
        Ok(FileHandle {
            node: first,
            container: Some(slot),
            writable: true,
        })
    }

    fn restore_node(&self, path: &str, timestamp: Timestamp) -> Result<FileHandle> {
        self.advance_clock();

        match self.walk(path, WalkMode::Write, timestamp)? {
            Walk::Found {
                node,
                container: Some(container),
            } => {
                log::debug!("restored {path} to {timestamp}");
                Ok(FileHandle {
                    node,
                    container: Some(container),
                    writable: true,
                })
            }
            Walk::Found { container: None, .. } => Err(Error::InvalidArgument),
            Walk::Missing { .. } => Err(Error::NotFound),
        }
    }

    fn resize_handle(&self, handle: &mut FileHandle, size: u32) -> Result<()> {
        self.check_writable(handle)?;
        self.prepare_mutation(handle)?;
        self.with_node_mut(handle.node, |node| node.resize(size as usize, self))?;
        self.cache().flush(handle.node.block);
        Ok(())
    }

    fn check_writable(&self, handle: &FileHandle) -> Result<()> {
        if !handle.writable {
            return Err(Error::ReadOnly);
        }
        if self.with_node(handle.node, FileNode::is_dir) {
            return Err(Error::IsADirectory);
        }
        Ok(())
    }

    /// 修改胖文件的版本之前：
    /// 句柄须指向最新的版本；胖文件过期时先复制出新版本，句柄随之改指
    fn prepare_mutation(&self, handle: &mut FileHandle) -> Result<()> {
        let Some(container) = handle.container else {
            return Ok(());
        };

        let latest = self
            .resolve_as_of(container, self.clock().now())?
            .ok_or(Error::NotFound)?;
        if latest != handle.node {
            return Err(Error::StaleVersion);
        }
        if self.is_stale(container) {
            handle.node = self.advance_version(container, latest)?;
        }

        Ok(())
    }

    fn stat_node(&self, pos: NodePos) -> Result<Stat> {
        let node = self.node(pos);
        Ok(Stat {
            name: node.name().to_string(),
            size: node.size,
            kind: node.kind(),
            timestamp: node.timestamp,
            blocks: node.block_numbers(self)?,
        })
    }
}
