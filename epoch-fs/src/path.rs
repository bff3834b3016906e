//! # 路径解析层
//!
//! 路径以`/`分隔，连续的`/`视为一个，开头的`/`可有可无。
//! 途经胖文件时按时间戳取出其中的版本；
//! 以写方式解析时，途经的过期胖文件会先进入当前纪元。

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::efs::{EpochFileSystem, NodePos};
use crate::error::{Error, Result};
use crate::layout::FileNode;
use crate::{MAX_NAME_LEN, MAX_PATH_LEN, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WalkMode {
    /// 只读：胖文件一律按查看时刻取版本
    ReadOnly,
    /// 写：途经的胖文件取当前版本，末端按查看时刻取版本，过期时先复制
    Write,
}

#[derive(Debug)]
pub(crate) enum Walk {
    Found {
        /// 末端节点，胖文件已解析为版本
        node: NodePos,
        /// 末端节点所属的胖文件
        container: Option<NodePos>,
    },
    /// 只差最后一个分量不存在
    Missing {
        /// 已解析的父目录
        parent: NodePos,
        name: String,
        /// 父目录是否为胖文件中的版本
        versioned: bool,
    },
}

/// 拆出路径的全部分量，并检查长度与字符
pub(crate) fn components(path: &str) -> Result<Vec<&str>> {
    if path.len() >= MAX_PATH_LEN {
        return Err(Error::InvalidArgument);
    }

    let components: Vec<&str> = path.split('/').filter(|cmp| !cmp.is_empty()).collect();
    if components
        .iter()
        .any(|cmp| cmp.len() >= MAX_NAME_LEN || cmp.contains('\0'))
    {
        return Err(Error::InvalidArgument);
    }

    Ok(components)
}

impl EpochFileSystem {
    /// 从根目录出发逐级解析`path`
    pub(crate) fn walk(&self, path: &str, mode: WalkMode, view: Timestamp) -> Result<Walk> {
        let components = components(path)?;
        let mut current = NodePos::ROOT;

        for (nth, &name) in components.iter().enumerate() {
            let is_last = nth + 1 == components.len();

            let inner = match mode {
                WalkMode::ReadOnly => view,
                WalkMode::Write => self.clock().now(),
            };
            let (dir, container) = self.resolve_entry(current, mode, inner)?;
            if !self.with_node(dir, FileNode::is_dir) {
                return Err(Error::NotFound);
            }

            match self.dir_lookup(dir, name) {
                Ok(next) => current = next,
                Err(Error::NotFound) if is_last => {
                    return Ok(Walk::Missing {
                        parent: dir,
                        name: name.to_string(),
                        versioned: container.is_some(),
                    });
                }
                Err(err) => return Err(err),
            }
        }

        let (node, container) = self.resolve_entry(current, mode, view)?;
        Ok(Walk::Found { node, container })
    }

    /// 胖文件解析为`view`时刻的版本，其它节点原样返回
    fn resolve_entry(
        &self,
        entry: NodePos,
        mode: WalkMode,
        view: Timestamp,
    ) -> Result<(NodePos, Option<NodePos>)> {
        if !self.with_node(entry, FileNode::is_versioned) {
            return Ok((entry, None));
        }

        let version = match mode {
            WalkMode::ReadOnly => self.resolve_as_of(entry, view)?.ok_or(Error::NotFound)?,
            WalkMode::Write => self.current_version(entry, view)?,
        };
        Ok((version, Some(entry)))
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::components;
    use crate::Error;

    #[test]
    fn split() {
        assert_eq!(vec!["a", "b", "c"], components("//a///b/c/").unwrap());
        assert_eq!(vec!["a"], components("a").unwrap());
        assert!(components("/").unwrap().is_empty());
        assert!(components("").unwrap().is_empty());
    }

    #[test]
    fn too_long() {
        let name = "x".repeat(128);
        assert_eq!(Err(Error::InvalidArgument), components(&name));
        let path = "/y".repeat(512);
        assert_eq!(Err(Error::InvalidArgument), components(&path));
        assert!(components(&"z".repeat(127)).is_ok());
    }
}
