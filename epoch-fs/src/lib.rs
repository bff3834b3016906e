#![no_std]

extern crate alloc;

/* epoch-fs 的整体架构，自上而下 */

// 请求层：打开、创建、读写、删除，以及按时间戳回溯
mod vfs;

// 路径解析层：逐级解析路径，途经胖文件时按时间戳取版本
mod path;

// 版本层：胖文件的版本日志与浅复制
mod version;

// 目录层：在目录的数据块中查找、分配文件节点
mod dir;

// 磁盘块管理器层
mod efs;

// 逻辑时钟
mod clock;

// 磁盘数据结构层
mod layout;

// 块缓存层：按需调入、写回、回收磁盘块
mod block_cache;

mod error;

pub use block_dev::{BlockDevice, DeviceError, SECTOR_SIZE};

pub use self::{
    block_cache::BlockCache,
    clock::{Clock, Timestamp},
    efs::{BlockId, EpochFileSystem},
    error::{Error, Result},
    layout::{BlockPtr, NodeFlag, NodeKind},
    vfs::{FileHandle, OpenFlag, Stat},
};

pub const MAGIC: u32 = 0x4A05_30AE;
/// 块大小与页大小一致
pub const BLOCK_SIZE: usize = 4096;
pub const BLOCK_BITS: usize = BLOCK_SIZE * 8;
/// 每块包含的扇区数
pub const BLOCK_SECTORS: usize = BLOCK_SIZE / SECTOR_SIZE;
/// 块缓存窗口覆盖的块数（3GiB），卷不能比它更大
pub const DISK_MAP_BLOCKS: u32 = (0xC000_0000_u64 / BLOCK_SIZE as u64) as u32;

/// 单个路径分量的最大长度（含结尾的\0）
pub const MAX_NAME_LEN: usize = 128;
/// 完整路径的最大长度（含结尾的\0）
pub const MAX_PATH_LEN: usize = 1024;

/// 直接索引个数
pub const NDIRECT: usize = 10;
/// 间接索引块能容纳的块编号个数
pub const NINDIRECT: usize = BLOCK_SIZE / 4;
pub const MAX_FILE_SIZE: usize = (NDIRECT + NINDIRECT) * BLOCK_SIZE;

type DataBlock = [u8; BLOCK_SIZE];
