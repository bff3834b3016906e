//! # 块设备接口层
//!
//! 块设备以**扇区**为单位存储数据；[`BlockDevice`] 是对读写块设备的抽象，
//! 实现了此特质的类型称为**块设备驱动**。
//!
//! 文件系统的块大小是扇区大小的整数倍，一次读写连续的若干扇区。

#![no_std]

use core::any::Any;
use core::fmt;

/// 扇区大小，设备读写的最小单位
pub const SECTOR_SIZE: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    /// 扇区号超出设备容量
    OutOfRange,
    /// 缓冲区长度不是扇区大小的整数倍
    Misaligned,
    /// 底层介质读写失败
    Io,
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::OutOfRange => "sector out of range",
            Self::Misaligned => "buffer is not a whole number of sectors",
            Self::Io => "device I/O failure",
        };
        f.write_str(msg)
    }
}

/// 块设备驱动特质
pub trait BlockDevice: Send + Sync + Any {
    /// 从`start_sector`起读出`buf.len() / SECTOR_SIZE`个扇区
    fn read_sectors(&self, start_sector: usize, buf: &mut [u8]) -> Result<(), DeviceError>;

    /// 从`start_sector`起写入`buf.len() / SECTOR_SIZE`个扇区
    fn write_sectors(&self, start_sector: usize, buf: &[u8]) -> Result<(), DeviceError>;

    /// 设备的扇区总数
    fn sectors(&self) -> usize;
}
