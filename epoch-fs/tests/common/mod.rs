#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use epoch_fs::{
    BLOCK_SECTORS, BlockDevice, BlockId, DeviceError, EpochFileSystem, FileHandle, SECTOR_SIZE,
};

/// 内存中的块设备，记录读写次数
pub struct RamDisk {
    data: Mutex<Vec<u8>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl RamDisk {
    pub fn new(sectors: usize) -> Self {
        Self {
            data: Mutex::new(vec![0; sectors * SECTOR_SIZE]),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn with_blocks(blocks: u32) -> Arc<Self> {
        Arc::new(Self::new(blocks as usize * BLOCK_SECTORS))
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// 绕过文件系统直接改动磁盘内容
    pub fn patch(&self, f: impl FnOnce(&mut [u8])) {
        f(&mut self.data.lock().unwrap())
    }

    fn range(
        &self,
        start_sector: usize,
        len: usize,
    ) -> Result<std::ops::Range<usize>, DeviceError> {
        if len % SECTOR_SIZE != 0 {
            return Err(DeviceError::Misaligned);
        }
        let start = start_sector * SECTOR_SIZE;
        if start + len > self.data.lock().unwrap().len() {
            return Err(DeviceError::OutOfRange);
        }
        Ok(start..start + len)
    }
}

impl BlockDevice for RamDisk {
    fn read_sectors(&self, start_sector: usize, buf: &mut [u8]) -> Result<(), DeviceError> {
        let range = self.range(start_sector, buf.len())?;
        buf.copy_from_slice(&self.data.lock().unwrap()[range]);
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_sectors(&self, start_sector: usize, buf: &[u8]) -> Result<(), DeviceError> {
        let range = self.range(start_sector, buf.len())?;
        self.data.lock().unwrap()[range].copy_from_slice(buf);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn sectors(&self) -> usize {
        self.data.lock().unwrap().len() / SECTOR_SIZE
    }
}

pub const TEST_BLOCKS: u32 = 1024;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn fresh_volume(blocks: u32) -> (Arc<RamDisk>, EpochFileSystem) {
    init_logger();
    let disk = RamDisk::with_blocks(blocks);
    let fs = EpochFileSystem::format(disk.clone(), blocks).unwrap();
    (disk, fs)
}

pub fn free_blocks(fs: &EpochFileSystem) -> Vec<u32> {
    (0..fs.total_blocks())
        .filter(|&raw| fs.is_free(BlockId::new(raw)))
        .collect()
}

/// 按下标生成的测试数据
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn read_all(fs: &EpochFileSystem, handle: &FileHandle) -> Vec<u8> {
    let size = fs.stat(handle, None).unwrap().size as usize;
    let mut buf = vec![0; size];
    assert_eq!(size, fs.read(handle, &mut buf, 0).unwrap());
    buf
}
