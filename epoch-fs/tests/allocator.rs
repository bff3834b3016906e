mod common;

use common::{RamDisk, TEST_BLOCKS, free_blocks, fresh_volume, init_logger};
use epoch_fs::{BLOCK_SIZE, BlockId, EpochFileSystem, Error};

#[test]
fn reserved_blocks_never_free() {
    let (_disk, fs) = fresh_volume(TEST_BLOCKS);

    // 0号块、超级块、1个位图块
    for raw in 0..3 {
        assert!(!fs.is_free(BlockId::new(raw)), "block {raw}");
    }
    assert!(fs.is_free(BlockId::new(3)));
    assert!(fs.is_free(BlockId::new(TEST_BLOCKS - 1)));
    assert!(!fs.is_free(BlockId::new(TEST_BLOCKS)));
    assert_eq!(TEST_BLOCKS as usize - 3, free_blocks(&fs).len());
}

#[test]
fn alloc_scans_after_reserved_region() {
    let (_disk, fs) = fresh_volume(TEST_BLOCKS);

    assert_eq!(BlockId::new(3), fs.alloc_block().unwrap());
    assert_eq!(BlockId::new(4), fs.alloc_block().unwrap());
    fs.dealloc_block(BlockId::new(3));
    assert_eq!(BlockId::new(3), fs.alloc_block().unwrap());
}

#[test]
fn alloc_dealloc_round_trip() {
    let (_disk, fs) = fresh_volume(TEST_BLOCKS);
    fs.alloc_block().unwrap();
    let before = free_blocks(&fs);

    let id = fs.alloc_block().unwrap();
    assert!(!fs.is_free(id));
    fs.dealloc_block(id);

    assert_eq!(before, free_blocks(&fs));
}

#[test]
fn alloc_flushes_bitmap() {
    let (disk, fs) = fresh_volume(TEST_BLOCKS);
    let writes = disk.writes();

    let id = fs.alloc_block().unwrap();
    assert_eq!(writes + 1, disk.writes());
    // 只有位图块被写回，新块还在缓存中
    assert!(fs.cache().is_modified(id));
    assert!(!fs.cache().is_modified(BlockId::new(2)));
}

#[test]
fn out_of_space() {
    let (_disk, fs) = fresh_volume(8);

    for raw in 3..8 {
        assert_eq!(BlockId::new(raw), fs.alloc_block().unwrap());
    }
    assert_eq!(Err(Error::OutOfSpace), fs.alloc_block());
}

#[test]
#[should_panic(expected = "attempt to free zero block")]
fn free_zero_block() {
    let (_disk, fs) = fresh_volume(TEST_BLOCKS);
    fs.dealloc_block(BlockId::NULL);
}

#[test]
fn format_rejects_bad_sizes() {
    init_logger();

    let disk = RamDisk::with_blocks(3);
    assert!(matches!(
        EpochFileSystem::format(disk, 3),
        Err(Error::InvalidArgument)
    ));

    // 设备比卷小
    let disk = RamDisk::with_blocks(16);
    assert!(matches!(
        EpochFileSystem::format(disk, 32),
        Err(Error::InvalidArgument)
    ));
}

#[test]
fn mount_reads_formatted_volume() {
    let (disk, fs) = fresh_volume(TEST_BLOCKS);
    let id = fs.alloc_block().unwrap();
    drop(fs);

    let fs = EpochFileSystem::mount(disk);
    assert_eq!(TEST_BLOCKS, fs.total_blocks());
    assert_eq!(0, fs.clock().now());
    assert!(!fs.is_free(id));
    assert_eq!(BlockId::new(u32::from(id) + 1), fs.alloc_block().unwrap());
}

#[test]
#[should_panic(expected = "bad file system magic number")]
fn mount_blank_device() {
    init_logger();
    EpochFileSystem::mount(RamDisk::with_blocks(16));
}

#[test]
#[should_panic(expected = "bitmap is corrupt")]
fn mount_with_reserved_block_free() {
    let (disk, fs) = fresh_volume(TEST_BLOCKS);
    drop(fs);

    // 把超级块(#1)标记为空闲
    disk.patch(|data| data[2 * BLOCK_SIZE] |= 0b10);
    EpochFileSystem::mount(disk);
}

#[test]
#[should_panic(expected = "file system is too large")]
fn mount_oversized_volume() {
    let (disk, fs) = fresh_volume(16);
    drop(fs);

    // 超级块中的总块数
    disk.patch(|data| {
        data[BLOCK_SIZE + 4..BLOCK_SIZE + 8].copy_from_slice(&u32::MAX.to_le_bytes())
    });
    EpochFileSystem::mount(disk);
}
