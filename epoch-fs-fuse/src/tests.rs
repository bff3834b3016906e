use std::fs::{self, OpenOptions};
use std::path::PathBuf;

use block_dev::{BlockDevice, DeviceError, SECTOR_SIZE};
use enumflags2::BitFlags;
use typed_bytesize::ByteSizeIec;

use crate::{BlockFile, create_image, open_image, pack, put, read_file};

/// 每个测试独占的临时路径
fn scratch(name: &str) -> PathBuf {
    let _ = env_logger::builder().is_test(true).try_init();
    let path = std::env::temp_dir().join(format!("epoch-fs-{}-{name}", std::process::id()));
    let _ = fs::remove_dir_all(&path);
    let _ = fs::remove_file(&path);
    path
}

#[test]
fn block_file_sectors() {
    let path = scratch("sectors.img");
    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)
        .unwrap();
    fd.set_len(8 * SECTOR_SIZE as u64).unwrap();
    let dev = BlockFile::new(fd);

    assert_eq!(8, dev.sectors());

    let data: Vec<u8> = (0..2 * SECTOR_SIZE).map(|i| i as u8).collect();
    dev.write_sectors(3, &data).unwrap();
    let mut buf = vec![0; 2 * SECTOR_SIZE];
    dev.read_sectors(3, &mut buf).unwrap();
    assert_eq!(data, buf);

    assert_eq!(Err(DeviceError::Misaligned), dev.read_sectors(0, &mut buf[..100]));
    assert_eq!(Err(DeviceError::OutOfRange), dev.read_sectors(7, &mut buf));
    assert_eq!(Err(DeviceError::OutOfRange), dev.write_sectors(7, &data));
    assert_eq!(8, dev.sectors());

    fs::remove_file(path).unwrap();
}

#[test]
fn image_round_trip() {
    let path = scratch("round-trip.img");

    let efs = create_image(&path, ByteSizeIec::mib(4)).unwrap();
    assert_eq!(1024, efs.total_blocks());
    efs.create("/etc", epoch_fs::NodeFlag::Directory).unwrap();
    put(&efs, "/etc/hostname", b"epoch\n", false).unwrap();
    drop(efs);

    let efs = open_image(&path).unwrap();
    assert_eq!(b"epoch\n".to_vec(), read_file(&efs, "/etc/hostname", None).unwrap());
    drop(efs);

    fs::remove_file(path).unwrap();
}

#[test]
fn put_adds_versions() {
    let path = scratch("versions.img");
    let efs = create_image(&path, ByteSizeIec::mib(4)).unwrap();

    put(&efs, "/notes", b"first", true).unwrap();
    let t1 = efs.clock().now();
    put(&efs, "/notes", b"second draft", true).unwrap();

    let history = efs.history("/notes").unwrap();
    assert_eq!(2, history.len());
    assert_eq!(b"first".to_vec(), read_file(&efs, "/notes", Some(t1)).unwrap());
    assert_eq!(b"second draft".to_vec(), read_file(&efs, "/notes", None).unwrap());

    efs.undo("/notes").unwrap();
    assert_eq!(b"first".to_vec(), read_file(&efs, "/notes", None).unwrap());

    // 普通文件直接覆盖
    put(&efs, "/plain", b"aaaa", false).unwrap();
    put(&efs, "/plain", b"b", false).unwrap();
    assert_eq!(b"b".to_vec(), read_file(&efs, "/plain", None).unwrap());
    assert!(!efs.open("/plain", BitFlags::empty(), None).unwrap().is_versioned());

    drop(efs);
    fs::remove_file(path).unwrap();
}

#[test]
fn pack_host_directory() {
    let source = scratch("source");
    fs::create_dir_all(source.join("bin")).unwrap();
    fs::write(source.join("README"), b"hello").unwrap();
    fs::write(source.join("bin/init"), vec![0x7f; 10_000]).unwrap();

    let image = scratch("pack.img");
    let efs = create_image(&image, ByteSizeIec::mib(4)).unwrap();
    assert_eq!(2, pack(&efs, &source, "/", false).unwrap());

    let names: Vec<_> = efs
        .read_dir("/", None)
        .unwrap()
        .into_iter()
        .map(|stat| stat.name)
        .collect();
    assert_eq!(vec!["README", "bin"], names);
    assert_eq!(vec![0x7f; 10_000], read_file(&efs, "/bin/init", None).unwrap());

    drop(efs);
    fs::remove_file(image).unwrap();
    fs::remove_dir_all(source).unwrap();
}
