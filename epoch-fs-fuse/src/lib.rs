#[cfg(test)]
mod tests;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use block_dev::{BlockDevice, DeviceError, SECTOR_SIZE};
use enumflags2::BitFlags;
use epoch_fs::{BLOCK_SIZE, EpochFileSystem, Error, FileHandle, NodeFlag, OpenFlag};
use typed_bytesize::ByteSizeIec;

/// 以宿主机上的文件作为块设备
#[derive(Debug)]
pub struct BlockFile(pub Mutex<File>);

impl BlockFile {
    pub fn new(fd: File) -> Self {
        Self(Mutex::new(fd))
    }
}

impl BlockDevice for BlockFile {
    fn read_sectors(&self, start_sector: usize, buf: &mut [u8]) -> Result<(), DeviceError> {
        if buf.len() % SECTOR_SIZE != 0 {
            return Err(DeviceError::Misaligned);
        }

        let mut file = self.0.lock().map_err(|_| DeviceError::Io)?;
        file.seek(SeekFrom::Start((start_sector * SECTOR_SIZE) as u64))
            .map_err(|_| DeviceError::Io)?;
        file.read_exact(buf).map_err(|err| match err.kind() {
            io::ErrorKind::UnexpectedEof => DeviceError::OutOfRange,
            _ => DeviceError::Io,
        })
    }

    fn write_sectors(&self, start_sector: usize, buf: &[u8]) -> Result<(), DeviceError> {
        if buf.len() % SECTOR_SIZE != 0 {
            return Err(DeviceError::Misaligned);
        }
        // 镜像文件不随写入增长
        if start_sector * SECTOR_SIZE + buf.len() > self.sectors() * SECTOR_SIZE {
            return Err(DeviceError::OutOfRange);
        }

        let mut file = self.0.lock().map_err(|_| DeviceError::Io)?;
        file.seek(SeekFrom::Start((start_sector * SECTOR_SIZE) as u64))
            .map_err(|_| DeviceError::Io)?;
        file.write_all(buf).map_err(|_| DeviceError::Io)
    }

    fn sectors(&self) -> usize {
        self.0
            .lock()
            .ok()
            .and_then(|file| file.metadata().ok())
            .map_or(0, |meta| meta.len() as usize / SECTOR_SIZE)
    }
}

/// 新建`size`大小的镜像并格式化
pub fn create_image(path: &Path, size: ByteSizeIec) -> io::Result<EpochFileSystem> {
    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    fd.set_len(size.0)?;

    let total_blocks = u32::try_from(size.0 / BLOCK_SIZE as u64).map_err(io::Error::other)?;
    let block_dev: Arc<dyn BlockDevice> = Arc::new(BlockFile::new(fd));
    EpochFileSystem::format(block_dev, total_blocks).map_err(io::Error::other)
}

/// 挂载已有的镜像
pub fn open_image(path: &Path) -> io::Result<EpochFileSystem> {
    let fd = OpenOptions::new().read(true).write(true).open(path)?;
    let block_dev: Arc<dyn BlockDevice> = Arc::new(BlockFile::new(fd));
    Ok(EpochFileSystem::mount(block_dev))
}

/// 把宿主机目录`source`下的全部内容复制到镜像中的`target`目录，返回复制的文件数
pub fn pack(
    fs: &EpochFileSystem,
    source: &Path,
    target: &str,
    versioned: bool,
) -> io::Result<usize> {
    let mut entries = fs::read_dir(source)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    let mut packed = 0;
    for entry in entries {
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            log::warn!("skipping non UTF-8 name {:?}", entry.file_name());
            continue;
        };
        let path = join(target, &name);

        if entry.file_type()?.is_dir() {
            let mut flags = BitFlags::from(NodeFlag::Directory);
            if versioned {
                flags |= NodeFlag::Versioned;
            }
            fs.create(&path, flags).map_err(io::Error::other)?;
            packed += pack(fs, &entry.path(), &path, versioned)?;
        } else {
            let mut data = Vec::new();
            File::open(entry.path())?.read_to_end(&mut data)?;
            put(fs, &path, &data, versioned).map_err(io::Error::other)?;
            log::info!("packed {path} ({} bytes)", data.len());
            packed += 1;
        }
    }

    Ok(packed)
}

/// 以`data`作为`path`的内容。
///
/// 已存在的胖文件会先得到一个新版本，旧内容留在历史中。
pub fn put(
    fs: &EpochFileSystem,
    path: &str,
    data: &[u8],
    versioned: bool,
) -> epoch_fs::Result<FileHandle> {
    let flags = if versioned {
        BitFlags::from(NodeFlag::Versioned)
    } else {
        BitFlags::empty()
    };

    let mut handle = match fs.create(path, flags) {
        Ok(handle) => handle,
        Err(Error::AlreadyExists) => {
            if fs.open(path, BitFlags::empty(), None)?.is_versioned() {
                fs.restore(path, fs.clock().now())?
            } else {
                fs.open(path, OpenFlag::Write, None)?
            }
        }
        Err(err) => return Err(err),
    };

    fs.set_size(&mut handle, 0)?;
    fs.write(&mut handle, data, 0)?;
    fs.flush(&handle);

    Ok(handle)
}

/// 读出文件的全部内容，`view`为胖文件的查看时刻
pub fn read_file(fs: &EpochFileSystem, path: &str, view: Option<u32>) -> epoch_fs::Result<Vec<u8>> {
    let handle = fs.open(path, BitFlags::empty(), view)?;
    let size = fs.stat(&handle, None)?.size as usize;

    let mut data = vec![0; size];
    let read = fs.read(&handle, &mut data, 0)?;
    data.truncate(read);

    Ok(data)
}

fn join(dir: &str, name: &str) -> String {
    format!("{}/{name}", dir.trim_end_matches('/'))
}
