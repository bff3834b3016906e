use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    NotFound,
    OutOfSpace,
    InvalidArgument,
    AlreadyExists,
    NotADirectory,
    IsADirectory,
    DirectoryNotEmpty,
    /// 句柄打开时没有写权限
    ReadOnly,
    /// 句柄指向已被取代的历史版本
    StaleVersion,
}

pub type Result<T> = core::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::NotFound => "no such file or version",
            Self::OutOfSpace => "no free block on disk",
            Self::InvalidArgument => "invalid argument",
            Self::AlreadyExists => "file already exists",
            Self::NotADirectory => "not a directory",
            Self::IsADirectory => "is a directory",
            Self::DirectoryNotEmpty => "directory not empty",
            Self::ReadOnly => "handle is read-only",
            Self::StaleVersion => "handle refers to a superseded version",
        };
        f.write_str(msg)
    }
}

impl core::error::Error for Error {}
