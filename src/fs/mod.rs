//! Interface to the filesystem the engine serves.
//!
//! The engine consumes these traits; `localfs` is the bundled backend.
//! All operations are async and return boxed futures so the traits stay
//! object safe.

pub mod localfs;

use std::fmt::Debug;
use std::io;
use std::pin::Pin;
use std::time::SystemTime;

use bytes::{Buf, Bytes};
use futures_util::future::BoxFuture;
use futures_util::stream::Stream;
use thiserror::Error;

use crate::davpath::DavPath;

pub use std::io::SeekFrom;

pub type FsResult<T> = Result<T, FsError>;
pub type FsFuture<'a, T> = BoxFuture<'a, FsResult<T>>;
pub type FsStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// Errors from the filesystem backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FsError {
    #[error("not found")]
    NotFound,
    #[error("forbidden")]
    Forbidden,
    #[error("already exists")]
    Exists,
    #[error("not implemented")]
    NotImplemented,
    #[error("general failure")]
    GeneralFailure,
}

impl FsError {
    pub(crate) fn statuscode(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            FsError::NotFound => StatusCode::NOT_FOUND,
            FsError::Forbidden => StatusCode::FORBIDDEN,
            FsError::Exists => StatusCode::METHOD_NOT_ALLOWED,
            FsError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            FsError::GeneralFailure => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<io::Error> for FsError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => FsError::NotFound,
            io::ErrorKind::PermissionDenied => FsError::Forbidden,
            io::ErrorKind::AlreadyExists => FsError::Exists,
            _ => FsError::GeneralFailure,
        }
    }
}

impl From<&io::Error> for FsError {
    fn from(e: &io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => FsError::NotFound,
            io::ErrorKind::PermissionDenied => FsError::Forbidden,
            io::ErrorKind::AlreadyExists => FsError::Exists,
            _ => FsError::GeneralFailure,
        }
    }
}

/// Metadata of one resource.
pub trait DavMetaData: Debug + Send + Sync {
    fn len(&self) -> u64;
    fn modified(&self) -> FsResult<SystemTime>;
    fn is_dir(&self) -> bool;

    fn created(&self) -> FsResult<SystemTime> {
        Err(FsError::NotImplemented)
    }
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn is_file(&self) -> bool {
        !self.is_dir()
    }
    fn is_symlink(&self) -> bool {
        false
    }
}

/// One entry from a directory listing.
pub trait DavDirEntry: Send + Sync {
    /// Name of the entry (filename only, no path).
    fn name(&self) -> Vec<u8>;
    fn metadata(&self) -> FsFuture<Box<dyn DavMetaData>>;
}

/// Options for `DavFileSystem::open`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub create_new: bool,
    pub truncate: bool,
}

impl OpenOptions {
    pub fn read() -> OpenOptions {
        OpenOptions {
            read: true,
            ..Default::default()
        }
    }

    pub fn write() -> OpenOptions {
        OpenOptions {
            write: true,
            create: true,
            truncate: true,
            ..Default::default()
        }
    }
}

/// An open file handle.
pub trait DavFile: Debug + Send {
    fn metadata(&mut self) -> FsFuture<Box<dyn DavMetaData>>;
    fn write_buf(&mut self, buf: Box<dyn Buf + Send>) -> FsFuture<()>;
    fn write_bytes(&mut self, buf: Bytes) -> FsFuture<()>;
    /// Read up to `count` bytes. An empty result means EOF.
    fn read_bytes(&mut self, count: usize) -> FsFuture<Bytes>;
    fn seek(&mut self, pos: SeekFrom) -> FsFuture<u64>;
    fn flush(&mut self) -> FsFuture<()>;
}

/// The filesystem the engine operates on.
pub trait DavFileSystem: Send + Sync {
    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>>;
    fn read_dir<'a>(&'a self, path: &'a DavPath)
        -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>>;
    fn open<'a>(&'a self, path: &'a DavPath, options: OpenOptions)
        -> FsFuture<'a, Box<dyn DavFile>>;
    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()>;
    fn remove_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()>;
    fn remove_file<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()>;
    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()>;
    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()>;
}
