//! Local filesystem access.
//!
//! This implementation is stateless, so the easiest way to use it
//! is to create one instance at server start and share it.

use std::io;
use std::path::{Component, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_stream::stream;
use bytes::{Buf, Bytes, BytesMut};
use futures_util::{future, FutureExt, TryFutureExt};
use log::{debug, trace};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::davpath::DavPath;
use crate::fs::*;

#[derive(Debug)]
struct LocalFsFile(tokio::fs::File);

/// Local Filesystem implementation.
pub struct LocalFs {
    pub basedir: PathBuf,
}

// Items from the readdir stream.
struct DirEntry {
    meta: io::Result<std::fs::Metadata>,
    entry: tokio::fs::DirEntry,
}

impl LocalFs {
    /// Create a new LocalFs DavFileSystem, serving "base".
    pub fn new(base: impl Into<PathBuf>) -> Arc<LocalFs> {
        Arc::new(LocalFs {
            basedir: base.into(),
        })
    }

    // Map the internal path to a filesystem path and make sure the
    // result stays below the base directory. The DavPath normalization
    // already removed every dot-dot segment, so any remaining escape
    // attempt shows up here as a non-Normal component.
    fn abs_path(&self, path: &DavPath) -> FsResult<PathBuf> {
        let rel = path.as_rel_ospath();
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(FsError::Forbidden);
        }
        let mut pathbuf = self.basedir.clone();
        pathbuf.push(rel);
        if !pathbuf.starts_with(&self.basedir) {
            return Err(FsError::Forbidden);
        }
        Ok(pathbuf)
    }
}

impl DavFileSystem for LocalFs {
    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        async move {
            let path = self.abs_path(path)?;
            let meta = tokio::fs::metadata(path).await?;
            Ok(Box::new(meta) as _)
        }
        .boxed()
    }

    fn read_dir<'a>(
        &'a self,
        davpath: &'a DavPath,
    ) -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>> {
        async move {
            trace!("FS: read_dir {davpath:?}");
            let path = self.abs_path(davpath)?;
            let mut read_dir = tokio::fs::read_dir(&path).await?;
            Ok(Box::pin(stream! {
                loop {
                    match read_dir.next_entry().await {
                        Ok(Some(entry)) => {
                            let meta = entry.metadata().await;
                            yield Box::new(DirEntry { meta, entry }) as Box<dyn DavDirEntry>;
                        }
                        Ok(None) => break,
                        Err(e) => {
                            debug!("read_dir failed {e}");
                            break;
                        }
                    }
                }
            }) as _)
        }
        .boxed()
    }

    fn open<'a>(
        &'a self,
        path: &'a DavPath,
        options: OpenOptions,
    ) -> FsFuture<'a, Box<dyn DavFile>> {
        async move {
            trace!("FS: open {path:?}");
            let path = self.abs_path(path)?;
            let mut opt = tokio::fs::OpenOptions::new();
            opt.read(options.read)
                .write(options.write)
                .truncate(options.truncate)
                .create(options.create)
                .create_new(options.create_new);
            match opt.open(path).await {
                Ok(file) => Ok(Box::new(LocalFsFile(file)) as Box<dyn DavFile>),
                Err(e) => Err(e.into()),
            }
        }
        .boxed()
    }

    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            trace!("FS: create_dir {path:?}");
            let path = self.abs_path(path)?;
            let dir = tokio::fs::DirBuilder::new();
            Ok(dir.create(path).await?)
        }
        .boxed()
    }

    fn remove_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            trace!("FS: remove_dir {path:?}");
            let path = self.abs_path(path)?;
            Ok(tokio::fs::remove_dir(path).await?)
        }
        .boxed()
    }

    fn remove_file<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            trace!("FS: remove_file {path:?}");
            let path = self.abs_path(path)?;
            Ok(tokio::fs::remove_file(path).await?)
        }
        .boxed()
    }

    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            trace!("FS: rename {from:?} {to:?}");
            let p_from = self.abs_path(from)?;
            let p_to = self.abs_path(to)?;
            match tokio::fs::rename(&p_from, &p_to).await {
                Ok(v) => Ok(v),
                Err(e) => {
                    // webdav allows a rename from a directory onto a file.
                    // note that this check is racy. anyway ...
                    if e.raw_os_error() == Some(libc::ENOTDIR) && p_from.is_dir() {
                        // remove and try again.
                        let _ = tokio::fs::remove_file(&p_to).await;
                        Ok(tokio::fs::rename(p_from, p_to).await?)
                    } else {
                        Err(e.into())
                    }
                }
            }
        }
        .boxed()
    }

    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            trace!("FS: copy {from:?} {to:?}");
            let p_from = self.abs_path(from)?;
            let p_to = self.abs_path(to)?;
            if let Err(e) = tokio::fs::copy(p_from, p_to).await {
                debug!("copy({from:?}, {to:?}) failed: {e}");
                Err(e.into())
            } else {
                Ok(())
            }
        }
        .boxed()
    }
}

impl DavDirEntry for DirEntry {
    fn metadata(&self) -> FsFuture<Box<dyn DavMetaData>> {
        let m = match &self.meta {
            Ok(meta) => Ok(Box::new(meta.clone()) as _),
            Err(e) => Err(e.into()),
        };
        Box::pin(future::ready(m))
    }

    #[cfg(unix)]
    fn name(&self) -> Vec<u8> {
        use std::os::unix::ffi::OsStrExt;
        self.entry.file_name().as_bytes().to_vec()
    }

    #[cfg(windows)]
    fn name(&self) -> Vec<u8> {
        self.entry.file_name().to_str().unwrap().as_bytes().to_vec()
    }
}

impl DavFile for LocalFsFile {
    fn metadata(&mut self) -> FsFuture<Box<dyn DavMetaData>> {
        async move {
            let meta = self.0.metadata().await?;
            Ok(Box::new(meta) as _)
        }
        .boxed()
    }

    fn write_bytes(&mut self, buf: Bytes) -> FsFuture<()> {
        async move { Ok(self.0.write_all(&buf).await?) }.boxed()
    }

    fn write_buf(&mut self, mut buf: Box<dyn Buf + Send>) -> FsFuture<()> {
        async move {
            while buf.remaining() > 0 {
                let n = self.0.write(buf.chunk()).await?;
                buf.advance(n);
            }
            Ok(())
        }
        .boxed()
    }

    fn read_bytes(&mut self, count: usize) -> FsFuture<Bytes> {
        async move {
            let mut buf = BytesMut::with_capacity(count);
            while buf.len() < count {
                let n = self.0.read_buf(&mut buf).await?;
                if n == 0 {
                    break;
                }
            }
            Ok(buf.freeze())
        }
        .boxed()
    }

    fn seek(&mut self, pos: SeekFrom) -> FsFuture<u64> {
        self.0.seek(pos).map_err(Into::into).boxed()
    }

    fn flush(&mut self) -> FsFuture<()> {
        self.0.sync_all().map_err(Into::into).boxed()
    }
}

impl DavMetaData for std::fs::Metadata {
    fn len(&self) -> u64 {
        self.len()
    }
    fn created(&self) -> FsResult<SystemTime> {
        self.created().map_err(|e| e.into())
    }
    fn modified(&self) -> FsResult<SystemTime> {
        self.modified().map_err(|e| e.into())
    }
    fn is_dir(&self) -> bool {
        self.is_dir()
    }
    fn is_file(&self) -> bool {
        self.is_file()
    }
    fn is_symlink(&self) -> bool {
        self.file_type().is_symlink()
    }
}
