use std::cmp;
use std::io;
use std::sync::Arc;

use async_stream::stream;
use headers::HeaderMapExt;
use http::{Method, Request, Response, StatusCode};

use super::{RequestCtx, ResourceView};
use crate::body::Body;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::etag::{self, Etag};
use crate::fs::{DavFileSystem, FsError, OpenOptions, SeekFrom};
use crate::range::{self, ParsedRange};
use crate::util::systemtime_to_httpdate;
use crate::DavResult;

pub(crate) const READ_BUF_SIZE: usize = 16384;

impl crate::DavHandler {
    pub(crate) async fn handle_get(
        &self,
        req: &Request<()>,
        ctx: &RequestCtx,
    ) -> DavResult<Response<Body>> {
        let head = req.method() == Method::HEAD;

        let meta = match &ctx.view {
            ResourceView::Null => return Err(DavError::NotFound),
            ResourceView::Collection(_) => {
                // a collection has no body to serve
                let mut res = Response::new(Body::empty());
                res.headers_mut().typed_insert(headers::ContentLength(0));
                return Ok(res);
            }
            ResourceView::File(meta) => meta,
        };

        let etag = Etag::from_meta(&**meta, &ctx.path);
        etag::check_if_none_match(req, Some(&etag), true)?;
        etag::check_if_match(req, Some(&etag))?;

        let size = meta.len();
        let mut res = Response::new(Body::empty());
        let h = res.headers_mut();
        h.insert("accept-ranges", "bytes".parse().unwrap());
        h.insert("etag", etag.quoted().parse().unwrap());
        if let Ok(mtime) = meta.modified() {
            h.insert(
                "last-modified",
                systemtime_to_httpdate(mtime).parse().unwrap(),
            );
        }
        h.insert(
            "content-type",
            ctx.path.get_mime_type_str().parse().unwrap(),
        );

        let parsed = match req.headers().get("range").and_then(|v| v.to_str().ok()) {
            Some(value) => range::parse(value, size),
            None => ParsedRange::None,
        };

        match parsed {
            ParsedRange::Unsatisfiable => {
                *res.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
                res.headers_mut().insert(
                    "content-range",
                    format!("bytes */{}", size).parse().unwrap(),
                );
                res.headers_mut().typed_insert(headers::ContentLength(0));
            }
            ParsedRange::Range(r) => {
                *res.status_mut() = StatusCode::PARTIAL_CONTENT;
                res.headers_mut()
                    .insert("content-range", r.content_range(size).parse().unwrap());
                res.headers_mut()
                    .typed_insert(headers::ContentLength(r.len()));
                if !head {
                    *res.body_mut() = self.file_body(ctx.path.clone(), r.start, r.len());
                }
            }
            ParsedRange::None => {
                res.headers_mut().typed_insert(headers::ContentLength(size));
                if !head {
                    *res.body_mut() = self.file_body(ctx.path.clone(), 0, size);
                }
            }
        }

        Ok(res)
    }

    // Stream exactly `len` bytes starting at `start`, clamping whatever
    // chunk sizes the file hands back.
    fn file_body(&self, path: DavPath, start: u64, len: u64) -> Body {
        let fs: Arc<dyn DavFileSystem> = Arc::clone(&self.inner.fs);
        Body::stream(stream! {
            let mut file = match fs.open(&path, OpenOptions::read()).await {
                Ok(file) => file,
                Err(e) => {
                    yield Err(fs_io_error(e));
                    return;
                }
            };
            if start > 0 {
                if let Err(e) = file.seek(SeekFrom::Start(start)).await {
                    yield Err(fs_io_error(e));
                    return;
                }
            }
            let mut remaining = len;
            while remaining > 0 {
                let chunk = cmp::min(READ_BUF_SIZE as u64, remaining) as usize;
                match file.read_bytes(chunk).await {
                    Ok(data) if data.is_empty() => break,
                    Ok(mut data) => {
                        if data.len() as u64 > remaining {
                            data.truncate(remaining as usize);
                        }
                        remaining -= data.len() as u64;
                        yield Ok(data);
                    }
                    Err(e) => {
                        yield Err(fs_io_error(e));
                        break;
                    }
                }
            }
        })
    }
}

fn fs_io_error(e: FsError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}
