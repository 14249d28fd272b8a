use std::error::Error as StdError;
use std::io;

use bytes::Buf;
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;
use log::debug;
use uuid::Uuid;

use super::{RequestCtx, ResourceView};
use crate::body::Body;
use crate::conditional::{check_mutation, MutationChecks};
use crate::errors::DavError;
use crate::etag::Etag;
use crate::fs::OpenOptions;
use crate::util::systemtime_to_httpdate;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_put<ReqBody, ReqData, ReqError>(
        &self,
        req: &Request<()>,
        ctx: &RequestCtx,
        body: ReqBody,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let inner = &self.inner;

        if let ResourceView::Collection(_) = ctx.view {
            return Err(DavError::MethodNotAllowed(
                "Cannot PUT to an existing collection",
            ));
        }
        // a path with a trailing slash names a collection
        if ctx.path.is_collection() {
            return Err(DavError::Conflict("Cannot PUT to a collection path"));
        }

        let content_length = req
            .headers()
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        check_mutation(
            inner,
            req,
            &ctx.path,
            ctx.view.meta(),
            MutationChecks {
                parent_must_exist: true,
                check_etag: true,
                content_length,
            },
            &ctx.cache,
        )
        .await?;

        let existed = ctx.view.exists();
        let target = ctx.path.clone();

        // New files are streamed straight into place; replacements go to
        // a sibling temp file first, then over the target.
        let write_path = if existed {
            target.tmp_sibling(&format!(".{}.tmp", Uuid::new_v4().simple()))
        } else {
            target.clone()
        };

        let mut file = inner
            .fs
            .open(&write_path, OpenOptions::write())
            .await?;

        if let Err(e) = self.stream_to_file(&mut *file, body).await {
            drop(file);
            let _ = inner.fs.remove_file(&write_path).await;
            if !existed {
                ctx.cache.invalidate(&target);
            }
            return Err(e);
        }
        file.flush().await?;
        drop(file);

        if existed {
            if let Err(e) = inner.fs.copy(&write_path, &target).await {
                let _ = inner.fs.remove_file(&write_path).await;
                return Err(e.into());
            }
            let _ = inner.fs.remove_file(&write_path).await;
        }

        ctx.cache.invalidate(&target);
        let meta = ctx.cache.metadata(&*inner.fs, &target).await?;

        let mut res = Response::new(Body::empty());
        *res.status_mut() = if existed {
            StatusCode::OK
        } else {
            StatusCode::CREATED
        };
        let etag = Etag::from_meta(&*meta, &target);
        res.headers_mut()
            .insert("etag", etag.quoted().parse().unwrap());
        if let Ok(mtime) = meta.modified() {
            res.headers_mut().insert(
                "last-modified",
                systemtime_to_httpdate(mtime).parse().unwrap(),
            );
        }
        res.headers_mut()
            .insert("content-length", "0".parse().unwrap());
        Ok(res)
    }

    // Stream the request body into the open file, enforcing the upload
    // limit as bytes arrive.
    async fn stream_to_file<ReqBody, ReqData, ReqError>(
        &self,
        file: &mut dyn crate::fs::DavFile,
        body: ReqBody,
    ) -> DavResult<()>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let max = self.inner.max_upload_size;
        let mut written: u64 = 0;
        pin_utils::pin_mut!(body);
        while let Some(chunk) = body.data().await {
            let mut chunk = chunk.map_err(|e| {
                debug!("PUT body error: {}", e);
                DavError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "UnexpectedEof"))
            })?;
            written += chunk.remaining() as u64;
            if let Some(max) = max {
                if written > max {
                    return Err(DavError::UploadTooLarge);
                }
            }
            let data = chunk.copy_to_bytes(chunk.remaining());
            file.write_bytes(data).await?;
        }
        Ok(())
    }
}
