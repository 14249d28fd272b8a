use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use http::{Request, Response, StatusCode};
use log::debug;

use super::{RequestCtx, ResourceView};
use crate::body::Body;
use crate::conditional::{check_lock_gate, check_mutation, MutationChecks};
use crate::davheaders;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::etag::Etag;
use crate::fs::FsError;
use crate::multierror::MultiError;
use crate::util::{systemtime_to_httpdate, DavMethod};
use crate::DavResult;

// COPY on a collection accepts Depth 0 or infinity only.
enum CopyDepth {
    Zero,
    Infinity,
}

impl crate::DavHandler {
    pub(crate) async fn handle_copymove(
        &self,
        req: &Request<()>,
        ctx: &RequestCtx,
        method: DavMethod,
    ) -> DavResult<Response<Body>> {
        let inner = &self.inner;

        if !ctx.view.exists() {
            return Err(DavError::NotFound);
        }

        let mut dest = davheaders::destination(req, &inner.prefix)?;
        if ctx.path == dest {
            return Err(DavError::SameSourceDestination);
        }
        let overwrite = davheaders::overwrite(req);

        // MOVE mutates the source; both need read-only and lock checks.
        if method == DavMethod::Move {
            check_mutation(inner, req, &ctx.path, ctx.view.meta(), MutationChecks::none(), &ctx.cache)
                .await?;
        } else if inner.read_only {
            return Err(DavError::ReadOnly);
        }
        check_lock_gate(inner, req, &dest).await?;

        // classify the destination
        let dest_view = match ctx.cache.metadata(&*inner.fs, &dest).await {
            Ok(meta) if meta.is_dir() => {
                dest.add_slash();
                ResourceView::Collection(meta)
            }
            Ok(meta) => ResourceView::File(meta),
            Err(FsError::NotFound) => ResourceView::Null,
            Err(e) => return Err(e.into()),
        };
        let dest_existed = dest_view.exists();

        if dest_existed && !overwrite {
            return Err(DavError::DestinationExists);
        }
        let parent_ok = ctx
            .cache
            .metadata(&*inner.fs, &dest.parent())
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !parent_ok {
            return Err(DavError::MissingParent);
        }

        // overwrite: the existing destination goes away first
        if dest_existed {
            let mut scrap = MultiError::new();
            let ok = match &dest_view {
                ResourceView::Collection(_) => self.delete_tree(dest.clone(), &mut scrap).await,
                ResourceView::File(_) => inner.fs.remove_file(&dest).await.is_ok(),
                ResourceView::Null => true,
            };
            if !ok {
                return Err(DavError::Status(StatusCode::INTERNAL_SERVER_ERROR));
            }
            let _ = inner.props.remove_all(&dest.as_internal_string()).await;
            ctx.cache.invalidate(&dest);
        }

        let src_internal = ctx.path.as_internal_string();
        let dst_internal = dest.as_internal_string();

        let result = match &ctx.view {
            ResourceView::File(_) => {
                self.copymove_file(ctx, &dest, method).await?;
                match method {
                    DavMethod::Move => {
                        let _ = inner.props.move_props(&src_internal, &dst_internal).await;
                    }
                    _ => {
                        let _ = inner.props.copy_props(&src_internal, &dst_internal).await;
                    }
                }
                MultiError::new()
            }
            ResourceView::Collection(_) => {
                self.copymove_collection(req, ctx, &dest, method).await?
            }
            ResourceView::Null => unreachable!(),
        };

        ctx.cache.invalidate(&ctx.path);
        ctx.cache.invalidate(&dest);

        if !result.is_empty() {
            return Ok(result.into_response(StatusCode::CREATED));
        }
        if dest_existed {
            let mut res = Response::new(Body::empty());
            *res.status_mut() = StatusCode::NO_CONTENT;
            return Ok(res);
        }

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::CREATED;
        res.headers_mut()
            .insert("location", dest.as_url_string_with_prefix().parse().unwrap());
        if let Ok(meta) = ctx.cache.metadata(&*inner.fs, &dest).await {
            if meta.is_file() {
                let etag = Etag::from_meta(&*meta, &dest);
                res.headers_mut()
                    .insert("etag", etag.quoted().parse().unwrap());
                if let Ok(mtime) = meta.modified() {
                    res.headers_mut().insert(
                        "last-modified",
                        systemtime_to_httpdate(mtime).parse().unwrap(),
                    );
                }
            }
        }
        res.headers_mut()
            .insert("content-length", "0".parse().unwrap());
        Ok(res)
    }

    async fn copymove_file(
        &self,
        ctx: &RequestCtx,
        dest: &DavPath,
        method: DavMethod,
    ) -> DavResult<()> {
        let inner = &self.inner;
        match method {
            DavMethod::Copy => Ok(inner.fs.copy(&ctx.path, dest).await?),
            DavMethod::Move => {
                // rename first; fall back to copy-then-delete across
                // filesystem boundaries.
                if inner.fs.rename(&ctx.path, dest).await.is_ok() {
                    return Ok(());
                }
                inner.fs.copy(&ctx.path, dest).await?;
                inner.fs.remove_file(&ctx.path).await?;
                Ok(())
            }
            _ => unreachable!(),
        }
    }

    async fn copymove_collection(
        &self,
        req: &Request<()>,
        ctx: &RequestCtx,
        dest: &DavPath,
        method: DavMethod,
    ) -> DavResult<MultiError> {
        let inner = &self.inner;
        let src_internal = ctx.path.as_internal_string();
        let dst_internal = dest.as_internal_string();

        if method == DavMethod::Move {
            let mut errors = MultiError::new();
            if inner.fs.rename(&ctx.path, dest).await.is_ok() {
                let _ = inner.props.move_props(&src_internal, &dst_internal).await;
                return Ok(errors);
            }
            // rename failed: copy the tree over, then delete the source,
            // tracking per-member failures in both phases.
            inner.fs.create_dir(dest).await?;
            self.copy_tree(ctx.path.clone(), dest.clone(), &mut errors).await;
            if errors.is_empty() {
                self.delete_tree(ctx.path.clone(), &mut errors).await;
            }
            let _ = inner.props.move_props(&src_internal, &dst_internal).await;
            return Ok(errors);
        }

        // COPY: depth 0 or infinity; anything else is a client error.
        let depth = match req.headers().get("depth").and_then(|v| v.to_str().ok()) {
            None => CopyDepth::Infinity,
            Some("0") => CopyDepth::Zero,
            Some(s) if s.eq_ignore_ascii_case("infinity") => CopyDepth::Infinity,
            Some(_) => return Err(DavError::Status(StatusCode::BAD_REQUEST)),
        };

        let mut errors = MultiError::new();
        match depth {
            CopyDepth::Zero => {
                inner.fs.create_dir(dest).await?;
                // only the collection's own properties come along
                if let Ok(own) = inner.props.get_all(&src_internal).await {
                    for prop in own.into_values() {
                        let _ = inner.props.set(&dst_internal, prop).await;
                    }
                }
            }
            CopyDepth::Infinity => {
                inner.fs.create_dir(dest).await?;
                self.copy_tree(ctx.path.clone(), dest.clone(), &mut errors).await;
                let _ = inner.props.copy_props(&src_internal, &dst_internal).await;
            }
        }
        Ok(errors)
    }

    // Recursive tree copy; failures are recorded per member and the walk
    // continues with the siblings.
    pub(crate) fn copy_tree<'a>(
        &'a self,
        from: DavPath,
        to: DavPath,
        errors: &'a mut MultiError,
    ) -> BoxFuture<'a, ()> {
        async move {
            let inner = &self.inner;

            let mut children = Vec::new();
            match inner.fs.read_dir(&from).await {
                Ok(mut entries) => {
                    while let Some(entry) = entries.next().await {
                        let is_dir = entry
                            .metadata()
                            .await
                            .map(|m| m.is_dir())
                            .unwrap_or(false);
                        children.push((entry.name(), is_dir));
                    }
                }
                Err(e) => {
                    debug!("read_dir {:?} failed: {}", from, e);
                    errors.add(from.as_url_string_with_prefix(), StatusCode::FORBIDDEN);
                    return;
                }
            }

            for (name, is_dir) in children {
                let mut src = from.clone();
                src.push_segment(&name);
                let mut dst = to.clone();
                dst.push_segment(&name);
                if is_dir {
                    src.add_slash();
                    dst.add_slash();
                    if let Err(e) = inner.fs.create_dir(&dst).await {
                        debug!("create_dir {:?} failed: {}", dst, e);
                        errors.add(src.as_url_string_with_prefix(), StatusCode::FORBIDDEN);
                        continue;
                    }
                    self.copy_tree(src, dst, errors).await;
                } else if let Err(e) = inner.fs.copy(&src, &dst).await {
                    debug!("copy {:?} failed: {}", src, e);
                    errors.add(src.as_url_string_with_prefix(), StatusCode::FORBIDDEN);
                }
            }
        }
        .boxed()
    }
}
