use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use http::{Request, Response, StatusCode};
use log::debug;

use super::{RequestCtx, ResourceView};
use crate::body::Body;
use crate::conditional::{check_mutation, MutationChecks};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::multierror::MultiError;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_delete(
        &self,
        req: &Request<()>,
        ctx: &RequestCtx,
    ) -> DavResult<Response<Body>> {
        let inner = &self.inner;

        if !ctx.view.exists() {
            return Err(DavError::NotFound);
        }
        if ctx.path.is_root() {
            return Err(DavError::PathForbidden);
        }

        check_mutation(inner, req, &ctx.path, ctx.view.meta(), MutationChecks::none(), &ctx.cache)
            .await?;

        let internal = ctx.path.as_internal_string();

        match &ctx.view {
            ResourceView::File(_) => {
                inner.fs.remove_file(&ctx.path).await?;
                if let Err(e) = inner.props.remove_all(&internal).await {
                    debug!("property cleanup for {} failed: {}", internal, e);
                }
                ctx.cache.invalidate(&ctx.path);
                let mut res = Response::new(Body::empty());
                *res.status_mut() = StatusCode::NO_CONTENT;
                Ok(res)
            }
            ResourceView::Collection(_) => {
                let mut errors = MultiError::new();
                let deleted = self.delete_tree(ctx.path.clone(), &mut errors).await;
                if deleted {
                    if let Err(e) = inner.props.remove_all(&internal).await {
                        debug!("property cleanup for {} failed: {}", internal, e);
                    }
                }
                ctx.cache.invalidate(&ctx.path);
                Ok(errors.into_response(StatusCode::NO_CONTENT))
            }
            ResourceView::Null => unreachable!(),
        }
    }

    // Depth-first removal. Per-member failures are recorded and the
    // siblings keep going; the directory itself is only removed when all
    // of its children went away.
    pub(crate) fn delete_tree<'a>(
        &'a self,
        path: DavPath,
        errors: &'a mut MultiError,
    ) -> BoxFuture<'a, bool> {
        async move {
            let inner = &self.inner;

            let mut children = Vec::new();
            match inner.fs.read_dir(&path).await {
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
                    debug!("read_dir {:?} failed: {}", path, e);
                    errors.add(path.as_url_string_with_prefix(), StatusCode::FORBIDDEN);
                    return false;
                }
            }

            let mut all_ok = true;
            for (name, is_dir) in children {
                let mut child = path.clone();
                child.push_segment(&name);
                if is_dir {
                    child.add_slash();
                    if self.delete_tree(child.clone(), errors).await {
                        let _ = inner.props.remove_all(&child.as_internal_string()).await;
                    } else {
                        all_ok = false;
                    }
                } else {
                    match inner.fs.remove_file(&child).await {
                        Ok(()) => {
                            let _ = inner.props.remove_all(&child.as_internal_string()).await;
                        }
                        Err(e) => {
                            debug!("delete {:?} failed: {}", child, e);
                            errors.add(child.as_url_string_with_prefix(), StatusCode::FORBIDDEN);
                            all_ok = false;
                        }
                    }
                }
            }

            if !all_ok {
                return false;
            }
            match inner.fs.remove_dir(&path).await {
                Ok(()) => true,
                Err(e) => {
                    debug!("remove_dir {:?} failed: {}", path, e);
                    errors.add(path.as_url_string_with_prefix(), StatusCode::FORBIDDEN);
                    false
                }
            }
        }
        .boxed()
    }
}
