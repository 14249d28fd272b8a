use http::{Request, Response, StatusCode};

use super::RequestCtx;
use crate::body::Body;
use crate::conditional::{check_mutation, MutationChecks};
use crate::errors::DavError;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_mkcol(
        &self,
        req: &Request<()>,
        ctx: &RequestCtx,
    ) -> DavResult<Response<Body>> {
        let inner = &self.inner;

        if ctx.view.exists() {
            return Err(DavError::MethodNotAllowed("Resource already exists"));
        }

        check_mutation(
            inner,
            req,
            &ctx.path,
            None,
            MutationChecks::with_parent(),
            &ctx.cache,
        )
        .await?;

        inner.fs.create_dir(&ctx.path).await?;
        ctx.cache.invalidate(&ctx.path);

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::CREATED;
        res.headers_mut().insert(
            "location",
            ctx.path.as_url_string_with_prefix().parse().unwrap(),
        );
        res.headers_mut()
            .insert("content-length", "0".parse().unwrap());
        Ok(res)
    }
}
