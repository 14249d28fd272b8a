use http::{Request, Response, StatusCode};
use log::debug;

use super::RequestCtx;
use crate::body::Body;
use crate::davheaders::{self, DavTimeout, Depth};
use crate::errors::DavError;
use crate::locks::DEFAULT_TIMEOUT;
use crate::xml;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_lock(
        &self,
        req: &Request<()>,
        ctx: &RequestCtx,
        body: &[u8],
    ) -> DavResult<Response<Body>> {
        let inner = &self.inner;
        let Some(ls) = &inner.ls else {
            return Err(DavError::MethodNotAllowed("Locking is disabled"));
        };
        if inner.read_only {
            return Err(DavError::ReadOnly);
        }

        let internal = ctx.path.as_internal_string();
        let href = ctx.path.as_url_string_with_prefix();

        // An empty body is a refresh of an existing lock.
        if body.is_empty() {
            let token = davheaders::lock_token(req)
                .ok_or(DavError::Status(StatusCode::PRECONDITION_FAILED))?;
            let lock = ls
                .get(&token)
                .await
                .ok_or(DavError::Status(StatusCode::PRECONDITION_FAILED))?;
            if !lock.covers(&internal) {
                return Err(DavError::Status(StatusCode::PRECONDITION_FAILED));
            }
            let timeout = match davheaders::timeout(req) {
                None => Some(DEFAULT_TIMEOUT),
                Some(DavTimeout::Infinite) => None,
                Some(t) => t.as_duration(),
            };
            let lock = ls
                .refresh(&token, timeout)
                .await
                .ok_or(DavError::Status(StatusCode::PRECONDITION_FAILED))?;
            debug!("lock {} refreshed on {}", token, internal);
            return Ok(lock_ok_response(&xml::lock_response_body(&lock, &href), None));
        }

        // A LOCK on a null resource is valid: it reserves the name.
        let lockinfo = xml::parse_lockinfo(body)?;
        let deep = davheaders::depth(req, Depth::Zero) == Depth::Infinity;
        let timeout = match davheaders::timeout(req) {
            None => Some(DEFAULT_TIMEOUT),
            Some(DavTimeout::Infinite) => None,
            Some(t) => t.as_duration(),
        };
        let owner = lockinfo
            .owner
            .or_else(|| ctx.principal.as_ref().map(|p| p.name.clone()));

        let Some(lock) = ls
            .create(&internal, lockinfo.scope, owner, timeout, deep)
            .await
        else {
            return Err(DavError::Locked);
        };
        debug!("lock {} created on {}", lock.token, internal);

        let token_header = format!("<{}>", lock.token);
        Ok(lock_ok_response(
            &xml::lock_response_body(&lock, &href),
            Some(&token_header),
        ))
    }

    pub(crate) async fn handle_unlock(
        &self,
        req: &Request<()>,
        _ctx: &RequestCtx,
    ) -> DavResult<Response<Body>> {
        let inner = &self.inner;
        let Some(ls) = &inner.ls else {
            return Err(DavError::MethodNotAllowed("Locking is disabled"));
        };
        if inner.read_only {
            return Err(DavError::ReadOnly);
        }

        // UNLOCK requires the Lock-Token header specifically.
        let token = match req
            .headers()
            .get("lock-token")
            .and_then(|v| v.to_str().ok())
        {
            Some(t) => t.trim().trim_start_matches('<').trim_end_matches('>').to_string(),
            None => return Err(DavError::Status(StatusCode::BAD_REQUEST)),
        };

        if !ls.remove(&token).await {
            return Err(DavError::Conflict("No such lock token"));
        }
        debug!("lock {} removed", token);

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::NO_CONTENT;
        Ok(res)
    }
}

fn lock_ok_response(body: &str, lock_token: Option<&str>) -> Response<Body> {
    let mut res = Response::new(Body::from(body.to_string()));
    res.headers_mut().insert(
        "content-type",
        "application/xml; charset=utf-8".parse().unwrap(),
    );
    if let Some(token) = lock_token {
        res.headers_mut()
            .insert("lock-token", token.parse().unwrap());
    }
    res
}
