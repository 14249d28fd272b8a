use headers::HeaderMapExt;
use http::{Request, Response};

use super::RequestCtx;
use crate::body::Body;
use crate::util::ALLOW_HEADER;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_options(
        &self,
        _req: &Request<()>,
        _ctx: &RequestCtx,
    ) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());

        let h = res.headers_mut();

        // We advertise class 2 support even on paths that currently have
        // no lockable resource; LOCK on a null resource is valid.
        h.insert("DAV", "1,2".parse().unwrap());
        h.insert("MS-Author-Via", "DAV".parse().unwrap());
        h.typed_insert(headers::ContentLength(0));

        let allow = if self.inner.ls.is_some() {
            ALLOW_HEADER.to_string()
        } else {
            ALLOW_HEADER
                .split(", ")
                .filter(|m| *m != "LOCK" && *m != "UNLOCK")
                .collect::<Vec<_>>()
                .join(", ")
        };
        h.insert("allow", allow.parse().unwrap());

        Ok(res)
    }
}
