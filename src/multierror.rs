//! Per-member failure accumulation for recursive collection operations.
//!
//! DELETE/COPY/MOVE on collections keep going past individual failures;
//! each one is recorded here and the whole batch is reported as a single
//! 207 Multi-Status. When nothing failed, the caller's success status is
//! returned instead.

use http::{Response, StatusCode};

use crate::body::Body;
use crate::xml::{status_response, MULTISTATUS_CLOSE, MULTISTATUS_OPEN, XML_DECL};

pub(crate) struct MultiError {
    entries: Vec<(String, StatusCode, Option<String>)>,
}

impl MultiError {
    pub(crate) fn new() -> MultiError {
        MultiError {
            entries: Vec::new(),
        }
    }

    pub(crate) fn add(&mut self, href: String, status: StatusCode) {
        self.entries.push((href, status, None));
    }

    pub(crate) fn add_described(&mut self, href: String, status: StatusCode, text: String) {
        self.entries.push((href, status, Some(text)));
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `success` when no member failed, otherwise a 207 document with
    /// one entry per failed member.
    pub(crate) fn into_response(self, success: StatusCode) -> Response<Body> {
        if self.entries.is_empty() {
            let mut res = Response::new(Body::empty());
            *res.status_mut() = success;
            res.headers_mut()
                .insert("content-length", "0".parse().unwrap());
            return res;
        }

        let mut xml = String::from(XML_DECL);
        xml.push_str(MULTISTATUS_OPEN);
        for (href, status, description) in &self.entries {
            xml.push_str(&status_response(href, *status, description.as_deref()));
        }
        xml.push_str(MULTISTATUS_CLOSE);

        let mut res = Response::new(Body::from(xml));
        *res.status_mut() = StatusCode::MULTI_STATUS;
        res.headers_mut().insert(
            "content-type",
            "application/xml; charset=utf-8".parse().unwrap(),
        );
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yields_success_status() {
        let res = MultiError::new().into_response(StatusCode::NO_CONTENT);
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
    }

    #[test]
    fn entries_yield_multistatus() {
        let mut me = MultiError::new();
        me.add("/dav/a".to_string(), StatusCode::FORBIDDEN);
        me.add_described(
            "/dav/b".to_string(),
            StatusCode::INTERNAL_SERVER_ERROR,
            "disk on fire".to_string(),
        );
        assert!(!me.is_empty());
        let res = me.into_response(StatusCode::NO_CONTENT);
        assert_eq!(res.status(), StatusCode::MULTI_STATUS);
        assert_eq!(
            res.headers().get("content-type").unwrap(),
            "application/xml; charset=utf-8"
        );
    }
}
