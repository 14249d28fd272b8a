//! Precondition evaluation for mutating methods.
//!
//! Checks run in a fixed order: read-only mode, upload size, the lock
//! gate, parent existence, then the ETag preconditions. The first
//! failure wins and maps to its taxonomized error.

use std::sync::Arc;

use http::Request;

use crate::davhandler::DavInner;
use crate::davheaders;
use crate::davpath::DavPath;
use crate::errors::{DavError, DavResult};
use crate::etag::{self, Etag};
use crate::fs::DavMetaData;
use crate::statcache::StatCache;

pub(crate) struct MutationChecks {
    /// Require the parent of the target to be an existing collection.
    pub parent_must_exist: bool,
    /// Evaluate If-Match / If-None-Match against the target.
    pub check_etag: bool,
    /// Declared request body size, when the method carries one.
    pub content_length: Option<u64>,
}

impl MutationChecks {
    pub(crate) fn none() -> MutationChecks {
        MutationChecks {
            parent_must_exist: false,
            check_etag: false,
            content_length: None,
        }
    }

    pub(crate) fn with_parent() -> MutationChecks {
        MutationChecks {
            parent_must_exist: true,
            ..MutationChecks::none()
        }
    }
}

/// The lock gate on its own: 423 unless no covering lock exists or the
/// request carries a matching token. COPY/MOVE run this against the
/// destination as well.
pub(crate) async fn check_lock_gate(
    inner: &DavInner,
    req: &Request<()>,
    path: &DavPath,
) -> DavResult<()> {
    if let Some(ls) = &inner.ls {
        let internal = path.as_internal_string();
        if ls.is_locked(&internal).await {
            let token = davheaders::lock_token(req);
            if !ls.can_modify(&internal, token.as_deref()).await {
                return Err(DavError::Locked);
            }
        }
    }
    Ok(())
}

/// Full precondition ladder for a mutating request against `path`.
pub(crate) async fn check_mutation(
    inner: &DavInner,
    req: &Request<()>,
    path: &DavPath,
    meta: Option<&Arc<dyn DavMetaData>>,
    checks: MutationChecks,
    cache: &StatCache,
) -> DavResult<()> {
    if inner.read_only {
        return Err(DavError::ReadOnly);
    }

    if let (Some(max), Some(len)) = (inner.max_upload_size, checks.content_length) {
        if len > max {
            return Err(DavError::UploadTooLarge);
        }
    }

    check_lock_gate(inner, req, path).await?;

    if checks.parent_must_exist {
        let parent = path.parent();
        let parent_ok = cache
            .metadata(&*inner.fs, &parent)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !parent_ok {
            return Err(DavError::MissingParent);
        }
    }

    if checks.check_etag {
        let etag = meta.map(|m| Etag::from_meta(&**m, path));
        etag::check_if_none_match(req, etag.as_ref(), false)?;
        etag::check_if_match(req, etag.as_ref())?;
    }

    Ok(())
}
