//
// Error taxonomy of the engine.
//
// Every error kind maps to exactly one HTTP status. Errors are raised in
// the method handlers and the precondition evaluator, carried up through
// the dispatcher, and converted to a response exactly once.
//
use std::io;

use http::StatusCode;
use thiserror::Error;

use crate::fs::FsError;

pub type DavResult<T> = Result<T, DavError>;

/// Typed request-processing errors, each with a canonical HTTP status.
#[derive(Debug, Error)]
pub enum DavError {
    /// Mutating method while the server is in read-only mode.
    #[error("Server is in read-only mode")]
    ReadOnly,

    /// A covering lock exists and no matching token was supplied.
    #[error("Resource is locked")]
    Locked,

    /// Request body exceeds the configured upload limit.
    #[error("Upload exceeds maximum size")]
    UploadTooLarge,

    /// Safe method with a matching If-None-Match.
    #[error("Not modified")]
    NotModified,

    /// If-Match miss, or If-None-Match `*` on an existing resource.
    #[error("ETag precondition failed")]
    ETagMismatch,

    /// COPY/MOVE without a Destination header.
    #[error("Missing Destination header")]
    MissingDestination,

    /// Malformed, cross-host or traversal Destination.
    #[error("Invalid Destination header")]
    InvalidDestination,

    /// COPY/MOVE onto itself.
    #[error("Source and destination are the same resource")]
    SameSourceDestination,

    /// Destination exists and Overwrite is "F".
    #[error("Destination exists and Overwrite is false")]
    DestinationExists,

    /// PUT/MKCOL/COPY/MOVE below a parent that is not a collection.
    #[error("Parent collection does not exist")]
    MissingParent,

    /// Traversal signal or containment violation anywhere in the path.
    #[error("Access denied")]
    PathForbidden,

    /// Operation on a null resource that does not accept it.
    #[error("Not found")]
    NotFound,

    /// PUT on a collection, MKCOL on an existing resource, and friends.
    #[error("{0}")]
    MethodNotAllowed(&'static str),

    /// MKCOL conflicts, UNLOCK with an unknown token.
    #[error("{0}")]
    Conflict(&'static str),

    /// Request XML body did not parse.
    #[error("Malformed XML body")]
    XmlParse,

    #[error("Not implemented")]
    NotImplemented,

    /// Not one of the methods the dispatcher routes.
    #[error("Unknown method")]
    UnknownDavMethod,

    /// Plain status passthrough.
    #[error("{0}")]
    Status(StatusCode),

    #[error("filesystem: {0}")]
    Fs(#[from] FsError),

    #[error("i/o: {0}")]
    Io(#[from] io::Error),
}

impl DavError {
    pub fn statuscode(&self) -> StatusCode {
        use DavError::*;
        match self {
            ReadOnly | PathForbidden | MissingDestination | InvalidDestination
            | SameSourceDestination => StatusCode::FORBIDDEN,
            Locked => StatusCode::LOCKED,
            UploadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            NotModified => StatusCode::NOT_MODIFIED,
            ETagMismatch | DestinationExists => StatusCode::PRECONDITION_FAILED,
            MissingParent | Conflict(_) => StatusCode::CONFLICT,
            NotFound => StatusCode::NOT_FOUND,
            MethodNotAllowed(_) | UnknownDavMethod => StatusCode::METHOD_NOT_ALLOWED,
            XmlParse => StatusCode::BAD_REQUEST,
            NotImplemented => StatusCode::NOT_IMPLEMENTED,
            Status(sc) => *sc,
            Fs(e) => e.statuscode(),
            Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    // When the request body was not drained we cannot reuse the connection.
    pub(crate) fn must_close(&self) -> bool {
        matches!(self, DavError::UploadTooLarge | DavError::UnknownDavMethod)
    }
}

impl From<StatusCode> for DavError {
    fn from(sc: StatusCode) -> Self {
        DavError::Status(sc)
    }
}
