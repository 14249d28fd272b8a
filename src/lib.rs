//! ## Generic async HTTP/Webdav protocol engine
//!
//! [`Webdav`] (RFC4918) is defined as
//! HTTP (GET/HEAD/PUT/DELETE) plus a bunch of extension methods (PROPFIND, etc).
//! These extension methods are used to manage collections (like unix directories),
//! get information on collections, rename and copy items, lock/unlock items, and
//! attach arbitrary "dead" properties to them.
//!
//! A `handler` is a piece of code that takes a `http::Request`, processes it in
//! some way, and then generates a `http::Response`. This library is a `handler`
//! that maps the HTTP/Webdav protocol to a filesystem mounted under a URL
//! prefix, with a persistent property store and a lock store next to it. It
//! enforces the RFC's preconditions (ETags, lock tokens, Overwrite, Depth),
//! reports partial failures as 207 Multi-Status, and rejects every path that
//! carries a traversal signal before anything touches the disk.
//!
//! ## Backend interfaces.
//!
//! The backend interfaces are similar to the ones from the Go `x/net/webdav`
//! package:
//!
//! - the library contains a [HTTP handler][DavHandler].
//! - you supply a [filesystem][fs::DavFileSystem] for backend storage.
//! - dead properties live in a [property store][props::PropertyStore]
//!   (in-memory and file-backed implementations are included).
//! - webdav locks live in a [lock store][locks::LockStore] (in-memory and
//!   persistent implementations are included).
//! - authentication, authorization and metrics are pluggable through the
//!   [auth] and [metrics] traits.
//!
//! The handler works with the standard http types from the `http` and
//! `http_body` crates, so it can be plugged into any HTTP server framework
//! that also works with those types.
//!
//! ## Example.
//!
//! ```no_run
//! use dav_engine::{DavHandler, FileSystem};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handler = DavHandler::builder(FileSystem::local("/tmp"))
//!         .strip_prefix("/dav")
//!         .build();
//!     // hand `handler.handle(req)` the requests of your HTTP server.
//!     let _ = handler;
//! }
//! ```

mod conditional;
mod davhandler;
mod davheaders;
mod errors;
mod multierror;
mod range;
mod statcache;
mod util;
mod xml;

pub mod auth;
pub mod body;
pub mod davpath;
pub mod etag;
pub mod fs;
pub mod locks;
pub mod metrics;
pub mod props;
pub mod throttle;

pub use crate::davhandler::{
    DavBuilder, DavHandler, FileSystem, LockBackend, PropertyBackend,
};
pub use crate::errors::{DavError, DavResult};
pub use crate::range::{ByteRange, ParsedRange};
pub use crate::throttle::ThrottleConfig;
pub use crate::util::{DavMethod, DavMethodSet};
