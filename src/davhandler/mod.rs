//
// This module contains the main entry point of the library,
// DavHandler.
//
use std::error::Error as StdError;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Buf;
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;
use log::{debug, error};

use crate::auth::{
    action_for, AllowAllAuthorizer, AnonymousAuthenticator, Authenticator, Authorizer,
    DenyAllAuthenticator, Principal,
};
use crate::body::Body;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::fs::localfs::LocalFs;
use crate::fs::{DavFileSystem, DavMetaData, FsError};
use crate::locks::filels::FileLockStore;
use crate::locks::memls::MemLockStore;
use crate::locks::LockStore;
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::props::fileprops::FilePropStore;
use crate::props::memprops::MemPropStore;
use crate::props::PropertyStore;
use crate::statcache::StatCache;
use crate::throttle::{self, Throttle, ThrottleConfig, ThrottleReject};
use crate::util::{dav_method, DavMethod, DavMethodSet, ALLOW_HEADER};
use crate::DavResult;

pub mod handle_copymove;
pub mod handle_delete;
pub mod handle_gethead;
pub mod handle_lock;
pub mod handle_mkcol;
pub mod handle_options;
pub mod handle_props;
pub mod handle_put;

// Request bodies for the XML methods are read whole, capped here.
const MAX_XML_BODY: usize = 65536;
// Interval of the lock-expiry and throttle-eviction sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// File system backend selection.
#[derive(Clone)]
pub enum FileSystem {
    /// Serve a local directory.
    Local { base: PathBuf },
    Custom(Arc<dyn DavFileSystem>),
}

impl FileSystem {
    /// Serve a local directory.
    pub fn local(path: impl Into<PathBuf>) -> Self {
        FileSystem::Local { base: path.into() }
    }

    fn build(self) -> Arc<dyn DavFileSystem> {
        match self {
            FileSystem::Local { base } => LocalFs::new(base),
            FileSystem::Custom(fs) => fs,
        }
    }
}

/// Property store backend selection.
#[derive(Clone, Default)]
pub enum PropertyBackend {
    #[default]
    Memory,
    /// Hidden sibling JSON documents under the given root.
    File(PathBuf),
    Custom(Arc<dyn PropertyStore>),
}

impl PropertyBackend {
    fn build(self) -> Arc<dyn PropertyStore> {
        match self {
            PropertyBackend::Memory => MemPropStore::new(),
            PropertyBackend::File(root) => FilePropStore::new(root),
            PropertyBackend::Custom(store) => store,
        }
    }
}

/// Lock store backend selection.
#[derive(Clone, Default)]
pub enum LockBackend {
    #[default]
    Memory,
    /// JSON document surviving restarts.
    Persistent(PathBuf),
    Custom(Arc<dyn LockStore>),
}

impl LockBackend {
    fn build(self) -> Arc<dyn LockStore> {
        match self {
            LockBackend::Memory => MemLockStore::new(),
            LockBackend::Persistent(path) => FileLockStore::open_or_default(path),
            LockBackend::Custom(store) => store,
        }
    }
}

/// Configuration of the handler.
#[derive(Clone)]
pub struct DavBuilder {
    /// Prefix to be stripped off when handling request.
    prefix: String,
    /// Filesystem backend.
    fs: FileSystem,
    /// Property store backend.
    props: PropertyBackend,
    /// Lock store backend; unused when locking is disabled.
    locks: LockBackend,
    /// Set of allowed methods (Defaults to "all methods").
    allow: DavMethodSet,
    enable_locking: bool,
    read_only: bool,
    allow_anonymous: bool,
    max_upload_size: Option<u64>,
    throttle: Option<ThrottleConfig>,
    authenticator: Option<Arc<dyn Authenticator>>,
    authorizer: Option<Arc<dyn Authorizer>>,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl DavBuilder {
    /// Create a new configuration builder.
    pub fn new(fs: FileSystem) -> DavBuilder {
        Self {
            prefix: String::new(),
            fs,
            props: PropertyBackend::default(),
            locks: LockBackend::default(),
            allow: DavMethodSet::all(),
            enable_locking: true,
            read_only: false,
            allow_anonymous: true,
            max_upload_size: None,
            throttle: None,
            authenticator: None,
            authorizer: None,
            metrics: None,
        }
    }

    /// Use the configuration that was built to generate a DavHandler.
    pub fn build(self) -> DavHandler {
        self.into()
    }

    /// Prefix to be stripped off before translating the rest of
    /// the request path to a filesystem path.
    pub fn strip_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Select the property store backend.
    pub fn property_backend(mut self, props: PropertyBackend) -> Self {
        self.props = props;
        self
    }

    /// Select the lock store backend.
    pub fn lock_backend(mut self, locks: LockBackend) -> Self {
        self.locks = locks;
        self
    }

    /// Which methods to allow (default is all methods).
    pub fn methods(mut self, allow: DavMethodSet) -> Self {
        self.allow = allow;
        self
    }

    /// Enable or disable LOCK/UNLOCK support (default enabled).
    pub fn locking(mut self, enable: bool) -> Self {
        self.enable_locking = enable;
        self
    }

    /// Reject every mutating method with 403.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Permit requests without credentials when no authenticator is
    /// configured (default true).
    pub fn allow_anonymous(mut self, allow: bool) -> Self {
        self.allow_anonymous = allow;
        self
    }

    /// Upper bound on PUT bodies, enforced while streaming.
    pub fn max_upload_size(mut self, max: u64) -> Self {
        self.max_upload_size = Some(max);
        self
    }

    /// Enable the throttle gate.
    pub fn throttle(mut self, cfg: ThrottleConfig) -> Self {
        self.throttle = Some(cfg);
        self
    }

    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

pub(crate) struct DavInner {
    pub(crate) prefix: String,
    pub(crate) fs: Arc<dyn DavFileSystem>,
    pub(crate) ls: Option<Arc<dyn LockStore>>,
    pub(crate) props: Arc<dyn PropertyStore>,
    pub(crate) allow: DavMethodSet,
    pub(crate) read_only: bool,
    pub(crate) max_upload_size: Option<u64>,
    pub(crate) authenticator: Arc<dyn Authenticator>,
    pub(crate) authorizer: Arc<dyn Authorizer>,
    pub(crate) metrics: Arc<dyn MetricsSink>,
    pub(crate) throttle: Option<Throttle>,
}

/// What the single dispatch-time stat said about the request path.
pub(crate) enum ResourceView {
    File(Arc<dyn DavMetaData>),
    Collection(Arc<dyn DavMetaData>),
    Null,
}

impl ResourceView {
    pub(crate) fn meta(&self) -> Option<&Arc<dyn DavMetaData>> {
        match self {
            ResourceView::File(m) | ResourceView::Collection(m) => Some(m),
            ResourceView::Null => None,
        }
    }

    pub(crate) fn exists(&self) -> bool {
        !matches!(self, ResourceView::Null)
    }
}

/// Per-request context: the parsed path, the resource view from the
/// dispatch-time stat, the request-scoped stat cache, and the
/// authenticated principal.
pub(crate) struct RequestCtx {
    pub(crate) path: DavPath,
    pub(crate) view: ResourceView,
    pub(crate) cache: StatCache,
    pub(crate) principal: Option<Principal>,
}

/// The webdav handler struct.
///
/// The handler is cheap to clone; clones share the stores.
#[derive(Clone)]
pub struct DavHandler {
    pub(crate) inner: Arc<DavInner>,
}

impl From<DavBuilder> for DavHandler {
    fn from(cfg: DavBuilder) -> Self {
        let ls = if cfg.enable_locking {
            Some(cfg.locks.build())
        } else {
            None
        };
        let authenticator = cfg.authenticator.unwrap_or_else(|| {
            if cfg.allow_anonymous {
                Arc::new(AnonymousAuthenticator)
            } else {
                Arc::new(DenyAllAuthenticator)
            }
        });
        let inner = Arc::new(DavInner {
            prefix: cfg.prefix,
            fs: cfg.fs.build(),
            ls,
            props: cfg.props.build(),
            allow: cfg.allow,
            read_only: cfg.read_only,
            max_upload_size: cfg.max_upload_size,
            authenticator,
            authorizer: cfg.authorizer.unwrap_or_else(|| Arc::new(AllowAllAuthorizer)),
            metrics: cfg.metrics.unwrap_or_else(|| Arc::new(NoopMetrics)),
            throttle: cfg.throttle.map(Throttle::new),
        });
        let handler = DavHandler { inner };
        handler.spawn_sweeps();
        handler
    }
}

impl DavHandler {
    /// Return a configuration builder.
    pub fn builder(fs: FileSystem) -> DavBuilder {
        DavBuilder::new(fs)
    }

    /// Handle a webdav request.
    pub async fn handle<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        let started = Instant::now();
        let method = req.method().as_str().to_string();
        self.inner.metrics.request_started(&method);

        let res = self.handle_gates(req).await;
        self.inner
            .metrics
            .request_finished(&method, res.status().as_u16(), started.elapsed());
        res
    }

    /// Release the stores. Call once when shutting the server down.
    pub async fn shutdown(&self) {
        if let Err(e) = self.inner.props.close().await {
            error!("property store close failed: {}", e);
        }
        if let Some(ls) = &self.inner.ls {
            ls.close().await;
        }
    }

    // Periodic background work: lock expiry and throttle eviction.
    // Only spawned when a tokio runtime is available; both stores also
    // prune lazily on every query.
    fn spawn_sweeps(&self) {
        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            return;
        };
        if let Some(ls) = self.inner.ls.clone() {
            rt.spawn(async move {
                let mut tick = tokio::time::interval(SWEEP_INTERVAL);
                loop {
                    tick.tick().await;
                    ls.remove_expired().await;
                }
            });
        }
        if self.inner.throttle.is_some() {
            let inner = Arc::clone(&self.inner);
            rt.spawn(async move {
                let mut tick = tokio::time::interval(SWEEP_INTERVAL);
                loop {
                    tick.tick().await;
                    if let Some(t) = &inner.throttle {
                        t.evict_idle();
                    }
                }
            });
        }
    }

    // Authentication runs first, the throttle second, then the
    // dispatcher proper. Errors become responses exactly once, here.
    async fn handle_gates<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let (req, body) = {
            let (parts, body) = req.into_parts();
            (Request::from_parts(parts, ()), body)
        };
        let inner = &self.inner;

        // authentication
        let principal = match inner.authenticator.authenticate(&req).await {
            Ok(principal) => principal,
            Err(()) => {
                let mut res = Response::new(Body::from("Unauthorized"));
                *res.status_mut() = StatusCode::UNAUTHORIZED;
                res.headers_mut().insert(
                    "www-authenticate",
                    inner.authenticator.challenge().parse().unwrap(),
                );
                return res;
            }
        };

        // authorization
        let method = dav_method(req.method()).ok();
        let auth_path = {
            let p = req.uri().path();
            p.strip_prefix(inner.prefix.as_str()).unwrap_or(p).to_string()
        };
        if let Err(reason) = inner
            .authorizer
            .authorize(principal.as_ref(), action_for(method), &auth_path)
            .await
        {
            let mut res = Response::new(Body::from(reason));
            *res.status_mut() = StatusCode::FORBIDDEN;
            return res;
        }

        // throttle
        let permit = match &inner.throttle {
            Some(throttle) => {
                let client = throttle::client_key(&req);
                match throttle.acquire(&client) {
                    Ok(permit) => Some(permit),
                    Err(reject) => return self.throttle_reject(reject),
                }
            }
            None => None,
        };

        let mut res = match self.handle2(req, body, principal).await {
            Ok(res) => {
                debug!("== END REQUEST result OK");
                res
            }
            Err(err) => {
                debug!("== END REQUEST result {:?}", err);
                error_response(err)
            }
        };

        if let (Some(throttle), Some(permit)) = (&inner.throttle, &permit) {
            throttle::stamp(res.headers_mut(), throttle.limit(), permit.remaining);
        }
        res
    }

    fn throttle_reject(&self, reject: ThrottleReject) -> Response<Body> {
        let throttle = self.inner.throttle.as_ref().unwrap();
        let mut res = Response::new(Body::from("Too many requests"));
        *res.status_mut() = StatusCode::TOO_MANY_REQUESTS;
        let h = res.headers_mut();
        h.insert("x-ratelimit-limit", throttle::num_header(throttle.limit() as u64));
        h.insert("x-ratelimit-remaining", throttle::num_header(0));
        match reject {
            ThrottleReject::Concurrency => {
                h.insert("retry-after", throttle::num_header(1));
            }
            ThrottleReject::Rate { reset_epoch } => {
                h.insert("retry-after", throttle::num_header(throttle.window_secs()));
                h.insert("x-ratelimit-reset", throttle::num_header(reset_epoch));
            }
        }
        res
    }

    // drain request body and return it, bounded.
    pub(crate) async fn read_request<ReqBody, ReqData, ReqError>(
        &self,
        body: ReqBody,
        max_size: usize,
    ) -> DavResult<Vec<u8>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let mut data = Vec::new();
        pin_utils::pin_mut!(body);
        while let Some(res) = body.data().await {
            let mut buf = res.map_err(|_| {
                DavError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "UnexpectedEof"))
            })?;
            while buf.has_remaining() {
                if data.len() + buf.remaining() > max_size {
                    return Err(DavError::UploadTooLarge);
                }
                let b = buf.chunk();
                let l = b.len();
                data.extend_from_slice(b);
                buf.advance(l);
            }
        }
        Ok(data)
    }

    // internal dispatcher.
    async fn handle2<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<()>,
        body: ReqBody,
        principal: Option<Principal>,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let inner = &self.inner;

        // translate HTTP method to Webdav method.
        let method = match dav_method(req.method()) {
            Ok(m) => m,
            Err(e) => {
                debug!("refusing method {} request {}", req.method(), req.uri());
                return Err(e);
            }
        };

        // see if method is allowed.
        if !inner.allow.contains_method(method) {
            debug!(
                "method {} not allowed on request {}",
                req.method(),
                req.uri()
            );
            return Err(DavError::MethodNotAllowed("Method not allowed"));
        }

        // make sure the request path is valid.
        let mut path = DavPath::from_uri_and_prefix(req.uri(), &inner.prefix)?;

        // PUT is the only handler that reads the body itself. All the
        // other handlers either expect no body, or a pre-read Vec<u8>.
        let (body_strm, body_data) = match method {
            DavMethod::Put => (Some(body), Vec::new()),
            _ => (None, self.read_request(body, MAX_XML_BODY).await?),
        };

        // Not all methods accept a body.
        match method {
            DavMethod::Put | DavMethod::PropFind | DavMethod::PropPatch | DavMethod::Lock => {}
            _ => {
                if !body_data.is_empty() {
                    return Err(DavError::Status(StatusCode::UNSUPPORTED_MEDIA_TYPE));
                }
            }
        }

        debug!("== START REQUEST {:?} {}", method, path);

        // one stat, classifying the resource for the whole request.
        let cache = StatCache::new();
        let view = match cache.metadata(&*inner.fs, &path).await {
            Ok(meta) if meta.is_dir() => {
                path.add_slash();
                ResourceView::Collection(meta)
            }
            Ok(meta) => ResourceView::File(meta),
            Err(FsError::NotFound) => ResourceView::Null,
            Err(FsError::Forbidden) => return Err(DavError::PathForbidden),
            Err(e) => return Err(e.into()),
        };

        let ctx = RequestCtx {
            path,
            view,
            cache,
            principal,
        };

        match method {
            DavMethod::Options => self.handle_options(&req, &ctx).await,
            DavMethod::PropFind => self.handle_propfind(&req, &ctx, &body_data).await,
            DavMethod::PropPatch => self.handle_proppatch(&req, &ctx, &body_data).await,
            DavMethod::MkCol => self.handle_mkcol(&req, &ctx).await,
            DavMethod::Delete => self.handle_delete(&req, &ctx).await,
            DavMethod::Lock => self.handle_lock(&req, &ctx, &body_data).await,
            DavMethod::Unlock => self.handle_unlock(&req, &ctx).await,
            DavMethod::Head | DavMethod::Get => self.handle_get(&req, &ctx).await,
            DavMethod::Copy | DavMethod::Move => self.handle_copymove(&req, &ctx, method).await,
            DavMethod::Put => self.handle_put(&req, &ctx, body_strm.unwrap()).await,
        }
    }
}

// Turn a DavError into its canonical response.
fn error_response(err: DavError) -> Response<Body> {
    let status = err.statuscode();
    let mut res = match err {
        DavError::NotModified => Response::new(Body::empty()),
        _ => Response::new(Body::from(err.to_string())),
    };
    *res.status_mut() = status;
    if status == StatusCode::METHOD_NOT_ALLOWED {
        res.headers_mut()
            .insert("allow", ALLOW_HEADER.parse().unwrap());
    }
    if !matches!(err, DavError::NotModified) {
        res.headers_mut().insert(
            "content-type",
            "text/plain; charset=utf-8".parse().unwrap(),
        );
    }
    if err.must_close() {
        res.headers_mut()
            .insert("connection", "close".parse().unwrap());
    }
    res
}
