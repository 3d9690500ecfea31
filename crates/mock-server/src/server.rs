//! The hot-swappable HTTP server.
//!
//! Every request goes through a handler indirection: dispatch loads the
//! current [`Router`] under a read lock, while [`MockServer::install`]
//! replaces it under the write lock. A request observes one routing table
//! for its whole lifetime; swapping never drops the listener or in-flight
//! connections.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, Uri};
use hyper_util::rt::{TokioIo, TokioTimer};
use mock_core::{Endpoint, RequestInfo};
use parking_lot::RwLock;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::middleware;
use crate::router::{self, Route, Router};
use crate::sse::{self, EventBroadcaster};
use crate::static_files;

// slow-header defense; response delays are intentionally unbounded
const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(5);

pub type ResponseBody = BoxBody<Bytes, Infallible>;

pub struct MockServer {
    log_path: String,
    router: RwLock<Arc<Router>>,
    static_root: Option<PathBuf>,
    events: Arc<EventBroadcaster>,
}

impl MockServer {
    /// A mock server with an empty routing table; call
    /// [`install`](Self::install) to load endpoints.
    pub fn new(log_path: &str) -> Arc<Self> {
        Arc::new(Self {
            log_path: normalize_log_path(log_path),
            router: RwLock::new(Arc::new(Router::default())),
            static_root: None,
            events: Arc::new(EventBroadcaster::default()),
        })
    }

    /// A plain file server over `root`; no mocking, no observer UI, but
    /// requests are still logged.
    pub fn with_static_root(log_path: &str, root: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            log_path: normalize_log_path(log_path),
            router: RwLock::new(Arc::new(Router::default())),
            static_root: Some(root),
            events: Arc::new(EventBroadcaster::default()),
        })
    }

    pub fn events(&self) -> &Arc<EventBroadcaster> {
        &self.events
    }

    pub fn log_path(&self) -> &str {
        &self.log_path
    }

    /// Build a routing table from `endpoints` and swap it in atomically.
    /// In-flight requests keep the table they started with.
    pub fn install(&self, endpoints: Vec<Endpoint>) {
        let router = Router::build(endpoints);
        info!("updating routes ({} endpoints)", router.endpoints().len());
        for endpoint in router.endpoints() {
            info!("  => {:<6} {}", endpoint.method.as_str(), endpoint.path);
        }
        *self.router.write() = Arc::new(router);
    }

    pub async fn run(self: Arc<Self>, addr: SocketAddr) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        self.serve(listener).await
    }

    /// Accept loop: one spawned task per connection.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        let addr = listener.local_addr()?;
        if self.static_root.is_none() {
            info!(
                "mock server on http://{addr}, request log at http://{addr}{}/",
                self.log_path
            );
        } else {
            info!("static file server on http://{addr}");
        }

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = Arc::clone(&self);

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = Arc::clone(&server);
                    async move { Ok::<_, Infallible>(server.handle(req).await) }
                });

                if let Err(err) = http1::Builder::new()
                    .timer(TokioTimer::new())
                    .header_read_timeout(HEADER_READ_TIMEOUT)
                    .serve_connection(io, service)
                    .await
                {
                    debug!("connection error from {remote_addr}: {err}");
                }
            });
        }
    }

    async fn handle(self: Arc<Self>, req: Request<Incoming>) -> Response<ResponseBody> {
        let path = req.uri().path().to_string();

        // the observer UI must not log itself
        if self.static_root.is_none() && self.is_observer_path(&path) {
            return self.serve_observer(&path);
        }

        middleware::handle_logged(&self, req).await.map(BoxBody::new)
    }

    fn is_observer_path(&self, path: &str) -> bool {
        path == self.log_path || path.starts_with(&format!("{}/", self.log_path))
    }

    fn serve_observer(&self, path: &str) -> Response<ResponseBody> {
        match &path[self.log_path.len()..] {
            "/events" => sse::sse_response(Arc::clone(&self.events)),
            "" | "/" | "/index.html" => static_files::index_response().map(BoxBody::new),
            _ => router::not_found().map(BoxBody::new),
        }
    }

    /// Route a request to a mock endpoint (or the static root in directory
    /// mode). Called beneath the logging middleware.
    pub(crate) async fn serve_routes(&self, method: &Method, uri: &Uri) -> Response<Full<Bytes>> {
        if let Some(root) = &self.static_root {
            return static_files::serve_dir(root, uri.path()).await;
        }

        let router = self.router.read().clone();
        match router.lookup(method, uri.path()) {
            Route::Endpoint { endpoint, params } => {
                let info = RequestInfo::new(uri.query(), params);
                endpoint.respond(&info).await
            }
            Route::NotFound => router::not_found(),
            Route::MethodNotAllowed => router::method_not_allowed(method),
        }
    }
}

/// Ensure a leading `/` and strip trailing slashes (unless the whole value
/// is `/`). Idempotent.
pub fn normalize_log_path(path: &str) -> String {
    let mut path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    path
}
