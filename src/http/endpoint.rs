//! One listening endpoint: socket, dispatch table, and request accounting.
//!
//! # Lifecycle
//! ```text
//! new → bind(port) → route_func(...)* → serve() / serve_tls(..)
//!     → stop() / unlisten()       (stop accepting, in-flight work continues)
//!     → wait_for_all_done()       (accept loop exited, handlers finished)
//! ```
//!
//! # Design Decisions
//! - Stopping drains: the accept loop stops taking connections at once, but
//!   connections already accepted finish their current request; idle
//!   keep-alive connections are closed
//! - The accept loop holds one unit of work until it has fully exited, so the
//!   endpoint's count cannot reach zero while it still accepts
//! - The dispatch table is snapshotted when serving starts; routes registered
//!   later apply from the next `serve`

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use axum::{
    extract::Request,
    handler::Handler,
    http::Method,
    routing::{any, on, MethodFilter, MethodRouter},
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::CorsConfig;
use crate::http::cors::cors_layer;
use crate::http::guard::{dispatch, install_panic_capture, panic_message, RouteSite};
use crate::net::listener::{self, BindError, ReleasingListener, Released};
use crate::net::tls::load_tls_config;
use crate::net::WorkTracker;
use crate::observability::{metrics, LogEntry, LogPublisher};

/// Error type for endpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error(transparent)]
    Bind(#[from] BindError),

    #[error("endpoint `{0}` is not bound")]
    NotBound(String),

    #[error("endpoint `{0}` is already serving")]
    AlreadyServing(String),

    #[error("failed to set up TLS: {0}")]
    Tls(#[source] std::io::Error),

    #[error("method {0} cannot be routed")]
    Method(Method),

    #[error("cannot route `{path}`: {reason}")]
    Route { path: String, reason: String },
}

/// A running accept loop.
#[derive(Debug)]
struct AcceptLoop {
    stop: CancellationToken,
    released: Released,
}

/// One bound socket plus its dispatch table.
pub struct EndpointGuard {
    name: String,
    host: IpAddr,
    listener: Option<TcpListener>,
    local_addr: Option<SocketAddr>,
    router: Router,
    /// Methods registered per path; empty means every method.
    routes: HashMap<String, Vec<Method>>,
    cors: CorsLayer,
    work: WorkTracker,
    publisher: Option<LogPublisher>,
    accepting: CancellationToken,
    serving: Option<AcceptLoop>,
}

impl std::fmt::Debug for EndpointGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointGuard")
            .field("name", &self.name)
            .field("local_addr", &self.local_addr)
            .field("serving", &self.is_serving())
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

impl EndpointGuard {
    /// Create an unbound endpoint whose work also counts into `parent`.
    pub fn new(name: impl Into<String>, parent: &WorkTracker) -> Self {
        install_panic_capture();
        Self {
            name: name.into(),
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listener: None,
            local_addr: None,
            router: Router::new(),
            routes: HashMap::new(),
            cors: cors_layer(&CorsConfig::default()),
            work: parent.child(),
            publisher: None,
            accepting: CancellationToken::new(),
            serving: None,
        }
    }

    /// Interface used by [`EndpointGuard::bind`]. Defaults to all interfaces.
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    pub fn with_cors(mut self, config: &CorsConfig) -> Self {
        self.cors = cors_layer(config);
        self
    }

    /// Publisher for bind failures and handler faults. Set before registering
    /// routes; wrapped handlers capture it at registration.
    pub fn with_publisher(mut self, publisher: LogPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Cancelling `accepting` stops every accept loop this endpoint starts.
    pub fn with_accepting(mut self, accepting: CancellationToken) -> Self {
        self.accepting = accepting;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address of the bound socket, if any.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_listening(&self) -> bool {
        self.local_addr.is_some()
    }

    pub fn is_serving(&self) -> bool {
        self.serving
            .as_ref()
            .is_some_and(|accept_loop| !accept_loop.stop.is_cancelled())
    }

    /// Accept loop plus in-flight handlers currently counted on this endpoint.
    pub fn in_flight(&self) -> usize {
        self.work.outstanding()
    }

    /// Bind `host:port`, releasing any previous socket first.
    ///
    /// When a previous accept loop owns the socket, waits until that loop has
    /// dropped it. On failure the endpoint stays unbound and the error is also
    /// published.
    pub async fn bind(&mut self, port: u16) -> Result<SocketAddr, EndpointError> {
        self.release().await;

        match listener::bind(self.host, port).await {
            Ok((listener, local_addr)) => {
                self.listener = Some(listener);
                self.local_addr = Some(local_addr);
                Ok(local_addr)
            }
            Err(err) => {
                tracing::error!(endpoint = %self.name, error = %err, "Bind failed");
                metrics::record_bind_failure(port);
                self.publish(LogEntry::error(format!(
                    "Failed to listen to port {port}. err={err}"
                )));
                Err(err.into())
            }
        }
    }

    /// Register `handler` for `path`. An empty `methods` slice matches any
    /// method.
    ///
    /// A path must start with `/` and use `{param}` captures. A method set
    /// overlapping an earlier registration for the same path is rejected.
    pub fn route_func<H, T>(
        &mut self,
        path: &str,
        handler: H,
        methods: &[Method],
    ) -> Result<&mut Self, EndpointError>
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.check_route(path, methods)?;

        let site = Arc::new(RouteSite {
            endpoint: self.name.clone(),
            path: path.to_string(),
            work: self.work.clone(),
            publisher: self.publisher.clone(),
        });
        let wrapped = move |request: Request| dispatch::<H, T>(handler, request, site);

        let route = method_router(methods, wrapped)?;

        // axum reports route-table conflicts by panicking; the router is only
        // replaced when insertion succeeded.
        let router = self.router.clone();
        let inserted = std::panic::catch_unwind(AssertUnwindSafe(move || router.route(path, route)));
        self.router = inserted.map_err(|payload| EndpointError::Route {
            path: path.to_string(),
            reason: panic_message(payload.as_ref()),
        })?;
        self.routes
            .entry(path.to_string())
            .or_default()
            .extend(methods.iter().cloned());

        tracing::debug!(endpoint = %self.name, path, ?methods, "Route registered");
        Ok(self)
    }

    /// Start the plain HTTP accept loop on the bound socket. Returns at once.
    pub fn serve(&mut self) -> Result<(), EndpointError> {
        self.ensure_idle()?;
        let listener = self
            .listener
            .take()
            .ok_or_else(|| EndpointError::NotBound(self.name.clone()))?;
        let (listener, released) = ReleasingListener::new(listener);

        let stop = self.accepting.child_token();
        let shutdown = stop.clone();
        let app = self.service();
        let work = self.work.track();
        let name = self.name.clone();
        let addr = self.local_addr;

        tokio::spawn(async move {
            let _work = work;
            tracing::info!(endpoint = %name, address = ?addr, "HTTP server starting");

            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                tracing::error!(endpoint = %name, error = %e, "Accept loop failed");
            }

            tracing::info!(endpoint = %name, "HTTP server stopped");
        });

        self.serving = Some(AcceptLoop { stop, released });
        Ok(())
    }

    /// Start an HTTPS accept loop on the bound socket. Returns once the
    /// certificate is loaded and the loop is spawned.
    ///
    /// The socket counts as released only when this loop has fully exited.
    pub async fn serve_tls(
        &mut self,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<(), EndpointError> {
        self.ensure_idle()?;
        if self.listener.is_none() {
            return Err(EndpointError::NotBound(self.name.clone()));
        }

        let tls = match load_tls_config(cert_path.as_ref(), key_path.as_ref()).await {
            Ok(tls) => tls,
            Err(e) => {
                tracing::error!(endpoint = %self.name, error = %e, "TLS configuration failed");
                self.publish(LogEntry::error(format!("Failed to load TLS files. err={e}")));
                return Err(EndpointError::Tls(e));
            }
        };

        let listener = self
            .listener
            .take()
            .ok_or_else(|| EndpointError::NotBound(self.name.clone()))?;
        let listener = match listener.into_std() {
            Ok(listener) => listener,
            Err(e) => {
                self.local_addr = None;
                return Err(EndpointError::Tls(e));
            }
        };
        let (release_on_exit, released) = Released::pair();

        let stop = self.accepting.child_token();
        let shutdown = stop.clone();
        let app = self.service();
        let work = self.work.track();
        let name = self.name.clone();
        let addr = self.local_addr;

        tokio::spawn(async move {
            let _work = work;
            let _release_on_exit = release_on_exit;
            tracing::info!(endpoint = %name, address = ?addr, "HTTPS server starting");

            let handle = axum_server::Handle::new();
            let server = axum_server::from_tcp_rustls(listener, tls)
                .handle(handle.clone())
                .serve(app.into_make_service());
            tokio::pin!(server);

            let result = tokio::select! {
                result = &mut server => result,
                _ = shutdown.cancelled() => {
                    handle.graceful_shutdown(None);
                    server.await
                }
            };
            if let Err(e) = result {
                tracing::error!(endpoint = %name, error = %e, "Accept loop failed");
            }

            tracing::info!(endpoint = %name, "HTTPS server stopped");
        });

        self.serving = Some(AcceptLoop { stop, released });
        Ok(())
    }

    /// Close the socket or stop the accept loop. Idempotent; does not wait.
    pub fn unlisten(&mut self) {
        if self.listener.take().is_some() {
            tracing::debug!(endpoint = %self.name, "Listener closed");
        }
        if let Some(accept_loop) = &self.serving {
            if !accept_loop.stop.is_cancelled() {
                accept_loop.stop.cancel();
                tracing::info!(endpoint = %self.name, "Stopped accepting connections");
            }
        }
        self.local_addr = None;
    }

    /// Same as [`EndpointGuard::unlisten`].
    pub fn stop(&mut self) {
        self.unlisten();
    }

    /// Wait until the accept loop has exited and every handler has finished.
    pub async fn wait_for_all_done(&self) {
        self.work.wait_idle().await;
    }

    /// Stop accepting, then drain.
    pub async fn shutdown(&mut self) {
        self.stop();
        self.wait_for_all_done().await;
    }

    async fn release(&mut self) {
        self.unlisten();
        if let Some(accept_loop) = self.serving.take() {
            accept_loop.released.wait().await;
        }
    }

    fn check_route(&self, path: &str, methods: &[Method]) -> Result<(), EndpointError> {
        let reject = |reason: &str| {
            Err(EndpointError::Route {
                path: path.to_string(),
                reason: reason.to_string(),
            })
        };

        if !path.starts_with('/') {
            return reject("path must start with `/`");
        }
        if path
            .split('/')
            .any(|segment| segment.starts_with(':') || segment.starts_with('*'))
        {
            return reject("captures are written as `{name}` or `{*rest}`");
        }

        let Some(registered) = self.routes.get(path) else {
            return Ok(());
        };
        if registered.is_empty() || methods.is_empty() {
            return reject("a handler for every method is already registered or requested");
        }
        if let Some(method) = methods.iter().find(|m| registered.contains(m)) {
            return Err(EndpointError::Route {
                path: path.to_string(),
                reason: format!("{method} is already registered"),
            });
        }
        Ok(())
    }

    fn ensure_idle(&self) -> Result<(), EndpointError> {
        if self.is_serving() {
            return Err(EndpointError::AlreadyServing(self.name.clone()));
        }
        Ok(())
    }

    fn service(&self) -> Router {
        self.router
            .clone()
            .layer(self.cors.clone())
            .layer(TraceLayer::new_for_http())
    }

    fn publish(&self, entry: LogEntry) {
        if let Some(publisher) = &self.publisher {
            publisher.publish(entry);
        }
    }
}

fn method_router<H, T>(methods: &[Method], handler: H) -> Result<MethodRouter, EndpointError>
where
    H: Handler<T, ()>,
    T: 'static,
{
    let mut filter: Option<MethodFilter> = None;
    for method in methods {
        let one = MethodFilter::try_from(method.clone())
            .map_err(|_| EndpointError::Method(method.clone()))?;
        filter = Some(match filter {
            Some(all) => all.or(one),
            None => one,
        });
    }

    Ok(match filter {
        Some(filter) => on(filter, handler),
        None => any(handler),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> EndpointGuard {
        EndpointGuard::new("test", &WorkTracker::new()).with_host(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    #[tokio::test]
    async fn serve_requires_bind() {
        let mut endpoint = endpoint();
        assert!(matches!(endpoint.serve(), Err(EndpointError::NotBound(_))));
        assert!(matches!(
            endpoint.serve_tls("cert.pem", "key.pem").await,
            Err(EndpointError::NotBound(_))
        ));
    }

    #[tokio::test]
    async fn unlisten_twice_is_noop() {
        let mut endpoint = endpoint();
        endpoint.bind(0).await.unwrap();
        assert!(endpoint.is_listening());

        endpoint.unlisten();
        endpoint.unlisten();
        endpoint.stop();
        assert!(!endpoint.is_listening());
        assert!(matches!(endpoint.serve(), Err(EndpointError::NotBound(_))));
    }

    #[tokio::test]
    async fn rebind_releases_previous_socket() {
        let mut endpoint = endpoint();
        let first = endpoint.bind(0).await.unwrap();
        let second = endpoint.bind(first.port()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn bind_failure_leaves_endpoint_unbound() {
        let mut holder = endpoint();
        let taken = holder.bind(0).await.unwrap();

        let mut endpoint = endpoint();
        let err = endpoint.bind(taken.port()).await.unwrap_err();
        assert!(matches!(err, EndpointError::Bind(_)));
        assert!(!endpoint.is_listening());
    }

    #[tokio::test]
    async fn missing_tls_files_keep_socket_bound() {
        let mut endpoint = endpoint();
        endpoint.bind(0).await.unwrap();

        let err = endpoint
            .serve_tls("/nonexistent/cert.pem", "/nonexistent/key.pem")
            .await
            .unwrap_err();
        assert!(matches!(err, EndpointError::Tls(_)));
        assert!(endpoint.is_listening());
        assert!(!endpoint.is_serving());
    }

    #[test]
    fn unsupported_method_is_rejected() {
        let mut endpoint = endpoint();
        let custom = Method::from_bytes(b"PURGE").unwrap();
        let err = endpoint
            .route_func("/", || async { "ok" }, &[custom])
            .unwrap_err();
        assert!(matches!(err, EndpointError::Method(_)));
    }

    #[test]
    fn duplicate_method_is_rejected() {
        let mut endpoint = endpoint();
        endpoint
            .route_func("/x", || async { "first" }, &[Method::GET])
            .unwrap();

        let err = endpoint
            .route_func("/x", || async { "second" }, &[Method::GET, Method::POST])
            .unwrap_err();
        assert!(matches!(err, EndpointError::Route { ref path, .. } if path == "/x"));

        endpoint
            .route_func("/x", || async { "third" }, &[Method::POST])
            .unwrap();
    }

    #[test]
    fn any_method_route_is_exclusive() {
        let mut endpoint = endpoint();
        endpoint.route_func("/any", || async { "any" }, &[]).unwrap();
        assert!(matches!(
            endpoint.route_func("/any", || async { "get" }, &[Method::GET]),
            Err(EndpointError::Route { .. })
        ));

        endpoint
            .route_func("/get", || async { "get" }, &[Method::GET])
            .unwrap();
        assert!(matches!(
            endpoint.route_func("/get", || async { "any" }, &[]),
            Err(EndpointError::Route { .. })
        ));
    }

    #[test]
    fn malformed_paths_are_rejected() {
        let mut endpoint = endpoint();
        for path in ["health", "", "/users/:id", "/files/*rest"] {
            let err = endpoint
                .route_func(path, || async { "ok" }, &[])
                .unwrap_err();
            assert!(matches!(err, EndpointError::Route { .. }), "{path}");
        }
    }

    #[test]
    fn conflicting_captures_are_rejected() {
        let mut endpoint = endpoint();
        endpoint
            .route_func("/users/{id}", || async { "id" }, &[Method::GET])
            .unwrap();
        let err = endpoint
            .route_func("/users/{name}", || async { "name" }, &[Method::POST])
            .unwrap_err();
        assert!(matches!(err, EndpointError::Route { .. }));

        // The table is unchanged and still usable.
        endpoint
            .route_func("/users/{id}/posts", || async { "posts" }, &[Method::GET])
            .unwrap();
    }

    #[tokio::test]
    async fn serve_counts_accept_loop() {
        let mut endpoint = endpoint();
        endpoint.bind(0).await.unwrap();
        endpoint.serve().unwrap();
        assert_eq!(endpoint.in_flight(), 1);
        assert!(endpoint.is_serving());
        assert!(matches!(
            endpoint.serve(),
            Err(EndpointError::AlreadyServing(_))
        ));

        endpoint.shutdown().await;
        assert_eq!(endpoint.in_flight(), 0);
        assert!(!endpoint.is_serving());
    }
}
