//! Request-tracking wrapper around every registered handler.
//!
//! # Responsibilities
//! - Count each dispatched request as outstanding work for its whole life
//! - Turn a panicking handler into a [`HandlerFault`] value
//! - Report faults to the log publisher and answer them with a 500
//!
//! # Design Decisions
//! - The work guard is taken before the handler future is created and lives in
//!   the wrapper future, so the decrement also runs if the transport drops the
//!   request mid-flight
//! - The panic site's backtrace is captured by a process-wide panic hook into
//!   a thread-local; the unwind is caught on the same thread during the same
//!   poll, so the slot still holds it
//! - The hook only captures while a guarded handler is being polled; other
//!   panics in the process pay nothing extra

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Once};

use axum::{
    extract::Request,
    handler::Handler,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::FutureExt;

use crate::net::WorkTracker;
use crate::observability::{metrics, LogEntry, LogPublisher};

thread_local! {
    static PANIC_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
}

static PANIC_HOOK: Once = Once::new();

/// Chain a hook in front of the current panic hook that records the
/// backtrace of the panicking thread.
pub(crate) fn install_panic_capture() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            // Thread-locals may already be gone during thread teardown.
            if CAPTURING.try_with(Cell::get).unwrap_or(false) {
                let backtrace = Backtrace::force_capture().to_string();
                let _ = PANIC_BACKTRACE.try_with(|slot| {
                    if let Ok(mut slot) = slot.try_borrow_mut() {
                        *slot = Some(backtrace);
                    }
                });
            }
            previous(info);
        }));
    });
}

fn take_panic_backtrace() -> Option<String> {
    PANIC_BACKTRACE
        .try_with(|slot| slot.try_borrow_mut().ok().and_then(|mut slot| slot.take()))
        .ok()
        .flatten()
}

/// Marks the current thread as polling a guarded handler.
struct CaptureScope {
    previous: bool,
}

impl CaptureScope {
    fn enter() -> Self {
        let previous = CAPTURING.try_with(|flag| flag.replace(true)).unwrap_or(false);
        Self { previous }
    }
}

impl Drop for CaptureScope {
    fn drop(&mut self) {
        let _ = CAPTURING.try_with(|flag| flag.set(self.previous));
    }
}

/// Render a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// A handler panicked instead of producing a response.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{handler}() panicked while serving {path}: {message}")]
pub struct HandlerFault {
    /// Type name of the registered handler.
    pub handler: &'static str,
    /// Route the handler was registered under.
    pub path: String,
    /// Panic payload rendered as text.
    pub message: String,
    /// Backtrace captured at the panic site, when available.
    pub backtrace: Option<String>,
}

impl HandlerFault {
    fn from_panic(handler: &'static str, path: &str, payload: Box<dyn Any + Send>) -> Self {
        Self {
            handler,
            path: path.to_string(),
            message: panic_message(payload.as_ref()),
            backtrace: take_panic_backtrace(),
        }
    }

    /// Structured entry for the log publisher.
    pub fn to_log_entry(&self) -> LogEntry {
        let entry = LogEntry::error(self.to_string()).with_function(self.handler);
        match &self.backtrace {
            Some(backtrace) => entry.with_callstack(backtrace.clone()),
            None => entry,
        }
    }
}

/// Where a wrapped handler is mounted and whom it reports to.
#[derive(Debug)]
pub(crate) struct RouteSite {
    pub endpoint: String,
    pub path: String,
    pub work: WorkTracker,
    pub publisher: Option<LogPublisher>,
}

impl RouteSite {
    fn report(&self, fault: &HandlerFault) {
        tracing::error!(
            endpoint = %self.endpoint,
            path = %fault.path,
            handler = fault.handler,
            message = %fault.message,
            "Handler panicked"
        );
        metrics::record_handler_fault(&fault.path);
        if let Some(publisher) = &self.publisher {
            publisher.publish(fault.to_log_entry());
        }
    }
}

/// Run `handler` to completion, converting a panic into a [`HandlerFault`].
pub async fn call_guarded<H, T>(handler: H, request: Request, path: &str) -> Result<Response, HandlerFault>
where
    H: Handler<T, ()>,
    T: 'static,
{
    let mut call = Box::pin(handler.call(request, ()));
    let scoped = std::future::poll_fn(move |cx| {
        let _scope = CaptureScope::enter();
        call.as_mut().poll(cx)
    });

    AssertUnwindSafe(scoped)
        .catch_unwind()
        .await
        .map_err(|payload| HandlerFault::from_panic(std::any::type_name::<H>(), path, payload))
}

/// The wrapper installed in the router for every registered handler.
pub(crate) async fn dispatch<H, T>(handler: H, request: Request, site: Arc<RouteSite>) -> Response
where
    H: Handler<T, ()>,
    T: 'static,
{
    let _work = site.work.track();

    match call_guarded(handler, request, &site.path).await {
        Ok(response) => {
            metrics::record_request(&site.endpoint, "ok");
            response
        }
        Err(fault) => {
            metrics::record_request(&site.endpoint, "fault");
            site.report(&fault);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request() -> Request {
        Request::builder().uri("/x").body(Body::empty()).unwrap()
    }

    async fn exploding() -> &'static str {
        panic!("exploded on purpose")
    }

    #[tokio::test]
    async fn normal_handler_passes_response_through() {
        let response = call_guarded(|| async { (StatusCode::CREATED, "made") }, request(), "/x")
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn panic_becomes_fault() {
        install_panic_capture();

        let fault = call_guarded(exploding, request(), "/x").await.unwrap_err();
        assert_eq!(fault.path, "/x");
        assert_eq!(fault.message, "exploded on purpose");
        assert!(fault.handler.contains("exploding"));
        assert!(fault.backtrace.is_some());

        let entry = fault.to_log_entry();
        assert!(entry.caption.contains("exploded on purpose"));
        assert!(entry.callstack.is_some());
    }

    #[test]
    fn panics_outside_handlers_are_not_captured() {
        install_panic_capture();

        let result = std::panic::catch_unwind(|| panic!("unrelated"));
        assert!(result.is_err());
        assert!(take_panic_backtrace().is_none());
    }

    #[tokio::test]
    async fn formatted_panic_message_is_kept() {
        let fault = call_guarded(
            |request: Request| async move {
                if request.uri().path() == "/x" {
                    panic!("bad path {}", request.uri().path());
                }
                "fine"
            },
            request(),
            "/x",
        )
        .await
        .unwrap_err();
        assert_eq!(fault.message, "bad path /x");
    }

    #[tokio::test]
    async fn dispatch_releases_work_and_answers_500() {
        let work = WorkTracker::new();
        let site = Arc::new(RouteSite {
            endpoint: "test".into(),
            path: "/x".into(),
            work: work.clone(),
            publisher: None,
        });

        let response = dispatch(exploding, request(), site).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(work.outstanding(), 0);
    }
}
