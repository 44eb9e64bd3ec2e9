//! Application callbacks invoked at lifecycle transitions.

/// Hooks supplied by the embedding application.
///
/// Every method has a default, so an implementation overrides only what it
/// needs. Hooks run on the coordinator's task and are not wrapped in a panic
/// boundary; they must not panic.
pub trait LifecycleHooks: Send + Sync {
    /// Called during `init`. Returning `false` fails initialization.
    fn on_init(&self) -> bool {
        true
    }

    /// Called during `run`. A `false` return is reported but does not start
    /// a shutdown by itself.
    fn on_run(&self) -> bool {
        true
    }

    /// Called by `LifecycleCoordinator::stop`.
    fn on_stop(&self) {}

    /// Called once a termination signal arrives, before endpoints stop
    /// accepting. The application should stop originating new work here.
    fn on_shutdown(&self) {}
}
