use std::fmt;
use std::thread::ThreadId;
use std::time::Duration;

/// Lifecycle state of one component context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Not opened, or closed.
    Stopped,
    /// Open, waiting for every dependency to be satisfied.
    Unsatisfied,
    /// Transient: instance being created, bound and activated.
    Starting,
    Active,
    /// Transient: export withdrawn, instance being deactivated.
    Stopping,
    /// Recoverable failure; retried on the next relevant event.
    Failed,
    /// Metadata failure; never cleared while the context lives.
    FailedPermanent,
}

impl State {
    pub fn is_failed(self) -> bool {
        matches!(self, State::Failed | State::FailedPermanent)
    }

    /// States in which the context holds a live instance.
    pub fn has_instance(self) -> bool {
        matches!(self, State::Starting | State::Active | State::Stopping)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Stopped => "STOPPED",
            State::Unsatisfied => "UNSATISFIED",
            State::Starting => "STARTING",
            State::Active => "ACTIVE",
            State::Stopping => "STOPPING",
            State::Failed => "FAILED",
            State::FailedPermanent => "FAILED_PERMANENT",
        };
        f.write_str(s)
    }
}

/// A transition currently running on some thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Processing {
    pub thread: ThreadId,
    pub elapsed: Duration,
}

/// Observer of state changes. Called with the context lock held; must not
/// call back into the context.
pub trait LifecycleListener: Send + Sync {
    fn state_changed(&self, context: u64, from: State, to: State);
}

/// Logs every transition at debug level.
#[derive(Debug, Default)]
pub struct TracingListener;

impl LifecycleListener for TracingListener {
    fn state_changed(&self, context: u64, from: State, to: State) {
        tracing::debug!(context, %from, %to, "component state changed");
    }
}
