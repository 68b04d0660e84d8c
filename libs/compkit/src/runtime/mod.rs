pub mod filter;
mod host_runtime;
mod runner;
mod service_registry;

pub use filter::{Filter, FilterError};
pub use host_runtime::{ComponentRuntime, ComponentStatus};
pub use runner::{run, RunOptions, ShutdownOptions};
pub use service_registry::{ServiceRegistry, SERVICE_ID};
