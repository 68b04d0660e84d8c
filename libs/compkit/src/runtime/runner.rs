//! Component runtime runner.
//!
//! Phase order: **configure → start → wait → stop**. The lifecycle core is
//! synchronous; start and stop run on the blocking pool so user activation
//! code never stalls the async executor. Shutdown can be driven by OS
//! signals, an external `CancellationToken`, or an arbitrary future.

use std::{future::Future, pin::Pin, sync::Arc};

use anyhow::Context as _;
use compkit_bootstrap::ConfigProvider;
use tokio_util::sync::CancellationToken;

use crate::context::{ContextServices, LifecycleListener};
use crate::registry::TypeRegistry;
use crate::runtime::{ComponentRuntime, ServiceRegistry};

/// How the runtime should decide when to stop.
pub enum ShutdownOptions {
    /// Listen for OS signals (Ctrl+C / SIGTERM).
    Signals,
    /// An external `CancellationToken` controls the lifecycle.
    Token(CancellationToken),
    /// An arbitrary future; when it completes, we initiate shutdown.
    Future(Pin<Box<dyn Future<Output = ()> + Send>>),
}

/// Options for running the component runtime.
pub struct RunOptions {
    /// Provider of component configuration (property maps by pid).
    pub components_cfg: Arc<dyn ConfigProvider>,
    /// Types and descriptors; discovered through inventory when `None`.
    pub types: Option<TypeRegistry>,
    /// Capability registry shared by all contexts.
    pub registry: ServiceRegistry,
    /// Observers of every context state change.
    pub listeners: Vec<Arc<dyn LifecycleListener>>,
    /// Shutdown strategy.
    pub shutdown: ShutdownOptions,
}

/// Full cycle: configure → start → wait → stop.
pub async fn run(opts: RunOptions) -> anyhow::Result<()> {
    // 1. Prepare cancellation token based on shutdown options
    let cancel = match &opts.shutdown {
        ShutdownOptions::Token(t) => t.clone(),
        _ => CancellationToken::new(),
    };

    // 2. Spawn shutdown waiter (Signals / Future)
    match opts.shutdown {
        ShutdownOptions::Signals => {
            let c = cancel.clone();
            tokio::spawn(async move {
                match compkit_bootstrap::wait_for_shutdown().await {
                    Ok(signal) => {
                        tracing::info!(?signal, "shutdown: signal received");
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            "shutdown: primary waiter failed; falling back to ctrl_c()"
                        );
                        let _ = tokio::signal::ctrl_c().await;
                    }
                }
                c.cancel();
            });
        }
        ShutdownOptions::Future(waiter) => {
            let c = cancel.clone();
            tokio::spawn(async move {
                waiter.await;
                tracing::info!("shutdown: external future completed");
                c.cancel();
            });
        }
        ShutdownOptions::Token(_) => {
            tracing::info!("shutdown: external token will control lifecycle");
        }
    }

    // 3. Discover types and components
    let types = match opts.types {
        Some(t) => t,
        None => TypeRegistry::discover_and_build()?,
    };

    // 4. Wire collaborators
    let mut services = ContextServices::new(
        Arc::new(opts.registry.clone()),
        Arc::new(opts.registry.clone()),
    );
    for l in opts.listeners {
        services = services.with_listener(l);
    }

    // 5. Instantiate the runtime and run the lifecycle
    let runtime = Arc::new(ComponentRuntime::new(types, services).with_config(opts.components_cfg));

    let r = Arc::clone(&runtime);
    tokio::task::spawn_blocking(move || r.start())
        .await
        .context("start phase panicked")?;

    for s in runtime.status() {
        tracing::info!(
            component = %s.component,
            key = %s.key,
            state = %s.state,
            failure = ?s.failure,
            "component status"
        );
    }

    cancel.cancelled().await;

    let r = Arc::clone(&runtime);
    tokio::task::spawn_blocking(move || r.stop())
        .await
        .context("stop phase panicked")?;

    Ok(())
}
