//! Component context: the lifecycle state machine of one component instance.
//!
//! Every state-mutating entry point takes the single write lock of the
//! context. Adapter notifications never block on that lock: they are queued
//! and the queue is drained by whichever thread holds the lock, before it is
//! released. A notification raised while a transition runs on the same thread
//! (a tracker firing synchronously from `open`, or a publication looping back)
//! is therefore processed right after the current step.

mod handle;
mod state;

pub use handle::ComponentHandle;
pub use state::{LifecycleListener, Processing, State, TracingListener};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::Instant;

use anyhow::anyhow;
use parking_lot::{Mutex, RwLock};
use serde_json::json;

use crate::binder::PropertyBinder;
use crate::capability::{CapabilityRegistry, Registration, Requirement, TrackerFactory};
use crate::class::{ActivationArgs, Bindings, ComponentClass, Instance};
use crate::error::{ComponentError, MetadataError};
use crate::metadata::{ActivationParam, ComponentDescriptor};
use crate::reference::{requirement_for, AdapterEvent, ReferenceAdapter, Signal};
use crate::value::Properties;

/// Export property carrying the descriptor name.
pub const COMPONENT_NAME: &str = "component.name";
/// Export property carrying the context id.
pub const COMPONENT_ID: &str = "component.id";

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Collaborators injected into every context.
#[derive(Clone)]
pub struct ContextServices {
    pub registry: Arc<dyn CapabilityRegistry>,
    pub trackers: Arc<dyn TrackerFactory>,
    pub listeners: Vec<Arc<dyn LifecycleListener>>,
}

impl ContextServices {
    pub fn new(registry: Arc<dyn CapabilityRegistry>, trackers: Arc<dyn TrackerFactory>) -> Self {
        Self {
            registry,
            trackers,
            listeners: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn LifecycleListener>) -> Self {
        self.listeners.push(listener);
        self
    }
}

/// Point-in-time view of one dependency attribute.
#[derive(Debug, Clone)]
pub struct DependencyStatus {
    pub id: String,
    pub satisfied: bool,
    pub requirement: Requirement,
    /// Distinct capabilities currently acquired for the instance.
    pub held: usize,
}

struct Inner {
    state: State,
    instance: Option<Instance>,
    /// The activation method of the live instance has completed.
    activated: bool,
    properties: Arc<Properties>,
    registration: Option<Box<dyn Registration>>,
    /// Adapters that reported satisfied. May be transiently off by one when
    /// notifications of one adapter arrive out of order.
    satisfied: i64,
    failure: Option<Arc<ComponentError>>,
    binders: Vec<PropertyBinder>,
}

pub struct ComponentContext {
    id: u64,
    descriptor: Arc<ComponentDescriptor>,
    bindings: Result<Bindings, MetadataError>,
    registry: Arc<dyn CapabilityRegistry>,
    listeners: Vec<Arc<dyn LifecycleListener>>,
    adapters: Vec<Arc<ReferenceAdapter>>,
    /// Attribute index of each adapter.
    adapter_attributes: Vec<usize>,
    inner: RwLock<Inner>,
    pending: Mutex<VecDeque<AdapterEvent>>,
    processing: Mutex<Option<(ThreadId, Instant)>>,
}

impl ComponentContext {
    /// Create a stopped context. `class` is `None` when the implementation
    /// type is unknown; the context then fails permanently on `open`.
    pub fn new(
        descriptor: Arc<ComponentDescriptor>,
        class: Option<&ComponentClass>,
        properties: Properties,
        services: &ContextServices,
    ) -> Arc<Self> {
        let bindings = match class {
            Some(class) => Bindings::resolve(&descriptor, class),
            None => Err(MetadataError::UnknownType(descriptor.implementation.clone())),
        };
        let resolved = bindings.as_ref().ok();

        let binders = descriptor
            .attributes
            .iter()
            .enumerate()
            .filter_map(|(i, attr)| PropertyBinder::new(i, attr, resolved.and_then(|b| b.property_setter(i))))
            .collect();

        let mut adapter_attributes = Vec::new();
        let mut plans = Vec::new();
        for (i, attr) in descriptor.attributes.iter().enumerate() {
            if let Some(requirement) = requirement_for(attr, &properties) {
                adapter_attributes.push(i);
                plans.push((i, requirement, resolved.and_then(|b| b.dependency_setter(i))));
            }
        }

        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        Arc::new_cyclic(|owner: &Weak<Self>| {
            let adapters = plans
                .into_iter()
                .enumerate()
                .map(|(index, (attr, requirement, setter))| {
                    let tracker = services.trackers.create(requirement.clone());
                    Arc::new(ReferenceAdapter::new(
                        index,
                        &descriptor.attributes[attr],
                        requirement,
                        setter,
                        tracker,
                        Arc::clone(&services.registry),
                        owner.clone(),
                    ))
                })
                .collect();

            Self {
                id,
                bindings,
                registry: Arc::clone(&services.registry),
                listeners: services.listeners.clone(),
                adapters,
                adapter_attributes,
                inner: RwLock::new(Inner {
                    state: State::Stopped,
                    instance: None,
                    activated: false,
                    properties: Arc::new(properties),
                    registration: None,
                    satisfied: 0,
                    failure: None,
                    binders,
                }),
                pending: Mutex::new(VecDeque::new()),
                processing: Mutex::new(None),
                descriptor,
            }
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &Arc<ComponentDescriptor> {
        &self.descriptor
    }

    pub fn state(&self) -> State {
        self.read(|inner| inner.state)
    }

    /// Cause of the current FAILED / FAILED_PERMANENT state.
    pub fn failure(&self) -> Option<Arc<ComponentError>> {
        self.read(|inner| inner.failure.clone())
    }

    pub fn properties(&self) -> Arc<Properties> {
        self.read(|inner| Arc::clone(&inner.properties))
    }

    pub fn has_instance(&self) -> bool {
        self.read(|inner| inner.instance.is_some())
    }

    /// Whether the capability of this component is currently published.
    pub fn is_published(&self) -> bool {
        self.read(|inner| inner.registration.is_some())
    }

    /// The transition currently running, if any. Does not take the state lock.
    pub fn processing(&self) -> Option<Processing> {
        let current = *self.processing.lock();
        current.map(|(thread, started)| Processing {
            thread,
            elapsed: started.elapsed(),
        })
    }

    pub fn handle(&self) -> ComponentHandle {
        ComponentHandle::new(self.id, &self.descriptor.name, self.properties())
    }

    pub fn dependencies(&self) -> Vec<DependencyStatus> {
        self.adapters
            .iter()
            .map(|a| DependencyStatus {
                id: a.id().to_string(),
                satisfied: a.is_satisfied(),
                requirement: a.requirement(),
                held: a.held_count(),
            })
            .collect()
    }

    /// Start tracking dependencies; starts right away when there are none.
    pub fn open(&self) {
        self.run(|ctx, inner| ctx.open_locked(inner));
    }

    /// Tear down and stop tracking. No-op when already stopped.
    pub fn close(&self) {
        self.run(|ctx, inner| ctx.close_locked(inner));
    }

    /// Replace the property map and reconcile the instance with it.
    pub fn update_configuration(&self, properties: Properties) {
        self.run(|ctx, inner| ctx.reconfigure(inner, properties));
    }

    /// Force the context into a failed state.
    pub fn fail(&self, error: ComponentError, permanent: bool) {
        self.run(|ctx, inner| ctx.fail_locked(inner, error, permanent));
    }

    pub(crate) fn adapter_event(&self, event: AdapterEvent) {
        self.pending.lock().push_back(event);
        self.pump();
    }

    fn run<R>(&self, step: impl FnOnce(&Self, &mut Inner) -> R) -> R {
        let result = {
            let mut inner = self.inner.write();
            self.enter();
            let result = step(self, &mut *inner);
            self.drain(&mut inner);
            self.leave();
            result
        };
        self.pump();
        result
    }

    /// Readers re-check the queue after releasing, like writers do.
    fn read<R>(&self, f: impl FnOnce(&Inner) -> R) -> R {
        let result = f(&self.inner.read());
        self.pump();
        result
    }

    /// Process queued events unless another thread holds the lock; that
    /// thread re-checks the queue after releasing it.
    fn pump(&self) {
        loop {
            if self.pending.lock().is_empty() {
                return;
            }
            let Some(mut inner) = self.inner.try_write() else {
                return;
            };
            self.enter();
            self.drain(&mut inner);
            self.leave();
        }
    }

    fn drain(&self, inner: &mut Inner) {
        loop {
            let next = self.pending.lock().pop_front();
            let Some(event) = next else {
                break;
            };
            self.handle_event(inner, event);
        }
    }

    fn enter(&self) {
        *self.processing.lock() = Some((thread::current().id(), Instant::now()));
    }

    fn leave(&self) {
        *self.processing.lock() = None;
    }

    fn handle_event(&self, inner: &mut Inner, event: AdapterEvent) {
        let Some(adapter) = self.adapters.get(event.adapter) else {
            return;
        };
        if event.session != adapter.session()
            || matches!(inner.state, State::Stopped | State::FailedPermanent)
        {
            tracing::trace!(
                component = %self.descriptor.name,
                dependency = adapter.id(),
                "dropping stale dependency event"
            );
            return;
        }

        match event.signal {
            Signal::Satisfied => inner.satisfied += 1,
            Signal::Unsatisfied => {
                inner.satisfied -= 1;
                match inner.state {
                    State::Active => self.stop(inner, State::Unsatisfied),
                    State::Failed => self.set_state(inner, State::Unsatisfied),
                    _ => {}
                }
            }
            Signal::ChangedNonDynamic => {
                if inner.state == State::Active {
                    tracing::debug!(
                        component = %self.descriptor.name,
                        dependency = adapter.id(),
                        "static dependency changed, restarting"
                    );
                    self.restart(inner);
                }
            }
            Signal::Rebind => {
                if inner.state == State::Active {
                    self.rebind(inner, event.adapter);
                }
            }
        }

        if self.all_satisfied(inner) && matches!(inner.state, State::Unsatisfied | State::Failed) {
            self.start(inner);
        }
    }

    fn all_satisfied(&self, inner: &Inner) -> bool {
        inner.satisfied == self.adapters.len() as i64
    }

    fn open_locked(&self, inner: &mut Inner) {
        if inner.state != State::Stopped {
            tracing::debug!(component = %self.descriptor.name, state = %inner.state, "open ignored");
            return;
        }
        if let Err(err) = &self.bindings {
            let err = self.metadata_error(err.clone());
            self.fail_locked(inner, err, true);
            return;
        }

        inner.satisfied = 0;
        if self.adapters.is_empty() {
            self.start(inner);
            return;
        }

        self.set_state(inner, State::Unsatisfied);
        for (adapter, &attr) in self.adapters.iter().zip(&self.adapter_attributes) {
            if let Some(requirement) = requirement_for(&self.descriptor.attributes[attr], &inner.properties) {
                adapter.update_requirement(requirement);
            }
            adapter.open();
        }
    }

    fn close_locked(&self, inner: &mut Inner) {
        match inner.state {
            State::Stopped => return,
            State::FailedPermanent => {}
            s if s.has_instance() => self.stop(inner, State::Stopped),
            _ => self.set_state(inner, State::Stopped),
        }
        for adapter in &self.adapters {
            adapter.close();
        }
        inner.satisfied = 0;
    }

    fn reconfigure(&self, inner: &mut Inner, properties: Properties) {
        let changed = *inner.properties != properties;
        inner.properties = Arc::new(properties);
        if inner.state == State::FailedPermanent {
            return;
        }

        if changed {
            for (adapter, &attr) in self.adapters.iter().zip(&self.adapter_attributes) {
                if let Some(requirement) = requirement_for(&self.descriptor.attributes[attr], &inner.properties) {
                    adapter.update_requirement(requirement);
                }
            }
        }

        match inner.state {
            State::Active if changed => self.reapply(inner),
            State::Failed if self.all_satisfied(inner) => {
                tracing::debug!(component = %self.descriptor.name, "retrying start after reconfiguration");
                self.start(inner);
            }
            _ => {}
        }
    }

    /// Reconcile an active instance with new properties: one restart when a
    /// static property changed or a set property vanished, otherwise dynamic reapplication in
    /// declaration order, stopping at the first failure.
    fn reapply(&self, inner: &mut Inner) {
        let mut restart = false;
        let mut invalid = None;
        let mut updates = Vec::new();
        for (i, binder) in inner.binders.iter().enumerate() {
            match binder.resolve(&inner.properties) {
                // a setter cannot take a value back; only a fresh instance drops it
                Ok(None) if binder.has_setter() && binder.changed(&None) => restart = true,
                Ok(value) if binder.changed(&value) => {
                    if binder.dynamic {
                        updates.push((i, value));
                    } else {
                        restart = true;
                    }
                }
                Ok(_) => {}
                Err(err) if binder.dynamic => {
                    if invalid.is_none() {
                        invalid = Some(err);
                    }
                }
                Err(_) => restart = true,
            }
        }

        if restart {
            tracing::debug!(component = %self.descriptor.name, "static property changed, restarting");
            self.restart(inner);
            return;
        }
        if let Some(err) = invalid {
            self.fail_locked(inner, err, false);
            return;
        }

        let mut failure = None;
        if let Some(instance) = inner.instance.as_mut() {
            for (i, value) in updates {
                if let Err(err) = inner.binders[i].apply(&mut **instance, value) {
                    failure = Some(err);
                    break;
                }
            }
        }
        if let Some(err) = failure {
            self.fail_locked(inner, err, false);
            return;
        }

        if let Some(registration) = &inner.registration {
            registration.update(self.export_properties(&inner.properties));
        }
        tracing::debug!(component = %self.descriptor.name, "configuration reapplied");
    }

    fn rebind(&self, inner: &mut Inner, index: usize) {
        let Some(adapter) = self.adapters.get(index) else {
            return;
        };
        let Some(instance) = inner.instance.as_mut() else {
            return;
        };
        match adapter.bind(&mut **instance) {
            Ok(()) => tracing::debug!(
                component = %self.descriptor.name,
                dependency = adapter.id(),
                "dynamic dependency rebound"
            ),
            Err(err) => self.fail_locked(inner, err, false),
        }
    }

    fn start(&self, inner: &mut Inner) {
        self.set_state(inner, State::Starting);
        match self.bring_up(inner) {
            Ok(()) => self.set_state(inner, State::Active),
            Err(err) => {
                let permanent = err.is_permanent();
                self.fail_locked(inner, err, permanent);
            }
        }
    }

    /// Instantiate, bind dependencies, bind properties, activate, publish.
    fn bring_up(&self, inner: &mut Inner) -> Result<(), ComponentError> {
        let bindings = self
            .bindings
            .as_ref()
            .map_err(|e| self.metadata_error(e.clone()))?;

        let instance = bindings
            .instantiate()
            .map_err(|source| ComponentError::Instantiation {
                component: self.descriptor.name.clone(),
                source,
            })?;
        let instance = inner.instance.insert(instance);

        for adapter in &self.adapters {
            adapter.bind(&mut **instance)?;
        }
        for binder in inner.binders.iter_mut() {
            let value = binder.resolve(&inner.properties)?;
            binder.apply(&mut **instance, value)?;
        }

        let args = self.activation_args(bindings.activation_params(), &inner.properties);
        bindings
            .activate(&mut **instance, &args)
            .map_err(|source| ComponentError::Activation {
                component: self.descriptor.name.clone(),
                source,
            })?;
        inner.activated = true;

        if let Some(export) = &self.descriptor.export {
            let publish_error = |source| ComponentError::Publish {
                component: self.descriptor.name.clone(),
                source,
            };
            let service = bindings
                .exported(&**instance)
                .unwrap_or_else(|| Err(anyhow!("no exported object")))
                .map_err(publish_error)?;
            let registration = self
                .registry
                .publish(&export.interfaces, service, self.export_properties(&inner.properties))
                .map_err(publish_error)?;
            inner.registration = Some(registration);
        }
        Ok(())
    }

    fn stop(&self, inner: &mut Inner, target: State) {
        self.set_state(inner, State::Stopping);
        self.teardown(inner);
        self.set_state(inner, target);
    }

    fn restart(&self, inner: &mut Inner) {
        self.set_state(inner, State::Stopping);
        self.teardown(inner);
        self.start(inner);
    }

    /// Withdraw the export, deactivate, drop the instance, release handles.
    fn teardown(&self, inner: &mut Inner) {
        if let Some(registration) = inner.registration.take() {
            registration.unpublish();
        }
        if let Some(mut instance) = inner.instance.take() {
            if inner.activated {
                if let Ok(bindings) = &self.bindings {
                    if let Err(err) = bindings.deactivate(&mut *instance) {
                        tracing::warn!(
                            component = %self.descriptor.name,
                            context = self.id,
                            error = %err,
                            "deactivation failed"
                        );
                    }
                }
            }
            drop(instance);
        }
        inner.activated = false;
        for adapter in &self.adapters {
            adapter.release_all();
        }
        for binder in &mut inner.binders {
            binder.reset();
        }
    }

    fn fail_locked(&self, inner: &mut Inner, error: ComponentError, permanent: bool) {
        tracing::error!(
            component = %self.descriptor.name,
            context = self.id,
            error = %error,
            cause = ?std::error::Error::source(&error).map(ToString::to_string),
            permanent,
            "component failed"
        );
        if inner.instance.is_some() || inner.registration.is_some() {
            self.teardown(inner);
        }
        inner.failure = Some(Arc::new(error));
        if permanent {
            self.set_state(inner, State::FailedPermanent);
            for adapter in &self.adapters {
                adapter.close();
            }
            inner.satisfied = 0;
        } else {
            self.set_state(inner, State::Failed);
        }
    }

    fn set_state(&self, inner: &mut Inner, to: State) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        if matches!(to, State::Stopped | State::Unsatisfied | State::Active) {
            inner.failure = None;
        }
        match to {
            State::Active | State::Stopped => tracing::info!(
                component = %self.descriptor.name,
                context = self.id,
                %from,
                %to,
                "component state changed"
            ),
            _ => tracing::debug!(
                component = %self.descriptor.name,
                context = self.id,
                %from,
                %to,
                "component state changed"
            ),
        }
        for listener in &self.listeners {
            listener.state_changed(self.id, from, to);
        }
    }

    fn activation_args(&self, params: &[ActivationParam], properties: &Arc<Properties>) -> ActivationArgs {
        let mut args = ActivationArgs::default();
        for param in params {
            match param {
                ActivationParam::Context => {
                    args.context = Some(ComponentHandle::new(
                        self.id,
                        &self.descriptor.name,
                        Arc::clone(properties),
                    ));
                }
                ActivationParam::Environment => args.environment = Some(Arc::clone(&self.registry)),
                ActivationParam::Properties => args.properties = Some(Arc::clone(properties)),
            }
        }
        args
    }

    /// Descriptor export properties, then every non-private context
    /// property, then the component name and id.
    fn export_properties(&self, properties: &Properties) -> Properties {
        let mut out = self
            .descriptor
            .export
            .as_ref()
            .map(|e| e.properties.clone())
            .unwrap_or_default();
        for (key, value) in properties.iter().filter(|(k, _)| !k.starts_with('.')) {
            out.insert(key.clone(), value.clone());
        }
        out.insert(COMPONENT_NAME.to_string(), json!(self.descriptor.name));
        out.insert(COMPONENT_ID.to_string(), json!(self.id));
        out
    }

    fn metadata_error(&self, source: MetadataError) -> ComponentError {
        ComponentError::Metadata {
            component: self.descriptor.name.clone(),
            source,
        }
    }
}

impl Drop for ComponentContext {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if let Some(registration) = inner.registration.take() {
            registration.unpublish();
        }
        if let Some(mut instance) = inner.instance.take() {
            if inner.activated {
                if let Ok(bindings) = &self.bindings {
                    if let Err(err) = bindings.deactivate(&mut *instance) {
                        tracing::warn!(
                            component = %self.descriptor.name,
                            context = self.id,
                            error = %err,
                            "deactivation on drop failed"
                        );
                    }
                }
            }
            drop(instance);
        }
        for adapter in &self.adapters {
            adapter.close();
        }
    }
}

impl std::fmt::Debug for ComponentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentContext")
            .field("id", &self.id)
            .field("name", &self.descriptor.name)
            .finish_non_exhaustive()
    }
}
