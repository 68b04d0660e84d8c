//! Shared test doubles: a tracker factory driven by hand, a registry that
//! journals every call, and a lifecycle listener that records transitions.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use compkit::{
    CapabilityId, CapabilityRef, CapabilityRegistry, CapabilityTracker, ComponentClass,
    ComponentContext, ComponentDescriptor, ContextServices, LifecycleListener, Properties,
    Registration, Requirement, Service, State, Suiting, TrackerFactory, TrackerListener,
};

/// Ordered log of side effects shared between test components and doubles.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().iter().filter(|e| e.as_str() == entry).count()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

// ---------- Trackers driven by the test ----------

struct Slot {
    requirement: Mutex<Requirement>,
    listener: Mutex<Option<Arc<dyn TrackerListener>>>,
}

/// Tracker factory whose trackers only report what the test pushes.
#[derive(Clone, Default)]
pub struct ManualTrackers {
    slots: Arc<Mutex<Vec<Arc<Slot>>>>,
}

struct ManualTracker(Arc<Slot>);

impl CapabilityTracker for ManualTracker {
    fn open(&self, listener: Arc<dyn TrackerListener>) {
        *self.0.listener.lock() = Some(listener);
    }

    fn update(&self, requirement: Requirement) {
        *self.0.requirement.lock() = requirement;
    }

    fn close(&self) {
        self.0.listener.lock().take();
    }
}

impl TrackerFactory for ManualTrackers {
    fn create(&self, requirement: Requirement) -> Box<dyn CapabilityTracker> {
        let slot = Arc::new(Slot {
            requirement: Mutex::new(requirement),
            listener: Mutex::new(None),
        });
        self.slots.lock().push(Arc::clone(&slot));
        Box::new(ManualTracker(slot))
    }
}

impl ManualTrackers {
    /// Deliver a notification to the most recent open tracker of `attribute`.
    pub fn push(&self, attribute: &str, capabilities: &[CapabilityRef], satisfied: bool) {
        let listener = self
            .slots
            .lock()
            .iter()
            .rev()
            .filter(|s| s.requirement.lock().attribute == attribute)
            .find_map(|s| s.listener.lock().clone())
            .unwrap_or_else(|| panic!("no open tracker for {attribute}"));
        let suitings = capabilities
            .iter()
            .map(|c| Suiting::matched(attribute, c.clone()))
            .collect();
        listener.accept(suitings, satisfied);
    }

    pub fn requirement(&self, attribute: &str) -> Option<Requirement> {
        self.slots
            .lock()
            .iter()
            .rev()
            .map(|s| s.requirement.lock().clone())
            .find(|r| r.attribute == attribute)
    }

    pub fn is_open(&self, attribute: &str) -> bool {
        self.slots
            .lock()
            .iter()
            .filter(|s| s.requirement.lock().attribute == attribute)
            .any(|s| s.listener.lock().is_some())
    }
}

pub fn capability(id: u64, interface: &str) -> CapabilityRef {
    let mut properties = Properties::new();
    properties.insert("service.id".into(), json!(id));
    CapabilityRef {
        id: CapabilityId(id),
        interfaces: vec![interface.to_string()],
        properties,
    }
}

// ---------- Registry that journals every call ----------

#[derive(Clone, Default)]
pub struct RecordingRegistry {
    pub journal: Journal,
    gone: Arc<Mutex<HashSet<u64>>>,
    next: Arc<Mutex<u64>>,
}

impl RecordingRegistry {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    /// Make later `acquire` calls for `id` fail.
    pub fn withdraw(&self, id: u64) {
        self.gone.lock().insert(id);
    }
}

struct RecordingRegistration {
    journal: Journal,
    reference: CapabilityRef,
}

impl Registration for RecordingRegistration {
    fn reference(&self) -> CapabilityRef {
        self.reference.clone()
    }

    fn update(&self, properties: Properties) {
        let keys: Vec<&String> = properties.keys().collect();
        self.journal.push(format!("update {keys:?}"));
    }

    fn unpublish(self: Box<Self>) {
        self.journal.push("unpublish");
    }
}

impl CapabilityRegistry for RecordingRegistry {
    fn publish(
        &self,
        interfaces: &[String],
        _service: Service,
        properties: Properties,
    ) -> anyhow::Result<Box<dyn Registration>> {
        let id = {
            let mut next = self.next.lock();
            *next += 1;
            1000 + *next
        };
        self.journal.push(format!("publish {}", interfaces.join(",")));
        Ok(Box::new(RecordingRegistration {
            journal: self.journal.clone(),
            reference: CapabilityRef {
                id: CapabilityId(id),
                interfaces: interfaces.to_vec(),
                properties,
            },
        }))
    }

    fn acquire(&self, capability: &CapabilityRef) -> Option<Service> {
        if self.gone.lock().contains(&capability.id.0) {
            return None;
        }
        self.journal.push(format!("acquire {}", capability.id));
        Some(Arc::new(capability.id.0))
    }

    fn release(&self, capability: &CapabilityRef) {
        self.journal.push(format!("release {}", capability.id));
    }
}

// ---------- Lifecycle observation ----------

#[derive(Clone, Default)]
pub struct Transitions(Arc<Mutex<Vec<(u64, State, State)>>>);

impl LifecycleListener for Transitions {
    fn state_changed(&self, context: u64, from: State, to: State) {
        self.0.lock().push((context, from, to));
    }
}

impl Transitions {
    pub fn of(&self, context: u64) -> Vec<(State, State)> {
        self.0
            .lock()
            .iter()
            .filter(|(c, _, _)| *c == context)
            .map(|&(_, f, t)| (f, t))
            .collect()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// Everything a context test needs, wired together.
pub struct Harness {
    pub journal: Journal,
    pub registry: RecordingRegistry,
    pub trackers: ManualTrackers,
    pub transitions: Transitions,
}

impl Harness {
    pub fn new() -> Self {
        let journal = Journal::default();
        Self {
            registry: RecordingRegistry::new(journal.clone()),
            journal,
            trackers: ManualTrackers::default(),
            transitions: Transitions::default(),
        }
    }

    pub fn services(&self) -> ContextServices {
        ContextServices::new(
            Arc::new(self.registry.clone()),
            Arc::new(self.trackers.clone()),
        )
        .with_listener(Arc::new(self.transitions.clone()))
    }

    pub fn context(
        &self,
        descriptor: Arc<ComponentDescriptor>,
        class: &Arc<ComponentClass>,
        properties: Properties,
    ) -> Arc<ComponentContext> {
        ComponentContext::new(descriptor, Some(class), properties, &self.services())
    }
}

pub fn props(v: serde_json::Value) -> Properties {
    serde_json::from_value(v).expect("property map")
}

/// Install a test subscriber once; output only shows for failing tests.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("compkit=debug")
        .with_test_writer()
        .try_init();
}
