//! Collaborator interfaces toward the capability substrate.
//!
//! The runtime core only consumes these traits. Discovery, filtering and
//! ranking live behind [`CapabilityTracker`]; publication and handle
//! management live behind [`CapabilityRegistry`].

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::value::Properties;

/// Shared capability object as handed out by a registry.
pub type Service = Arc<dyn Any + Send + Sync>;

/// Registry-wide identity of a published capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CapabilityId(pub u64);

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle to a published capability: identity plus its advertised metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityRef {
    pub id: CapabilityId,
    pub interfaces: Vec<String>,
    pub properties: Properties,
}

impl CapabilityRef {
    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }

    pub fn ranking(&self) -> i64 {
        self.properties
            .get(SERVICE_RANKING)
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(0)
    }
}

/// Property key holding the ranking of a capability.
pub const SERVICE_RANKING: &str = "service.ranking";

/// The need for capabilities declared by one dependency attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub attribute: String,
    pub interface: String,
    pub filter: Option<String>,
    pub multiple: bool,
    pub optional: bool,
}

/// One pairing of a requirement with a matched capability, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Suiting {
    pub requirement: String,
    pub capability: Option<CapabilityRef>,
}

impl Suiting {
    pub fn matched(requirement: impl Into<String>, capability: CapabilityRef) -> Self {
        Self {
            requirement: requirement.into(),
            capability: Some(capability),
        }
    }

    pub fn unmatched(requirement: impl Into<String>) -> Self {
        Self {
            requirement: requirement.into(),
            capability: None,
        }
    }
}

/// Receiver of tracker notifications. May be invoked on any thread.
pub trait TrackerListener: Send + Sync {
    fn accept(&self, suitings: Vec<Suiting>, satisfied: bool);
}

/// Independently updating source of matches for one requirement.
pub trait CapabilityTracker: Send + Sync {
    /// Start tracking; the listener may be called synchronously from here.
    fn open(&self, listener: Arc<dyn TrackerListener>);

    /// Replace the tracked requirement and recompute the matches.
    fn update(&self, requirement: Requirement);

    /// Stop tracking and drop the listener.
    fn close(&self);
}

/// Creates trackers; injected into every context.
pub trait TrackerFactory: Send + Sync {
    fn create(&self, requirement: Requirement) -> Box<dyn CapabilityTracker>;
}

/// Live publication of a capability.
pub trait Registration: Send + Sync {
    fn reference(&self) -> CapabilityRef;

    /// Replace the advertised properties.
    fn update(&self, properties: Properties);

    fn unpublish(self: Box<Self>);
}

/// Publication and handle management primitives of the host registry.
///
/// `acquire` and `release` must not call tracker listeners synchronously.
pub trait CapabilityRegistry: Send + Sync {
    fn publish(
        &self,
        interfaces: &[String],
        service: Service,
        properties: Properties,
    ) -> anyhow::Result<Box<dyn Registration>>;

    /// Obtain the object behind a reference; `None` when it is gone.
    fn acquire(&self, capability: &CapabilityRef) -> Option<Service>;

    /// Give back one handle obtained with [`acquire`](Self::acquire).
    fn release(&self, capability: &CapabilityRef);
}

/// A capability reference together with its acquired object.
#[derive(Clone)]
pub struct CapabilityHolder {
    pub reference: CapabilityRef,
    pub service: Service,
}

impl CapabilityHolder {
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.service).downcast::<T>().ok()
    }
}

impl fmt::Debug for CapabilityHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityHolder")
            .field("reference", &self.reference)
            .finish_non_exhaustive()
    }
}
