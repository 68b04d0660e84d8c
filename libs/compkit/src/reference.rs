//! Reference tracker adapter: bridges one push-model capability tracker into
//! the owning context.
//!
//! Lock order is context lock, then adapter mutex. The adapter never holds its
//! mutex while calling into the context or into user code.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::capability::{
    CapabilityId, CapabilityRef, CapabilityRegistry, CapabilityTracker, Requirement, Service,
    Suiting, TrackerListener,
};
use crate::class::{BoundCapability, DependencySetter, DependencyValue};
use crate::context::ComponentContext;
use crate::error::ComponentError;
use crate::metadata::{AttributeDescriptor, DependencyKind};
use crate::value::Properties;

/// What an adapter tells its context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    Satisfied,
    Unsatisfied,
    ChangedNonDynamic,
    Rebind,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct AdapterEvent {
    pub(crate) adapter: usize,
    pub(crate) session: u64,
    pub(crate) signal: Signal,
}

struct Held {
    reference: CapabilityRef,
    service: Option<Service>,
    /// Suitings of the current binding that reference this capability.
    count: usize,
}

#[derive(Default)]
struct AdapterState {
    open: bool,
    session: u64,
    suitings: Vec<Suiting>,
    satisfied: bool,
    notification_sent: bool,
    held: HashMap<CapabilityId, Held>,
}

pub(crate) struct ReferenceAdapter {
    index: usize,
    id: String,
    kind: DependencyKind,
    multiple: bool,
    pub(crate) dynamic: bool,
    setter: Option<DependencySetter>,
    requirement: Mutex<Requirement>,
    tracker: Box<dyn CapabilityTracker>,
    registry: Arc<dyn CapabilityRegistry>,
    owner: Weak<ComponentContext>,
    state: Mutex<AdapterState>,
}

/// Requirement of `attr` under the given configuration: the `<id>.target`
/// property overrides the declared target filter.
pub(crate) fn requirement_for(attr: &AttributeDescriptor, props: &Properties) -> Option<Requirement> {
    let spec = attr.dependency_spec()?;
    let filter = props
        .get(&attr.target_key())
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .or_else(|| spec.target.clone());
    Some(Requirement {
        attribute: attr.id.clone(),
        interface: spec.interface.clone(),
        filter,
        multiple: attr.multiple,
        optional: attr.optional,
    })
}

impl ReferenceAdapter {
    pub(crate) fn new(
        index: usize,
        attr: &AttributeDescriptor,
        requirement: Requirement,
        setter: Option<DependencySetter>,
        tracker: Box<dyn CapabilityTracker>,
        registry: Arc<dyn CapabilityRegistry>,
        owner: Weak<ComponentContext>,
    ) -> Self {
        let kind = attr
            .dependency_spec()
            .map(|s| s.kind)
            .unwrap_or(DependencyKind::Reference);
        Self {
            index,
            id: attr.id.clone(),
            kind,
            multiple: attr.multiple,
            dynamic: attr.dynamic,
            setter,
            requirement: Mutex::new(requirement),
            tracker,
            registry,
            owner,
            state: Mutex::new(AdapterState::default()),
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn session(&self) -> u64 {
        self.state.lock().session
    }

    pub(crate) fn is_satisfied(&self) -> bool {
        self.state.lock().satisfied
    }

    pub(crate) fn held_count(&self) -> usize {
        self.state.lock().held.len()
    }

    pub(crate) fn requirement(&self) -> Requirement {
        self.requirement.lock().clone()
    }

    /// Subscribe to the tracker. Notifications may arrive before this returns.
    pub(crate) fn open(self: &Arc<Self>) {
        {
            let mut st = self.state.lock();
            st.open = true;
            st.session += 1;
            st.satisfied = false;
            st.notification_sent = false;
            st.suitings.clear();
        }
        tracing::debug!(dependency = %self.id, "opening reference tracker");
        self.tracker.open(Arc::clone(self) as Arc<dyn TrackerListener>);
    }

    /// Unsubscribe and release every held capability.
    pub(crate) fn close(&self) {
        {
            let mut st = self.state.lock();
            if !st.open {
                drop(st);
                self.release_all();
                return;
            }
            st.open = false;
            st.satisfied = false;
            st.notification_sent = false;
            st.suitings.clear();
        }
        self.tracker.close();
        self.release_all();
        tracing::debug!(dependency = %self.id, "closed reference tracker");
    }

    /// The requirement changed through reconfiguration; the tracker recomputes.
    pub(crate) fn update_requirement(&self, requirement: Requirement) -> bool {
        {
            let mut current = self.requirement.lock();
            if *current == requirement {
                return false;
            }
            *current = requirement.clone();
        }
        tracing::debug!(
            dependency = %self.id,
            filter = ?requirement.filter,
            "dependency requirement changed"
        );
        self.tracker.update(requirement);
        true
    }

    /// Inject the current matches into `instance`.
    ///
    /// Capabilities not held yet are acquired before the setter runs; those no
    /// longer referenced are released after it.
    pub(crate) fn bind(&self, instance: &mut (dyn Any + Send + Sync)) -> Result<(), ComponentError> {
        let Some(setter) = &self.setter else {
            return Ok(());
        };

        let (value, counts) = {
            let mut st = self.state.lock();
            let selected: Vec<CapabilityRef> = {
                let matched = st.suitings.iter().filter_map(|s| s.capability.clone());
                if self.multiple {
                    matched.collect()
                } else {
                    matched.take(1).collect()
                }
            };

            let mut counts: HashMap<CapabilityId, usize> = HashMap::new();
            for r in &selected {
                *counts.entry(r.id).or_default() += 1;
            }

            let mut bound = Vec::with_capacity(selected.len());
            for reference in selected {
                let service = match self.kind {
                    DependencyKind::Reference => None,
                    DependencyKind::Service | DependencyKind::Holder => {
                        if let Some(held) = st.held.get(&reference.id) {
                            held.service.clone()
                        } else {
                            let Some(service) = self.registry.acquire(&reference) else {
                                return Err(ComponentError::CapabilityUnavailable {
                                    attribute: self.id.clone(),
                                    capability: reference.id,
                                });
                            };
                            st.held.insert(
                                reference.id,
                                Held {
                                    reference: reference.clone(),
                                    service: Some(service.clone()),
                                    count: 0,
                                },
                            );
                            Some(service)
                        }
                    }
                };
                bound.push(BoundCapability { reference, service });
            }

            (
                DependencyValue {
                    kind: self.kind,
                    bound,
                },
                counts,
            )
        };

        let result = setter
            .call(instance, value)
            .map_err(|source| ComponentError::BindingFailed {
                attribute: self.id.clone(),
                source,
            });

        let stale: Vec<CapabilityRef> = {
            let mut st = self.state.lock();
            for (id, held) in st.held.iter_mut() {
                held.count = counts.get(id).copied().unwrap_or(0);
            }
            let gone: Vec<CapabilityId> = st
                .held
                .iter()
                .filter(|(_, h)| h.count == 0)
                .map(|(id, _)| *id)
                .collect();
            gone.into_iter()
                .filter_map(|id| st.held.remove(&id))
                .map(|h| h.reference)
                .collect()
        };
        for reference in &stale {
            tracing::trace!(dependency = %self.id, capability = %reference.id, "releasing capability");
            self.registry.release(reference);
        }

        result
    }

    /// Release every held capability; the instance that used them is gone.
    pub(crate) fn release_all(&self) {
        let held: Vec<Held> = {
            let mut st = self.state.lock();
            st.held.drain().map(|(_, h)| h).collect()
        };
        for h in held {
            self.registry.release(&h.reference);
        }
    }

    fn notify(&self, session: u64, signal: Signal) {
        let Some(owner) = self.owner.upgrade() else {
            return;
        };
        owner.adapter_event(AdapterEvent {
            adapter: self.index,
            session,
            signal,
        });
    }
}

impl TrackerListener for ReferenceAdapter {
    fn accept(&self, suitings: Vec<Suiting>, satisfied: bool) {
        let (session, signal) = {
            let mut st = self.state.lock();
            if !st.open {
                return;
            }
            let changed = st.suitings != suitings;
            st.suitings = suitings;
            st.satisfied = satisfied;

            let signal = if satisfied && !st.notification_sent {
                st.notification_sent = true;
                Some(Signal::Satisfied)
            } else if satisfied {
                match (changed, self.dynamic) {
                    (false, _) => None,
                    (true, true) => Some(Signal::Rebind),
                    (true, false) => Some(Signal::ChangedNonDynamic),
                }
            } else if st.notification_sent {
                st.notification_sent = false;
                Some(Signal::Unsatisfied)
            } else {
                None
            };
            (st.session, signal)
        };

        if let Some(signal) = signal {
            tracing::debug!(dependency = %self.id, ?signal, "tracker notification");
            self.notify(session, signal);
        }
    }
}
