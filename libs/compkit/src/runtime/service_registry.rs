//! In-memory capability registry with push-model trackers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::capability::{
    CapabilityId, CapabilityRef, CapabilityRegistry, CapabilityTracker, Registration, Requirement,
    Service, Suiting, TrackerFactory, TrackerListener,
};
use crate::runtime::filter::Filter;
use crate::value::Properties;

/// Property key carrying the registry-assigned capability id.
pub const SERVICE_ID: &str = "service.id";

struct Entry {
    reference: CapabilityRef,
    service: Service,
    /// Outstanding `acquire` calls not yet released.
    usage: usize,
}

#[derive(Default)]
struct Inner {
    next_id: AtomicU64,
    next_tracker: AtomicU64,
    entries: DashMap<CapabilityId, Entry>,
    trackers: DashMap<u64, Weak<TrackerShared>>,
}

/// Publishes capabilities and tracks them for component dependencies.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("capabilities", &self.inner.entries.len())
            .field("trackers", &self.inner.trackers.len())
            .finish()
    }
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Published capabilities providing `interface`, best-ranked first.
    pub fn references(&self, interface: &str) -> Vec<CapabilityRef> {
        self.inner.matching(interface, None)
    }

    /// Outstanding acquisitions of a capability; `None` once unpublished.
    pub fn usage(&self, id: CapabilityId) -> Option<usize> {
        self.inner.entries.get(&id).map(|e| e.usage)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }
}

impl Inner {
    fn matching(&self, interface: &str, filter: Option<&Filter>) -> Vec<CapabilityRef> {
        let mut refs: Vec<CapabilityRef> = self
            .entries
            .iter()
            .filter(|e| e.reference.interfaces.iter().any(|i| i == interface))
            .filter(|e| filter.map_or(true, |f| f.matches(&e.reference.properties)))
            .map(|e| e.reference.clone())
            .collect();
        refs.sort_by(|a, b| b.ranking().cmp(&a.ranking()).then(a.id.cmp(&b.id)));
        refs
    }

    /// Push fresh matches to every tracker interested in one of `interfaces`.
    fn changed(&self, interfaces: &[String]) {
        let trackers: Vec<Arc<TrackerShared>> = self
            .trackers
            .iter()
            .filter_map(|t| t.value().upgrade())
            .collect();
        for t in trackers {
            if t.interested_in(interfaces) {
                t.notify();
            }
        }
    }

    fn remove(&self, id: CapabilityId) {
        if let Some((_, entry)) = self.entries.remove(&id) {
            if entry.usage > 0 {
                tracing::debug!(capability = %id, usage = entry.usage, "unpublishing capability still in use");
            }
            self.changed(&entry.reference.interfaces);
        }
    }
}

impl CapabilityRegistry for ServiceRegistry {
    fn publish(
        &self,
        interfaces: &[String],
        service: Service,
        mut properties: Properties,
    ) -> anyhow::Result<Box<dyn Registration>> {
        if interfaces.is_empty() {
            anyhow::bail!("a capability must provide at least one interface");
        }
        let id = CapabilityId(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        properties.insert(SERVICE_ID.to_string(), serde_json::json!(id.0));
        let reference = CapabilityRef {
            id,
            interfaces: interfaces.to_vec(),
            properties,
        };
        self.inner.entries.insert(
            id,
            Entry {
                reference: reference.clone(),
                service,
                usage: 0,
            },
        );
        tracing::debug!(capability = %id, ?interfaces, "capability published");
        self.inner.changed(interfaces);

        Ok(Box::new(ServiceRegistration {
            registry: Arc::clone(&self.inner),
            id,
            interfaces: interfaces.to_vec(),
        }))
    }

    fn acquire(&self, capability: &CapabilityRef) -> Option<Service> {
        let mut entry = self.inner.entries.get_mut(&capability.id)?;
        entry.usage += 1;
        Some(Arc::clone(&entry.service))
    }

    fn release(&self, capability: &CapabilityRef) {
        if let Some(mut entry) = self.inner.entries.get_mut(&capability.id) {
            entry.usage = entry.usage.saturating_sub(1);
        }
    }
}

impl TrackerFactory for ServiceRegistry {
    fn create(&self, requirement: Requirement) -> Box<dyn CapabilityTracker> {
        let id = self.inner.next_tracker.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(TrackerShared {
            id,
            registry: Arc::downgrade(&self.inner),
            state: Mutex::new(TrackerState::new(requirement)),
        });
        Box::new(ServiceTracker { shared })
    }
}

struct ServiceRegistration {
    registry: Arc<Inner>,
    id: CapabilityId,
    interfaces: Vec<String>,
}

impl Registration for ServiceRegistration {
    fn reference(&self) -> CapabilityRef {
        self.registry
            .entries
            .get(&self.id)
            .map(|e| e.reference.clone())
            .unwrap_or_else(|| CapabilityRef {
                id: self.id,
                interfaces: self.interfaces.clone(),
                properties: Properties::new(),
            })
    }

    fn update(&self, mut properties: Properties) {
        properties.insert(SERVICE_ID.to_string(), serde_json::json!(self.id.0));
        let updated = match self.registry.entries.get_mut(&self.id) {
            Some(mut entry) if entry.reference.properties != properties => {
                entry.reference.properties = properties;
                true
            }
            _ => false,
        };
        if updated {
            self.registry.changed(&self.interfaces);
        }
    }

    fn unpublish(self: Box<Self>) {
        tracing::debug!(capability = %self.id, "capability unpublished");
        self.registry.remove(self.id);
    }
}

struct TrackerState {
    requirement: Requirement,
    filter: Option<Filter>,
    listener: Option<Arc<dyn TrackerListener>>,
    /// A delivery loop is running on some thread.
    delivering: bool,
    /// Matches changed since the running loop computed them.
    dirty: bool,
}

impl TrackerState {
    fn new(requirement: Requirement) -> Self {
        let filter = parse_filter(&requirement);
        Self {
            requirement,
            filter,
            listener: None,
            delivering: false,
            dirty: false,
        }
    }
}

fn parse_filter(requirement: &Requirement) -> Option<Filter> {
    let raw = requirement.filter.as_deref()?;
    match Filter::parse(raw) {
        Ok(f) => Some(f),
        Err(err) => {
            tracing::warn!(
                dependency = %requirement.attribute,
                error = %err,
                "invalid target filter, nothing will match"
            );
            // Matches nothing.
            Some(Filter::Not(Box::new(Filter::Present(SERVICE_ID.to_string()))))
        }
    }
}

struct TrackerShared {
    id: u64,
    registry: Weak<Inner>,
    state: Mutex<TrackerState>,
}

impl TrackerShared {
    fn interested_in(&self, interfaces: &[String]) -> bool {
        let st = self.state.lock();
        st.listener.is_some() && interfaces.iter().any(|i| *i == st.requirement.interface)
    }

    /// Deliver the current matches. Concurrent callers coalesce into the
    /// thread already delivering, which loops until nothing changed.
    fn notify(&self) {
        {
            let mut st = self.state.lock();
            st.dirty = true;
            if st.delivering || st.listener.is_none() {
                return;
            }
            st.delivering = true;
        }
        loop {
            let (listener, requirement, filter) = {
                let mut st = self.state.lock();
                let Some(listener) = st.listener.clone().filter(|_| st.dirty) else {
                    st.delivering = false;
                    return;
                };
                st.dirty = false;
                (listener, st.requirement.clone(), st.filter.clone())
            };
            let Some(registry) = self.registry.upgrade() else {
                self.state.lock().delivering = false;
                return;
            };
            let refs = registry.matching(&requirement.interface, filter.as_ref());
            drop(registry);

            let satisfied = requirement.optional || !refs.is_empty();
            let take = if requirement.multiple { refs.len() } else { 1 };
            let suitings = refs
                .into_iter()
                .take(take)
                .map(|r| Suiting::matched(requirement.attribute.clone(), r))
                .collect();
            listener.accept(suitings, satisfied);
        }
    }
}

struct ServiceTracker {
    shared: Arc<TrackerShared>,
}

impl CapabilityTracker for ServiceTracker {
    fn open(&self, listener: Arc<dyn TrackerListener>) {
        self.shared.state.lock().listener = Some(listener);
        if let Some(registry) = self.shared.registry.upgrade() {
            registry
                .trackers
                .insert(self.shared.id, Arc::downgrade(&self.shared));
        }
        self.shared.notify();
    }

    fn update(&self, requirement: Requirement) {
        {
            let mut st = self.shared.state.lock();
            st.filter = parse_filter(&requirement);
            st.requirement = requirement;
        }
        self.shared.notify();
    }

    fn close(&self) {
        self.shared.state.lock().listener = None;
        if let Some(registry) = self.shared.registry.upgrade() {
            registry.trackers.remove(&self.shared.id);
        }
    }
}

impl Drop for ServiceTracker {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(Vec<CapabilityId>, bool)>>,
    }

    impl TrackerListener for Recorder {
        fn accept(&self, suitings: Vec<Suiting>, satisfied: bool) {
            let ids = suitings
                .iter()
                .filter_map(|s| s.capability.as_ref().map(|c| c.id))
                .collect();
            self.calls.lock().push((ids, satisfied));
        }
    }

    fn requirement(multiple: bool, filter: Option<&str>) -> Requirement {
        Requirement {
            attribute: "dep".into(),
            interface: "log.sink".into(),
            filter: filter.map(str::to_string),
            multiple,
            optional: false,
        }
    }

    fn publish(reg: &ServiceRegistry, props: serde_json::Value) -> Box<dyn Registration> {
        reg.publish(
            &["log.sink".to_string()],
            Arc::new(()),
            serde_json::from_value(props).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn tracker_pushes_on_open_publish_and_unpublish() {
        let reg = ServiceRegistry::new();
        let rec = Arc::new(Recorder::default());
        let tracker = reg.create(requirement(false, None));
        tracker.open(rec.clone());
        assert_eq!(rec.calls.lock().last().cloned(), Some((vec![], false)));

        let a = publish(&reg, json!({}));
        let a_id = a.reference().id;
        assert_eq!(rec.calls.lock().last().cloned(), Some((vec![a_id], true)));

        a.unpublish();
        assert_eq!(rec.calls.lock().last().cloned(), Some((vec![], false)));

        tracker.close();
        let before = rec.calls.lock().len();
        let _b = publish(&reg, json!({}));
        assert_eq!(rec.calls.lock().len(), before);
    }

    #[test]
    fn ranking_then_id_ordering() {
        let reg = ServiceRegistry::new();
        let low = publish(&reg, json!({}));
        let high = publish(&reg, json!({ "service.ranking": 10 }));
        let low2 = publish(&reg, json!({}));
        let order: Vec<_> = reg.references("log.sink").iter().map(|r| r.id).collect();
        assert_eq!(
            order,
            vec![high.reference().id, low.reference().id, low2.reference().id]
        );
    }

    #[test]
    fn filter_and_requirement_update() {
        let reg = ServiceRegistry::new();
        let file = publish(&reg, json!({ "kind": "file" }));
        let console = publish(&reg, json!({ "kind": "console" }));
        let rec = Arc::new(Recorder::default());
        let tracker = reg.create(requirement(true, Some("(kind=file)")));
        tracker.open(rec.clone());
        assert_eq!(
            rec.calls.lock().last().cloned(),
            Some((vec![file.reference().id], true))
        );

        tracker.update(requirement(true, Some("(kind=console)")));
        assert_eq!(
            rec.calls.lock().last().cloned(),
            Some((vec![console.reference().id], true))
        );
    }

    #[test]
    fn acquire_and_release_count_usage() {
        let reg = ServiceRegistry::new();
        let a = publish(&reg, json!({}));
        let r = a.reference();
        assert!(reg.acquire(&r).is_some());
        assert!(reg.acquire(&r).is_some());
        assert_eq!(reg.usage(r.id), Some(2));
        reg.release(&r);
        assert_eq!(reg.usage(r.id), Some(1));
        a.unpublish();
        assert!(reg.acquire(&r).is_none());
        assert_eq!(reg.usage(r.id), None);
    }

    #[test]
    fn property_update_reaches_filtered_tracker() {
        let reg = ServiceRegistry::new();
        let a = publish(&reg, json!({ "kind": "console" }));
        let rec = Arc::new(Recorder::default());
        let tracker = reg.create(requirement(false, Some("(kind=file)")));
        tracker.open(rec.clone());
        assert_eq!(rec.calls.lock().last().cloned(), Some((vec![], false)));

        a.update(serde_json::from_value(json!({ "kind": "file" })).unwrap());
        assert_eq!(
            rec.calls.lock().last().cloned(),
            Some((vec![a.reference().id], true))
        );
    }
}
