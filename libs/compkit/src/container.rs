//! Component container: owns the contexts of one descriptor and reacts to
//! configuration presence events.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::class::ComponentClass;
use crate::context::{ComponentContext, ContextServices};
use crate::metadata::{ComponentDescriptor, ConfigurationPolicy, InstancePolicy};
use crate::value::Properties;

/// Separates the factory pid from the instance name in a configuration key.
pub const FACTORY_SEPARATOR: char = '~';

#[derive(Default)]
struct ContainerState {
    started: bool,
    /// Latest configuration per key; recorded even before `start`.
    configs: BTreeMap<String, Properties>,
    /// Keyed by configuration key (the pid for singletons).
    contexts: BTreeMap<String, Arc<ComponentContext>>,
}

pub struct ComponentContainer {
    descriptor: Arc<ComponentDescriptor>,
    class: Option<Arc<ComponentClass>>,
    services: ContextServices,
    state: Mutex<ContainerState>,
}

impl ComponentContainer {
    pub fn new(
        descriptor: Arc<ComponentDescriptor>,
        class: Option<Arc<ComponentClass>>,
        services: ContextServices,
    ) -> Self {
        Self {
            descriptor,
            class,
            services,
            state: Mutex::new(ContainerState::default()),
        }
    }

    pub fn descriptor(&self) -> &Arc<ComponentDescriptor> {
        &self.descriptor
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    pub fn contexts(&self) -> Vec<Arc<ComponentContext>> {
        self.state.lock().contexts.values().cloned().collect()
    }

    /// Contexts with their configuration keys.
    pub fn entries(&self) -> Vec<(String, Arc<ComponentContext>)> {
        self.state
            .lock()
            .contexts
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }

    pub fn context(&self, key: &str) -> Option<Arc<ComponentContext>> {
        self.state.lock().contexts.get(key).cloned()
    }

    /// The singleton context, if one exists.
    pub fn singleton(&self) -> Option<Arc<ComponentContext>> {
        match self.descriptor.instance_policy {
            InstancePolicy::Singleton => self.context(&self.descriptor.configuration_pid),
            InstancePolicy::Factory => None,
        }
    }

    /// Whether configuration events for `key` concern this container.
    pub fn accepts(&self, key: &str) -> bool {
        if self.descriptor.configuration_policy == ConfigurationPolicy::Ignore {
            return false;
        }
        match self.descriptor.instance_policy {
            InstancePolicy::Singleton => key == self.descriptor.configuration_pid,
            InstancePolicy::Factory => key
                .strip_prefix(self.descriptor.configuration_pid.as_str())
                .and_then(|rest| rest.strip_prefix(FACTORY_SEPARATOR))
                .is_some_and(|name| !name.is_empty()),
        }
    }

    pub fn start(&self) {
        let opened = {
            let mut st = self.state.lock();
            if st.started {
                return;
            }
            st.started = true;
            let pid = self.descriptor.configuration_pid.clone();

            let mut opened = Vec::new();
            match (self.descriptor.configuration_policy, self.descriptor.instance_policy) {
                (ConfigurationPolicy::Ignore, _) => {
                    opened.push(self.insert(&mut st, pid, Properties::new()));
                }
                (ConfigurationPolicy::Optional, InstancePolicy::Singleton) => {
                    let props = st.configs.get(&pid).cloned().unwrap_or_default();
                    opened.push(self.insert(&mut st, pid, props));
                }
                (ConfigurationPolicy::Require, InstancePolicy::Singleton) => {
                    if let Some(props) = st.configs.get(&pid).cloned() {
                        opened.push(self.insert(&mut st, pid, props));
                    }
                }
                (_, InstancePolicy::Factory) => {
                    let configs: Vec<(String, Properties)> =
                        st.configs.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                    for (key, props) in configs {
                        opened.push(self.insert(&mut st, key, props));
                    }
                }
            }
            opened
        };

        // Activators may call back into the container.
        for ctx in &opened {
            ctx.open();
        }
        tracing::debug!(
            component = %self.descriptor.name,
            contexts = opened.len(),
            "container started"
        );
    }

    /// Close and discard every context.
    pub fn stop(&self) {
        let contexts = {
            let mut st = self.state.lock();
            st.started = false;
            std::mem::take(&mut st.contexts)
        };
        for (_, ctx) in contexts.into_iter().rev() {
            ctx.close();
        }
        tracing::debug!(component = %self.descriptor.name, "container stopped");
    }

    /// A configuration appeared, changed (`Some`) or disappeared (`None`).
    pub fn configuration_present(&self, key: &str, properties: Option<Properties>) {
        if !self.accepts(key) {
            tracing::trace!(component = %self.descriptor.name, key, "configuration event ignored");
            return;
        }

        let action = {
            let mut st = self.state.lock();
            match &properties {
                Some(p) => {
                    st.configs.insert(key.to_string(), p.clone());
                }
                None => {
                    st.configs.remove(key);
                }
            }
            if !st.started {
                return;
            }

            let existing = st.contexts.get(key).cloned();
            match (properties, existing) {
                (Some(props), Some(ctx)) => Action::Update(ctx, props),
                (Some(props), None) => Action::Open(self.insert(&mut st, key.to_string(), props)),
                (None, Some(ctx)) => {
                    st.contexts.remove(key);
                    let reopen = self.descriptor.configuration_policy
                        == ConfigurationPolicy::Optional
                        && self.descriptor.instance_policy == InstancePolicy::Singleton;
                    let replacement =
                        reopen.then(|| self.insert(&mut st, key.to_string(), Properties::new()));
                    Action::Close(ctx, replacement)
                }
                (None, None) => return,
            }
        };

        match action {
            Action::Update(ctx, props) => {
                tracing::debug!(component = %self.descriptor.name, key, "configuration changed");
                ctx.update_configuration(props);
            }
            Action::Open(ctx) => {
                tracing::debug!(component = %self.descriptor.name, key, "configuration appeared");
                ctx.open();
            }
            Action::Close(ctx, replacement) => {
                tracing::debug!(component = %self.descriptor.name, key, "configuration removed");
                ctx.close();
                if let Some(replacement) = replacement {
                    replacement.open();
                }
            }
        }
    }

    /// Builds a context and records it under `key`; the caller opens it once
    /// the state lock is released.
    fn insert(
        &self,
        st: &mut ContainerState,
        key: String,
        properties: Properties,
    ) -> Arc<ComponentContext> {
        let ctx = ComponentContext::new(
            Arc::clone(&self.descriptor),
            self.class.as_deref(),
            properties,
            &self.services,
        );
        st.contexts.insert(key, Arc::clone(&ctx));
        ctx
    }
}

/// What a configuration event does to the contexts, decided under the lock.
enum Action {
    Update(Arc<ComponentContext>, Properties),
    Open(Arc<ComponentContext>),
    Close(Arc<ComponentContext>, Option<Arc<ComponentContext>>),
}

impl std::fmt::Debug for ComponentContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.state.lock();
        f.debug_struct("ComponentContainer")
            .field("component", &self.descriptor.name)
            .field("started", &st.started)
            .field("contexts", &st.contexts.keys().collect::<Vec<_>>())
            .finish()
    }
}
