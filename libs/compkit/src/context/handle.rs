use std::sync::Arc;

use crate::value::Properties;

/// Snapshot of a context handed to activation methods.
///
/// Never touches the context lock, so user code may keep and read it freely.
#[derive(Debug, Clone)]
pub struct ComponentHandle {
    id: u64,
    name: Arc<str>,
    properties: Arc<Properties>,
}

impl ComponentHandle {
    pub(crate) fn new(id: u64, name: &str, properties: Arc<Properties>) -> Self {
        Self {
            id,
            name: Arc::from(name),
            properties,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Properties as they were when the handle was taken.
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }
}
