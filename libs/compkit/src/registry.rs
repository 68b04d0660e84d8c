use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::class::ComponentClass;
use crate::metadata::ComponentDescriptor;

/// The function type submitted via `inventory::submit!`.
/// It fills a *builder*, not the final registry.
pub struct TypeRegistrator(pub fn(&mut TypeRegistryBuilder));

inventory::collect!(TypeRegistrator);

/// Implementation types and component descriptors known to a runtime.
pub struct TypeRegistry {
    classes: HashMap<String, Arc<ComponentClass>>,
    /// In registration order.
    components: Vec<Arc<ComponentDescriptor>>,
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&str> = self.classes.keys().map(String::as_str).collect();
        types.sort_unstable();
        f.debug_struct("TypeRegistry")
            .field("types", &types)
            .field(
                "components",
                &self.components.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl TypeRegistry {
    /// Discover via inventory, have registrators fill the builder, then build.
    pub fn discover_and_build() -> Result<Self, TypeRegistryError> {
        let mut b = TypeRegistryBuilder::default();
        for r in ::inventory::iter::<TypeRegistrator> {
            r.0(&mut b);
        }
        b.build()
    }

    pub fn class(&self, type_id: &str) -> Option<Arc<ComponentClass>> {
        self.classes.get(type_id).cloned()
    }

    pub fn components(&self) -> &[Arc<ComponentDescriptor>] {
        &self.components
    }

    pub fn component(&self, name: &str) -> Option<&Arc<ComponentDescriptor>> {
        self.components.iter().find(|c| c.name == name)
    }
}

/// Builder fed by registrators. Uniqueness is enforced at build time.
#[derive(Default)]
pub struct TypeRegistryBuilder {
    classes: HashMap<String, Arc<ComponentClass>>,
    components: Vec<Arc<ComponentDescriptor>>,
    errors: Vec<String>,
}

impl TypeRegistryBuilder {
    pub fn register_type(&mut self, class: Arc<ComponentClass>) -> &mut Self {
        let type_id = class.type_id().to_string();
        if self.classes.contains_key(&type_id) {
            self.errors
                .push(format!("Type '{type_id}' is already registered"));
        } else {
            self.classes.insert(type_id, class);
        }
        self
    }

    pub fn register_component(&mut self, descriptor: Arc<ComponentDescriptor>) -> &mut Self {
        if self.components.iter().any(|c| c.name == descriptor.name) {
            self.errors
                .push(format!("Component '{}' is already registered", descriptor.name));
        } else {
            self.components.push(descriptor);
        }
        self
    }

    pub fn build(self) -> Result<TypeRegistry, TypeRegistryError> {
        if !self.errors.is_empty() {
            return Err(TypeRegistryError::InvalidRegistryConfiguration {
                errors: self.errors,
            });
        }

        // Unknown types are not a build error: the component fails
        // permanently when its context opens.
        for c in &self.components {
            if !self.classes.contains_key(&c.implementation) {
                tracing::warn!(
                    component = %c.name,
                    implementation = %c.implementation,
                    "Component refers to an unregistered type"
                );
            }
        }

        tracing::info!(
            types = self.classes.len(),
            components = ?self.components.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            "Type registry built"
        );

        Ok(TypeRegistry {
            classes: self.classes,
            components: self.components,
        })
    }
}

#[derive(Debug, Error)]
pub enum TypeRegistryError {
    #[error("invalid registry configuration:\n{errors:#?}")]
    InvalidRegistryConfiguration { errors: Vec<String> },
}
