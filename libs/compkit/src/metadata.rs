//! Component metadata: the immutable description a context is driven from.
//!
//! Descriptors are assumed to be parsed and validated already; the builders
//! here only make it convenient to assemble them in code.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::value::{AttrValue, Properties, ValueType};

/// Whether the component consults external configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigurationPolicy {
    /// Never consults external configuration.
    Ignore,
    /// Runs with or without configuration.
    #[default]
    Optional,
    /// Cannot start without configuration.
    Require,
}

/// How many contexts a container keeps for one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstancePolicy {
    /// At most one context, bound to the descriptor's configuration pid.
    #[default]
    Singleton,
    /// One context per configuration key under the factory pid.
    Factory,
}

/// Arguments an activation method may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationParam {
    /// The component's own context handle.
    Context,
    /// The raw environment (capability registry) handle.
    Environment,
    /// The current property map.
    Properties,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationSpec {
    pub method: String,
    pub params: Vec<ActivationParam>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeactivationSpec {
    pub method: String,
}

/// The capability a component publishes while it is active.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExportSpec {
    pub interfaces: Vec<String>,
    pub properties: Properties,
}

/// What a dependency setter receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// The acquired capability object; must be released by the runtime.
    Service,
    /// Only the capability reference; nothing is acquired.
    Reference,
    /// Reference plus acquired object.
    Holder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySpec {
    pub interface: String,
    /// Default target filter; configuration may override it with `<id>.target`.
    pub target: Option<String>,
    pub kind: DependencyKind,
}

/// Attribute kind discriminant, resolved once when the descriptor is built.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeKind {
    Property {
        value_type: ValueType,
        default: Option<AttrValue>,
    },
    Dependency(DependencySpec),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDescriptor {
    pub id: String,
    pub kind: AttributeKind,
    pub multiple: bool,
    pub setter: Option<String>,
    pub dynamic: bool,
    pub optional: bool,
}

impl AttributeDescriptor {
    pub fn property(id: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            id: id.into(),
            kind: AttributeKind::Property {
                value_type,
                default: None,
            },
            multiple: false,
            setter: None,
            dynamic: false,
            optional: false,
        }
    }

    pub fn dependency(
        id: impl Into<String>,
        interface: impl Into<String>,
        kind: DependencyKind,
    ) -> Self {
        Self {
            id: id.into(),
            kind: AttributeKind::Dependency(DependencySpec {
                interface: interface.into(),
                target: None,
                kind,
            }),
            multiple: false,
            setter: None,
            dynamic: false,
            optional: false,
        }
    }

    pub fn with_setter(mut self, setter: impl Into<String>) -> Self {
        self.setter = Some(setter.into());
        self
    }

    pub fn with_default(mut self, value: impl Into<AttrValue>) -> Self {
        if let AttributeKind::Property { default, .. } = &mut self.kind {
            *default = Some(value.into());
        }
        self
    }

    pub fn with_target(mut self, filter: impl Into<String>) -> Self {
        if let AttributeKind::Dependency(spec) = &mut self.kind {
            spec.target = Some(filter.into());
        }
        self
    }

    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn is_dependency(&self) -> bool {
        matches!(self.kind, AttributeKind::Dependency(_))
    }

    pub fn dependency_spec(&self) -> Option<&DependencySpec> {
        match &self.kind {
            AttributeKind::Dependency(spec) => Some(spec),
            AttributeKind::Property { .. } => None,
        }
    }

    /// Property key that overrides the target filter of a dependency.
    pub fn target_key(&self) -> String {
        format!("{}.target", self.id)
    }
}

/// Immutable description of a component, shared by all of its contexts.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentDescriptor {
    pub name: String,
    /// Identifier looked up in the [`TypeRegistry`](crate::registry::TypeRegistry).
    pub implementation: String,
    pub attributes: Vec<AttributeDescriptor>,
    pub activate: Option<ActivationSpec>,
    pub deactivate: Option<DeactivationSpec>,
    pub export: Option<ExportSpec>,
    pub configuration_policy: ConfigurationPolicy,
    pub instance_policy: InstancePolicy,
    pub configuration_pid: String,
}

impl ComponentDescriptor {
    pub fn builder(name: impl Into<String>, implementation: impl Into<String>) -> DescriptorBuilder {
        let name = name.into();
        DescriptorBuilder {
            descriptor: ComponentDescriptor {
                configuration_pid: name.clone(),
                name,
                implementation: implementation.into(),
                attributes: Vec::new(),
                activate: None,
                deactivate: None,
                export: None,
                configuration_policy: ConfigurationPolicy::default(),
                instance_policy: InstancePolicy::default(),
            },
        }
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &AttributeDescriptor> {
        self.attributes.iter().filter(|a| a.is_dependency())
    }

    pub fn properties(&self) -> impl Iterator<Item = &AttributeDescriptor> {
        self.attributes.iter().filter(|a| !a.is_dependency())
    }

    pub fn dependency_count(&self) -> usize {
        self.dependencies().count()
    }

    pub fn attribute(&self, id: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.id == id)
    }
}

pub struct DescriptorBuilder {
    descriptor: ComponentDescriptor,
}

impl DescriptorBuilder {
    pub fn attribute(mut self, attr: AttributeDescriptor) -> Self {
        self.descriptor.attributes.push(attr);
        self
    }

    pub fn activate(mut self, method: impl Into<String>, params: &[ActivationParam]) -> Self {
        self.descriptor.activate = Some(ActivationSpec {
            method: method.into(),
            params: params.to_vec(),
        });
        self
    }

    pub fn deactivate(mut self, method: impl Into<String>) -> Self {
        self.descriptor.deactivate = Some(DeactivationSpec {
            method: method.into(),
        });
        self
    }

    pub fn export(mut self, interface: impl Into<String>) -> Self {
        self.descriptor
            .export
            .get_or_insert_with(ExportSpec::default)
            .interfaces
            .push(interface.into());
        self
    }

    pub fn export_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.descriptor
            .export
            .get_or_insert_with(ExportSpec::default)
            .properties
            .insert(key.into(), value);
        self
    }

    pub fn configuration_policy(mut self, policy: ConfigurationPolicy) -> Self {
        self.descriptor.configuration_policy = policy;
        self
    }

    pub fn factory(mut self) -> Self {
        self.descriptor.instance_policy = InstancePolicy::Factory;
        self
    }

    pub fn configuration_pid(mut self, pid: impl Into<String>) -> Self {
        self.descriptor.configuration_pid = pid.into();
        self
    }

    pub fn build(self) -> Arc<ComponentDescriptor> {
        Arc::new(self.descriptor)
    }
}
