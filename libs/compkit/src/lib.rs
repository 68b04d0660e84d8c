//! # CompKit - Declarative Component Runtime
//!
//! CompKit drives declaratively described components through their lifecycle:
//! it waits until every dependency is satisfied, instantiates the
//! implementation type, injects configuration and dependencies, activates the
//! instance and publishes its capability. It reacts to dependencies coming and
//! going and to configuration changes for as long as the component lives.
//!
//! ## Features
//!
//! - **Typed bindings**: `ComponentType::<T>::builder` registers setters,
//!   activators and the exported object once; descriptors are matched against
//!   them before any instance exists
//! - **Dynamic and static attributes**: dynamic ones are re-injected in place,
//!   static ones restart the instance
//! - **Capability tracking**: one push-model tracker per dependency, with
//!   target filters overridable from configuration (`<id>.target`)
//! - **Containers**: singleton and factory instance policies, driven by
//!   configuration presence events
//! - **Auto-discovery** of component types through `inventory`
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use compkit::{ComponentDescriptor, ComponentType, AttributeDescriptor, ValueType};
//!
//! struct Greeter { greeting: String }
//!
//! inventory::submit! {
//!     compkit::TypeRegistrator(|b| {
//!         b.register_type(
//!             ComponentType::<Greeter>::builder("greeter", || Ok(Greeter { greeting: String::new() }))
//!                 .property("set_greeting", |g: &mut Greeter, v: String| { g.greeting = v; Ok(()) })
//!                 .exports(|g: &Greeter| Arc::new(g.greeting.clone()))
//!                 .build(),
//!         );
//!         b.register_component(
//!             ComponentDescriptor::builder("greeter", "greeter")
//!                 .attribute(
//!                     AttributeDescriptor::property("greeting", ValueType::String)
//!                         .with_default("hello")
//!                         .with_setter("set_greeting")
//!                         .dynamic(),
//!                 )
//!                 .export("greeter.api")
//!                 .build(),
//!         );
//!     })
//! }
//! ```

pub use anyhow::Result;

// Re-export inventory for user convenience
pub use inventory;

mod binder;
mod reference;

pub mod capability;
pub mod class;
pub mod container;
pub mod context;
pub mod error;
pub mod metadata;
pub mod registry;
pub mod runtime;
pub mod value;

pub use capability::{
    CapabilityHolder, CapabilityId, CapabilityRef, CapabilityRegistry, CapabilityTracker,
    Registration, Requirement, Service, Suiting, TrackerFactory, TrackerListener, SERVICE_RANKING,
};
pub use class::{ActivationArgs, AttrType, ComponentClass, ComponentType, DependencyArg, Instance};
pub use container::ComponentContainer;
pub use context::{
    ComponentContext, ComponentHandle, ContextServices, DependencyStatus, LifecycleListener,
    Processing, State, TracingListener,
};
pub use error::{ComponentError, ErrorCategory, MetadataError};
pub use metadata::{
    ActivationParam, AttributeDescriptor, ComponentDescriptor, ConfigurationPolicy, DependencyKind,
    InstancePolicy,
};
pub use registry::{TypeRegistrator, TypeRegistry, TypeRegistryBuilder, TypeRegistryError};
pub use runtime::{run, ComponentRuntime, ComponentStatus, RunOptions, ServiceRegistry, ShutdownOptions};
pub use value::{AttrValue, Properties, ValueType};
