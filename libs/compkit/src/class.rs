//! Component types and the per-descriptor binding table.
//!
//! A [`ComponentType`] registers typed call targets (constructor, setters,
//! activators, deactivators, exported object) for one Rust type. The result
//! is type-erased into a [`ComponentClass`]. [`Bindings::resolve`] then
//! matches a descriptor against a class once, so the lifecycle core only ever
//! invokes pre-resolved delegates.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::anyhow;

use crate::capability::{CapabilityHolder, CapabilityRef, CapabilityRegistry, Service};
use crate::context::ComponentHandle;
use crate::error::{describe_dependency, describe_property, MetadataError};
use crate::metadata::{ActivationParam, AttributeKind, ComponentDescriptor, DependencyKind};
use crate::value::{conform, AttrValue, Properties, ValueType};

/// A live component instance, exclusively owned by its context.
pub type Instance = Box<dyn Any + Send + Sync>;

type ConstructorFn = Arc<dyn Fn() -> anyhow::Result<Instance> + Send + Sync>;
type PropertyFn = Arc<dyn Fn(&mut (dyn Any + Send + Sync), &AttrValue) -> anyhow::Result<()> + Send + Sync>;
type DependencyFn =
    Arc<dyn Fn(&mut (dyn Any + Send + Sync), DependencyValue) -> anyhow::Result<()> + Send + Sync>;
type ActivatorFn =
    Arc<dyn Fn(&mut (dyn Any + Send + Sync), &ActivationArgs) -> anyhow::Result<()> + Send + Sync>;
type DeactivatorFn = Arc<dyn Fn(&mut (dyn Any + Send + Sync)) -> anyhow::Result<()> + Send + Sync>;
type ExportFn = Arc<dyn Fn(&(dyn Any + Send + Sync)) -> anyhow::Result<Service> + Send + Sync>;

/// Rust types a property setter may accept.
pub trait AttrType: Sized + 'static {
    const VALUE_TYPE: ValueType;
    const MULTIPLE: bool;

    fn from_attr(value: &AttrValue) -> Option<Self>;
}

macro_rules! attr_type {
    ($ty:ty, $vt:expr, $pat:pat => $out:expr) => {
        impl AttrType for $ty {
            const VALUE_TYPE: ValueType = $vt;
            const MULTIPLE: bool = false;

            fn from_attr(value: &AttrValue) -> Option<Self> {
                match value {
                    $pat => Some($out),
                    _ => None,
                }
            }
        }

        impl AttrType for Vec<$ty> {
            const VALUE_TYPE: ValueType = $vt;
            const MULTIPLE: bool = true;

            fn from_attr(value: &AttrValue) -> Option<Self> {
                value
                    .as_array()?
                    .iter()
                    .map(<$ty as AttrType>::from_attr)
                    .collect()
            }
        }
    };
}

attr_type!(bool, ValueType::Bool, AttrValue::Bool(v) => *v);
attr_type!(i32, ValueType::Int, AttrValue::Int(v) => *v);
attr_type!(i64, ValueType::Long, AttrValue::Long(v) => *v);
attr_type!(f64, ValueType::Double, AttrValue::Double(v) => *v);
attr_type!(String, ValueType::String, AttrValue::String(v) => v.clone());

/// One bound capability inside a [`DependencyValue`].
#[derive(Clone)]
pub struct BoundCapability {
    pub reference: CapabilityRef,
    /// Present for `Service` and `Holder` dependencies.
    pub service: Option<Service>,
}

impl std::fmt::Debug for BoundCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundCapability")
            .field("reference", &self.reference)
            .field("has_service", &self.service.is_some())
            .finish()
    }
}

/// Value injected into a dependency setter.
#[derive(Debug, Clone)]
pub struct DependencyValue {
    pub kind: DependencyKind,
    pub bound: Vec<BoundCapability>,
}

impl DependencyValue {
    pub fn is_empty(&self) -> bool {
        self.bound.is_empty()
    }
}

/// Rust types a dependency setter may accept.
pub trait DependencyArg: Sized + 'static {
    const KIND: DependencyKind;
    const MULTIPLE: bool;

    fn from_dependency(value: DependencyValue) -> anyhow::Result<Self>;
}

fn downcast_service<T: Any + Send + Sync>(bound: &BoundCapability) -> anyhow::Result<Arc<T>> {
    let service = bound
        .service
        .clone()
        .ok_or_else(|| anyhow!("capability {} was not acquired", bound.reference.id))?;
    service.downcast::<T>().map_err(|_| {
        anyhow!(
            "capability {} is not a {}",
            bound.reference.id,
            type_name::<T>()
        )
    })
}

fn holder(bound: BoundCapability) -> anyhow::Result<CapabilityHolder> {
    let service = bound
        .service
        .ok_or_else(|| anyhow!("capability {} was not acquired", bound.reference.id))?;
    Ok(CapabilityHolder {
        reference: bound.reference,
        service,
    })
}

impl<T: Any + Send + Sync> DependencyArg for Option<Arc<T>> {
    const KIND: DependencyKind = DependencyKind::Service;
    const MULTIPLE: bool = false;

    fn from_dependency(value: DependencyValue) -> anyhow::Result<Self> {
        value.bound.first().map(downcast_service::<T>).transpose()
    }
}

impl<T: Any + Send + Sync> DependencyArg for Vec<Arc<T>> {
    const KIND: DependencyKind = DependencyKind::Service;
    const MULTIPLE: bool = true;

    fn from_dependency(value: DependencyValue) -> anyhow::Result<Self> {
        value.bound.iter().map(downcast_service::<T>).collect()
    }
}

impl DependencyArg for Option<CapabilityRef> {
    const KIND: DependencyKind = DependencyKind::Reference;
    const MULTIPLE: bool = false;

    fn from_dependency(value: DependencyValue) -> anyhow::Result<Self> {
        Ok(value.bound.into_iter().next().map(|b| b.reference))
    }
}

impl DependencyArg for Vec<CapabilityRef> {
    const KIND: DependencyKind = DependencyKind::Reference;
    const MULTIPLE: bool = true;

    fn from_dependency(value: DependencyValue) -> anyhow::Result<Self> {
        Ok(value.bound.into_iter().map(|b| b.reference).collect())
    }
}

impl DependencyArg for Option<CapabilityHolder> {
    const KIND: DependencyKind = DependencyKind::Holder;
    const MULTIPLE: bool = false;

    fn from_dependency(value: DependencyValue) -> anyhow::Result<Self> {
        value.bound.into_iter().next().map(holder).transpose()
    }
}

impl DependencyArg for Vec<CapabilityHolder> {
    const KIND: DependencyKind = DependencyKind::Holder;
    const MULTIPLE: bool = true;

    fn from_dependency(value: DependencyValue) -> anyhow::Result<Self> {
        value.bound.into_iter().map(holder).collect()
    }
}

/// Arguments handed to an activation method; only the declared ones are set.
#[derive(Clone, Default)]
pub struct ActivationArgs {
    pub context: Option<ComponentHandle>,
    pub environment: Option<Arc<dyn CapabilityRegistry>>,
    pub properties: Option<Arc<Properties>>,
}

#[derive(Clone)]
struct PropertyEntry {
    value_type: ValueType,
    multiple: bool,
    call: PropertyFn,
}

#[derive(Clone)]
struct DependencyEntry {
    kind: DependencyKind,
    multiple: bool,
    call: DependencyFn,
}

#[derive(Clone)]
struct ActivatorEntry {
    params: Vec<ActivationParam>,
    call: ActivatorFn,
}

/// Type-erased call table of one implementation type.
pub struct ComponentClass {
    type_id: String,
    constructor: ConstructorFn,
    property_setters: HashMap<String, PropertyEntry>,
    dependency_setters: HashMap<String, DependencyEntry>,
    activators: HashMap<String, ActivatorEntry>,
    deactivators: HashMap<String, DeactivatorFn>,
    export: Option<ExportFn>,
}

impl ComponentClass {
    pub fn type_id(&self) -> &str {
        &self.type_id
    }
}

impl std::fmt::Debug for ComponentClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentClass")
            .field("type_id", &self.type_id)
            .field("property_setters", &self.property_setters.keys().collect::<Vec<_>>())
            .field(
                "dependency_setters",
                &self.dependency_setters.keys().collect::<Vec<_>>(),
            )
            .field("activators", &self.activators.keys().collect::<Vec<_>>())
            .field("deactivators", &self.deactivators.keys().collect::<Vec<_>>())
            .field("exports", &self.export.is_some())
            .finish()
    }
}

fn instance_of<C: Any>(instance: &mut (dyn Any + Send + Sync)) -> anyhow::Result<&mut C> {
    instance
        .downcast_mut::<C>()
        .ok_or_else(|| anyhow!("instance is not a {}", type_name::<C>()))
}

/// Typed builder for a [`ComponentClass`].
pub struct ComponentType<C> {
    class: ComponentClass,
    _marker: PhantomData<fn() -> C>,
}

impl<C: Any + Send + Sync> ComponentType<C> {
    pub fn builder<F>(type_id: impl Into<String>, constructor: F) -> Self
    where
        F: Fn() -> anyhow::Result<C> + Send + Sync + 'static,
    {
        Self {
            class: ComponentClass {
                type_id: type_id.into(),
                constructor: Arc::new(move || constructor().map(|c| Box::new(c) as Instance)),
                property_setters: HashMap::new(),
                dependency_setters: HashMap::new(),
                activators: HashMap::new(),
                deactivators: HashMap::new(),
                export: None,
            },
            _marker: PhantomData,
        }
    }

    pub fn property<T, F>(mut self, setter: impl Into<String>, f: F) -> Self
    where
        T: AttrType,
        F: Fn(&mut C, T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let call: PropertyFn = Arc::new(move |instance: &mut (dyn Any + Send + Sync), value: &AttrValue| {
            let typed = T::from_attr(value)
                .ok_or_else(|| anyhow!("value {value:?} does not fit {}", type_name::<T>()))?;
            f(instance_of::<C>(instance)?, typed)
        });
        self.class.property_setters.insert(
            setter.into(),
            PropertyEntry {
                value_type: T::VALUE_TYPE,
                multiple: T::MULTIPLE,
                call,
            },
        );
        self
    }

    pub fn reference<D, F>(mut self, setter: impl Into<String>, f: F) -> Self
    where
        D: DependencyArg,
        F: Fn(&mut C, D) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let call: DependencyFn = Arc::new(move |instance: &mut (dyn Any + Send + Sync), value: DependencyValue| {
            let arg = D::from_dependency(value)?;
            f(instance_of::<C>(instance)?, arg)
        });
        self.class.dependency_setters.insert(
            setter.into(),
            DependencyEntry {
                kind: D::KIND,
                multiple: D::MULTIPLE,
                call,
            },
        );
        self
    }

    pub fn activator<F>(mut self, method: impl Into<String>, params: &[ActivationParam], f: F) -> Self
    where
        F: Fn(&mut C, &ActivationArgs) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let call: ActivatorFn = Arc::new(move |instance: &mut (dyn Any + Send + Sync), args: &ActivationArgs| {
            f(instance_of::<C>(instance)?, args)
        });
        self.class.activators.insert(
            method.into(),
            ActivatorEntry {
                params: params.to_vec(),
                call,
            },
        );
        self
    }

    pub fn deactivator<F>(mut self, method: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut C) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let call: DeactivatorFn =
            Arc::new(move |instance: &mut (dyn Any + Send + Sync)| f(instance_of::<C>(instance)?));
        self.class.deactivators.insert(method.into(), call);
        self
    }

    /// Object published while the component is active.
    pub fn exports<F>(mut self, f: F) -> Self
    where
        F: Fn(&C) -> Service + Send + Sync + 'static,
    {
        self.class.export = Some(Arc::new(move |instance: &(dyn Any + Send + Sync)| {
            let c = instance
                .downcast_ref::<C>()
                .ok_or_else(|| anyhow!("instance is not a {}", type_name::<C>()))?;
            Ok(f(c))
        }));
        self
    }

    pub fn build(self) -> Arc<ComponentClass> {
        Arc::new(self.class)
    }
}

/// Pre-resolved setter for one property attribute.
#[derive(Clone)]
pub(crate) struct PropertySetter(PropertyFn);

impl PropertySetter {
    pub(crate) fn call(&self, instance: &mut (dyn Any + Send + Sync), value: &AttrValue) -> anyhow::Result<()> {
        (self.0)(instance, value)
    }
}

/// Pre-resolved setter for one dependency attribute.
#[derive(Clone)]
pub(crate) struct DependencySetter(DependencyFn);

impl DependencySetter {
    pub(crate) fn call(
        &self,
        instance: &mut (dyn Any + Send + Sync),
        value: DependencyValue,
    ) -> anyhow::Result<()> {
        (self.0)(instance, value)
    }
}

/// Delegate table of one descriptor against its class.
#[derive(Clone)]
pub struct Bindings {
    constructor: ConstructorFn,
    /// Indexed by position in `descriptor.attributes`.
    property_setters: Vec<Option<PropertySetter>>,
    dependency_setters: Vec<Option<DependencySetter>>,
    activate: Option<(Vec<ActivationParam>, ActivatorFn)>,
    deactivate: Option<DeactivatorFn>,
    export: Option<ExportFn>,
}

impl Bindings {
    pub fn resolve(
        descriptor: &ComponentDescriptor,
        class: &ComponentClass,
    ) -> Result<Self, MetadataError> {
        let n = descriptor.attributes.len();
        let mut property_setters = vec![None; n];
        let mut dependency_setters = vec![None; n];

        for (i, attr) in descriptor.attributes.iter().enumerate() {
            if let AttributeKind::Property {
                value_type,
                default: Some(default),
            } = &attr.kind
            {
                conform(default, *value_type, attr.multiple).map_err(|reason| {
                    MetadataError::InvalidDefault {
                        attribute: attr.id.clone(),
                        reason,
                    }
                })?;
            }
            let Some(setter) = attr.setter.as_deref() else {
                continue;
            };
            match &attr.kind {
                AttributeKind::Property { value_type, .. } => {
                    let declared = describe_property(*value_type, attr.multiple);
                    let Some(entry) = class.property_setters.get(setter) else {
                        return Err(missing_or_mismatch(
                            &attr.id,
                            setter,
                            declared,
                            class.dependency_setters.get(setter).map(|d| describe_dependency(d.kind, d.multiple)),
                        ));
                    };
                    if entry.value_type != *value_type || entry.multiple != attr.multiple {
                        return Err(MetadataError::IncompatibleSetter {
                            attribute: attr.id.clone(),
                            setter: setter.to_string(),
                            declared,
                            found: describe_property(entry.value_type, entry.multiple),
                        });
                    }
                    property_setters[i] = Some(PropertySetter(entry.call.clone()));
                }
                AttributeKind::Dependency(spec) => {
                    let declared = describe_dependency(spec.kind, attr.multiple);
                    let Some(entry) = class.dependency_setters.get(setter) else {
                        return Err(missing_or_mismatch(
                            &attr.id,
                            setter,
                            declared,
                            class.property_setters.get(setter).map(|p| describe_property(p.value_type, p.multiple)),
                        ));
                    };
                    if entry.kind != spec.kind || entry.multiple != attr.multiple {
                        return Err(MetadataError::IncompatibleSetter {
                            attribute: attr.id.clone(),
                            setter: setter.to_string(),
                            declared,
                            found: describe_dependency(entry.kind, entry.multiple),
                        });
                    }
                    dependency_setters[i] = Some(DependencySetter(entry.call.clone()));
                }
            }
        }

        let activate = match &descriptor.activate {
            None => None,
            Some(spec) => match class.activators.get(&spec.method) {
                Some(entry) if entry.params == spec.params => {
                    Some((entry.params.clone(), entry.call.clone()))
                }
                _ => {
                    return Err(MetadataError::UnresolvableActivation {
                        method: spec.method.clone(),
                        params: spec.params.clone(),
                    })
                }
            },
        };

        let deactivate = match &descriptor.deactivate {
            None => None,
            Some(spec) => Some(
                class
                    .deactivators
                    .get(&spec.method)
                    .cloned()
                    .ok_or_else(|| MetadataError::UnresolvableDeactivation(spec.method.clone()))?,
            ),
        };

        let export = match &descriptor.export {
            None => None,
            Some(spec) => Some(
                class
                    .export
                    .clone()
                    .ok_or_else(|| MetadataError::MissingExport(spec.interfaces.clone()))?,
            ),
        };

        Ok(Self {
            constructor: class.constructor.clone(),
            property_setters,
            dependency_setters,
            activate,
            deactivate,
            export,
        })
    }

    pub(crate) fn instantiate(&self) -> anyhow::Result<Instance> {
        (self.constructor)()
    }

    pub(crate) fn property_setter(&self, index: usize) -> Option<PropertySetter> {
        self.property_setters.get(index).cloned().flatten()
    }

    pub(crate) fn dependency_setter(&self, index: usize) -> Option<DependencySetter> {
        self.dependency_setters.get(index).cloned().flatten()
    }

    pub(crate) fn activation_params(&self) -> &[ActivationParam] {
        self.activate.as_ref().map(|(p, _)| p.as_slice()).unwrap_or(&[])
    }

    pub(crate) fn activate(
        &self,
        instance: &mut (dyn Any + Send + Sync),
        args: &ActivationArgs,
    ) -> anyhow::Result<()> {
        match &self.activate {
            Some((_, call)) => call(instance, args),
            None => Ok(()),
        }
    }

    pub(crate) fn deactivate(&self, instance: &mut (dyn Any + Send + Sync)) -> anyhow::Result<()> {
        match &self.deactivate {
            Some(call) => call(instance),
            None => Ok(()),
        }
    }

    pub(crate) fn exported(&self, instance: &(dyn Any + Send + Sync)) -> Option<anyhow::Result<Service>> {
        self.export.as_ref().map(|call| call(instance))
    }
}

fn missing_or_mismatch(
    attribute: &str,
    setter: &str,
    declared: String,
    other_kind: Option<String>,
) -> MetadataError {
    match other_kind {
        Some(found) => MetadataError::IncompatibleSetter {
            attribute: attribute.to_string(),
            setter: setter.to_string(),
            declared,
            found,
        },
        None => MetadataError::MissingSetter {
            attribute: attribute.to_string(),
            setter: setter.to_string(),
        },
    }
}
