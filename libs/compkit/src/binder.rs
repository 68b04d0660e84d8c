//! Attribute binder: raw property → typed value → setter.

use std::any::Any;

use crate::class::PropertySetter;
use crate::error::ComponentError;
use crate::metadata::{AttributeDescriptor, AttributeKind};
use crate::value::{conform, convert_scalar, json_kind, AttrValue, Properties, ValueType};

/// Binds one property attribute of a descriptor into live instances.
pub(crate) struct PropertyBinder {
    /// Position of the attribute in the descriptor.
    pub(crate) index: usize,
    id: String,
    value_type: ValueType,
    default: Option<AttrValue>,
    multiple: bool,
    optional: bool,
    pub(crate) dynamic: bool,
    setter: Option<PropertySetter>,
    last: Option<AttrValue>,
}

impl PropertyBinder {
    pub(crate) fn new(index: usize, attr: &AttributeDescriptor, setter: Option<PropertySetter>) -> Option<Self> {
        let AttributeKind::Property { value_type, default } = &attr.kind else {
            return None;
        };
        Some(Self {
            index,
            id: attr.id.clone(),
            value_type: *value_type,
            // a default that does not conform fails `Bindings::resolve`
            default: default
                .as_ref()
                .map(|d| conform(d, *value_type, attr.multiple).unwrap_or_else(|_| d.clone())),
            multiple: attr.multiple,
            optional: attr.optional,
            dynamic: attr.dynamic,
            setter,
            last: None,
        })
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    /// Typed value for this attribute from `props`; `None` when an optional
    /// attribute has neither value nor default.
    pub(crate) fn resolve(&self, props: &Properties) -> Result<Option<AttrValue>, ComponentError> {
        let raw = props.get(&self.id).filter(|v| !v.is_null());
        let Some(raw) = raw else {
            return match (&self.default, self.optional) {
                (Some(default), _) => Ok(Some(default.clone())),
                (None, true) => Ok(None),
                (None, false) => Err(self.invalid("mandatory attribute has no value and no default")),
            };
        };

        match (self.multiple, raw) {
            (true, serde_json::Value::Array(items)) => items
                .iter()
                .map(|item| convert_scalar(item, self.value_type))
                .collect::<Result<Vec<_>, _>>()
                .map(|items| Some(AttrValue::Array(items)))
                .map_err(|reason| self.invalid(reason)),
            (true, other) => Err(self.invalid(format!(
                "expected an array of {}, got {}",
                self.value_type,
                json_kind(other)
            ))),
            (false, serde_json::Value::Array(_)) => Err(self.invalid(format!(
                "expected a single {}, got an array",
                self.value_type
            ))),
            (false, scalar) => convert_scalar(scalar, self.value_type)
                .map(Some)
                .map_err(|reason| self.invalid(reason)),
        }
    }

    /// Invoke the setter with `value` and remember it as applied.
    pub(crate) fn apply(
        &mut self,
        instance: &mut (dyn Any + Send + Sync),
        value: Option<AttrValue>,
    ) -> Result<(), ComponentError> {
        if let (Some(setter), Some(v)) = (&self.setter, &value) {
            setter
                .call(instance, v)
                .map_err(|source| ComponentError::BindingFailed {
                    attribute: self.id.clone(),
                    source,
                })?;
        }
        self.last = value;
        Ok(())
    }

    /// Whether `new` differs from the value last applied.
    pub(crate) fn changed(&self, new: &Option<AttrValue>) -> bool {
        changed(&self.last, new)
    }

    /// Whether applying reaches the instance at all.
    pub(crate) fn has_setter(&self) -> bool {
        self.setter.is_some()
    }

    /// Forget the applied value; the instance it was applied to is gone.
    pub(crate) fn reset(&mut self) {
        self.last = None;
    }

    fn invalid(&self, reason: impl Into<String>) -> ComponentError {
        ComponentError::ConfigInvalid {
            attribute: self.id.clone(),
            reason: reason.into(),
        }
    }
}

/// Structural, element-wise comparison.
pub(crate) fn changed(old: &Option<AttrValue>, new: &Option<AttrValue>) -> bool {
    old != new
}
