use thiserror::Error;

use crate::capability::CapabilityId;
use crate::metadata::{ActivationParam, DependencyKind};
use crate::value::ValueType;

/// Descriptor and implementation type do not fit together. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    #[error("unknown implementation type '{0}'")]
    UnknownType(String),
    #[error("attribute '{attribute}' names setter '{setter}' which the type does not provide")]
    MissingSetter { attribute: String, setter: String },
    #[error(
        "setter '{setter}' for attribute '{attribute}' accepts {found}, attribute declares {declared}"
    )]
    IncompatibleSetter {
        attribute: String,
        setter: String,
        declared: String,
        found: String,
    },
    #[error("default of attribute '{attribute}' does not fit its declared type: {reason}")]
    InvalidDefault { attribute: String, reason: String },
    #[error("activation method '{method}' with parameters {params:?} cannot be resolved")]
    UnresolvableActivation {
        method: String,
        params: Vec<ActivationParam>,
    },
    #[error("deactivation method '{0}' cannot be resolved")]
    UnresolvableDeactivation(String),
    #[error("component exports {0:?} but its type provides no exported object")]
    MissingExport(Vec<String>),
}

/// Failure of one component context.
#[derive(Debug, Error)]
pub enum ComponentError {
    #[error("metadata error in component '{component}'")]
    Metadata {
        component: String,
        #[source]
        source: MetadataError,
    },
    #[error("invalid configuration for attribute '{attribute}': {reason}")]
    ConfigInvalid { attribute: String, reason: String },
    #[error("failed to create instance of '{component}'")]
    Instantiation {
        component: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("setter for attribute '{attribute}' failed")]
    BindingFailed {
        attribute: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("dependency '{attribute}': capability {capability} is no longer available")]
    CapabilityUnavailable {
        attribute: String,
        capability: CapabilityId,
    },
    #[error("activation of '{component}' failed")]
    Activation {
        component: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("publishing the capabilities of '{component}' failed")]
    Publish {
        component: String,
        #[source]
        source: anyhow::Error,
    },
}

impl ComponentError {
    /// Permanent failures are metadata errors; everything else may recover.
    pub fn is_permanent(&self) -> bool {
        matches!(self, ComponentError::Metadata { .. })
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ComponentError::Metadata { .. } => ErrorCategory::Metadata,
            ComponentError::ConfigInvalid { .. } => ErrorCategory::Configuration,
            ComponentError::Instantiation { .. }
            | ComponentError::BindingFailed { .. }
            | ComponentError::Activation { .. } => ErrorCategory::UserCode,
            ComponentError::CapabilityUnavailable { .. } | ComponentError::Publish { .. } => {
                ErrorCategory::Dependency
            }
        }
    }

    /// Attribute the failure is attributed to, if any.
    pub fn attribute(&self) -> Option<&str> {
        match self {
            ComponentError::ConfigInvalid { attribute, .. }
            | ComponentError::BindingFailed { attribute, .. }
            | ComponentError::CapabilityUnavailable { attribute, .. } => Some(attribute),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Metadata,
    Configuration,
    UserCode,
    Dependency,
}

pub(crate) fn describe_property(ty: ValueType, multiple: bool) -> String {
    if multiple {
        format!("[{ty}]")
    } else {
        ty.to_string()
    }
}

pub(crate) fn describe_dependency(kind: DependencyKind, multiple: bool) -> String {
    let k = match kind {
        DependencyKind::Service => "service",
        DependencyKind::Reference => "reference",
        DependencyKind::Holder => "holder",
    };
    if multiple {
        format!("[{k}]")
    } else {
        k.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_metadata_errors_are_permanent() {
        let meta = ComponentError::Metadata {
            component: "c".into(),
            source: MetadataError::UnknownType("x".into()),
        };
        let cfg = ComponentError::ConfigInvalid {
            attribute: "a".into(),
            reason: "missing".into(),
        };
        let user = ComponentError::Activation {
            component: "c".into(),
            source: anyhow::anyhow!("boom"),
        };
        assert!(meta.is_permanent());
        assert!(!cfg.is_permanent());
        assert!(!user.is_permanent());
        assert_eq!(cfg.category(), ErrorCategory::Configuration);
        assert_eq!(cfg.attribute(), Some("a"));
    }

    #[test]
    fn messages_carry_context() {
        let err = ComponentError::ConfigInvalid {
            attribute: "greeting".into(),
            reason: "mandatory attribute has no value and no default".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("greeting"));
        assert!(msg.contains("no default"));
    }
}
