use crate::config::AppConfig;
use std::sync::Arc;

/// Configuration provider trait for component configurations
pub trait ConfigProvider: Send + Sync {
    /// Get the property map stored under a configuration key (pid or `factory~name`)
    fn get_component_config(&self, pid: &str) -> Option<&serde_json::Value>;

    /// All configuration keys known at startup
    fn component_keys(&self) -> Vec<String>;

    /// Get a specific config value by key
    fn get_config_raw(&self, key: &str) -> Option<serde_json::Value>;
}

/// Implementation of ConfigProvider that uses AppConfig
pub struct AppConfigProvider(Arc<AppConfig>);

impl AppConfigProvider {
    pub fn new(config: AppConfig) -> Self {
        Self(Arc::new(config))
    }

    pub fn from_arc(config: Arc<AppConfig>) -> Self {
        Self(config)
    }

    pub fn inner(&self) -> &AppConfig {
        &self.0
    }
}

impl ConfigProvider for AppConfigProvider {
    fn get_component_config(&self, pid: &str) -> Option<&serde_json::Value> {
        self.0.components.get(pid)
    }

    fn component_keys(&self) -> Vec<String> {
        self.0.components.keys().cloned().collect()
    }

    fn get_config_raw(&self, key: &str) -> Option<serde_json::Value> {
        match key {
            "runtime" => serde_json::to_value(&self.0.runtime).ok(),
            "logging" => self
                .0
                .logging
                .as_ref()
                .and_then(|v| serde_json::to_value(v).ok()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn components_are_exposed_by_key() {
        let mut cfg = AppConfig::default();
        cfg.components.insert("b~x".into(), json!({ "n": 1 }));
        cfg.components.insert("a".into(), json!({ "n": 2 }));
        let provider = AppConfigProvider::new(cfg);

        assert_eq!(provider.component_keys(), vec!["a", "b~x"]);
        assert_eq!(provider.get_component_config("a"), Some(&json!({ "n": 2 })));
        assert!(provider.get_component_config("missing").is_none());
    }

    #[test]
    fn raw_sections() {
        let provider = AppConfigProvider::new(AppConfig::default());
        let runtime = provider.get_config_raw("runtime").unwrap();
        assert_eq!(runtime["host_name"], "compkit-host");
        assert!(provider.get_config_raw("logging").is_some());
        assert!(provider.get_config_raw("components").is_none());
    }
}
