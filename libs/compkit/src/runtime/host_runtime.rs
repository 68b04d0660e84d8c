//! Component runtime: owns one container per registered descriptor and drives
//! them through configure → start → stop.

use std::collections::HashMap;
use std::sync::Arc;

use compkit_bootstrap::ConfigProvider;

use crate::container::ComponentContainer;
use crate::context::{ContextServices, State};
use crate::metadata::ComponentDescriptor;
use crate::registry::TypeRegistry;
use crate::value::Properties;

/// One row of [`ComponentRuntime::status`].
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentStatus {
    pub component: String,
    /// Configuration key of the context (the pid for singletons).
    pub key: String,
    pub context: u64,
    pub state: State,
    pub failure: Option<String>,
}

pub struct ComponentRuntime {
    types: TypeRegistry,
    containers: Vec<ComponentContainer>,
    config: Option<Arc<dyn ConfigProvider>>,
}

impl std::fmt::Debug for ComponentRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRuntime")
            .field("types", &self.types)
            .field("containers", &self.containers)
            .field("has_config", &self.config.is_some())
            .finish()
    }
}

impl ComponentRuntime {
    pub fn new(types: TypeRegistry, services: ContextServices) -> Self {
        let containers = types
            .components()
            .iter()
            .map(|d| {
                ComponentContainer::new(Arc::clone(d), types.class(&d.implementation), services.clone())
            })
            .collect();
        Self {
            types,
            containers,
            config: None,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: Arc<dyn ConfigProvider>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn containers(&self) -> &[ComponentContainer] {
        &self.containers
    }

    pub fn container(&self, component: &str) -> Option<&ComponentContainer> {
        self.containers.iter().find(|c| c.descriptor().name == component)
    }

    /// Load initial configuration, then start every container in
    /// registration order.
    pub fn start(&self) {
        self.run_configure_phase();

        tracing::info!("Phase: start");
        for cycle in self.static_cycles() {
            tracing::warn!(
                cycle = %cycle.join(" -> "),
                "static dependency cycle: these components will stay unsatisfied"
            );
        }
        for c in &self.containers {
            tracing::debug!(component = %c.descriptor().name, "Starting container");
            c.start();
        }
    }

    /// Stop every container in reverse registration order.
    pub fn stop(&self) {
        tracing::info!("Phase: stop");
        for c in self.containers.iter().rev() {
            c.stop();
        }
    }

    /// Route a configuration event to the containers it concerns.
    pub fn configuration_present(&self, key: &str, properties: Option<Properties>) {
        let mut routed = false;
        for c in self.containers.iter().filter(|c| c.accepts(key)) {
            c.configuration_present(key, properties.clone());
            routed = true;
        }
        if !routed {
            tracing::debug!(key, "no component consumes this configuration");
        }
    }

    pub fn status(&self) -> Vec<ComponentStatus> {
        self.containers
            .iter()
            .flat_map(|c| {
                c.entries().into_iter().map(move |(key, ctx)| ComponentStatus {
                    component: c.descriptor().name.clone(),
                    key,
                    context: ctx.id(),
                    state: ctx.state(),
                    failure: ctx.failure().map(|e| e.to_string()),
                })
            })
            .collect()
    }

    /// Cycles of blocking dependencies among the registered descriptors.
    ///
    /// An edge A → B exists when A has a dependency that is not both optional
    /// and dynamic on an interface B exports. Such a cycle never activates;
    /// it is reported, not broken.
    pub fn static_cycles(&self) -> Vec<Vec<String>> {
        let descriptors: Vec<&Arc<ComponentDescriptor>> =
            self.containers.iter().map(|c| c.descriptor()).collect();
        let names: Vec<&str> = descriptors.iter().map(|d| d.name.as_str()).collect();

        let mut exporters: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, d) in descriptors.iter().enumerate() {
            for iface in d.export.iter().flat_map(|e| e.interfaces.iter()) {
                exporters.entry(iface.as_str()).or_default().push(i);
            }
        }

        let mut adj = vec![Vec::<usize>::new(); names.len()];
        for (u, d) in descriptors.iter().enumerate() {
            for attr in d.dependencies().filter(|a| !(a.optional && a.dynamic)) {
                let Some(spec) = attr.dependency_spec() else {
                    continue;
                };
                for &v in exporters.get(spec.interface.as_str()).into_iter().flatten() {
                    adj[u].push(v);
                }
            }
        }

        detect_cycles_with_path(&names, &adj)
            .into_iter()
            .map(|c| c.into_iter().map(str::to_string).collect())
            .collect()
    }

    fn run_configure_phase(&self) {
        tracing::info!("Phase: configure");
        let Some(config) = &self.config else {
            return;
        };
        for key in config.component_keys() {
            let Some(raw) = config.get_component_config(&key) else {
                continue;
            };
            match serde_json::from_value::<Properties>(raw.clone()) {
                Ok(props) => self.configuration_present(&key, Some(props)),
                Err(e) => tracing::warn!(
                    key = %key,
                    error = %e,
                    "Component configuration is not a map, ignored"
                ),
            }
        }
    }
}

/// Every cycle found by a DFS over `adj`, each closed by repeating its first
/// node.
fn detect_cycles_with_path<'a>(names: &[&'a str], adj: &[Vec<usize>]) -> Vec<Vec<&'a str>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White, // unvisited
        Gray,  // visiting (on current path)
        Black, // visited (finished)
    }

    fn dfs<'a>(
        node: usize,
        names: &[&'a str],
        adj: &[Vec<usize>],
        colors: &mut [Color],
        path: &mut Vec<usize>,
        cycles: &mut Vec<Vec<&'a str>>,
    ) {
        colors[node] = Color::Gray;
        path.push(node);

        for &neighbor in &adj[node] {
            match colors[neighbor] {
                Color::Gray => {
                    // Back edge: the cycle starts where `neighbor` sits on the path.
                    if let Some(start) = path.iter().position(|&n| n == neighbor) {
                        let mut cycle: Vec<&'a str> = path[start..].iter().map(|&i| names[i]).collect();
                        cycle.push(names[neighbor]);
                        cycles.push(cycle);
                    }
                }
                Color::White => dfs(neighbor, names, adj, colors, path, cycles),
                Color::Black => {}
            }
        }

        path.pop();
        colors[node] = Color::Black;
    }

    let mut colors = vec![Color::White; names.len()];
    let mut path = Vec::new();
    let mut cycles = Vec::new();
    for i in 0..names.len() {
        if colors[i] == Color::White {
            dfs(i, names, adj, &mut colors, &mut path, &mut cycles);
        }
    }
    cycles
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_pair_and_self_cycles() {
        let names = ["a", "b", "c"];
        let adj = vec![vec![1], vec![0], vec![2]];
        let cycles = detect_cycles_with_path(&names, &adj);
        assert_eq!(cycles, vec![vec!["a", "b", "a"], vec!["c", "c"]]);
    }

    #[test]
    fn acyclic_graph_has_no_cycles() {
        let names = ["a", "b", "c"];
        let adj = vec![vec![1, 2], vec![2], vec![]];
        assert!(detect_cycles_with_path(&names, &adj).is_empty());
    }
}
