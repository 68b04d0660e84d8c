//! Whole-runtime behavior: configuration routing and dependency cycles.

mod common;

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use compkit::{
    AttributeDescriptor, CapabilityRegistry, ComponentDescriptor, ComponentRuntime, ComponentType,
    ContextServices, DependencyKind, ServiceRegistry, Service, State, TypeRegistry,
    TypeRegistryBuilder, ValueType,
};
use compkit_bootstrap::{AppConfig, AppConfigProvider};

/// Exports a shared cell holding the name of the peer it is bound to.
struct Node {
    peer: Arc<Mutex<Option<String>>>,
    name: String,
}

fn node_types(beta_peer: AttributeDescriptor) -> TypeRegistry {
    let mut b = TypeRegistryBuilder::default();
    b.register_type(
        ComponentType::<Node>::builder("node", || {
            Ok(Node {
                peer: Arc::new(Mutex::new(None)),
                name: String::new(),
            })
        })
        .property("set_name", |n: &mut Node, v: String| {
            n.name = v;
            Ok(())
        })
        .reference("set_peer", |n: &mut Node, peer: Option<Arc<String>>| {
            *n.peer.lock() = peer.map(|p| (*p).clone());
            Ok(())
        })
        .exports(|n: &Node| -> Service { Arc::new(n.name.clone()) })
        .build(),
    );
    b.register_component(
        ComponentDescriptor::builder("alpha", "node")
            .attribute(AttributeDescriptor::property("name", ValueType::String).with_default("alpha").with_setter("set_name"))
            .attribute(
                AttributeDescriptor::dependency("peer", "beta.api", DependencyKind::Service)
                    .with_setter("set_peer"),
            )
            .export("alpha.api")
            .build(),
    );
    b.register_component(
        ComponentDescriptor::builder("beta", "node")
            .attribute(AttributeDescriptor::property("name", ValueType::String).with_default("beta").with_setter("set_name"))
            .attribute(beta_peer)
            .export("beta.api")
            .build(),
    );
    b.build().unwrap()
}

fn beta_peer() -> AttributeDescriptor {
    AttributeDescriptor::dependency("peer", "alpha.api", DependencyKind::Service).with_setter("set_peer")
}

fn runtime(types: TypeRegistry, registry: &ServiceRegistry) -> ComponentRuntime {
    ComponentRuntime::new(
        types,
        ContextServices::new(Arc::new(registry.clone()), Arc::new(registry.clone())),
    )
}

fn state_of(rt: &ComponentRuntime, component: &str) -> State {
    rt.container(component)
        .and_then(|c| c.singleton())
        .map(|ctx| ctx.state())
        .expect("singleton exists")
}

#[test]
fn static_circular_pair_never_activates() {
    common::init_tracing();
    let registry = ServiceRegistry::new();
    let rt = runtime(node_types(beta_peer()), &registry);

    assert_eq!(rt.static_cycles(), vec![vec!["alpha", "beta", "alpha"]]);

    rt.start();

    assert_eq!(state_of(&rt, "alpha"), State::Unsatisfied);
    assert_eq!(state_of(&rt, "beta"), State::Unsatisfied);
    assert!(registry.is_empty());

    rt.stop();
    assert!(rt.status().is_empty());
}

#[test]
fn dynamic_optional_edge_breaks_the_cycle() {
    let registry = ServiceRegistry::new();
    let rt = runtime(node_types(beta_peer().optional().dynamic()), &registry);
    assert!(rt.static_cycles().is_empty());

    rt.start();

    assert_eq!(state_of(&rt, "alpha"), State::Active);
    assert_eq!(state_of(&rt, "beta"), State::Active);
    let alpha = registry.references("alpha.api");
    assert_eq!(alpha.len(), 1);
    // beta was rebound to alpha once alpha came up
    assert_eq!(registry.usage(alpha[0].id), Some(1));
    let beta = registry.references("beta.api");
    assert_eq!(registry.usage(beta[0].id), Some(1));

    // removing the peer that completes the cycle leaves alpha unsatisfied for good
    rt.container("beta").unwrap().stop();
    assert_eq!(state_of(&rt, "alpha"), State::Unsatisfied);
    assert!(registry.references("alpha.api").is_empty());

    rt.stop();
    assert!(registry.is_empty());
}

#[test]
fn initial_configuration_is_routed_by_pid() {
    let registry = ServiceRegistry::new();
    let mut b = TypeRegistryBuilder::default();
    b.register_type(
        ComponentType::<Node>::builder("node", || {
            Ok(Node {
                peer: Arc::new(Mutex::new(None)),
                name: String::new(),
            })
        })
        .property("set_name", |n: &mut Node, v: String| {
            n.name = v;
            Ok(())
        })
        .exports(|n: &Node| -> Service { Arc::new(n.name.clone()) })
        .build(),
    );
    b.register_component(
        ComponentDescriptor::builder("named", "node")
            .attribute(AttributeDescriptor::property("name", ValueType::String).with_setter("set_name"))
            .export("named.api")
            .factory()
            .build(),
    );
    b.register_component(
        ComponentDescriptor::builder("single", "node")
            .attribute(AttributeDescriptor::property("name", ValueType::String).with_setter("set_name"))
            .export("named.api")
            .build(),
    );

    let mut cfg = AppConfig::default();
    cfg.components.insert("named~x".into(), json!({ "name": "x" }));
    cfg.components.insert("named~y".into(), json!({ "name": "y" }));
    cfg.components.insert("single".into(), json!({ "name": "solo" }));
    cfg.components.insert("unused".into(), json!({ "name": "nobody" }));
    cfg.components.insert("named~bad".into(), json!("not a map"));

    let rt = runtime(b.build().unwrap(), &registry)
        .with_config(Arc::new(AppConfigProvider::new(cfg)));
    rt.start();

    let mut names: Vec<String> = registry
        .references("named.api")
        .iter()
        .filter_map(|r| {
            let service = registry.acquire(r)?;
            let name = service.downcast_ref::<String>().cloned();
            registry.release(r);
            name
        })
        .collect();
    names.sort();
    assert_eq!(names, vec!["solo", "x", "y"]);

    let status = rt.status();
    assert_eq!(status.len(), 3);
    assert!(status.iter().all(|s| s.state == State::Active && s.failure.is_none()));

    rt.configuration_present("named~x", None);
    assert_eq!(rt.container("named").unwrap().contexts().len(), 1);

    rt.stop();
    assert!(registry.is_empty());
}

#[test]
fn discovery_and_unknown_types_are_reported() {
    let mut b = TypeRegistryBuilder::default();
    b.register_component(ComponentDescriptor::builder("orphan", "missing").build());
    let registry = ServiceRegistry::new();
    let rt = runtime(b.build().unwrap(), &registry);

    rt.start();

    let status = rt.status();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].state, State::FailedPermanent);
    assert!(status[0]
        .failure
        .as_deref()
        .is_some_and(|f| f.contains("orphan")));
}
