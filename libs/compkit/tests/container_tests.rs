//! Container policies against the in-memory registry.

mod common;

use std::sync::{mpsc, Arc, OnceLock, Weak};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;

use common::props;
use compkit::{
    AttributeDescriptor, CapabilityRegistry, ComponentContainer, ComponentDescriptor, ComponentType,
    ConfigurationPolicy, ContextServices, ServiceRegistry, Service, State, ValueType,
};

/// Exports its name cell, so dynamic renames are visible to consumers.
struct Worker {
    name: Arc<Mutex<String>>,
}

fn services(registry: &ServiceRegistry) -> ContextServices {
    ContextServices::new(Arc::new(registry.clone()), Arc::new(registry.clone()))
}

fn container(
    registry: &ServiceRegistry,
    configure: impl FnOnce(compkit::metadata::DescriptorBuilder) -> compkit::metadata::DescriptorBuilder,
) -> ComponentContainer {
    let class = ComponentType::<Worker>::builder("worker", || {
        Ok(Worker {
            name: Arc::new(Mutex::new(String::new())),
        })
    })
    .property("set_name", |w: &mut Worker, v: String| {
        *w.name.lock() = v;
        Ok(())
    })
    .exports(|w: &Worker| -> Service { Arc::<Mutex<String>>::clone(&w.name) })
    .build();
    let builder = ComponentDescriptor::builder("worker", "worker")
        .attribute(
            AttributeDescriptor::property("name", ValueType::String)
                .with_default("anonymous")
                .with_setter("set_name")
                .dynamic(),
        )
        .export("worker.api");
    ComponentContainer::new(configure(builder).build(), Some(class), services(registry))
}

fn published_names(registry: &ServiceRegistry) -> Vec<String> {
    let mut names: Vec<String> = registry
        .references("worker.api")
        .iter()
        .filter_map(|r| {
            let service = registry.acquire(r)?;
            let name = service.downcast_ref::<Mutex<String>>().map(|n| n.lock().clone());
            registry.release(r);
            name
        })
        .collect();
    names.sort();
    names
}

#[test]
fn required_singleton_waits_for_configuration() {
    let registry = ServiceRegistry::new();
    let c = container(&registry, |b| b.configuration_policy(ConfigurationPolicy::Require));

    c.start();
    assert!(c.contexts().is_empty());

    c.configuration_present("worker", Some(props(json!({ "name": "alice" }))));
    let ctx = c.singleton().expect("context created");
    assert_eq!(ctx.state(), State::Active);
    assert_eq!(published_names(&registry), vec!["alice"]);

    c.configuration_present("worker", Some(props(json!({ "name": "bob" }))));
    assert_eq!(c.singleton().unwrap().id(), ctx.id());
    assert_eq!(published_names(&registry), vec!["bob"]);

    c.configuration_present("worker", None);
    assert!(c.singleton().is_none());
    assert_eq!(ctx.state(), State::Stopped);
    assert!(registry.is_empty());
}

#[test]
fn configuration_before_start_is_used_on_start() {
    let registry = ServiceRegistry::new();
    let c = container(&registry, |b| b.configuration_policy(ConfigurationPolicy::Require));

    c.configuration_present("worker", Some(props(json!({ "name": "early" }))));
    assert!(c.contexts().is_empty());

    c.start();
    assert_eq!(published_names(&registry), vec!["early"]);
}

#[test]
fn optional_singleton_falls_back_to_defaults() {
    let registry = ServiceRegistry::new();
    let c = container(&registry, |b| b);

    c.start();
    let first = c.singleton().unwrap();
    assert_eq!(first.state(), State::Active);
    assert_eq!(published_names(&registry), vec!["anonymous"]);

    c.configuration_present("worker", Some(props(json!({ "name": "carol" }))));
    assert_eq!(published_names(&registry), vec!["carol"]);

    c.configuration_present("worker", None);
    let second = c.singleton().unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(first.state(), State::Stopped);
    assert_eq!(published_names(&registry), vec!["anonymous"]);
}

#[test]
fn factory_creates_one_context_per_key() {
    let registry = ServiceRegistry::new();
    let c = container(&registry, |b| b.factory());

    c.start();
    assert!(c.contexts().is_empty());

    c.configuration_present("worker~a", Some(props(json!({ "name": "a" }))));
    c.configuration_present("worker~b", Some(props(json!({ "name": "b" }))));
    for ignored in ["worker", "worker~", "other~a", "workerx~a"] {
        assert!(!c.accepts(ignored), "{ignored} accepted");
        c.configuration_present(ignored, Some(props(json!({ "name": "nope" }))));
    }
    assert_eq!(c.contexts().len(), 2);
    assert_eq!(published_names(&registry), vec!["a", "b"]);

    c.configuration_present("worker~a", None);
    assert!(c.context("worker~a").is_none());
    assert_eq!(published_names(&registry), vec!["b"]);

    c.stop();
    assert!(c.contexts().is_empty());
    assert!(registry.is_empty());
}

/// Activation that feeds a sibling configuration back into its own container.
struct Spawner {
    name: String,
    container: Arc<OnceLock<Weak<ComponentContainer>>>,
}

#[test]
fn activator_may_reenter_its_container() {
    let registry = ServiceRegistry::new();
    let slot: Arc<OnceLock<Weak<ComponentContainer>>> = Arc::new(OnceLock::new());
    let handle = Arc::clone(&slot);
    let class = ComponentType::<Spawner>::builder("spawner", move || {
        Ok(Spawner {
            name: String::new(),
            container: Arc::clone(&handle),
        })
    })
    .property("set_name", |s: &mut Spawner, v: String| {
        s.name = v;
        Ok(())
    })
    .activator("activate", &[], |s: &mut Spawner, _args: &compkit::ActivationArgs| {
        if s.name == "seed" {
            if let Some(c) = s.container.get().and_then(Weak::upgrade) {
                c.configuration_present("spawner~child", Some(props(json!({ "name": "child" }))));
            }
        }
        Ok(())
    })
    .build();
    let desc = ComponentDescriptor::builder("spawner", "spawner")
        .attribute(AttributeDescriptor::property("name", ValueType::String).with_setter("set_name"))
        .activate("activate", &[])
        .factory()
        .build();
    let c = Arc::new(ComponentContainer::new(desc, Some(class), services(&registry)));
    let _ = slot.set(Arc::downgrade(&c));

    let (done, finished) = mpsc::channel();
    let worker = Arc::clone(&c);
    thread::spawn(move || {
        worker.start();
        worker.configuration_present("spawner~seed", Some(props(json!({ "name": "seed" }))));
        let _ = done.send(());
    });

    finished
        .recv_timeout(Duration::from_secs(10))
        .expect("configuration event completes while an activator re-enters");
    let keys: Vec<String> = c.entries().into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["spawner~child", "spawner~seed"]);
    for ctx in c.contexts() {
        assert_eq!(ctx.state(), State::Active);
    }
}

#[test]
fn ignore_policy_never_consults_configuration() {
    let registry = ServiceRegistry::new();
    let c = container(&registry, |b| b.configuration_policy(ConfigurationPolicy::Ignore));

    assert!(!c.accepts("worker"));
    c.configuration_present("worker", Some(props(json!({ "name": "zed" }))));
    c.start();

    assert_eq!(c.contexts().len(), 1);
    assert_eq!(published_names(&registry), vec!["anonymous"]);
}

#[test]
fn restart_of_container_is_idempotent() {
    let registry = ServiceRegistry::new();
    let c = container(&registry, |b| b);

    c.start();
    c.start();
    assert_eq!(c.contexts().len(), 1);
    assert!(c.is_started());

    c.stop();
    assert!(!c.is_started());
    c.start();
    assert_eq!(registry.len(), 1);
}
