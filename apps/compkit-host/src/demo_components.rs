//! Demo component types linked into the host and registered via inventory.
//!
//! `clock` publishes a tick source, `greeter` is a factory whose instances
//! bind to the clock, and `console` collects every greeter dynamically.

use std::sync::Arc;

use compkit::{
    ActivationArgs, ActivationParam, AttributeDescriptor, ComponentDescriptor, ComponentType,
    ConfigurationPolicy, DependencyKind, Service, TypeRegistryBuilder, ValueType,
};
use parking_lot::Mutex;

pub const CLOCK_API: &str = "demo.clock";
pub const GREETER_API: &str = "demo.greeter";

/// Label of the clock a greeter is bound to.
pub struct Clock {
    label: Arc<Mutex<String>>,
}

pub struct Greeter {
    greeting: String,
    clock: Option<Arc<Mutex<String>>>,
    line: Arc<Mutex<String>>,
}

impl Greeter {
    fn render(&self) {
        let clock = self
            .clock
            .as_ref()
            .map(|c| c.lock().clone())
            .unwrap_or_else(|| "no clock".to_string());
        *self.line.lock() = format!("{} ({clock})", self.greeting);
    }
}

#[derive(Default)]
pub struct Console {
    lines: Vec<Arc<Mutex<String>>>,
}

fn register(b: &mut TypeRegistryBuilder) {
    b.register_type(
        ComponentType::<Clock>::builder("demo.clock", || {
            Ok(Clock {
                label: Arc::new(Mutex::new(String::new())),
            })
        })
        .property("set_label", |c: &mut Clock, v: String| {
            *c.label.lock() = v;
            Ok(())
        })
        .exports(|c: &Clock| -> Service { Arc::clone(&c.label) as Service })
        .build(),
    );
    b.register_type(
        ComponentType::<Greeter>::builder("demo.greeter", || {
            Ok(Greeter {
                greeting: String::new(),
                clock: None,
                line: Arc::new(Mutex::new(String::new())),
            })
        })
        .property("set_greeting", |g: &mut Greeter, v: String| {
            g.greeting = v;
            g.render();
            Ok(())
        })
        .reference("bind_clock", |g: &mut Greeter, clock: Option<Arc<Mutex<String>>>| {
            g.clock = clock;
            g.render();
            Ok(())
        })
        .activator("activate", &[ActivationParam::Context], |g: &mut Greeter, args: &ActivationArgs| {
            g.render();
            if let Some(ctx) = &args.context {
                tracing::info!(component = %ctx.name(), line = %g.line.lock(), "greeter ready");
            }
            Ok(())
        })
        .exports(|g: &Greeter| -> Service { Arc::clone(&g.line) as Service })
        .build(),
    );
    b.register_type(
        ComponentType::<Console>::builder("demo.console", || Ok(Console::default()))
            .reference("bind_greeters", |c: &mut Console, lines: Vec<Arc<Mutex<String>>>| {
                c.lines = lines;
                for line in &c.lines {
                    tracing::info!(line = %line.lock(), "console");
                }
                Ok(())
            })
            .deactivator("deactivate", |c: &mut Console| {
                tracing::info!(greeters = c.lines.len(), "console closing");
                Ok(())
            })
            .build(),
    );

    b.register_component(
        ComponentDescriptor::builder("clock", "demo.clock")
            .attribute(
                AttributeDescriptor::property("label", ValueType::String)
                    .with_default("system clock")
                    .with_setter("set_label"),
            )
            .export(CLOCK_API)
            .build(),
    );
    b.register_component(
        ComponentDescriptor::builder("greeter", "demo.greeter")
            .attribute(
                AttributeDescriptor::property("greeting", ValueType::String)
                    .with_default("hello")
                    .with_setter("set_greeting")
                    .dynamic(),
            )
            .attribute(
                AttributeDescriptor::dependency("clock", CLOCK_API, DependencyKind::Service)
                    .with_setter("bind_clock")
                    .dynamic(),
            )
            .activate("activate", &[ActivationParam::Context])
            .export(GREETER_API)
            .factory()
            .build(),
    );
    b.register_component(
        ComponentDescriptor::builder("console", "demo.console")
            .attribute(
                AttributeDescriptor::dependency("greeters", GREETER_API, DependencyKind::Service)
                    .with_setter("bind_greeters")
                    .multiple()
                    .optional()
                    .dynamic(),
            )
            .deactivate("deactivate")
            .configuration_policy(ConfigurationPolicy::Ignore)
            .build(),
    );
}

inventory::submit! {
    compkit::TypeRegistrator(register)
}
