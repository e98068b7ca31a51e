//! Host bootstrap.
//!
//! Loads configuration from the environment, wires up the agent against
//! whatever transport the deployment provides, then drives it with a
//! tight, non-blocking `do_work` loop (single-threaded, cooperative).
//! This binary stands in for the process the real fleet
//! wraps each agent in; since the concrete transport/codec are out of
//! scope here, it runs against `NullPublication`/an empty subscription
//! set until a deployment wires in real ones.

use rtc_agent::agent::{Agent, HostedAgent};
use rtc_agent::config::AgentConfig;
use rtc_agent::logging::{self, ReloadHandle};
use rtc_agent::property_store::{PropertyDecl, PropertyValue};
use rtc_agent::streams::ControlStreamAdapter;
use rtc_agent::transport::{FragmentHandler, NullPublication, Publication, Subscription};
use std::error::Error;

/// Placeholder subscription that never yields a fragment, used until a
/// deployment supplies a real one.
struct EmptySubscription {
    name: String,
}

impl Subscription for EmptySubscription {
    fn name(&self) -> &str {
        &self.name
    }

    fn poll(&mut self, _handler: &mut dyn FragmentHandler, _limit: u32) -> u32 {
        0
    }

    fn close(&mut self) {}
}

/// Starts from every bootstrap-config property and layers an `on_set`
/// hook onto `LogLevel` so a write re-applies the live subscriber
/// filter immediately.
fn declared_properties(config: &AgentConfig, log_handle: ReloadHandle) -> Vec<PropertyDecl> {
    let mut on_set: Option<rtc_agent::property_store::OnSetHook> = Some(Box::new(move |value: &PropertyValue| {
        let level = value.as_str().ok_or_else(|| "LogLevel must be a string".to_string())?;
        logging::set_level(&log_handle, level);
        Ok(None)
    }));
    config
        .declared_properties()
        .into_iter()
        .map(|decl| {
            if decl.key == "LogLevel" {
                PropertyDecl::new(decl.key, decl.access, decl.initial).with_on_set(on_set.take().unwrap())
            } else {
                decl
            }
        })
        .collect()
}

fn main() -> Result<(), Box<dyn Error>> {
    let config = AgentConfig::from_env()?;
    let log_handle = logging::init(&config.log_level);
    tracing::info!(agent = %config.name, "starting agent");

    let status: Box<dyn Publication> = Box::new(NullPublication::new(config.status_uri.clone()));
    let control = ControlStreamAdapter::new(
        Box::new(EmptySubscription {
            name: config.control_uri.clone(),
        }),
        config.control_filter.clone(),
        Some(config.late_message_threshold_ns),
    );

    let properties = declared_properties(&config, log_handle);
    let mut agent = Agent::new(
        &config,
        status,
        control,
        properties,
        Vec::new(),
        Vec::new(),
        arrayvec::ArrayVec::new(),
    );

    agent.on_start()?;

    loop {
        match agent.do_work() {
            Ok(n) => {
                if n == 0 {
                    std::thread::yield_now();
                }
            }
            Err(err) if matches!(err, rtc_agent::AgentError::Termination) => {
                tracing::info!("agent requested termination, shutting down");
                break;
            }
            Err(err) => {
                agent.on_error(&err.to_string());
            }
        }
    }

    agent.on_close();
    Ok(())
}
