//! A single-threaded, cooperatively-scheduled real-time control agent:
//! a hierarchical state machine driven by a polled timer, a typed
//! property store with a publish-strategy engine, and bounded-retry
//! proxies over an abstract pub/sub transport.
//!
//! The transport fabric, wire codec generator, host process, and clock
//! source are all abstract interfaces here — the concrete
//! implementations are deployment-specific and live outside this crate.

pub mod agent;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod hsm;
pub mod id_gen;
pub mod logging;
pub mod property_store;
pub mod proxies;
pub mod publication;
pub mod states;
pub mod strategy;
pub mod streams;
pub mod timer;
pub mod transport;

pub use agent::{Agent, AgentContext, HostedAgent, TimerTag};
pub use error::{AgentError, AgentResult};
