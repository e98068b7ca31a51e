//! The canonical agent state hierarchy:
//!
//! ```text
//! Root
//! └── Top
//!     ├── Ready
//!     │   ├── Stopped          -- initial substate of Ready
//!     │   └── Processing
//!     │       ├── Paused       -- initial substate of Processing
//!     │       └── Playing
//!     ├── Error
//!     └── Exit
//! ```
//!
//! Declared as data, not deep inheritance: this module only builds the
//! `Vec<StateNode<..>>` table and the plain
//! `fn` handlers that populate it. `Agent` (in `agent.rs`) owns the
//! resulting `Hsm` instance.

use crate::codec::EventMessage;
use crate::hsm::{Ctx, Hsm, Outcome, StateId, StateNode, ROOT};
use crate::property_store::PropertyValue;

use crate::agent::AgentContext;

pub const TOP: StateId = 1;
pub const READY: StateId = 2;
pub const STOPPED: StateId = 3;
pub const PROCESSING: StateId = 4;
pub const PAUSED: StateId = 5;
pub const PLAYING: StateId = 6;
pub const ERROR: StateId = 7;
pub const EXIT: StateId = 8;

/// The event payload carried through `Hsm::dispatch`. A single sum type
/// lets one `Hsm` instance serve the control path, the input-data path,
/// timer firings, and the internal error-recovery path.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A decoded control-stream message (command, property read/write).
    Control(EventMessage),
    /// A decoded input-stream tensor; `port` is the dispatch tag used to
    /// look it up — the event tag tells the HSM which data port fired.
    Input {
        port: &'static str,
        message: crate::codec::TensorMessage,
    },
    /// A fired timer's canonical tick time.
    Timer(i64),
    /// The synthetic `Error` event dispatched after a handler failure:
    /// any other failure is logged and re-dispatched as this event with
    /// the error value as payload.
    Error(String),
}

/// Event-tag vocabulary fixed by the required-transitions table.
/// Property names are *not* in this list — they're matched separately
/// (see `agent.rs`'s `dispatch_control`), since the set of declared
/// properties isn't known until the property store is built.
pub const PLAY: &str = "Play";
pub const PAUSE: &str = "Pause";
pub const STOP: &str = "Stop";
pub const EXIT_EVENT: &str = "Exit";
pub const AGENT_ON_CLOSE: &str = "AgentOnClose";
pub const HEARTBEAT: &str = "Heartbeat";
pub const STATE_QUERY: &str = "State";
pub const PROPERTIES_QUERY: &str = "Properties";
pub const ERROR_EVENT: &str = "Error";
pub const LATE_MESSAGE: &str = "LateMessage";

/// Tags matched against an incoming control message's `key` before
/// falling back to the property read/write protocol. `LateMessage` is
/// dispatched directly by the agent, never matched from a wire tag, so
/// it is deliberately excluded from this list.
pub const KNOWN_EVENT_TAGS: &[&str] = &[
    PLAY,
    PAUSE,
    STOP,
    EXIT_EVENT,
    AGENT_ON_CLOSE,
    HEARTBEAT,
    STATE_QUERY,
    PROPERTIES_QUERY,
    ERROR_EVENT,
];

/// Resolve a decoded wire tag (an owned `String`) to the `'static` tag
/// constant `Hsm::dispatch` expects.
pub fn intern_event_tag(raw: &str) -> Option<&'static str> {
    KNOWN_EVENT_TAGS.iter().find(|t| **t == raw).copied()
}

fn publish_state_change(ctx: &mut AgentContext, name: &'static str) {
    ctx.current_state_name = name;
    let now = ctx.clock.now();
    let correlation_id = ctx.id_gen.next_id();
    let msg = EventMessage::write(
        now,
        correlation_id,
        ctx.name.clone(),
        "StateChange",
        PropertyValue::Symbol(name.to_string()),
    );
    if let Err(err) = ctx.status.publish_event(&msg) {
        tracing::warn!(error = %err, state = name, "failed to publish StateChange");
    }
}

fn stopped_on_entry(ctx: &mut AgentContext) {
    publish_state_change(ctx, "Stopped");
}

fn playing_on_entry(ctx: &mut AgentContext) {
    publish_state_change(ctx, "Playing");
}

fn paused_on_entry(ctx: &mut AgentContext) {
    publish_state_change(ctx, "Paused");
}

fn error_on_entry(ctx: &mut AgentContext) {
    publish_state_change(ctx, "Error");
}

fn exit_on_entry(ctx: &mut AgentContext) {
    publish_state_change(ctx, "Exit");
    tracing::info!(agent = %ctx.name, "entering Exit, raising termination");
    ctx.should_terminate = true;
}

fn top_on_entry(ctx: &mut AgentContext) {
    let now = ctx.clock.now();
    if let Err(err) = ctx.timer.schedule_in(now, 0, crate::agent::TimerTag::Heartbeat) {
        tracing::warn!(error = %err, "failed to schedule initial heartbeat");
    }
}

fn top_on_exit(ctx: &mut AgentContext) {
    ctx.timer.cancel_all();
}

fn top_on_initial(ctx: &mut Ctx<AgentContext>) {
    ctx.transition(READY);
}

fn ready_on_initial(ctx: &mut Ctx<AgentContext>) {
    ctx.transition(STOPPED);
}

fn processing_on_initial(ctx: &mut Ctx<AgentContext>) {
    ctx.transition(PAUSED);
}

fn stopped_on_play(ctx: &mut Ctx<AgentContext>, _event: &AgentEvent) -> Outcome {
    ctx.transition(PLAYING);
    Outcome::Handled
}

fn processing_on_stop(ctx: &mut Ctx<AgentContext>, _event: &AgentEvent) -> Outcome {
    ctx.transition(STOPPED);
    Outcome::Handled
}

fn playing_on_pause(ctx: &mut Ctx<AgentContext>, _event: &AgentEvent) -> Outcome {
    ctx.transition(PAUSED);
    Outcome::Handled
}

fn paused_on_play(ctx: &mut Ctx<AgentContext>, _event: &AgentEvent) -> Outcome {
    ctx.transition(PLAYING);
    Outcome::Handled
}

fn top_on_heartbeat(hctx: &mut Ctx<AgentContext>, event: &AgentEvent) -> Outcome {
    let ctx = &mut *hctx.user;
    let now = match event {
        AgentEvent::Timer(now) => *now,
        _ => ctx.clock.now(),
    };
    let correlation_id = ctx.id_gen.next_id();
    let agent_name = ctx.name.clone();
    let state_name = ctx.current_state_name;
    let msg = EventMessage::write(
        now,
        correlation_id,
        agent_name,
        "Heartbeat",
        PropertyValue::Symbol(state_name.to_string()),
    );
    if let Err(err) = ctx.status.publish_event(&msg) {
        tracing::warn!(error = %err, "failed to publish Heartbeat");
    }
    let period = ctx
        .property_store
        .get("HeartbeatPeriodNs")
        .ok()
        .and_then(|v| v.as_i64())
        .unwrap_or(10_000_000_000);
    if let Err(err) = ctx.timer.schedule_at(now, now + period, crate::agent::TimerTag::Heartbeat) {
        tracing::warn!(error = %err, "failed to reschedule Heartbeat");
    }
    Outcome::Handled
}

fn top_on_state_query(hctx: &mut Ctx<AgentContext>, _event: &AgentEvent) -> Outcome {
    let ctx = &mut *hctx.user;
    let now = ctx.clock.now();
    let correlation_id = ctx.id_gen.next_id();
    let agent_name = ctx.name.clone();
    let state_name = ctx.current_state_name;
    let msg = EventMessage::write(now, correlation_id, agent_name, "State", PropertyValue::Symbol(state_name.to_string()));
    if let Err(err) = ctx.status.publish_event(&msg) {
        tracing::warn!(error = %err, "failed to publish State");
    }
    Outcome::Handled
}

fn top_on_properties_query(hctx: &mut Ctx<AgentContext>, _event: &AgentEvent) -> Outcome {
    let ctx = &mut *hctx.user;
    let names: Vec<_> = ctx.property_store.names().collect();
    for key in names {
        let Ok(value) = ctx.property_store.get(key) else {
            continue;
        };
        let now = ctx.clock.now();
        let correlation_id = ctx.id_gen.next_id();
        let agent_name = ctx.name.clone();
        let msg = EventMessage::write(now, correlation_id, agent_name, key, value);
        if let Err(err) = ctx.status.publish_event(&msg) {
            tracing::warn!(key, error = %err, "failed to publish property snapshot");
        }
    }
    Outcome::Handled
}

fn top_on_exit_event(ctx: &mut Ctx<AgentContext>, _event: &AgentEvent) -> Outcome {
    ctx.transition(EXIT);
    Outcome::Handled
}

fn top_on_error_event(hctx: &mut Ctx<AgentContext>, event: &AgentEvent) -> Outcome {
    let ctx = &mut *hctx.user;
    let message = match event {
        AgentEvent::Error(message) => message.clone(),
        _ => String::new(),
    };
    let now = ctx.clock.now();
    let correlation_id = ctx.id_gen.next_id();
    let agent_name = ctx.name.clone();
    let msg = EventMessage::write(now, correlation_id, agent_name, "Error", PropertyValue::Str(message));
    if let Err(err) = ctx.status.publish_event(&msg) {
        tracing::warn!(error = %err, "failed to publish Error status");
    }
    Outcome::Handled
}

fn top_on_late_message(hctx: &mut Ctx<AgentContext>, event: &AgentEvent) -> Outcome {
    let ctx = &mut *hctx.user;
    if let AgentEvent::Control(msg) = event {
        tracing::warn!(key = %msg.key, tag = %msg.tag, correlation_id = msg.correlation_id, "dropping late control message");
    }
    let _ = ctx;
    Outcome::Handled
}

/// Build the state table for the canonical hierarchy declared above.
pub fn build_hsm() -> Hsm<AgentContext, AgentEvent> {
    let states = vec![
        StateNode::new(None), // ROOT (unused directly, implicit)
        StateNode::new(Some(ROOT)) // TOP
            .with_entry(top_on_entry)
            .with_exit(top_on_exit)
            .with_initial(top_on_initial)
            .on(HEARTBEAT, top_on_heartbeat)
            .on(STATE_QUERY, top_on_state_query)
            .on(PROPERTIES_QUERY, top_on_properties_query)
            .on(EXIT_EVENT, top_on_exit_event)
            .on(AGENT_ON_CLOSE, top_on_exit_event)
            .on(ERROR_EVENT, top_on_error_event)
            .on(LATE_MESSAGE, top_on_late_message),
        StateNode::new(Some(TOP)).with_initial(ready_on_initial), // READY
        StateNode::new(Some(READY))
            .with_entry(stopped_on_entry)
            .on(PLAY, stopped_on_play), // STOPPED
        StateNode::new(Some(READY)).with_initial(processing_on_initial).on(STOP, processing_on_stop), // PROCESSING
        StateNode::new(Some(PROCESSING))
            .with_entry(paused_on_entry)
            .on(PLAY, paused_on_play), // PAUSED
        StateNode::new(Some(PROCESSING))
            .with_entry(playing_on_entry)
            .on(PAUSE, playing_on_pause), // PLAYING
        StateNode::new(Some(TOP)).with_entry(error_on_entry), // ERROR
        StateNode::new(Some(TOP)).with_entry(exit_on_entry),  // EXIT
    ];
    Hsm::new(states)
}
