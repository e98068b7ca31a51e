//! Agent composition root.
//!
//! `Agent` owns every stateful component — clock, id generator, property
//! store, timer, HSM, publication registry, proxies, and stream adapters
//! — and drives them from a single `do_work` tick. Nothing here spawns a
//! thread: the host (`HostedAgent`) calls `do_work` in its own loop,
//! single-threaded and cooperative.

use arrayvec::ArrayVec;

use crate::clock::Clock;
use crate::codec::EventMessage;
use crate::config::AgentConfig;
use crate::error::AgentResult;
use crate::hsm::Hsm;
use crate::id_gen::IdGenerator;
use crate::property_store::{PropertyStore, PropertyValue};
use crate::proxies::{PropertyProxy, StatusProxy};
use crate::publication::PublicationRegistry;
use crate::states::{self, AgentEvent};
use crate::streams::{ControlStreamAdapter, InputStreamSet};
use crate::timer::PolledTimer;
use crate::transport::Publication;

/// Per-tick budget for each stream's fragment poll, the same
/// bounded-work-per-tick discipline the proxies apply to retries.
const POLL_LIMIT: u32 = 64;

/// Upper bound on distinct input ports wired to the HSM. Declared fixed
/// at agent-construction time, same as the property set, so a
/// pointer-free `ArrayVec` fits the same "flat, pre-sized, no heap
/// churn on the hot path" idiom as the timer queue.
const MAX_INPUT_PORTS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTag {
    Heartbeat,
}

/// Everything a state handler can read or mutate (the `Ctx<C>` user
/// payload). Held by `Agent`, handed to `Hsm::dispatch`/`start` one
/// tick at a time.
pub struct AgentContext {
    pub clock: Clock,
    pub id_gen: IdGenerator,
    pub timer: PolledTimer<TimerTag>,
    pub property_store: PropertyStore,
    pub status: StatusProxy,
    pub name: String,
    pub should_terminate: bool,
    pub current_state_name: &'static str,
    /// Set by a handler (or the property poller) that failed and wants
    /// the failure reported through the HSM rather than propagated out
    /// of `dispatch` itself — handlers must not recursively call
    /// `dispatch`, so the agent drains this after each dispatch and
    /// issues a sequenced follow-up `Error` dispatch.
    pub pending_error: Option<String>,
}

/// The host-facing lifecycle every agent implements: the same
/// start/work/error/close shape a supervising process drives any
/// managed service through.
pub trait HostedAgent {
    fn name(&self) -> &str;
    fn on_start(&mut self) -> AgentResult<()>;
    fn do_work(&mut self) -> AgentResult<u32>;
    fn on_error(&mut self, error: &str);
    fn on_close(&mut self);
}

/// Dispatch a decoded control message: known command/query tags go
/// straight to the HSM; anything else is checked against the declared
/// property set and handled as a read or write directly, since the
/// property set isn't known to the HSM's static handler table.
fn dispatch_control(hsm: &mut Hsm<AgentContext, AgentEvent>, ctx: &mut AgentContext, msg: EventMessage) {
    if let Some(tag) = states::intern_event_tag(&msg.key) {
        hsm.dispatch(ctx, tag, &AgentEvent::Control(msg));
        return;
    }

    let Some(key) = ctx.property_store.names().find(|k| *k == msg.key) else {
        tracing::warn!(key = %msg.key, "control message key is neither a known event nor a declared property");
        return;
    };

    if msg.is_read() {
        match ctx.property_store.get(key) {
            Ok(value) => publish_property_echo(ctx, msg.correlation_id, key, value),
            Err(err) => ctx.pending_error = Some(err.to_string()),
        }
        return;
    }

    let Some(value) = msg.value.clone() else {
        tracing::warn!(key, "property write message carried no value");
        return;
    };
    match ctx.property_store.set(key, value, &ctx.clock.clone()) {
        Ok(()) => {
            if let Ok(stored) = ctx.property_store.get(key) {
                publish_property_echo(ctx, msg.correlation_id, key, stored);
            }
        }
        Err(err) => ctx.pending_error = Some(err.to_string()),
    }
}

/// Echo a property's current value back on the status stream, preserving
/// the requester's correlation id.
fn publish_property_echo(ctx: &mut AgentContext, correlation_id: u64, key: &'static str, value: PropertyValue) {
    let now = ctx.clock.now();
    let agent_name = ctx.name.clone();
    let echo = EventMessage::write(now, correlation_id, agent_name, key, value);
    if let Err(err) = ctx.status.publish_event(&echo) {
        tracing::warn!(key, error = %err, "failed to publish property echo");
    }
}

fn dispatch_late(hsm: &mut Hsm<AgentContext, AgentEvent>, ctx: &mut AgentContext, msg: EventMessage) {
    hsm.dispatch(ctx, states::LATE_MESSAGE, &AgentEvent::Control(msg));
}

/// The running agent: the HSM plus every component its handlers close
/// over, and the stream/timer plumbing that feeds it.
pub struct Agent {
    hsm: Hsm<AgentContext, AgentEvent>,
    ctx: AgentContext,
    control: ControlStreamAdapter,
    inputs: InputStreamSet,
    publications: PublicationRegistry,
    property_proxy: PropertyProxy,
    /// Input ports this agent actually dispatches through the HSM; any
    /// tensor arriving on a port outside this set is logged and dropped
    /// (no transition rule requires every configured port to be wired,
    /// so dispatch is opt-in per port). Fixed at construction time, same
    /// as the property set, so this is a pre-sized `ArrayVec` rather
    /// than a growable `Vec`.
    dispatched_input_ports: ArrayVec<&'static str, MAX_INPUT_PORTS>,
}

impl Agent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &AgentConfig,
        status_publication: Box<dyn Publication>,
        control: ControlStreamAdapter,
        property_decls: Vec<crate::property_store::PropertyDecl>,
        pub_data_publications: Vec<Box<dyn Publication>>,
        input_adapters: Vec<crate::streams::InputStreamAdapter>,
        dispatched_input_ports: ArrayVec<&'static str, MAX_INPUT_PORTS>,
    ) -> Self {
        let clock = Clock::new();
        let now = clock.fetch();
        let id_gen = IdGenerator::new(clock.clone(), config.node_id);
        let property_store = PropertyStore::new(property_decls, now);
        let status = StatusProxy::new(status_publication);

        let ctx = AgentContext {
            clock,
            id_gen,
            timer: PolledTimer::new(),
            property_store,
            status,
            name: config.name.clone(),
            should_terminate: false,
            current_state_name: "Stopped",
            pending_error: None,
        };

        Self {
            hsm: states::build_hsm(),
            ctx,
            control,
            inputs: InputStreamSet::new(input_adapters),
            publications: PublicationRegistry::new(),
            property_proxy: PropertyProxy::new(pub_data_publications),
            dispatched_input_ports,
        }
    }

    pub fn publications_mut(&mut self) -> &mut PublicationRegistry {
        &mut self.publications
    }

    /// Number of outstanding timers. Exposed for tests pinning the
    /// `on_close` invariant (spec §8: "After on_close ... the timer
    /// queue is empty").
    pub fn timer_len(&self) -> usize {
        self.ctx.timer.len()
    }

    fn input_poll(&mut self, _now: i64) -> u32 {
        let hsm = &mut self.hsm;
        let ctx = &mut self.ctx;
        let ports = &self.dispatched_input_ports;
        self.inputs.drain(POLL_LIMIT, |port_name, result| {
            let Some(&port) = ports.iter().find(|p| **p == port_name) else {
                tracing::trace!(port = port_name, "input port not wired to the HSM, dropping");
                return;
            };
            match result {
                Ok(message) => {
                    hsm.dispatch(ctx, port, &AgentEvent::Input { port, message });
                }
                Err(err) => tracing::warn!(port = port_name, error = %err, "failed to decode tensor message"),
            }
        })
    }

    /// Walk every registered publication config once; anything whose
    /// strategy says "publish now" is sent and its bookkeeping updated
    /// ().
    fn property_poll(&mut self, now: i64) -> u32 {
        let mut published = 0u32;
        let property_store = &mut self.ctx.property_store;
        let property_proxy = &mut self.property_proxy;
        let agent_name = &self.ctx.name;
        let id_gen = &self.ctx.id_gen;
        let mut error = None;

        for config in self.publications.iter_mut() {
            let Ok(prop_ts) = property_store.last_update(config.key) else {
                continue;
            };
            let due = config
                .strategy
                .should_publish(config.last_published_ns, config.next_scheduled_ns, prop_ts, now);
            if !due {
                continue;
            }
            let Ok(value) = property_store.get(config.key) else {
                continue;
            };
            let msg = EventMessage::write(now, id_gen.next_id(), agent_name.clone(), config.key, value);
            if let Err(err) = property_proxy.publish_event(config.stream_index, &msg) {
                error.get_or_insert_with(|| err.to_string());
            }
            config.last_published_ns = now;
            config.next_scheduled_ns = config.strategy.next_time(now);
            published += 1;
        }
        if let Some(err) = error {
            self.ctx.pending_error = Some(err);
        }
        published
    }

    fn timer_poll(&mut self, now: i64) -> u32 {
        let fired = self.ctx.timer.poll(now);
        let count = fired.len() as u32;
        for (tag, fire_ns) in fired {
            match tag {
                TimerTag::Heartbeat => {
                    self.hsm
                        .dispatch(&mut self.ctx, states::HEARTBEAT, &AgentEvent::Timer(fire_ns));
                }
            }
        }
        count
    }

    /// Poll the control stream into two local batches, then dispatch each
    /// batch after the poll has returned. Mirrors `PolledTimer::poll`'s
    /// reasoning (see `timer.rs`): a closure invoked while the
    /// subscription is still borrowed could not itself reach back into
    /// `self.hsm`/`self.ctx`, so fragments are buffered first and
    /// dispatched once that borrow has ended.
    fn control_poll(&mut self, now: i64) -> u32 {
        let mut on_time = Vec::new();
        let mut late = Vec::new();
        let n = self
            .control
            .poll(POLL_LIMIT, now, |msg| on_time.push(msg), |msg| late.push(msg));

        for msg in on_time {
            dispatch_control(&mut self.hsm, &mut self.ctx, msg);
        }
        for msg in late {
            dispatch_late(&mut self.hsm, &mut self.ctx, msg);
        }
        if let Some(err) = self.ctx.pending_error.take() {
            self.hsm
                .dispatch(&mut self.ctx, states::ERROR_EVENT, &AgentEvent::Error(err));
        }
        n
    }
}

impl HostedAgent for Agent {
    fn name(&self) -> &str {
        &self.ctx.name
    }

    /// Enter the state tree once: `Top.on_entry`, recursive
    /// `on_initial` down to `Stopped`. Call exactly once before the
    /// first `do_work`.
    fn on_start(&mut self) -> AgentResult<()> {
        self.hsm.start(&mut self.ctx, states::TOP);
        Ok(())
    }

    /// One scheduler tick: sample the clock once, then run every poller
    /// in the fixed order input -> property -> timer -> control,
    /// returning the total units of work performed so the host can
    /// decide whether to yield.
    fn do_work(&mut self) -> AgentResult<u32> {
        let now = self.ctx.clock.fetch();
        let mut n = 0u32;
        n += self.input_poll(now);
        n += self.property_poll(now);
        n += self.timer_poll(now);
        n += self.control_poll(now);
        if self.ctx.should_terminate {
            return Err(crate::error::AgentError::Termination);
        }
        Ok(n)
    }

    fn on_error(&mut self, error: &str) {
        tracing::error!(agent = %self.ctx.name, error, "agent error");
    }

    fn on_close(&mut self) {
        self.ctx.timer.cancel_all();
        self.control.close();
        self.inputs.close_all();
        self.property_proxy.close_all();
        self.ctx.status.close();
    }
}
