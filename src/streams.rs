//! Inbound stream adapters.
//!
//! `ControlStreamAdapter` decodes `EventMessage`s (commands and property
//! reads/writes); `InputStreamAdapter` decodes `TensorMessage`s (data
//! ports). Both sit on top of a `Subscription`, with the late-message and
//! tag filters composed outer-to-inner as `LateFilter(TagFilter(core))`.

use crate::codec::{CodecError, EventMessage, TensorMessage};
use crate::transport::{FragmentHandler, FragmentHeader, LateFragmentFilter, Subscription, TagFragmentFilter};

fn first_message_tag(buf: &[u8]) -> Option<String> {
    EventMessage::decode(buf).ok().map(|(msg, _)| msg.tag)
}

fn first_message_timestamp(buf: &[u8]) -> Option<i64> {
    EventMessage::decode(buf).ok().map(|(msg, _)| msg.timestamp_ns)
}

/// Decodes every catenated `EventMessage` in a reassembled buffer,
/// advancing past each one by its decoded length.
fn decode_catenated_events(buf: &[u8], mut on_message: impl FnMut(EventMessage)) {
    let mut cursor = 0usize;
    while cursor < buf.len() {
        match EventMessage::decode(&buf[cursor..]) {
            Ok((msg, consumed)) => {
                on_message(msg);
                cursor += consumed;
            }
            Err(_) => break,
        }
    }
}

/// Owns `(subscription, fragment_assembler, sbe_position_cursor)`
/// conceptually; the fragment-assembly and cursor bookkeeping are the
/// transport's job — this type owns the
/// subscription and the filter configuration layered on top of it.
pub struct ControlStreamAdapter {
    subscription: Box<dyn Subscription>,
    control_filter: Option<String>,
    late_threshold_ns: Option<i64>,
}

impl ControlStreamAdapter {
    pub fn new(
        subscription: Box<dyn Subscription>,
        control_filter: Option<String>,
        late_threshold_ns: Option<i64>,
    ) -> Self {
        Self {
            subscription,
            control_filter,
            late_threshold_ns,
        }
    }

    /// Poll once. `on_event` is called for every on-time decoded message;
    /// `on_late_event` for every message the late-message filter
    /// diverted — the caller is responsible for turning that into the
    /// synthetic `LateMessage` dispatch instead of the original event.
    pub fn poll(
        &mut self,
        limit: u32,
        now_ns: i64,
        mut on_event: impl FnMut(EventMessage),
        mut on_late_event: impl FnMut(EventMessage),
    ) -> u32 {
        let control_filter = self.control_filter.clone();
        let late_threshold_ns = self.late_threshold_ns;

        let mut core = |buf: &[u8], _h: FragmentHeader| decode_catenated_events(buf, &mut on_event);
        let mut late = |buf: &[u8], _h: FragmentHeader| decode_catenated_events(buf, &mut on_late_event);

        match (control_filter, late_threshold_ns) {
            (Some(pattern), Some(threshold)) => {
                let mut tag = TagFragmentFilter::new(&mut core, Some(pattern), first_message_tag);
                let mut outer =
                    LateFragmentFilter::new(&mut tag, &mut late, threshold, now_ns, first_message_timestamp);
                self.subscription.poll(&mut outer, limit)
            }
            (None, Some(threshold)) => {
                let mut outer =
                    LateFragmentFilter::new(&mut core, &mut late, threshold, now_ns, first_message_timestamp);
                self.subscription.poll(&mut outer, limit)
            }
            (Some(pattern), None) => {
                let mut tag = TagFragmentFilter::new(&mut core, Some(pattern), first_message_tag);
                self.subscription.poll(&mut tag, limit)
            }
            (None, None) => self.subscription.poll(&mut core, limit),
        }
    }

    pub fn close(&mut self) {
        self.subscription.close();
    }
}

/// Owns a subscription decoding `TensorMessage`s; the decoded `tag`
/// identifies which data port fired.
pub struct InputStreamAdapter {
    subscription: Box<dyn Subscription>,
    name: String,
}

impl InputStreamAdapter {
    pub fn new(subscription: Box<dyn Subscription>, name: impl Into<String>) -> Self {
        Self {
            subscription,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn poll(&mut self, limit: u32, mut on_tensor: impl FnMut(Result<TensorMessage, CodecError>)) -> u32 {
        let mut handler = |buf: &[u8], _h: FragmentHeader| {
            let result = TensorMessage::decode(buf).map(|(tensor, _)| tensor);
            on_tensor(result);
        };
        self.subscription.poll(&mut handler, limit)
    }

    pub fn close(&mut self) {
        self.subscription.close();
    }
}

/// A bounded collection of input adapters, drained to quiescence each
/// tick.
#[derive(Default)]
pub struct InputStreamSet {
    adapters: Vec<InputStreamAdapter>,
}

impl InputStreamSet {
    pub fn new(adapters: Vec<InputStreamAdapter>) -> Self {
        Self { adapters }
    }

    pub fn push(&mut self, adapter: InputStreamAdapter) {
        self.adapters.push(adapter);
    }

    /// Sweep every adapter once per outer pass with the full `limit`,
    /// repeating full sweeps until one yields zero fragments, so data
    /// catch-up is fair across ports while bounding per-pass work.
    pub fn drain(&mut self, limit: u32, mut on_tensor: impl FnMut(&str, Result<TensorMessage, CodecError>)) -> u32 {
        let mut total = 0u32;
        loop {
            let mut sweep_total = 0u32;
            for adapter in &mut self.adapters {
                let name = adapter.name.clone();
                sweep_total += adapter.poll(limit, |result| on_tensor(&name, result));
            }
            total += sweep_total;
            if sweep_total == 0 {
                break;
            }
        }
        total
    }

    pub fn close_all(&mut self) {
        for adapter in &mut self.adapters {
            adapter.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property_store::PropertyValue;

    struct ScriptedSubscription {
        buffers: Vec<Vec<u8>>,
    }

    impl Subscription for ScriptedSubscription {
        fn name(&self) -> &str {
            "control"
        }

        fn poll(&mut self, handler: &mut dyn FragmentHandler, limit: u32) -> u32 {
            let take = (limit as usize).min(self.buffers.len());
            for buf in self.buffers.drain(..take) {
                handler.on_fragment(&buf, FragmentHeader { stream_index: 0 });
            }
            take as u32
        }

        fn close(&mut self) {}
    }

    #[test]
    fn decodes_catenated_messages_in_one_fragment() {
        let a = EventMessage::write(0, 1, "src", "Play", PropertyValue::Bool(true));
        let b = EventMessage::write(0, 2, "src", "Pause", PropertyValue::Bool(true));
        let mut buf = a.encode();
        buf.extend_from_slice(&b.encode());
        let subscription = ScriptedSubscription { buffers: vec![buf] };
        let mut adapter = ControlStreamAdapter::new(Box::new(subscription), None, None);

        let mut seen = Vec::new();
        adapter.poll(10, 0, |msg| seen.push(msg.key), |_| {});
        assert_eq!(seen, vec!["Play", "Pause"]);
    }

    #[test]
    fn tag_filter_drops_non_matching_source() {
        let wanted = EventMessage::write(0, 1, "wanted", "Play", PropertyValue::Bool(true));
        let other = EventMessage::write(0, 2, "other", "Play", PropertyValue::Bool(true));
        let subscription = ScriptedSubscription {
            buffers: vec![wanted.encode(), other.encode()],
        };
        let mut adapter = ControlStreamAdapter::new(Box::new(subscription), Some("wanted".into()), None);

        let mut seen = Vec::new();
        adapter.poll(10, 0, |msg| seen.push(msg.correlation_id), |_| {});
        assert_eq!(seen, vec![1]);
    }

    #[test]
    fn late_messages_are_diverted() {
        let fresh = EventMessage::write(10_000, 1, "src", "Play", PropertyValue::Bool(true));
        let stale = EventMessage::write(0, 2, "src", "Play", PropertyValue::Bool(true));
        let subscription = ScriptedSubscription {
            buffers: vec![fresh.encode(), stale.encode()],
        };
        let mut adapter = ControlStreamAdapter::new(Box::new(subscription), None, Some(1_000));

        let mut on_time = Vec::new();
        let mut late = Vec::new();
        adapter.poll(10, 10_000, |msg| on_time.push(msg.correlation_id), |msg| late.push(msg.correlation_id));
        assert_eq!(on_time, vec![1]);
        assert_eq!(late, vec![2]);
    }

    #[test]
    fn input_stream_set_drains_until_sweep_is_empty() {
        let sub_a = ScriptedSubscription {
            buffers: vec![vec![0u8; 4]; 3],
        };
        let adapter = InputStreamAdapter::new(Box::new(sub_a), "A");
        let mut set = InputStreamSet::new(vec![adapter]);
        let mut count = 0;
        let total = set.drain(2, |_, _| count += 1);
        assert_eq!(total, 3);
        assert_eq!(count, 3); // callback fires once per buffer even if the tensor fails to decode
    }
}
