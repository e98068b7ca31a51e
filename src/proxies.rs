//! Outbound proxies.
//!
//! `StatusProxy` wraps the single status publication; `PropertyProxy`
//! wraps the indexed set of data publications the property poller writes
//! to. Both share the same claim-and-commit / vectored-offer encoding
//! rules and the same bounded back-pressure retry: apply a bounded retry
//! (≤ 10) within the same tick before surfacing an error, the loop does
//! *not* sleep.

use crate::codec::{EventMessage, TensorMessage};
use crate::error::{TransportError, TransportResult};
use crate::property_store::PropertyValue;
use crate::transport::{OfferPayload, Publication};

const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Encode and send `msg`, retrying on `BackPressured` up to `max_attempts`
/// times and treating `NotConnected` as a silent no-op (scalar path).
fn claim_and_commit(
    publication: &mut dyn Publication,
    bytes: &[u8],
    max_attempts: u32,
) -> TransportResult<()> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match publication.try_claim(bytes.len()) {
            Ok(mut claim) => {
                claim.buffer().copy_from_slice(bytes);
                claim.set_written(bytes.len());
                claim.commit();
                return Ok(());
            }
            Err(TransportError::NotConnected(_)) => return Ok(()),
            Err(TransportError::BackPressured { .. }) if attempts < max_attempts => continue,
            Err(TransportError::BackPressured { publication: p, .. }) => {
                return Err(TransportError::BackPressured {
                    publication: p,
                    attempts,
                })
            }
            Err(other) => return Err(other),
        }
    }
}

/// Vectored, non-claiming send (array/tensor path): element
/// bytes are gathered straight into the transport without a copy through
/// an intermediate claim buffer.
fn offer_vectored(
    publication: &mut dyn Publication,
    parts: &[&[u8]],
    max_attempts: u32,
) -> TransportResult<()> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match publication.offer(OfferPayload::Vectored(parts)) {
            Ok(_) => return Ok(()),
            Err(TransportError::NotConnected(_)) => return Ok(()),
            Err(TransportError::BackPressured { .. }) if attempts < max_attempts => continue,
            Err(TransportError::BackPressured { publication: p, .. }) => {
                return Err(TransportError::BackPressured {
                    publication: p,
                    attempts,
                })
            }
            Err(other) => return Err(other),
        }
    }
}

/// Splits an `EventMessage` into "everything but the Bytes payload" and
/// the payload itself, so a `Bytes`-valued property can be offered
/// vectored instead of copied into a claim buffer.
fn encode_split(msg: &EventMessage) -> (Vec<u8>, Option<Vec<u8>>) {
    match &msg.value {
        Some(PropertyValue::Bytes(bytes)) => {
            let header = EventMessage {
                value: None,
                ..msg.clone()
            }
            .encode();
            (header, Some(bytes.clone()))
        }
        _ => (msg.encode(), None),
    }
}

/// Single outbound publication for status/heartbeat/echo events.
pub struct StatusProxy {
    publication: Box<dyn Publication>,
    max_attempts: u32,
}

impl StatusProxy {
    pub fn new(publication: Box<dyn Publication>) -> Self {
        Self {
            publication,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn publish_event(&mut self, msg: &EventMessage) -> TransportResult<()> {
        let (header, payload) = encode_split(msg);
        match payload {
            None => claim_and_commit(self.publication.as_mut(), &header, self.max_attempts),
            Some(bytes) => offer_vectored(
                self.publication.as_mut(),
                &[&header, &bytes],
                self.max_attempts,
            ),
        }
    }

    pub fn publish_tensor(&mut self, tensor: &TensorMessage) -> TransportResult<()> {
        let header = tensor.encode_header();
        offer_vectored(
            self.publication.as_mut(),
            &[&header, &tensor.elements],
            self.max_attempts,
        )
    }

    pub fn close(&mut self) {
        self.publication.close();
    }
}

/// Many indexed outbound publications, selected by `stream_index`,
/// used by the property poller.
pub struct PropertyProxy {
    publications: Vec<Box<dyn Publication>>,
    max_attempts: u32,
}

impl PropertyProxy {
    pub fn new(publications: Vec<Box<dyn Publication>>) -> Self {
        Self {
            publications,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    fn stream(&mut self, stream_index: usize) -> TransportResult<&mut Box<dyn Publication>> {
        self.publications
            .get_mut(stream_index)
            .ok_or_else(|| TransportError::StreamNotFound {
                name: "pub-data".to_string(),
                index: stream_index,
            })
    }

    pub fn publish_event(&mut self, stream_index: usize, msg: &EventMessage) -> TransportResult<()> {
        let max_attempts = self.max_attempts;
        let (header, payload) = encode_split(msg);
        let publication = self.stream(stream_index)?.as_mut();
        match payload {
            None => claim_and_commit(publication, &header, max_attempts),
            Some(bytes) => offer_vectored(publication, &[&header, &bytes], max_attempts),
        }
    }

    pub fn publish_tensor(&mut self, stream_index: usize, tensor: &TensorMessage) -> TransportResult<()> {
        let max_attempts = self.max_attempts;
        let header = tensor.encode_header();
        let publication = self.stream(stream_index)?.as_mut();
        offer_vectored(publication, &[&header, &tensor.elements], max_attempts)
    }

    pub fn close_all(&mut self) {
        for publication in &mut self.publications {
            publication.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Claim;

    struct RecordingPublication {
        name: String,
        sent: Vec<Vec<u8>>,
        fail_first_n: u32,
        connected: bool,
    }

    impl RecordingPublication {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                sent: Vec::new(),
                fail_first_n: 0,
                connected: true,
            }
        }
    }

    impl Publication for RecordingPublication {
        fn name(&self) -> &str {
            &self.name
        }

        fn try_claim(&mut self, len: usize) -> TransportResult<Claim<'_>> {
            if !self.connected {
                return Err(TransportError::NotConnected(self.name.clone()));
            }
            if self.fail_first_n > 0 {
                self.fail_first_n -= 1;
                return Err(TransportError::BackPressured {
                    publication: self.name.clone(),
                    attempts: 1,
                });
            }
            self.sent.push(vec![0u8; len]);
            let idx = self.sent.len() - 1;
            let buf = self.sent[idx].as_mut_slice();
            Ok(Claim::new(buf, |_n| {}))
        }

        fn offer(&mut self, payload: OfferPayload<'_>) -> TransportResult<i64> {
            if !self.connected {
                return Err(TransportError::NotConnected(self.name.clone()));
            }
            let mut combined = Vec::with_capacity(payload.total_len());
            if let OfferPayload::Vectored(parts) = payload {
                for part in parts {
                    combined.extend_from_slice(part);
                }
            }
            let len = combined.len() as i64;
            self.sent.push(combined);
            Ok(len)
        }

        fn close(&mut self) {
            self.connected = false;
        }

        fn is_connected(&self) -> bool {
            self.connected
        }
    }

    #[test]
    fn scalar_event_goes_through_claim_and_commit() {
        let publication = RecordingPublication::new("status");
        let mut proxy = StatusProxy::new(Box::new(publication));
        let msg = EventMessage::write(0, 1, "agent", "Name", PropertyValue::Str("svc".into()));
        proxy.publish_event(&msg).unwrap();
    }

    #[test]
    fn bytes_payload_goes_through_vectored_offer() {
        let publication = RecordingPublication::new("status");
        let mut proxy = StatusProxy::new(Box::new(publication));
        let msg = EventMessage::write(0, 1, "agent", "Blob", PropertyValue::Bytes(vec![1, 2, 3]));
        proxy.publish_event(&msg).unwrap();
    }

    #[test]
    fn not_connected_is_silent() {
        let mut publication = RecordingPublication::new("status");
        publication.connected = false;
        let mut proxy = StatusProxy::new(Box::new(publication));
        let msg = EventMessage::write(0, 1, "agent", "Name", PropertyValue::I64(1));
        assert!(proxy.publish_event(&msg).is_ok());
    }

    #[test]
    fn back_pressure_retries_then_succeeds() {
        let mut publication = RecordingPublication::new("status");
        publication.fail_first_n = 3;
        let mut proxy = StatusProxy::new(Box::new(publication));
        let msg = EventMessage::write(0, 1, "agent", "Name", PropertyValue::I64(1));
        assert!(proxy.publish_event(&msg).is_ok());
    }

    #[test]
    fn back_pressure_exhausting_attempts_surfaces_error() {
        let mut publication = RecordingPublication::new("status");
        publication.fail_first_n = 100;
        let mut proxy = StatusProxy::new(Box::new(publication));
        let msg = EventMessage::write(0, 1, "agent", "Name", PropertyValue::I64(1));
        let err = proxy.publish_event(&msg).unwrap_err();
        assert!(matches!(err, TransportError::BackPressured { attempts: 10, .. }));
    }

    #[test]
    fn property_proxy_routes_by_stream_index() {
        let publications: Vec<Box<dyn Publication>> = vec![
            Box::new(RecordingPublication::new("pub0")),
            Box::new(RecordingPublication::new("pub1")),
        ];
        let mut proxy = PropertyProxy::new(publications);
        let msg = EventMessage::write(0, 1, "agent", "Matrix", PropertyValue::I64(7));
        proxy.publish_event(1, &msg).unwrap();
        let err = proxy.publish_event(5, &msg).unwrap_err();
        assert!(matches!(err, TransportError::StreamNotFound { index: 5, .. }));
    }
}
