//! Loopback `Publication`/`Subscription` doubles used by the end-to-end
//! scenario tests: a publication stores whatever it was sent, and a
//! subscription hands back a fixed script of fragments in order.

use std::cell::RefCell;
use std::rc::Rc;

use rtc_agent::error::{TransportError, TransportResult};
use rtc_agent::transport::{Claim, FragmentHandler, OfferPayload, Publication, Subscription};

/// Records every message sent through it, concatenating vectored parts
/// the way a real claim-and-commit / offer pair would lay them out on
/// the wire (header immediately followed by payload). The backing `Vec`
/// is shared via `Rc<RefCell<_>>` so a test can inspect it after the
/// `Publication` has been moved into an `Agent`.
pub struct RecordingPublication {
    name: String,
    sent: Rc<RefCell<Vec<Vec<u8>>>>,
    /// Owned claim buffer, reused per call; never touched again once a
    /// `Claim` borrowing from it has been handed out until that claim is
    /// committed or dropped, so the raw pointer `try_claim` hands to the
    /// commit closure stays valid for the closure's single invocation.
    scratch: Vec<u8>,
    pub connected: bool,
}

impl RecordingPublication {
    /// Returns the publication plus a handle to its sent-message log.
    pub fn new(name: impl Into<String>) -> (Self, Rc<RefCell<Vec<Vec<u8>>>>) {
        let sent = Rc::new(RefCell::new(Vec::new()));
        (
            Self {
                name: name.into(),
                sent: sent.clone(),
                scratch: Vec::new(),
                connected: true,
            },
            sent,
        )
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
        self.scratch = vec![0u8; len];
        let ptr = self.scratch.as_mut_ptr();
        let sent = self.sent.clone();
        Ok(Claim::new(&mut self.scratch, move |written| {
            // SAFETY: `ptr` still points at `scratch`'s live allocation;
            // nothing reallocates it between claim and commit.
            let bytes = unsafe { std::slice::from_raw_parts(ptr, written) };
            sent.borrow_mut().push(bytes.to_vec());
        }))
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
        self.sent.borrow_mut().push(combined);
        Ok(len)
    }

    fn close(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Hands back each buffer in `buffers` once, in order, across however
/// many `poll` calls it takes to drain them — a deliberately simple
/// stand-in for the real fragment assembler.
pub struct ScriptedSubscription {
    name: String,
    buffers: Vec<Vec<u8>>,
}

impl ScriptedSubscription {
    pub fn new(name: impl Into<String>, buffers: Vec<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            buffers,
        }
    }
}

impl Subscription for ScriptedSubscription {
    fn name(&self) -> &str {
        &self.name
    }

    fn poll(&mut self, handler: &mut dyn FragmentHandler, limit: u32) -> u32 {
        let take = (limit as usize).min(self.buffers.len());
        for buf in self.buffers.drain(..take) {
            handler.on_fragment(&buf, rtc_agent::transport::FragmentHeader { stream_index: 0 });
        }
        take as u32
    }

    fn close(&mut self) {}
}
