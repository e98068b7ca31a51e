//! Transport interface.
//!
//! The messaging fabric itself — publications, subscriptions, fragment
//! assembly, back-pressure signalling — is treated as an abstract
//! interface here. This module defines only the trait surface the rest
//! of the crate programs against; no concrete network or shared-memory
//! implementation lives in this crate (tests supply a loopback double,
//! see `tests/support/mock_transport.rs`).

use crate::error::{TransportError, TransportResult};

/// A writable slice of a publication's term buffer, acquired before
/// encoding and committed (or aborted) after.
pub struct Claim<'a> {
    buf: &'a mut [u8],
    commit: Box<dyn FnMut(usize) + 'a>,
    aborted: bool,
    written: usize,
}

impl<'a> Claim<'a> {
    pub fn new(buf: &'a mut [u8], commit: impl FnMut(usize) + 'a) -> Self {
        Self {
            buf,
            commit: Box::new(commit),
            aborted: false,
            written: 0,
        }
    }

    pub fn buffer(&mut self) -> &mut [u8] {
        self.buf
    }

    /// Record how many bytes were actually written (defaults to the full
    /// claimed length if never called before `commit`).
    pub fn set_written(&mut self, len: usize) {
        self.written = len;
    }

    pub fn commit(mut self) {
        let len = if self.written > 0 {
            self.written
        } else {
            self.buf.len()
        };
        (self.commit)(len);
        self.aborted = true; // prevent Drop from double-acting
    }

    pub fn abort(mut self) {
        self.aborted = true;
    }
}

impl<'a> Drop for Claim<'a> {
    fn drop(&mut self) {
        // An un-committed, un-aborted claim is a logic error in the
        // caller; treat it as an abort rather than panicking in a
        // destructor.
        let _ = self.aborted;
    }
}

/// Non-claiming gather-write: either a single contiguous payload or a
/// vector of byte ranges copied/gathered together without an
/// intermediate buffer.
pub enum OfferPayload<'a> {
    Bytes(&'a [u8]),
    Vectored(&'a [&'a [u8]]),
}

impl<'a> OfferPayload<'a> {
    pub fn total_len(&self) -> usize {
        match self {
            OfferPayload::Bytes(b) => b.len(),
            OfferPayload::Vectored(parts) => parts.iter().map(|p| p.len()).sum(),
        }
    }
}

/// An exclusive outbound publication (status or one data stream).
pub trait Publication {
    fn name(&self) -> &str;

    /// Acquire a writable buffer of exactly `len` bytes. Must be finished
    /// with `Claim::commit` or `Claim::abort`.
    fn try_claim(&mut self, len: usize) -> TransportResult<Claim<'_>>;

    /// Gather-write one or more byte ranges without an intermediate claim.
    /// Returns the new stream position on success.
    fn offer(&mut self, payload: OfferPayload<'_>) -> TransportResult<i64>;

    fn close(&mut self);

    fn is_connected(&self) -> bool {
        true
    }
}

/// Fragment metadata the assembler/filters need without fully decoding
/// the message body.
#[derive(Debug, Clone, Copy)]
pub struct FragmentHeader {
    pub stream_index: i32,
}

/// Callback invoked once per reassembled (defragmented) message.
pub trait FragmentHandler {
    fn on_fragment(&mut self, buf: &[u8], header: FragmentHeader);
}

impl<F: FnMut(&[u8], FragmentHeader)> FragmentHandler for F {
    fn on_fragment(&mut self, buf: &[u8], header: FragmentHeader) {
        (self)(buf, header)
    }
}

/// An inbound subscription. `poll` reads and reassembles up to `limit`
/// fragments in one pass, calling `handler` once per complete message.
pub trait Subscription {
    fn name(&self) -> &str;
    fn poll(&mut self, handler: &mut dyn FragmentHandler, limit: u32) -> u32;
    fn close(&mut self);
}

/// `TagFragmentFilter(inner, pattern)` (): forwards a reassembled
/// message to `inner` only when its tag matches `pattern`. Because tag
/// matching needs the decoded message, this wraps a closure that knows
/// how to extract the tag cheaply.
pub struct TagFragmentFilter<'a> {
    inner: &'a mut dyn FragmentHandler,
    pattern: Option<String>,
    extract_tag: fn(&[u8]) -> Option<String>,
}

impl<'a> TagFragmentFilter<'a> {
    pub fn new(
        inner: &'a mut dyn FragmentHandler,
        pattern: Option<String>,
        extract_tag: fn(&[u8]) -> Option<String>,
    ) -> Self {
        Self {
            inner,
            pattern,
            extract_tag,
        }
    }
}

impl<'a> FragmentHandler for TagFragmentFilter<'a> {
    fn on_fragment(&mut self, buf: &[u8], header: FragmentHeader) {
        let passes = match (&self.pattern, (self.extract_tag)(buf)) {
            (None, _) => true,
            (Some(pattern), Some(tag)) => &tag == pattern,
            (Some(_), None) => false,
        };
        if passes {
            self.inner.on_fragment(buf, header);
        }
    }
}

/// `LateFragmentFilter(inner, late_handler, threshold_ns, clock)`:
/// diverts messages older than `threshold_ns` to `late_handler` instead
/// of `inner`. Must be the *outermost* filter so its timestamp check
/// runs before tag filtering.
pub struct LateFragmentFilter<'a> {
    inner: &'a mut dyn FragmentHandler,
    late_handler: &'a mut dyn FragmentHandler,
    threshold_ns: i64,
    now_ns: i64,
    extract_timestamp: fn(&[u8]) -> Option<i64>,
}

impl<'a> LateFragmentFilter<'a> {
    pub fn new(
        inner: &'a mut dyn FragmentHandler,
        late_handler: &'a mut dyn FragmentHandler,
        threshold_ns: i64,
        now_ns: i64,
        extract_timestamp: fn(&[u8]) -> Option<i64>,
    ) -> Self {
        Self {
            inner,
            late_handler,
            threshold_ns,
            now_ns,
            extract_timestamp,
        }
    }
}

impl<'a> FragmentHandler for LateFragmentFilter<'a> {
    fn on_fragment(&mut self, buf: &[u8], header: FragmentHeader) {
        let is_late = (self.extract_timestamp)(buf)
            .map(|ts| ts < self.now_ns - self.threshold_ns)
            .unwrap_or(false);
        if is_late {
            self.late_handler.on_fragment(buf, header);
        } else {
            self.inner.on_fragment(buf, header);
        }
    }
}

/// A no-op publication used when a stream hasn't been wired up yet, so
/// callers can surface `NotConnected` rather than panic ().
pub struct NullPublication {
    name: String,
}

impl NullPublication {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Publication for NullPublication {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_claim(&mut self, _len: usize) -> TransportResult<Claim<'_>> {
        Err(TransportError::NotConnected(self.name.clone()))
    }

    fn offer(&mut self, _payload: OfferPayload<'_>) -> TransportResult<i64> {
        Err(TransportError::NotConnected(self.name.clone()))
    }

    fn close(&mut self) {}

    fn is_connected(&self) -> bool {
        false
    }
}
