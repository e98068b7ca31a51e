//! Typed key/value property store.
//!
//! Declared once at agent-construction time and fixed thereafter: no
//! add/remove after that point. Backed by an `FxHashMap` (`rustc-hash`'s
//! non-cryptographic hasher, a better fit than SipHash for small, hot,
//! internally-keyed maps) from interned name to slot.

use bitflags::bitflags;
use rustc_hash::FxHashMap;
use std::fmt;

use crate::clock::Clock;
use crate::error::{PropertyError, PropertyResult};

/// Property names are short, `'static` interned symbols.
pub type PropertyKey = &'static str;

bitflags! {
    /// Access mode bitmask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessMode: u8 {
        const READABLE = 0b01;
        const MUTABLE  = 0b10;
    }
}

impl AccessMode {
    pub const READ_ONLY: AccessMode = AccessMode::READABLE;
    pub const READ_WRITE: AccessMode = AccessMode::from_bits_truncate(
        AccessMode::READABLE.bits() | AccessMode::MUTABLE.bits(),
    );
}

/// A property's value. Arrays and strings are owned copies: the store
/// never borrows a caller's buffer past the call that wrote it.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    I64(i64),
    F64(f64),
    Bool(bool),
    Symbol(String),
    Str(String),
    Bytes(Vec<u8>),
}

impl PropertyValue {
    pub fn type_tag(&self) -> &'static str {
        match self {
            PropertyValue::I64(_) => "i64",
            PropertyValue::F64(_) => "f64",
            PropertyValue::Bool(_) => "bool",
            PropertyValue::Symbol(_) => "symbol",
            PropertyValue::Str(_) => "str",
            PropertyValue::Bytes(_) => "bytes",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(v) | PropertyValue::Symbol(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::I64(v) => write!(f, "{v}"),
            PropertyValue::F64(v) => write!(f, "{v}"),
            PropertyValue::Bool(v) => write!(f, "{v}"),
            PropertyValue::Symbol(v) | PropertyValue::Str(v) => write!(f, "{v}"),
            PropertyValue::Bytes(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

/// Validation/transform hook run before a write is stored. May reject the
/// value (`Validation`) or substitute a transformed one.
pub type OnSetHook = Box<dyn FnMut(&PropertyValue) -> Result<Option<PropertyValue>, String>>;
/// Hook run on every read; used e.g. by `GCBytes`-style properties that
/// report live runtime data rather than a stored value.
pub type OnGetHook = Box<dyn FnMut(&PropertyValue) -> PropertyValue>;

struct Slot {
    access: AccessMode,
    value: PropertyValue,
    last_update_ns: i64,
    on_set: Option<OnSetHook>,
    on_get: Option<OnGetHook>,
}

/// Declares one property at construction time.
pub struct PropertyDecl {
    pub key: PropertyKey,
    pub access: AccessMode,
    pub initial: PropertyValue,
    pub on_set: Option<OnSetHook>,
    pub on_get: Option<OnGetHook>,
}

impl PropertyDecl {
    pub fn new(key: PropertyKey, access: AccessMode, initial: PropertyValue) -> Self {
        Self {
            key,
            access,
            initial,
            on_set: None,
            on_get: None,
        }
    }

    pub fn with_on_set(mut self, hook: OnSetHook) -> Self {
        self.on_set = Some(hook);
        self
    }

    pub fn with_on_get(mut self, hook: OnGetHook) -> Self {
        self.on_get = Some(hook);
        self
    }
}

/// The property store.
pub struct PropertyStore {
    slots: FxHashMap<PropertyKey, Slot>,
}

impl PropertyStore {
    pub fn new(decls: Vec<PropertyDecl>, now_ns: i64) -> Self {
        let mut slots = FxHashMap::default();
        slots.reserve(decls.len());
        for decl in decls {
            slots.insert(
                decl.key,
                Slot {
                    access: decl.access,
                    value: decl.initial,
                    last_update_ns: now_ns,
                    on_set: decl.on_set,
                    on_get: decl.on_get,
                },
            );
        }
        Self { slots }
    }

    pub fn get(&mut self, key: PropertyKey) -> PropertyResult<PropertyValue> {
        let slot = self
            .slots
            .get_mut(key)
            .ok_or(PropertyError::NotFound(key))?;
        match slot.on_get.as_mut() {
            Some(hook) => Ok(hook(&slot.value)),
            None => Ok(slot.value.clone()),
        }
    }

    pub fn set(&mut self, key: PropertyKey, value: PropertyValue, clock: &Clock) -> PropertyResult<()> {
        let slot = self
            .slots
            .get_mut(key)
            .ok_or(PropertyError::NotFound(key))?;
        if !slot.access.contains(AccessMode::MUTABLE) {
            return Err(PropertyError::AccessDenied(key));
        }
        if slot.value.type_tag() != value.type_tag() {
            return Err(PropertyError::TypeError {
                key,
                expected: slot.value.type_tag(),
                actual: value.type_tag(),
            });
        }
        let stored = match slot.on_set.as_mut() {
            Some(hook) => hook(&value).map_err(|message| PropertyError::Validation {
                key,
                message,
            })?,
            None => None,
        };
        slot.value = stored.unwrap_or(value);
        slot.last_update_ns = clock.now();
        Ok(())
    }

    pub fn is_set(&self, key: PropertyKey) -> bool {
        self.slots.contains_key(key)
    }

    pub fn last_update(&self, key: PropertyKey) -> PropertyResult<i64> {
        self.slots
            .get(key)
            .map(|slot| slot.last_update_ns)
            .ok_or(PropertyError::NotFound(key))
    }

    pub fn type_of(&self, key: PropertyKey) -> PropertyResult<&'static str> {
        self.slots
            .get(key)
            .map(|slot| slot.value.type_tag())
            .ok_or(PropertyError::NotFound(key))
    }

    pub fn access_of(&self, key: PropertyKey) -> PropertyResult<AccessMode> {
        self.slots
            .get(key)
            .map(|slot| slot.access)
            .ok_or(PropertyError::NotFound(key))
    }

    pub fn names(&self) -> impl Iterator<Item = PropertyKey> + '_ {
        self.slots.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn clock_at(ns: i64) -> Clock {
        let c = Clock::new();
        c.set_for_test(ns);
        c
    }

    #[test]
    fn set_updates_last_update_ns_monotonically() {
        let mut store = PropertyStore::new(
            vec![PropertyDecl::new(
                "Count",
                AccessMode::READ_WRITE,
                PropertyValue::I64(0),
            )],
            0,
        );
        let clock = clock_at(100);
        store.set("Count", PropertyValue::I64(1), &clock).unwrap();
        assert_eq!(store.last_update("Count").unwrap(), 100);
        clock.set_for_test(50); // time cannot go backwards in practice, but
        // the invariant is about non-decreasing *per key*, across the
        // sequence of sets the caller actually issues.
        clock.set_for_test(200);
        store.set("Count", PropertyValue::I64(2), &clock).unwrap();
        assert_eq!(store.last_update("Count").unwrap(), 200);
    }

    #[test]
    fn read_only_property_rejects_writes() {
        let mut store = PropertyStore::new(
            vec![PropertyDecl::new(
                "Name",
                AccessMode::READ_ONLY,
                PropertyValue::Str("svc".into()),
            )],
            0,
        );
        let clock = clock_at(0);
        let err = store
            .set("Name", PropertyValue::Str("other".into()), &clock)
            .unwrap_err();
        assert_eq!(err, PropertyError::AccessDenied("Name"));
    }

    #[test]
    fn mismatched_value_type_is_rejected() {
        let mut store = PropertyStore::new(
            vec![PropertyDecl::new(
                "HeartbeatPeriodNs",
                AccessMode::READ_WRITE,
                PropertyValue::I64(10),
            )],
            0,
        );
        let clock = clock_at(0);
        let err = store
            .set("HeartbeatPeriodNs", PropertyValue::Str("oops".into()), &clock)
            .unwrap_err();
        assert_eq!(
            err,
            PropertyError::TypeError {
                key: "HeartbeatPeriodNs",
                expected: "i64",
                actual: "str",
            }
        );
    }

    #[test]
    fn on_set_hook_can_reject() {
        let mut store = PropertyStore::new(
            vec![PropertyDecl::new(
                "Period",
                AccessMode::READ_WRITE,
                PropertyValue::I64(10),
            )
            .with_on_set(Box::new(|v| match v.as_i64() {
                Some(n) if n > 0 => Ok(None),
                _ => Err("must be positive".to_string()),
            }))],
            0,
        );
        let clock = clock_at(0);
        let err = store
            .set("Period", PropertyValue::I64(-1), &clock)
            .unwrap_err();
        assert!(matches!(err, PropertyError::Validation { .. }));
        store.set("Period", PropertyValue::I64(5), &clock).unwrap();
        assert_eq!(store.get("Period").unwrap(), PropertyValue::I64(5));
    }

    #[test]
    fn unknown_key_is_not_found() {
        let mut store = PropertyStore::new(vec![], 0);
        assert_eq!(store.get("Nope").unwrap_err(), PropertyError::NotFound("Nope"));
    }

    proptest! {
        /// Invariant: `last_update(k)` is non-decreasing across any
        /// sequence of `set(k, ..)` calls, for an arbitrary non-decreasing
        /// sequence of clock samples (the clock itself only ever advances
        /// within a single tick's lifetime of sets — see ).
        #[test]
        fn last_update_is_nondecreasing_across_sets(
            mut stamps in proptest::collection::vec(0i64..1_000_000, 1..30),
        ) {
            stamps.sort_unstable();
            let mut store = PropertyStore::new(
                vec![PropertyDecl::new("Count", AccessMode::READ_WRITE, PropertyValue::I64(0))],
                0,
            );
            let clock = clock_at(0);
            let mut previous = i64::MIN;
            for (i, ns) in stamps.into_iter().enumerate() {
                clock.set_for_test(ns);
                store.set("Count", PropertyValue::I64(i as i64), &clock).unwrap();
                let observed = store.last_update("Count").unwrap();
                prop_assert!(observed >= previous);
                previous = observed;
            }
        }
    }
}
