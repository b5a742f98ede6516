//! Entity (C2): a named telemetry source bound to one broker topic and
//! a declared attribute set, with latest-value state and optional
//! bounded per-attribute ring buffers.
//!
//! Grounded on `goalee/entity.py` (closed attribute set, strict/lax
//! unknown-key handling, buffer zero-sentinel warm-up, `to_camel_case`
//! derived identifiers) and on the teacher's `parking_lot::RwLock`
//! usage in `rust_core/src/circuit_breaker.rs` for guarding shared
//! mutable state read from multiple tasks.

use crate::error::GoalkeeperError;
use goalkeeper_broker::{BrokerDescriptor, BrokerTransport, SubscriptionHandle};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Whether an unknown key in an incoming message drops the whole
/// message (`Strict`) or is silently ignored while known keys still
/// update (`Lax`, the default — spec §3, §4.2, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeMode {
    Strict,
    Lax,
}

impl Default for AttributeMode {
    fn default() -> Self {
        AttributeMode::Lax
    }
}

/// A bounded FIFO of the last `capacity` values observed for one
/// attribute. Reading before the buffer is full ("warm") returns zero
/// sentinels rather than partial data (spec §3 invariant, §9 design
/// note: "tests must not treat that as real data").
#[derive(Debug, Clone, Default)]
pub struct RingBuffer {
    capacity: usize,
    values: VecDeque<f64>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, values: VecDeque::with_capacity(capacity) }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn is_warm(&self) -> bool {
        self.values.len() == self.capacity
    }

    /// Return the most recent `m` values, oldest first. Before the
    /// buffer is warm (fewer than `capacity` samples observed), the
    /// whole read is `m` zeros — real samples are never partially
    /// exposed (spec §3, `goalee/entity.py::get_buffer`: `if
    /// len(buff) != maxlen: return [0]*size`).
    pub fn get(&self, m: usize) -> Vec<f64> {
        if !self.is_warm() {
            return vec![0.0; m];
        }
        let have = self.values.len();
        if have >= m {
            self.values.iter().rev().take(m).rev().copied().collect()
        } else {
            let mut out = vec![0.0; m - have];
            out.extend(self.values.iter().copied());
            out
        }
    }
}

#[derive(Default)]
struct EntityState {
    attributes: HashMap<String, Value>,
    buffers: HashMap<String, RingBuffer>,
    initialized: bool,
}

/// A named telemetry source. `attributes` is a closed set declared at
/// construction time; `buffers` are opt-in per attribute.
pub struct Entity {
    name: String,
    etype: String,
    topic: String,
    source: BrokerDescriptor,
    declared_attributes: Vec<String>,
    mode: AttributeMode,
    state: RwLock<EntityState>,
    started: AtomicBool,
    subscription: RwLock<Option<SubscriptionHandle>>,
}

impl Entity {
    pub fn new(
        name: impl Into<String>,
        etype: impl Into<String>,
        topic: impl Into<String>,
        source: BrokerDescriptor,
        declared_attributes: Vec<String>,
    ) -> Arc<Self> {
        Self::with_mode(name, etype, topic, source, declared_attributes, AttributeMode::default())
    }

    pub fn with_mode(
        name: impl Into<String>,
        etype: impl Into<String>,
        topic: impl Into<String>,
        source: BrokerDescriptor,
        declared_attributes: Vec<String>,
        mode: AttributeMode,
    ) -> Arc<Self> {
        let mut initial = HashMap::new();
        for attr in &declared_attributes {
            initial.insert(attr.clone(), Value::Null);
        }

        Arc::new(Self {
            name: name.into(),
            etype: etype.into(),
            topic: topic.into(),
            source,
            declared_attributes,
            mode,
            state: RwLock::new(EntityState { attributes: initial, buffers: HashMap::new(), initialized: false }),
            started: AtomicBool::new(false),
            subscription: RwLock::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn etype(&self) -> &str {
        &self.etype
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn source(&self) -> &BrokerDescriptor {
        &self.source
    }

    /// Camel-cased derived identifier, used for log namespacing and
    /// broker client-id derivation (`goalee/entity.py::to_camel_case`).
    pub fn camel_name(&self) -> String {
        let mut out = String::new();
        let mut capitalize_next = false;
        for (i, ch) in self.name.chars().enumerate() {
            if ch == '_' || ch == '-' {
                capitalize_next = true;
            } else if capitalize_next {
                out.extend(ch.to_uppercase());
                capitalize_next = false;
            } else if i == 0 {
                out.extend(ch.to_lowercase());
            } else {
                out.push(ch);
            }
        }
        out
    }

    /// Register a bounded ring buffer for `attr` with the given capacity.
    pub fn enable_buffer(&self, attr: &str, capacity: usize) {
        self.state.write().buffers.insert(attr.to_string(), RingBuffer::new(capacity));
    }

    pub fn is_initialized(&self) -> bool {
        self.state.read().initialized
    }

    /// Idempotent: opens the underlying subscription and begins
    /// dispatching incoming messages to `update_state`.
    pub async fn start(self: &Arc<Self>, transport: Arc<dyn BrokerTransport>) -> Result<(), goalkeeper_broker::BrokerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let this = self.clone();
        let handler: goalkeeper_broker::MessageHandler = Arc::new(move |value: Value| {
            this.update_state(&value);
        });

        let handle = transport.subscribe(&self.topic, handler).await?;
        *self.subscription.write() = Some(handle);
        Ok(())
    }

    /// Validate keys against the declared attribute set and fold `msg`
    /// into `attributes` + `buffers`, atomically with respect to readers.
    pub fn update_state(&self, msg: &Value) {
        let Some(obj) = msg.as_object() else {
            warn!(entity = %self.name, "dropping non-object message");
            return;
        };

        if self.mode == AttributeMode::Strict {
            for key in obj.keys() {
                if !self.declared_attributes.iter().any(|d| d == key) {
                    warn!(entity = %self.name, attribute = %key, "strict mode: dropping whole message with unknown attribute");
                    return;
                }
            }
        }

        let mut state = self.state.write();
        for (key, value) in obj.iter() {
            if !self.declared_attributes.iter().any(|d| d == key) {
                // Lax mode: unknown keys are ignored.
                continue;
            }
            state.attributes.insert(key.clone(), value.clone());
            if let Some(buf) = state.buffers.get_mut(key) {
                if let Some(n) = value.as_f64() {
                    buf.push(n);
                }
            }
        }
        state.initialized = true;
    }

    pub fn get_attr(&self, key: &str) -> Option<Value> {
        self.state.read().attributes.get(key).cloned()
    }

    /// Shallow snapshot of the full attribute map, used by
    /// EntityStateChange and EntityStateCondition to avoid torn reads.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.state.read().attributes.clone()
    }

    /// Returns the last `m` buffered samples for `key`, or the
    /// zero-sentinel read if the buffer is not yet warm or was never
    /// enabled. `key` must be one of the entity's declared attributes
    /// — reading a buffer for an attribute that was never declared is
    /// the latent `KeyError` `goalee/entity.py::get_buffer` has; this
    /// port turns it into a typed error instead (SPEC_FULL.md §C.5).
    pub fn get_buffer(&self, key: &str, m: usize) -> crate::error::Result<Vec<f64>> {
        if !self.declared_attributes.iter().any(|d| d == key) {
            return Err(GoalkeeperError::UnknownAttribute { entity: self.name.clone(), attribute: key.to_string() });
        }
        Ok(match self.state.read().buffers.get(key) {
            Some(buf) => buf.get(m),
            None => vec![0.0; m],
        })
    }

    /// Attribute nested under `position`/`orientation`, per the broker
    /// message format (spec §6): `{"x":..,"y":..,"z":..}`.
    pub fn position(&self) -> Option<(f64, f64, f64)> {
        let pos = self.get_attr("position")?;
        Some((
            pos.get("x")?.as_f64()?,
            pos.get("y")?.as_f64()?,
            pos.get("z").and_then(Value::as_f64).unwrap_or(0.0),
        ))
    }

    pub fn orientation(&self) -> Option<(f64, f64, f64)> {
        let ori = self.get_attr("orientation")?;
        Some((
            ori.get("roll")?.as_f64()?,
            ori.get("pitch")?.as_f64()?,
            ori.get("yaw")?.as_f64()?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_entity(mode: AttributeMode) -> Arc<Entity> {
        Entity::with_mode(
            "front_sonar",
            "sonar",
            "telemetry/front_sonar",
            BrokerDescriptor::redis("localhost"),
            vec!["range".to_string()],
            mode,
        )
    }

    #[test]
    fn lax_mode_ignores_unknown_keys() {
        let e = test_entity(AttributeMode::Lax);
        e.update_state(&json!({"range": 7.0, "bogus": 1}));
        assert_eq!(e.get_attr("range").unwrap(), json!(7.0));
        assert!(e.is_initialized());
    }

    #[test]
    fn strict_mode_drops_whole_message() {
        let e = test_entity(AttributeMode::Strict);
        e.update_state(&json!({"range": 7.0, "bogus": 1}));
        assert_eq!(e.get_attr("range").unwrap(), Value::Null);
        assert!(!e.is_initialized());
    }

    #[test]
    fn buffer_returns_zero_sentinels_before_warm() {
        // spec §3 / goalee/entity.py::get_buffer: while the ring holds
        // fewer than `capacity` samples, every read is `m` zeros — not
        // a front-padded mix of zeros and real samples.
        let e = test_entity(AttributeMode::Lax);
        e.enable_buffer("range", 3);
        e.update_state(&json!({"range": 5.0}));
        assert_eq!(e.get_buffer("range", 3).unwrap(), vec![0.0, 0.0, 0.0]);
        e.update_state(&json!({"range": 6.0}));
        assert_eq!(e.get_buffer("range", 3).unwrap(), vec![0.0, 0.0, 0.0]);
        e.update_state(&json!({"range": 7.0}));
        assert_eq!(e.get_buffer("range", 3).unwrap(), vec![5.0, 6.0, 7.0]);
        e.update_state(&json!({"range": 8.0}));
        assert_eq!(e.get_buffer("range", 3).unwrap(), vec![6.0, 7.0, 8.0]);
    }

    #[test]
    fn camel_name_converts_snake_case() {
        let e = test_entity(AttributeMode::Lax);
        assert_eq!(e.camel_name(), "frontSonar");
    }

    #[test]
    fn undeclared_attribute_buffer_is_an_error() {
        // SPEC_FULL.md §C.5: reading a buffer for an attribute that
        // was never declared is a typed error, not a silent zero-read.
        let e = test_entity(AttributeMode::Lax);
        assert!(matches!(e.get_buffer("nope", 2), Err(GoalkeeperError::UnknownAttribute { .. })));
    }

    #[test]
    fn declared_attribute_without_buffer_enabled_returns_zeros() {
        let e = test_entity(AttributeMode::Lax);
        e.update_state(&json!({"range": 7.0}));
        assert_eq!(e.get_buffer("range", 2).unwrap(), vec![0.0, 0.0]);
    }
}
