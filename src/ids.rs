//! Injectable clock and id-generation providers.
//!
//! Design Notes calls out clock reads, random id suffixes, and
//! map iteration order as the non-determinism sources a replay-driven core
//! must isolate. Map iteration order is handled at the call site (sort
//! keys before iterating); clock and randomness are isolated here behind
//! traits so tests can pin both.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

/// Source of the current time, injected wherever a component needs to
/// stamp an event or derive a time-based id.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn now_millis(&self) -> u64 {
        self.now().timestamp_millis().max(0) as u64
    }
}

/// Real wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to a fixed instant, advanced manually by tests.
#[derive(Debug)]
pub struct FixedClock {
    millis: AtomicU64,
}

impl FixedClock {
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    pub fn advance(&self, delta_millis: u64) {
        self.millis.fetch_add(delta_millis, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        let ms = self.millis.load(Ordering::SeqCst) as i64;
        DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
    }

    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Source of unique id suffixes, injected wherever a component mints an
/// `event_id` or `checkpoint_id`.
pub trait IdProvider: Send + Sync {
    /// An opaque, unique string suitable as a random suffix.
    fn next_suffix(&self) -> String;
}

/// Real randomness, via a v4 UUID's hex digits (no dashes, so the
/// resulting ids stay filename-safe for checkpoint/evidence blobs).
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIds;

impl IdProvider for UuidIds {
    fn next_suffix(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

/// Deterministic, monotonically increasing suffixes for tests.
#[derive(Debug, Default)]
pub struct SequentialIds {
    counter: AtomicU64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdProvider for SequentialIds {
    fn next_suffix(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("seq{n:08}")
    }
}

/// Generate a unique event id from monotonic time plus randomness, per
/// ("Every new event has a unique id generated from
/// monotonic time plus randomness").
pub fn generate_event_id(clock: &dyn Clock, ids: &dyn IdProvider) -> String {
    format!("evt_{}_{}", clock.now_millis(), ids.next_suffix())
}

/// Generate a checkpoint id of the documented shape `cp_<timestamp><random>`
///.
pub fn generate_checkpoint_id(clock: &dyn Clock, ids: &dyn IdProvider) -> String {
    format!("cp_{}{}", clock.now_millis(), ids.next_suffix())
}

/// Monotonic wall-clock tick independent of [`Clock`], used only for
/// wall-time budget accounting where an `Instant` (not a calendar time)
/// is the right tool.
pub fn monotonic_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A fresh `run_id`, set once at mission start and never reassigned
///.
pub fn generate_run_id(ids: &dyn IdProvider) -> String {
    format!("run_{}", ids.next_suffix())
}

pub fn generate_step_id(ids: &dyn IdProvider) -> String {
    format!("step_{}", ids.next_suffix())
}

pub fn generate_attempt_id(ids: &dyn IdProvider) -> String {
    format!("att_{}", ids.next_suffix())
}

pub fn generate_file_id(ids: &dyn IdProvider) -> String {
    format!("file_{}", ids.next_suffix())
}
