//! EventBus: persist-then-fanout distribution to subscribers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::error;

use crate::error::{CoreError, CoreResult};
use crate::event::store::EventStore;
use crate::event::types::{Event, EventPayload, EventType, Mode, Stage};

/// Receives every event published on the bus, in append order.
///
/// Mirrors callback-trait injection idiom
/// (`ConfirmationCallback`/`ProgressCallback` in `execution_engine`); a
/// subscriber that panics would poison the bus, so subscribers are
/// expected to report failure via `Result` instead, which the bus logs
/// and continues past.
pub trait Subscriber: Send + Sync {
    fn on_event(&self, event: &Event) -> Result<(), String>;
}

impl<F> Subscriber for F
where
    F: Fn(&Event) -> Result<(), String> + Send + Sync,
{
    fn on_event(&self, event: &Event) -> Result<(), String> {
        self(event)
    }
}

struct Registered {
    id: u64,
    subscriber: Arc<dyn Subscriber>,
}

/// A handle that removes its subscriber from the bus when dropped is not
/// provided; instead `unsubscribe()` is called explicitly, matching
/// the "Subscription returns a handle that removes the subscriber
/// on invocation."
pub struct SubscriptionHandle {
    id: u64,
    bus: Arc<EventBusInner>,
}

impl SubscriptionHandle {
    pub fn unsubscribe(self) {
        let mut subs = self.bus.subscribers.lock().unwrap();
        subs.retain(|r| r.id != self.id);
    }
}

struct EventBusInner {
    store: EventStore,
    subscribers: Mutex<Vec<Registered>>,
    next_sub_id: AtomicU64,
}

/// Persist-then-fanout bus: `publish` = `append` + notify-all-subscribers.
/// The bus never fans out a non-persisted event.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

impl EventBus {
    pub fn new(store: EventStore) -> Self {
        Self {
            inner: Arc::new(EventBusInner {
                store,
                subscribers: Mutex::new(Vec::new()),
                next_sub_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> SubscriptionHandle {
        let id = self.inner.next_sub_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .subscribers
            .lock()
            .unwrap()
            .push(Registered { id, subscriber });
        SubscriptionHandle {
            id,
            bus: self.inner.clone(),
        }
    }

    /// Append then synchronously drain subscribers in registration order
    /// before returning.
    pub fn publish(&self, event: Event) -> CoreResult<Event> {
        let appended = self
            .inner
            .store
            .append(event)
            .map_err(|e| CoreError::PersistenceError(e.to_string()))?;

        let subs: Vec<Arc<dyn Subscriber>> = self
            .inner
            .subscribers
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.subscriber.clone())
            .collect();

        for sub in subs {
            if let Err(e) = sub.on_event(&appended) {
                error!(event_id = %appended.event_id, error = %e, "subscriber failed");
            }
        }

        Ok(appended)
    }

    /// Build and publish an event in one call, stamping `event_id`/
    /// `timestamp` via the store.
    #[allow(clippy::too_many_arguments)]
    pub fn emit(
        &self,
        task_id: &str,
        event_type: EventType,
        mode: Mode,
        stage: Stage,
        payload: EventPayload,
        evidence_ids: Vec<String>,
        parent_event_id: Option<String>,
    ) -> CoreResult<Event> {
        self.publish(Event {
            event_id: String::new(),
            task_id: task_id.to_string(),
            timestamp: String::new(),
            event_type,
            mode,
            stage,
            payload,
            evidence_ids,
            parent_event_id,
        })
    }

    /// Map a broader "primitive" vocabulary
    /// onto a canonical stored `type`, embedding the primitive descriptor
    /// under `payload._primitive` for replay normalization.
    pub fn emit_primitive(
        &self,
        task_id: &str,
        primitive: &str,
        canonical: EventType,
        mode: Mode,
        stage: Stage,
        payload: EventPayload,
    ) -> CoreResult<Event> {
        self.emit(
            task_id,
            canonical,
            mode,
            stage,
            payload.with_primitive(primitive),
            vec![],
            None,
        )
    }

    pub fn store(&self) -> &EventStore {
        &self.inner.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{FixedClock, SequentialIds};
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    fn bus(dir: &std::path::Path) -> EventBus {
        let store = EventStore::with_providers(
            dir.join("events.jsonl"),
            Box::new(FixedClock::new(1)),
            Box::new(SequentialIds::new()),
        )
        .unwrap();
        EventBus::new(store)
    }

    #[test]
    fn publish_persists_before_any_subscriber_observes() {
        let dir = tempdir().unwrap();
        let bus = bus(dir.path());
        let observed_count = Arc::new(AtomicUsize::new(0));
        let observed_count2 = observed_count.clone();
        let store_path = dir.path().join("events.jsonl");

        bus.subscribe(Arc::new(move |_event: &Event| {
            // At subscriber-invocation time, the store must already
            // contain the event (persist-before-fanout).
            let on_disk = EventStore::read_all_from(&store_path).unwrap();
            assert_eq!(on_disk.len(), 1);
            observed_count2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        bus.emit(
            "t1",
            EventType::IntentReceived,
            Mode::Answer,
            Stage::None,
            EventPayload::new(),
            vec![],
            None,
        )
        .unwrap();

        assert_eq!(observed_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_subscriber_does_not_block_others() {
        let dir = tempdir().unwrap();
        let bus = bus(dir.path());
        let second_ran = Arc::new(AtomicUsize::new(0));
        let second_ran2 = second_ran.clone();

        bus.subscribe(Arc::new(|_e: &Event| Err("boom".to_string())));
        bus.subscribe(Arc::new(move |_e: &Event| {
            second_ran2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        bus.emit(
            "t1",
            EventType::IntentReceived,
            Mode::Answer,
            Stage::None,
            EventPayload::new(),
            vec![],
            None,
        )
        .unwrap();

        assert_eq!(second_ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_removes_subscriber() {
        let dir = tempdir().unwrap();
        let bus = bus(dir.path());
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();

        let handle = bus.subscribe(Arc::new(move |_e: &Event| {
            count2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        handle.unsubscribe();

        bus.emit(
            "t1",
            EventType::IntentReceived,
            Mode::Answer,
            Stage::None,
            EventPayload::new(),
            vec![],
            None,
        )
        .unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn emit_primitive_embeds_descriptor() {
        let dir = tempdir().unwrap();
        let bus = bus(dir.path());
        let event = bus
            .emit_primitive(
                "t1",
                "warning_raised",
                EventType::FailureDetected,
                Mode::Mission,
                Stage::Edit,
                EventPayload::new(),
            )
            .unwrap();
        assert_eq!(
            event.payload.get("_primitive").unwrap(),
            &serde_json::json!("warning_raised")
        );
    }
}
