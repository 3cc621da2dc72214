//! EventStore: append-only journal, persisted as line-delimited JSON
//!.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{CoreError, CoreResult};
use crate::event::types::Event;
use crate::ids::{generate_event_id, Clock, IdProvider, SystemClock, UuidIds};

/// Append-only journal of structured events, durable to disk before
/// `append` returns.
pub struct EventStore {
    path: PathBuf,
    file: Mutex<File>,
    clock: Box<dyn Clock>,
    ids: Box<dyn IdProvider>,
}

impl EventStore {
    /// Open (creating if missing) the journal at `path`, by convention
    /// named `events.jsonl`.
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        Self::with_providers(path, Box::new(SystemClock), Box::new(UuidIds))
    }

    pub fn with_providers(
        path: impl AsRef<Path>,
        clock: Box<dyn Clock>,
        ids: Box<dyn IdProvider>,
    ) -> CoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            clock,
            ids,
        })
    }

    /// Assign `event_id`/`timestamp` if absent and append durably.
    /// `event_id` is never reused.
    pub fn append(&self, mut event: Event) -> CoreResult<Event> {
        if event.event_id.is_empty() {
            event.event_id = generate_event_id(self.clock.as_ref(), self.ids.as_ref());
        }
        if event.timestamp.is_empty() {
            event.timestamp = self.clock.now().to_rfc3339();
        }

        let line = serde_json::to_string(&event).map_err(CoreError::from)?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| CoreError::PersistenceError("event store lock poisoned".into()))?;
        writeln!(file, "{line}").map_err(CoreError::from)?;
        file.flush().map_err(CoreError::from)?;
        file.sync_all().map_err(CoreError::from)?;

        Ok(event)
    }

    /// Replay the journal from disk. A partial trailing line (e.g. from a
    /// crash mid-write) is treated as absent rather than an error
    ///.
    pub fn read_all(&self) -> CoreResult<Vec<Event>> {
        Self::read_all_from(&self.path)
    }

    pub fn read_all_from(path: impl AsRef<Path>) -> CoreResult<Vec<Event>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(path)?);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(&line) {
                Ok(event) => events.push(event),
                Err(_) => break, // partial trailing line: stop, don't error
            }
        }
        Ok(events)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::types::{EventPayload, EventType, Mode, Stage};
    use crate::ids::{FixedClock, SequentialIds};
    use tempfile::tempdir;

    fn make_event(task_id: &str) -> Event {
        Event {
            event_id: String::new(),
            task_id: task_id.to_string(),
            timestamp: String::new(),
            event_type: EventType::IntentReceived,
            mode: Mode::Answer,
            stage: Stage::None,
            payload: EventPayload::new(),
            evidence_ids: vec![],
            parent_event_id: None,
        }
    }

    #[test]
    fn append_assigns_id_and_persists_before_returning() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let store = EventStore::with_providers(
            &path,
            Box::new(FixedClock::new(10)),
            Box::new(SequentialIds::new()),
        )
        .unwrap();

        let appended = store.append(make_event("t1")).unwrap();
        assert!(!appended.event_id.is_empty());

        let events = EventStore::read_all_from(&path).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, appended.event_id);
    }

    #[test]
    fn event_ids_are_never_reused() {
        let dir = tempdir().unwrap();
        let store = EventStore::with_providers(
            dir.path().join("events.jsonl"),
            Box::new(FixedClock::new(10)),
            Box::new(SequentialIds::new()),
        )
        .unwrap();

        let a = store.append(make_event("t1")).unwrap();
        let b = store.append(make_event("t1")).unwrap();
        assert_ne!(a.event_id, b.event_id);
    }

    #[test]
    fn partial_trailing_line_is_treated_as_absent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let store = EventStore::with_providers(
            &path,
            Box::new(FixedClock::new(10)),
            Box::new(SequentialIds::new()),
        )
        .unwrap();
        store.append(make_event("t1")).unwrap();

        // Simulate a crash mid-write: append a non-JSON partial line.
        use std::io::Write as _;
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        write!(f, "{{\"event_id\":\"evt_truncat").unwrap();

        let events = EventStore::read_all_from(&path).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn insertion_order_equals_read_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let store = EventStore::with_providers(
            &path,
            Box::new(FixedClock::new(10)),
            Box::new(SequentialIds::new()),
        )
        .unwrap();

        for i in 0..5 {
            store.append(make_event(&format!("t{i}"))).unwrap();
        }

        let events = EventStore::read_all_from(&path).unwrap();
        let task_ids: Vec<_> = events.iter().map(|e| e.task_id.clone()).collect();
        assert_eq!(
            task_ids,
            vec!["t0", "t1", "t2", "t3", "t4"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        );
    }
}
