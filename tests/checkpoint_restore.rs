//! Cross-instance checkpoint/restore coverage: create with one
//! `CheckpointManager`, then restore with a freshly constructed one
//! pointed at the same workspace root, per the cross-process access
//! design note.

use std::fs;

use tempfile::tempdir;

use missioncore::checkpoint::CheckpointManager;
use missioncore::event::{EventBus, EventStore, EventType, Mode, Stage};
use missioncore::ids::{FixedClock, SequentialIds};

fn bus(dir: &std::path::Path) -> EventBus {
    let store = EventStore::with_providers(
        dir.join(".missioncore").join("events.jsonl"),
        Box::new(FixedClock::new(1)),
        Box::new(SequentialIds::new()),
    )
    .unwrap();
    EventBus::new(store)
}

#[test]
fn multi_file_checkpoint_restores_creates_updates_and_deletes_together() {
    let dir = tempdir().unwrap();
    let bus = bus(dir.path());
    let clock = FixedClock::new(10_000);
    let ids = SequentialIds::new();

    let unchanged = dir.path().join("unchanged.rs");
    let to_mutate = dir.path().join("to_mutate.rs");
    let to_delete_later = dir.path().join("to_delete_later.rs");
    fs::write(&unchanged, "fn unchanged() {}").unwrap();
    fs::write(&to_mutate, "fn before() {}").unwrap();
    fs::write(&to_delete_later, "fn about_to_go() {}").unwrap();

    let paths = vec![
        "unchanged.rs".to_string(),
        "to_mutate.rs".to_string(),
        "to_delete_later.rs".to_string(),
        "not_yet_created.rs".to_string(),
    ];

    let checkpoint_id = {
        let mut mgr = CheckpointManager::new(dir.path(), &bus, &clock, &ids);
        mgr.create_checkpoint(
            "task_multi",
            Mode::Mission,
            Stage::Edit,
            "before a risky multi-file edit",
            &paths,
            "snapshot",
        )
        .unwrap()
        .checkpoint_id
    };

    // Simulate the agentic edit that the checkpoint is meant to undo.
    fs::write(&to_mutate, "fn after() {}").unwrap();
    fs::remove_file(&to_delete_later).unwrap();
    fs::write(dir.path().join("not_yet_created.rs"), "fn surprise() {}").unwrap();

    // Restore from a brand new manager instance, simulating a fresh
    // process attaching to the same workspace.
    let fresh_clock = FixedClock::new(20_000);
    let fresh_ids = SequentialIds::new();
    let mut fresh_mgr = CheckpointManager::new(dir.path(), &bus, &fresh_clock, &fresh_ids);

    let metadata = fresh_mgr.load_checkpoint_metadata(&checkpoint_id).unwrap();
    assert_eq!(metadata.paths, paths);

    fresh_mgr
        .restore_checkpoint("task_multi", Mode::Mission, Stage::Edit, &checkpoint_id)
        .unwrap();

    assert_eq!(fs::read_to_string(&unchanged).unwrap(), "fn unchanged() {}");
    assert_eq!(fs::read_to_string(&to_mutate).unwrap(), "fn before() {}");
    assert!(!to_delete_later.exists());
    assert!(!dir.path().join("not_yet_created.rs").exists());

    let events = bus.store().read_all().unwrap();
    let created = events.iter().filter(|e| e.event_type == EventType::CheckpointCreated).count();
    let restored = events.iter().filter(|e| e.event_type == EventType::CheckpointRestored).count();
    assert_eq!(created, 1);
    assert_eq!(restored, 1);
}

#[test]
fn second_checkpoint_against_the_same_workspace_is_independent() {
    let dir = tempdir().unwrap();
    let bus = bus(dir.path());
    let clock = FixedClock::new(1);
    let ids = SequentialIds::new();

    let file = dir.path().join("a.rs");
    fs::write(&file, "v1").unwrap();

    let mut mgr = CheckpointManager::new(dir.path(), &bus, &clock, &ids);
    let first = mgr
        .create_checkpoint("t1", Mode::Mission, Stage::Edit, "v1 snap", &["a.rs".to_string()], "snapshot")
        .unwrap();

    fs::write(&file, "v2").unwrap();
    let second = mgr
        .create_checkpoint("t1", Mode::Mission, Stage::Edit, "v2 snap", &["a.rs".to_string()], "snapshot")
        .unwrap();

    assert_ne!(first.checkpoint_id, second.checkpoint_id);

    fs::write(&file, "v3").unwrap();

    mgr.restore_checkpoint("t1", Mode::Mission, Stage::Edit, &first.checkpoint_id)
        .unwrap();
    assert_eq!(fs::read_to_string(&file).unwrap(), "v1");

    mgr.restore_checkpoint("t1", Mode::Mission, Stage::Edit, &second.checkpoint_id)
        .unwrap();
    assert_eq!(fs::read_to_string(&file).unwrap(), "v2");
}
