//! Combines parsing, validation, sha gating, and application into the
//! pipeline order a real edit step follows: validate first, then check
//! the base sha, then apply — never apply on either rejection.

use sha2::{Digest, Sha256};

use missioncore::diff::{
    apply_diff_to_content, check_sha, parse_unified_diff, validate_diff, ValidatorErrorCode,
    ValidationPolicy,
};

fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

const UPDATE_DIFF: &str = "--- a/src/greet.rs\n+++ b/src/greet.rs\n@@ -1,3 +1,3 @@\n fn greet() {\n-    println!(\"hi\");\n+    println!(\"hello\");\n }\n";

fn allowlisted_policy() -> ValidationPolicy {
    ValidationPolicy {
        allowed_paths: Some(vec!["src/greet.rs".to_string()]),
        ..ValidationPolicy::default()
    }
}

#[test]
fn valid_in_scope_update_applies_cleanly_after_sha_check() {
    let original = "fn greet() {\n    println!(\"hi\");\n}\n";
    let base_sha = sha256_hex(original);

    let result = validate_diff(UPDATE_DIFF, &allowlisted_policy());
    assert!(result.valid, "unexpected issues: {:?}", result.issues);

    let sha_issue = check_sha("src/greet.rs", &base_sha, &sha256_hex(original));
    assert!(sha_issue.is_none());

    let parsed = parse_unified_diff(UPDATE_DIFF).unwrap();
    let file_diff = &parsed.files[0];
    let updated = apply_diff_to_content(original, file_diff).unwrap();
    assert_eq!(updated, "fn greet() {\n    println!(\"hello\");\n}\n");
}

#[test]
fn stale_base_sha_blocks_application_even_though_validation_passes() {
    let original = "fn greet() {\n    println!(\"hi\");\n}\n";
    let stale_sha = sha256_hex("fn greet() {\n    println!(\"stale\");\n}\n");

    let result = validate_diff(UPDATE_DIFF, &allowlisted_policy());
    assert!(result.valid);

    let sha_issue = check_sha("src/greet.rs", &stale_sha, &sha256_hex(original));
    assert!(sha_issue.is_some());
    assert_eq!(sha_issue.unwrap().code, ValidatorErrorCode::ShaMismatch);
    // A real edit pipeline would stop here; applying anyway is never
    // reached once the sha gate fails.
}

#[test]
fn file_creation_outside_policy_is_rejected_before_any_apply_attempt() {
    let create_diff = "--- /dev/null\n+++ b/src/new_module.rs\n@@ -0,0 +1,2 @@\n+fn new_fn() {}\n+\n";
    let result = validate_diff(create_diff, &ValidationPolicy::default());
    assert!(!result.valid);
    assert!(result.has_code(ValidatorErrorCode::FileCreation));
}

#[test]
fn path_outside_the_contextual_allowlist_is_rejected() {
    let other_file_diff = "--- a/src/other.rs\n+++ b/src/other.rs\n@@ -1,1 +1,1 @@\n-a\n+b\n";
    let result = validate_diff(other_file_diff, &allowlisted_policy());
    assert!(!result.valid);
    assert!(result.has_code(ValidatorErrorCode::UnknownFile));
}

#[test]
fn path_traversal_is_rejected_regardless_of_allowlist() {
    let escaping_diff = "--- a/../../etc/passwd\n+++ b/../../etc/passwd\n@@ -1,1 +1,1 @@\n-root:x\n+root:y\n";
    let result = validate_diff(escaping_diff, &ValidationPolicy::default());
    assert!(result.has_code(ValidatorErrorCode::PathTraversal));
}

#[test]
fn context_mismatch_surfaces_as_an_apply_error_not_a_silent_corruption() {
    // The diff's context line no longer matches what's on disk (someone
    // else edited the file between context capture and apply time).
    let drifted = "fn greet() {\n    println!(\"completely different\");\n}\n";
    let parsed = parse_unified_diff(UPDATE_DIFF).unwrap();
    let file_diff = &parsed.files[0];
    let err = apply_diff_to_content(drifted, file_diff).unwrap_err();
    match err {
        missioncore::diff::ApplyError::ContextMismatch { .. } => {}
        other => panic!("expected a context mismatch, got {other:?}"),
    }
}
