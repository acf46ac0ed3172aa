//! Integration tests for log redaction.

use photo_compare_app::redact_sensitive;

#[test]
fn log_redaction_tests_removes_obvious_secret_markers() {
    let raw = "authorization=Bearer abc123";
    let redacted = redact_sensitive(raw);

    assert!(redacted.contains("<redacted>"));
    assert!(!redacted.contains("abc123"));
}

#[test]
fn log_redaction_tests_strips_launch_token_from_urls() {
    let raw = "loading https://widget.example.com/?rapport_id=rap-7&token=s3cr3t&env=test";
    let redacted = redact_sensitive(raw);

    assert!(!redacted.contains("s3cr3t"));
    assert!(redacted.contains("rapport_id=rap-7"));
    assert!(redacted.contains("env=test"));
}

#[test]
fn log_redaction_tests_never_logs_photo_payloads() {
    let raw = format!("confirmed data:image/jpeg;base64,{}", "A".repeat(4_096));
    let redacted = redact_sensitive(&raw);

    assert_eq!(redacted, "confirmed data:image/jpeg;base64,<4096 chars>");
}

#[test]
fn log_redaction_tests_looks_past_key_prefixes() {
    let raw = "fetch https://api.example.com/?tokenx=1&token=abc&secretive&secret:xyz";
    let redacted = redact_sensitive(raw);

    assert!(!redacted.contains("abc"));
    assert!(!redacted.contains("xyz"));
    assert!(redacted.contains("secretive"));
}
