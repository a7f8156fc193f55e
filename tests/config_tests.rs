//! Configuration ingestion tests.
//!
//! Run with: cargo test --test config_tests

use artifortress::core::RawConfig;

#[test]
fn json_config_round_trips_through_normalize() {
    let raw: RawConfig = serde_json::from_str(
        r#"{
            "upload": { "presign_ttl_seconds": 120, "session_ttl_seconds": 600 },
            "policy": { "evaluation_timeout_ms": 500 },
            "lifecycle": {
                "tombstone_retention_days": 7,
                "gc_retention_grace_hours": 48,
                "gc_batch_size": 50
            },
            "worker": { "poll_seconds": 5, "batch_size": 10, "search_max_attempts": 3 }
        }"#,
    )
    .unwrap();
    let config = raw.normalize();

    assert_eq!(config.upload.presign_ttl_seconds, 120);
    assert_eq!(config.upload.session_ttl_seconds, 600);
    assert_eq!(config.policy.evaluation_timeout_ms, 500);
    assert_eq!(config.lifecycle.tombstone_retention_days, 7);
    assert_eq!(config.lifecycle.gc_retention_grace_hours, 48);
    assert_eq!(config.lifecycle.gc_batch_size, 50);
    assert_eq!(config.worker.poll_seconds, 5);
    assert_eq!(config.worker.batch_size, 10);
    assert_eq!(config.worker.search_max_attempts, 3);
}

#[test]
fn partial_config_keeps_defaults_for_the_rest() {
    let raw: RawConfig =
        serde_json::from_str(r#"{ "upload": { "presign_ttl_seconds": 60 } }"#).unwrap();
    let config = raw.normalize();

    assert_eq!(config.upload.presign_ttl_seconds, 60);
    assert_eq!(config.upload.session_ttl_seconds, 3600);
    assert_eq!(config.policy.evaluation_timeout_ms, 250);
    assert_eq!(config.lifecycle.gc_batch_size, 200);
}

#[test]
fn out_of_range_json_values_fall_back_to_defaults() {
    let raw: RawConfig = serde_json::from_str(
        r#"{
            "upload": { "presign_ttl_seconds": 5 },
            "lifecycle": {
                "tombstone_retention_days": 9999,
                "gc_retention_grace_hours": -1,
                "gc_batch_size": 0
            },
            "worker": { "poll_seconds": 0 }
        }"#,
    )
    .unwrap();
    let config = raw.normalize();

    assert_eq!(config.upload.presign_ttl_seconds, 900);
    assert_eq!(config.lifecycle.tombstone_retention_days, 30);
    assert_eq!(config.lifecycle.gc_retention_grace_hours, 24);
    assert_eq!(config.lifecycle.gc_batch_size, 200);
    assert_eq!(config.worker.poll_seconds, 30);
}

#[test]
fn range_boundaries_are_accepted_exactly() {
    let raw: RawConfig = serde_json::from_str(
        r#"{
            "upload": { "presign_ttl_seconds": 3600 },
            "lifecycle": {
                "tombstone_retention_days": 3650,
                "gc_retention_grace_hours": 8760,
                "gc_batch_size": 5000
            }
        }"#,
    )
    .unwrap();
    let config = raw.normalize();

    assert_eq!(config.upload.presign_ttl_seconds, 3600);
    assert_eq!(config.lifecycle.tombstone_retention_days, 3650);
    assert_eq!(config.lifecycle.gc_retention_grace_hours, 8760);
    assert_eq!(config.lifecycle.gc_batch_size, 5000);
}
