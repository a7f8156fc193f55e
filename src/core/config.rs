use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Immutable configuration snapshot, built once at startup.
///
/// Ingestion is lenient: a raw value outside its documented range falls back
/// to the default silently (a debug trace notes the fallback). Schema-level
/// checks still guard values that end up persisted.
#[derive(Debug, Clone)]
pub struct ArtifortressConfig {
    pub upload: UploadConfig,
    pub policy: PolicyConfig,
    pub lifecycle: LifecycleConfig,
    pub worker: WorkerConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// TTL of presigned part URLs.
    pub presign_ttl_seconds: u64,
    /// Default lifetime of an upload session before the expiry sweeper
    /// aborts it.
    pub session_ttl_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Budget for a single policy evaluation; exceeding it fails closed.
    pub evaluation_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub tombstone_retention_days: u32,
    pub gc_retention_grace_hours: u32,
    pub gc_batch_size: u32,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_seconds: u64,
    pub batch_size: u32,
    pub search_max_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub bind_addr: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            presign_ttl_seconds: 900,
            session_ttl_seconds: 3600,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            evaluation_timeout_ms: 250,
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            tombstone_retention_days: 30,
            gc_retention_grace_hours: 24,
            gc_batch_size: 200,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_seconds: 30,
            batch_size: 100,
            search_max_attempts: 5,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Default for ArtifortressConfig {
    fn default() -> Self {
        Self {
            upload: UploadConfig::default(),
            policy: PolicyConfig::default(),
            lifecycle: LifecycleConfig::default(),
            worker: WorkerConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl UploadConfig {
    pub fn presign_ttl(&self) -> Duration {
        Duration::from_secs(self.presign_ttl_seconds)
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_ttl_seconds as i64)
    }
}

impl PolicyConfig {
    pub fn evaluation_timeout(&self) -> Duration {
        Duration::from_millis(self.evaluation_timeout_ms)
    }
}

/// Raw, serde-facing configuration shape. All fields optional; missing or
/// out-of-range values resolve to defaults during [`RawConfig::normalize`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub upload: RawUploadConfig,
    pub policy: RawPolicyConfig,
    pub lifecycle: RawLifecycleConfig,
    pub worker: RawWorkerConfig,
    pub http: RawHttpConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawUploadConfig {
    pub presign_ttl_seconds: Option<i64>,
    pub session_ttl_seconds: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawPolicyConfig {
    pub evaluation_timeout_ms: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawLifecycleConfig {
    pub tombstone_retention_days: Option<i64>,
    pub gc_retention_grace_hours: Option<i64>,
    pub gc_batch_size: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawWorkerConfig {
    pub poll_seconds: Option<i64>,
    pub batch_size: Option<i64>,
    pub search_max_attempts: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawHttpConfig {
    pub bind_addr: Option<String>,
}

impl RawConfig {
    pub fn normalize(self) -> ArtifortressConfig {
        let defaults = ArtifortressConfig::default();
        ArtifortressConfig {
            upload: UploadConfig {
                presign_ttl_seconds: in_range_u64(
                    "upload.presign_ttl_seconds",
                    self.upload.presign_ttl_seconds,
                    60,
                    3600,
                    defaults.upload.presign_ttl_seconds,
                ),
                session_ttl_seconds: in_range_u64(
                    "upload.session_ttl_seconds",
                    self.upload.session_ttl_seconds,
                    60,
                    86_400,
                    defaults.upload.session_ttl_seconds,
                ),
            },
            policy: PolicyConfig {
                evaluation_timeout_ms: in_range_u64(
                    "policy.evaluation_timeout_ms",
                    self.policy.evaluation_timeout_ms,
                    1,
                    60_000,
                    defaults.policy.evaluation_timeout_ms,
                ),
            },
            lifecycle: LifecycleConfig {
                tombstone_retention_days: in_range_u32(
                    "lifecycle.tombstone_retention_days",
                    self.lifecycle.tombstone_retention_days,
                    1,
                    3650,
                    defaults.lifecycle.tombstone_retention_days,
                ),
                gc_retention_grace_hours: in_range_u32(
                    "lifecycle.gc_retention_grace_hours",
                    self.lifecycle.gc_retention_grace_hours,
                    0,
                    8760,
                    defaults.lifecycle.gc_retention_grace_hours,
                ),
                gc_batch_size: in_range_u32(
                    "lifecycle.gc_batch_size",
                    self.lifecycle.gc_batch_size,
                    1,
                    5000,
                    defaults.lifecycle.gc_batch_size,
                ),
            },
            worker: WorkerConfig {
                poll_seconds: in_range_u64(
                    "worker.poll_seconds",
                    self.worker.poll_seconds,
                    1,
                    i64::MAX as u64,
                    defaults.worker.poll_seconds,
                ),
                batch_size: in_range_u32(
                    "worker.batch_size",
                    self.worker.batch_size,
                    1,
                    u32::MAX,
                    defaults.worker.batch_size,
                ),
                search_max_attempts: in_range_u32(
                    "worker.search_max_attempts",
                    self.worker.search_max_attempts,
                    1,
                    u32::MAX,
                    defaults.worker.search_max_attempts,
                ),
            },
            http: HttpConfig {
                bind_addr: self.http.bind_addr.unwrap_or(defaults.http.bind_addr),
            },
        }
    }
}

fn in_range_u64(key: &str, raw: Option<i64>, min: u64, max: u64, default: u64) -> u64 {
    match raw {
        None => default,
        Some(value) if value >= 0 && (value as u64) >= min && (value as u64) <= max => value as u64,
        Some(value) => {
            debug!(key, value, default, "config value out of range, using default");
            default
        }
    }
}

fn in_range_u32(key: &str, raw: Option<i64>, min: u32, max: u32, default: u32) -> u32 {
    match raw {
        None => default,
        Some(value) if value >= 0 && (value as u64) >= min as u64 && (value as u64) <= max as u64 => {
            value as u32
        }
        Some(value) => {
            debug!(key, value, default, "config value out of range, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_raw_config_yields_defaults() {
        let config = RawConfig::default().normalize();
        assert_eq!(config.upload.presign_ttl_seconds, 900);
        assert_eq!(config.policy.evaluation_timeout_ms, 250);
        assert_eq!(config.lifecycle.tombstone_retention_days, 30);
        assert_eq!(config.lifecycle.gc_retention_grace_hours, 24);
        assert_eq!(config.lifecycle.gc_batch_size, 200);
        assert_eq!(config.worker.poll_seconds, 30);
        assert_eq!(config.worker.batch_size, 100);
        assert_eq!(config.worker.search_max_attempts, 5);
    }

    #[test]
    fn out_of_range_values_fall_back_silently() {
        let mut raw = RawConfig::default();
        raw.upload.presign_ttl_seconds = Some(10);
        raw.lifecycle.gc_batch_size = Some(50_000);
        raw.lifecycle.tombstone_retention_days = Some(0);
        raw.worker.poll_seconds = Some(-3);
        let config = raw.normalize();
        assert_eq!(config.upload.presign_ttl_seconds, 900);
        assert_eq!(config.lifecycle.gc_batch_size, 200);
        assert_eq!(config.lifecycle.tombstone_retention_days, 30);
        assert_eq!(config.worker.poll_seconds, 30);
    }

    #[test]
    fn boundary_values_are_accepted() {
        let mut raw = RawConfig::default();
        raw.lifecycle.gc_retention_grace_hours = Some(0);
        raw.lifecycle.gc_batch_size = Some(1);
        let config = raw.normalize();
        assert_eq!(config.lifecycle.gc_retention_grace_hours, 0);
        assert_eq!(config.lifecycle.gc_batch_size, 1);

        let mut raw = RawConfig::default();
        raw.lifecycle.gc_retention_grace_hours = Some(8760);
        raw.lifecycle.gc_batch_size = Some(5000);
        let config = raw.normalize();
        assert_eq!(config.lifecycle.gc_retention_grace_hours, 8760);
        assert_eq!(config.lifecycle.gc_batch_size, 5000);
    }
}
