//! Sync timing configuration.
//!
//! Durations serialize as integer milliseconds so configs can live in JSON
//! files next to the data directory.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;

/// Timing knobs for one sync loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Shortest interval between rounds, used right after activity.
    #[serde(rename = "min_sync_freq_ms", with = "duration_ms")]
    pub min_sync_freq: Duration,
    /// Longest interval between rounds, reached while idle.
    #[serde(rename = "max_sync_freq_ms", with = "duration_ms")]
    pub max_sync_freq: Duration,
    /// Target time for two peers to converge. Together with the round
    /// frequency this sets the expected cycle count, and with it the filter
    /// accuracy.
    #[serde(rename = "sync_duration_ms", with = "duration_ms")]
    pub sync_duration: Duration,
    /// Time for the polling interval to decay from min to max.
    #[serde(rename = "polling_backoff_ms", with = "duration_ms")]
    pub polling_backoff: Duration,
    /// Consecutive failed rounds after which `sync()` gives up.
    pub max_consecutive_failures: usize,
}

impl SyncConfig {
    /// Interactive clients: fast rounds, short convergence window.
    pub fn client() -> Self {
        Self {
            min_sync_freq: Duration::from_millis(300),
            max_sync_freq: Duration::from_millis(3000),
            sync_duration: Duration::from_millis(600),
            polling_backoff: Duration::from_secs(60),
            max_consecutive_failures: 10,
        }
    }

    /// Server-to-server replication. Same cadence as clients for now.
    pub fn server() -> Self {
        Self::client()
    }

    /// Expected number of rounds within `sync_duration`, given the measured
    /// round frequency. Frequencies below `min_sync_freq` are clamped up.
    pub fn cycles(&self, actual_freq: Duration) -> usize {
        let freq = actual_freq.max(self.min_sync_freq).as_secs_f64();
        if freq <= 0.0 {
            return 1;
        }
        (self.sync_duration.as_secs_f64() / freq).floor() as usize
    }

    /// Cycle count at the fastest allowed frequency.
    pub fn min_cycles(&self) -> usize {
        self.cycles(self.min_sync_freq)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::client()
    }
}

/// Batching behavior of a [`SyncScheduler`](crate::SyncScheduler).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Flush period.
    #[serde(rename = "tick_ms", with = "duration_ms")]
    pub tick: Duration,
    /// Max requests taken from each queue per flush.
    pub batch_cap: usize,
    /// Retry policy around the network call.
    pub retry: RetryConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(200),
            batch_cap: 50,
            retry: RetryConfig::network(),
        }
    }
}

/// Serde adapter: `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
