//! Reload configuration
//!
//! Defaults: ten attempts 100 ms apart, and a moved topology generation is
//! accepted after a 100 ms settle.
//!
//! Environment overrides (all optional):
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `FIREWIRE_RELOAD_ATTEMPTS` | attempt budget (≥ 1) |
//! | `FIREWIRE_RELOAD_DELAY_MS` | delay between attempts |
//! | `FIREWIRE_GENERATION_POLICY` | `accept` or `retry` |

use std::time::Duration;
use tracing::warn;

/// Attempt budget variable
pub const ENV_ATTEMPTS: &str = "FIREWIRE_RELOAD_ATTEMPTS";
/// Retry delay variable, in milliseconds
pub const ENV_DELAY_MS: &str = "FIREWIRE_RELOAD_DELAY_MS";
/// Generation change policy variable
pub const ENV_GENERATION_POLICY: &str = "FIREWIRE_GENERATION_POLICY";

/// What to do when the topology generation moves while the maps are read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationChangePolicy {
    /// Wait `settle`, then keep the data that was read
    ///
    /// The result may be one generation stale.
    Accept {
        /// Time given to the bus to settle
        settle: Duration,
    },
    /// Fail the attempt so the reload loop starts over
    Retry,
}

impl Default for GenerationChangePolicy {
    fn default() -> Self {
        Self::Accept {
            settle: Duration::from_millis(100),
        }
    }
}

/// Configuration of [`BusController::reload`](crate::BusController::reload)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadConfig {
    /// Attempts before giving up (at least one is always made)
    pub max_attempts: u32,
    /// Delay between attempts
    pub retry_delay: Duration,
    /// Generation change handling
    pub generation_policy: GenerationChangePolicy,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            retry_delay: Duration::from_millis(100),
            generation_policy: GenerationChangePolicy::default(),
        }
    }
}

impl ReloadConfig {
    /// Set the attempt budget
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the delay between attempts
    #[must_use]
    pub const fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Set the generation change policy
    #[must_use]
    pub const fn with_generation_policy(mut self, policy: GenerationChangePolicy) -> Self {
        self.generation_policy = policy;
        self
    }

    /// Defaults overlaid with the `FIREWIRE_*` environment variables
    ///
    /// Malformed values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = lookup(ENV_ATTEMPTS) {
            match value.trim().parse::<u32>() {
                Ok(n) if n > 0 => self.max_attempts = n,
                _ => warn!("Ignoring {ENV_ATTEMPTS}={value:?}"),
            }
        }

        if let Some(value) = lookup(ENV_DELAY_MS) {
            match value.trim().parse::<u64>() {
                Ok(ms) => self.retry_delay = Duration::from_millis(ms),
                Err(_) => warn!("Ignoring {ENV_DELAY_MS}={value:?}"),
            }
        }

        if let Some(value) = lookup(ENV_GENERATION_POLICY) {
            match value.trim().to_ascii_lowercase().as_str() {
                "accept" => self.generation_policy = GenerationChangePolicy::default(),
                "retry" => self.generation_policy = GenerationChangePolicy::Retry,
                _ => warn!("Ignoring {ENV_GENERATION_POLICY}={value:?}"),
            }
        }

        self
    }
}
