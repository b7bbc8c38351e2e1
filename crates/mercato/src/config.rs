/*
 *  Copyright 2025-2026 Mercato Contributors
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Core configuration.

use std::time::Duration;

/// Tunable parameters of the orchestration core.
///
/// `Default` gives production-reasonable values; tests shrink the
/// durations to exercise expiry and backoff without waiting.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// How long a Job may sit unfinished before the expiry sweep
    /// terminates it.
    pub job_ttl: Duration,

    /// Per-call deadline for relay transport requests. Relay calls ride
    /// a live browser session and are slow.
    pub relay_timeout: Duration,

    /// Per-call deadline for direct transport requests.
    pub direct_timeout: Duration,

    /// How long a Job may stay `running` without finishing before the
    /// stalled-job sweep re-queues it. Covers processor crashes.
    pub stalled_grace: Duration,

    /// First retry delay; doubles per attempt.
    pub backoff_base: Duration,

    /// Upper bound on any single retry delay.
    pub backoff_cap: Duration,

    /// How often a polling processor checks for claimable work.
    pub poll_interval: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            job_ttl: Duration::from_secs(60 * 60),
            relay_timeout: Duration::from_secs(60),
            direct_timeout: Duration::from_secs(30),
            stalled_grace: Duration::from_secs(600),
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(300),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl CoreConfig {
    /// Exponential backoff with jitter for the given retry attempt
    /// (0-based). Jitter spreads a burst of same-moment failures so
    /// their retries do not re-collide.
    pub fn retry_delay(&self, attempt: i32) -> Duration {
        use rand::Rng;

        let exp = attempt.clamp(0, 20) as u32;
        let base = self.backoff_base.saturating_mul(2u32.saturating_pow(exp));
        let capped = base.min(self.backoff_cap);
        let jitter = rand::thread_rng().gen_range(0.8..1.2);
        capped.mul_f64(jitter)
    }
}
