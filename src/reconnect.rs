use std::time::Duration;

/// Controls the exponential backoff applied between connection attempts.
#[derive(Clone, Debug)]
pub struct ReconnectOptions {
    /// Delay before the first retry.
    pub first_backoff: Duration,
    /// Upper bound no computed delay may exceed.
    pub max_backoff: Duration,
    /// How many attempts are made before giving up. `None` retries forever.
    pub max_retries: Option<u32>,
    /// Portion of each delay that gets randomized away, `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            first_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(120),
            max_retries: None,
            jitter: 0.5,
        }
    }
}

impl ReconnectOptions {
    /// Deterministic delay for the given retry, doubling from
    /// `first_backoff` and capped at `max_backoff`. Retries count from 1.
    #[must_use]
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32);
        let delay = self
            .first_backoff
            .saturating_mul(2u32.saturating_pow(exponent));
        delay.min(self.max_backoff)
    }

    /// Jittered delay for the given retry. Stays within
    /// `base_delay * (1 - jitter) ..= base_delay`.
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        let keep = 1.0 - self.jitter.clamp(0.0, 1.0) * fastrand::f64();
        base.mul_f64(keep)
    }
}

/// Counts connection attempts for one logical connection.
///
/// The counter resets after every completed handshake, so "first retry"
/// always means the first retry after the most recent healthy connection.
#[derive(Debug, Default)]
pub struct ReconnectContext {
    attempts: u32,
}

impl ReconnectContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the next attempt and returns its number, counting from 1.
    pub fn next_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Forgets past failures after a successful handshake.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    #[must_use]
    pub fn exhausted(&self, options: &ReconnectOptions) -> bool {
        options
            .max_retries
            .is_some_and(|limit| self.attempts > limit)
    }
}

/// Whether a reconnect attempt may try to resume the previous session.
///
/// Only the first retry after a failure may resume, and only when both the
/// stored session and the disconnect cause permit it. Later retries always
/// start over with a fresh identify.
#[must_use]
pub fn resume_allowed(attempt: u32, session_resumable: bool, cause_resumable: bool) -> bool {
    attempt == 1 && session_resumable && cause_resumable
}

/// How a disconnect should be carried out.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DisconnectBehavior {
    /// Stop after a proper close handshake, invalidating the session.
    Stop,
    /// Stop without a close handshake, keeping the session resumable.
    StopAbruptly,
    /// Reconnect after a proper close handshake.
    Retry,
    /// Reconnect without a close handshake, keeping the session resumable.
    RetryAbruptly,
}

impl DisconnectBehavior {
    #[must_use]
    pub const fn retries(self) -> bool {
        matches!(self, Self::Retry | Self::RetryAbruptly)
    }

    /// Abrupt disconnects skip the close handshake so the server keeps the
    /// session alive for a resume.
    #[must_use]
    pub const fn is_abrupt(self) -> bool {
        matches!(self, Self::StopAbruptly | Self::RetryAbruptly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_delay_doubles_until_the_cap() {
        let options = ReconnectOptions {
            first_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
            ..Default::default()
        };

        assert_eq!(options.base_delay(1), Duration::from_secs(2));
        assert_eq!(options.base_delay(2), Duration::from_secs(4));
        assert_eq!(options.base_delay(3), Duration::from_secs(8));
        assert_eq!(options.base_delay(5), Duration::from_secs(30));
        assert_eq!(options.base_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn jittered_delay_stays_in_bounds() {
        let options = ReconnectOptions::default();

        for retry in 1..=10 {
            let base = options.base_delay(retry);
            for _ in 0..100 {
                let delay = options.delay(retry);
                assert!(delay <= base);
                assert!(delay >= base.mul_f64(1.0 - options.jitter));
            }
        }
    }

    #[test]
    fn resume_only_on_the_first_attempt() {
        assert!(resume_allowed(1, true, true));
        assert!(!resume_allowed(2, true, true));
        assert!(!resume_allowed(1, false, true));
        assert!(!resume_allowed(1, true, false));
    }

    #[test]
    fn context_resets_after_success() {
        let options = ReconnectOptions {
            max_retries: Some(2),
            ..Default::default()
        };

        let mut context = ReconnectContext::new();
        assert_eq!(context.next_attempt(), 1);
        assert_eq!(context.next_attempt(), 2);
        assert!(!context.exhausted(&options));
        assert_eq!(context.next_attempt(), 3);
        assert!(context.exhausted(&options));

        context.reset();
        assert_eq!(context.next_attempt(), 1);
        assert!(!context.exhausted(&options));
    }
}
