use std::time::Duration;
use std::{borrow::Cow, collections::VecDeque};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

/// Drives the periodic heartbeat of one connection.
///
/// Inactive until [`start`](Self::start) is called with the interval the
/// server announced; [`tick`](Self::tick) never completes while inactive,
/// so it can sit in a `select!` arm unconditionally.
pub struct Heartbeat {
    interval: Option<Interval>,

    /// A list of latencies observed during the heartbeat process.
    //
    // VecDeque is faster than Vec with this case here.
    latencies: VecDeque<Duration>,

    /// Indicates when the last heartbeat payload was sent.
    sent: Option<Instant>,
}

// Maximum length of array of latencies because we don't like to keep it
// around 10,000+ entries (it will slow down the entire program).
const LATENCIES_MAX_LEN: usize = 1000;

impl Heartbeat {
    #[must_use]
    pub fn new() -> Self {
        Self {
            interval: None,
            latencies: VecDeque::new(),
            sent: None,
        }
    }

    /// Starts (or restarts) the schedule. The first tick fires one full
    /// period from now, not immediately.
    pub fn start(&mut self, period: Duration) {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.interval = Some(interval);
        self.sent = None;
    }

    /// Stops the schedule. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.interval = None;
        self.sent = None;
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    /// Waits until the next heartbeat is due. Pends forever while stopped.
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    /// Whether a sent heartbeat is still waiting for its acknowledgement.
    ///
    /// True at tick time means the connection is zombied and should be
    /// torn down.
    #[must_use]
    pub const fn has_pending_ack(&self) -> bool {
        self.sent.is_some()
    }

    /// Records that a heartbeat payload went out just now.
    pub fn record_sent(&mut self) {
        self.sent = Some(Instant::now());
    }

    /// Acknowledges the outstanding heartbeat and returns its latency.
    ///
    /// Returns `None` for acknowledgements the server sends unprompted.
    pub fn acknowledged(&mut self) -> Option<Duration> {
        let latency = self.sent.take()?.elapsed();

        // Drain the first entry once the buffer reaches LATENCIES_MAX_LEN.
        if self.latencies.len() == LATENCIES_MAX_LEN {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);

        Some(latency)
    }

    /// Gets a referenced simplified context of [`Heartbeat`]
    /// with [`HeartbeatInfo`] type.
    #[must_use]
    pub fn info(&self) -> HeartbeatInfo<'_> {
        HeartbeatInfo {
            latencies: Cow::Borrowed(&self.latencies),
        }
    }
}

impl std::fmt::Debug for Heartbeat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heartbeat")
            .field("period", &self.interval.as_ref().map(Interval::period))
            .field("latencies", &self.latencies.len())
            .field("sent", &self.sent.is_some())
            .finish_non_exhaustive()
    }
}

/// Heartbeat information of the connection as of the time when
/// [`Heartbeat::info`] is being called.
pub struct HeartbeatInfo<'a> {
    /// A list of latencies observed during the heartbeat process.
    latencies: Cow<'a, VecDeque<Duration>>,
}

impl std::fmt::Debug for HeartbeatInfo<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatInfo")
            .field("samples", &self.latencies.len())
            .finish_non_exhaustive()
    }
}

impl HeartbeatInfo<'_> {
    /// It clones the entire list of latencies and returns a static reference of [`HeartbeatInfo`].
    #[must_use]
    pub fn to_owned(&self) -> HeartbeatInfo<'static> {
        HeartbeatInfo {
            latencies: Cow::Owned(self.latencies.as_ref().clone()),
        }
    }

    /// Gets the average latency from a list of latencies observed
    /// by the heartbeat schedule.
    ///
    /// It will return `None` if no heartbeat was acknowledged yet.
    #[must_use]
    pub fn average(&self) -> Option<Duration> {
        let max_len = self.latencies.len().min(LATENCIES_MAX_LEN);
        debug_assert!(max_len <= LATENCIES_MAX_LEN);

        // Clippy:
        // The value of LATENCIES_MAX_LEN is less than a million so we're
        // not concerned about the truncation or something.
        #[allow(clippy::cast_possible_truncation)]
        self.latencies
            .iter()
            .fold(Duration::ZERO, |acc, entry| acc + *entry)
            .checked_div(max_len as u32)
    }

    /// Gets an iterator of latencies observed by the heartbeat schedule.
    pub fn latencies(&self) -> impl Iterator<Item = &Duration> {
        self.latencies.iter()
    }

    /// Gets the recent latency as of calling this function.
    ///
    /// It will return `None` if no heartbeat was acknowledged yet.
    #[must_use]
    pub fn recent(&self) -> Option<Duration> {
        self.latencies.back().copied()
    }
}
