use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime},
};

use crate::OtpError;

/// A source of wall-clock time, as a duration since the UNIX epoch.
pub trait Clock: Send + Sync {
    fn now(&self) -> Result<Duration, OtpError>;
}

/// The operating system's wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Result<Duration, OtpError> {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map_err(|_| OtpError::ClockBeforeEpoch)
    }
}

/// Wall-clock time anchored once, then advanced by tokio's monotonic clock.
///
/// Never jumps backwards, and follows a paused runtime (`tokio::time::pause`),
/// which makes scheduler runs reproducible.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    anchor: Duration,
    started: tokio::time::Instant,
}

impl TokioClock {
    /// Anchors on the current system time.
    pub fn from_system() -> Result<Self, OtpError> {
        Ok(Self::anchored_at(SystemClock.now()?))
    }

    /// Anchors on an arbitrary time since the epoch.
    pub fn anchored_at(anchor: Duration) -> Self {
        Self {
            anchor,
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Result<Duration, OtpError> {
        Ok(self.anchor + self.started.elapsed())
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(since_epoch: Duration) -> Self {
        Self {
            millis: AtomicU64::new(since_epoch.as_millis() as u64),
        }
    }

    pub fn set(&self, since_epoch: Duration) {
        self.millis
            .store(since_epoch.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Result<Duration, OtpError> {
        Ok(Duration::from_millis(self.millis.load(Ordering::SeqCst)))
    }
}
