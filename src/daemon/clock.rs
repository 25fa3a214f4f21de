use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

/// Source of timestamps for phase durations and events.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Uses a std lock so it can be driven
/// from sync test code.
#[derive(Clone)]
pub struct FakeClock {
    time: Arc<RwLock<DateTime<Utc>>>,
}

impl FakeClock {
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time: Arc::new(RwLock::new(time)),
        }
    }

    pub fn advance(&self, duration: chrono::Duration) {
        let mut t = self.time.write().unwrap_or_else(|e| e.into_inner());
        *t += duration;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.time.read().unwrap_or_else(|e| e.into_inner())
    }
}
