//! Named timers for spider rules
//!
//! A rule sets a clock under an id and then sleeps on it, usually to repeat
//! part of a crawl on a schedule. Countdown clocks sleep a fixed duration,
//! alarm clocks sleep until a time of day some days ahead. Closing the timer
//! wakes every sleeper.

use chrono::{Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Time of day an alarm rings, in local time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bell {
    pub hour: u32,
    pub min: u32,
    pub sec: u32,
}

impl Bell {
    pub fn new(hour: u32, min: u32, sec: u32) -> Self {
        Self { hour, min, sec }
    }

    fn time(&self) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(self.hour, self.min, self.sec)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clock {
    /// Sleeps for a fixed duration
    Countdown(Duration),

    /// Sleeps until `bell` on the `days`-th day, counting today when the
    /// bell has not rung yet
    Alarm { bell: Bell, days: u32 },
}

impl Clock {
    fn is_valid(&self) -> bool {
        match self {
            Clock::Countdown(tol) => !tol.is_zero(),
            Clock::Alarm { bell, days } => *days > 0 && bell.time().is_some(),
        }
    }

    /// How long a sleep starting at `now` lasts
    fn delay_from(&self, now: NaiveDateTime) -> Duration {
        match *self {
            Clock::Countdown(tol) => tol,
            Clock::Alarm { bell, days } => {
                let Some(time) = bell.time() else {
                    return Duration::ZERO;
                };
                let today = now.date().and_time(time);
                let ahead = if today < now { days } else { days.saturating_sub(1) };
                let ring = today + ChronoDuration::days(i64::from(ahead));
                (ring - now).to_std().unwrap_or(Duration::ZERO)
            }
        }
    }
}

/// Clocks of one spider run
#[derive(Debug)]
pub struct Timer {
    clocks: Mutex<HashMap<String, Clock>>,
    closed: watch::Sender<bool>,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    pub fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            clocks: Mutex::new(HashMap::new()),
            closed,
        }
    }

    /// Sets or replaces the clock `id`
    ///
    /// # Returns
    ///
    /// `false` if the timer is closed or the clock is invalid: a zero
    /// countdown, zero alarm days or a bell outside the day
    pub fn set(&self, id: &str, clock: Clock) -> bool {
        let mut clocks = self.clocks.lock();
        if self.is_closed() {
            warn!("Timer <{}> not set: timer closed", id);
            return false;
        }
        if !clock.is_valid() {
            warn!("Timer <{}> not set: invalid clock {:?}", id, clock);
            return false;
        }
        clocks.insert(id.to_string(), clock);
        info!("Timer <{}> set: {:?}", id, clock);
        true
    }

    /// Sleeps on the clock `id`
    ///
    /// # Returns
    ///
    /// `true` if the clock rang and is still set. Unknown clocks and closed
    /// timers return `false` at once; closing the timer mid-sleep wakes the
    /// sleeper with `false`.
    pub async fn sleep(&self, id: &str) -> bool {
        let mut closed = self.closed.subscribe();
        let clock = {
            let clocks = self.clocks.lock();
            if *closed.borrow_and_update() {
                return false;
            }
            match clocks.get(id) {
                Some(clock) => *clock,
                None => return false,
            }
        };

        let delay = clock.delay_from(Local::now().naive_local());
        info!("Timer <{}> sleeping for {:?}", id, delay);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = closed.wait_for(|closed| *closed) => {}
        }

        let clocks = self.clocks.lock();
        !self.is_closed() && clocks.contains_key(id)
    }

    /// Removes every clock and wakes every sleeper; later sets fail
    pub fn close(&self) {
        let mut clocks = self.clocks.lock();
        self.closed.send_replace(true);
        clocks.clear();
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}
