//! Timer policies: fixed interval with first-run jitter, and cron-like
//! wall-clock schedules.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveTime, TimeDelta, Utc, Weekday};
use rand::Rng;
use tokio::time::Instant;

/// When a scheduled task fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerPolicy {
    /// Every `period`. The first firing happens after a random delay in
    /// `[0, jitter]` from registration.
    Interval { period: Duration, jitter: Duration },
    /// At a fixed UTC time of day, optionally on one weekday only.
    Cron(CronSchedule),
}

/// `hour:minute:second` in UTC, optionally restricted to `day_of_week`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronSchedule {
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub day_of_week: Option<Weekday>,
}

impl CronSchedule {
    pub fn daily(hour: u32, minute: u32, second: u32) -> Self {
        Self {
            hour,
            minute,
            second,
            day_of_week: None,
        }
    }

    pub fn weekly(day: Weekday, hour: u32, minute: u32, second: u32) -> Self {
        Self {
            day_of_week: Some(day),
            ..Self::daily(hour, minute, second)
        }
    }

    fn time_of_day(&self) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(self.hour, self.minute, self.second)
    }

    /// First firing strictly after `now`. `None` if the time of day is invalid.
    pub fn next_fire(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let time = self.time_of_day()?;
        let mut candidate = now.date_naive().and_time(time).and_utc();
        if candidate <= now {
            candidate += TimeDelta::days(1);
        }
        if let Some(day) = self.day_of_week {
            while candidate.weekday() != day {
                candidate += TimeDelta::days(1);
            }
        }
        Some(candidate)
    }

    /// Wall-clock delay from `now` until the next firing.
    fn delay_after(&self, now: DateTime<Utc>) -> Duration {
        self.next_fire(now)
            .and_then(|next| (next - now).to_std().ok())
            .unwrap_or(Duration::from_secs(24 * 60 * 60))
    }
}

impl TimerPolicy {
    pub fn every(period: Duration) -> Self {
        TimerPolicy::Interval {
            period,
            jitter: Duration::ZERO,
        }
    }

    /// Spread the first firing over `[0, jitter]`. No effect on cron timers.
    pub fn with_jitter(self, jitter: Duration) -> Self {
        match self {
            TimerPolicy::Interval { period, .. } => TimerPolicy::Interval { period, jitter },
            cron => cron,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        match self {
            TimerPolicy::Interval { period, .. } if period.is_zero() => {
                Err("interval period must be greater than zero".to_string())
            }
            TimerPolicy::Cron(schedule) if schedule.time_of_day().is_none() => Err(format!(
                "invalid time of day {:02}:{:02}:{:02}",
                schedule.hour, schedule.minute, schedule.second
            )),
            _ => Ok(()),
        }
    }

    /// Delay between registration and the first firing.
    pub(crate) fn first_delay(&self) -> Duration {
        match self {
            TimerPolicy::Interval { jitter, .. } if jitter.is_zero() => Duration::ZERO,
            TimerPolicy::Interval { jitter, .. } => {
                let max_ms = u64::try_from(jitter.as_millis()).unwrap_or(u64::MAX);
                Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
            }
            TimerPolicy::Cron(schedule) => schedule.delay_after(Utc::now()),
        }
    }

    /// Deadline of the firing after one that was due at `previous` and
    /// finished at `now`. Missed firings are skipped.
    pub(crate) fn next_deadline(&self, previous: Instant, now: Instant) -> Instant {
        match self {
            TimerPolicy::Interval { period, .. } => {
                let mut next = previous + *period;
                while next <= now {
                    next += *period;
                }
                next
            }
            // One second of slack so an early wake-up never fires twice.
            TimerPolicy::Cron(schedule) => {
                let slack = Duration::from_secs(1);
                now + slack + schedule.delay_after(Utc::now() + slack)
            }
        }
    }
}

impl fmt::Display for TimerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerPolicy::Interval { period, jitter } if jitter.is_zero() => {
                write!(f, "every {period:?}")
            }
            TimerPolicy::Interval { period, jitter } => {
                write!(f, "every {period:?} (first run jitter {jitter:?})")
            }
            TimerPolicy::Cron(CronSchedule {
                hour,
                minute,
                second,
                day_of_week,
            }) => {
                match day_of_week {
                    Some(day) => write!(f, "{day} ")?,
                    None => write!(f, "daily ")?,
                }
                write!(f, "at {hour:02}:{minute:02}:{second:02} UTC")
            }
        }
    }
}
