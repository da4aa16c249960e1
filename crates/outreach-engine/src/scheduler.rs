//! Campaign Scheduler
//!
//! Computes the next eligible run instant from a campaign's send schedule
//! (timezone, business hours, preferred weekdays, holiday avoidance) and
//! arms one single-shot timer per campaign. Wall time is always read
//! through the `Clock` trait so tests can drive a virtual clock.

use crate::{CampaignId, OutreachError, Result};
use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Real system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for deterministic tests.
#[derive(Debug)]
pub struct ManualClock {
    now: parking_lot::Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: parking_lot::Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// When a campaign is allowed to send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendSchedule {
    /// IANA timezone name, e.g. `Asia/Kolkata`.
    pub timezone: String,
    pub business_hours: BusinessHours,
    /// Weekdays sends may start on.
    pub preferred_days: Vec<Weekday>,
    pub avoid_holidays: bool,
    pub holidays: Vec<NaiveDate>,
}

impl Default for SendSchedule {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            business_hours: BusinessHours::default(),
            preferred_days: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
            avoid_holidays: false,
            holidays: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            end: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or_default(),
        }
    }
}

/// One single-shot timer per campaign. Timers for different campaigns are
/// independent and may fire concurrently; re-arming is the manager's job
/// after each fire.
pub struct CampaignScheduler {
    timers: DashMap<CampaignId, JoinHandle<()>>,
    clock: Arc<dyn Clock>,
}

impl CampaignScheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            timers: DashMap::new(),
            clock,
        }
    }

    /// Next instant the schedule permits, strictly after `after`'s day:
    /// starting tomorrow in the campaign timezone, advance day-by-day to
    /// the first preferred non-holiday weekday, at business-hours start.
    pub fn next_run_after(schedule: &SendSchedule, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
        if schedule.preferred_days.is_empty() {
            return Err(OutreachError::ConfigError(
                "send schedule has no preferred days".to_string(),
            ));
        }
        let tz: Tz = schedule.timezone.parse().map_err(|_| {
            OutreachError::ConfigError(format!("unknown timezone: {}", schedule.timezone))
        })?;

        let mut date = after.with_timezone(&tz).date_naive() + Days::new(1);
        for _ in 0..366 {
            let preferred = schedule.preferred_days.contains(&date.weekday());
            let holiday = schedule.avoid_holidays && schedule.holidays.contains(&date);
            if preferred && !holiday {
                let naive = date.and_time(schedule.business_hours.start);
                // A DST gap can make the start time nonexistent locally;
                // fall through to the next preferred day.
                if let Some(local) = tz.from_local_datetime(&naive).earliest() {
                    return Ok(local.with_timezone(&Utc));
                }
            }
            date = date + Days::new(1);
        }
        Err(OutreachError::ConfigError(
            "no eligible send day within a year".to_string(),
        ))
    }

    /// Arm a single-shot timer for a campaign, replacing any existing one.
    pub fn arm<F>(&self, id: CampaignId, fire_at: DateTime<Utc>, on_fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = (fire_at - self.clock.now()).to_std().unwrap_or_default();
        debug!(campaign = %id, %fire_at, delay_secs = delay.as_secs(), "arming campaign timer");
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire.await;
        });
        if let Some(previous) = self.timers.insert(id, handle) {
            previous.abort();
        }
    }

    /// Clear the pending timer, if any. Returns whether one was pending.
    pub fn unschedule(&self, id: &CampaignId) -> bool {
        match self.timers.remove(id) {
            Some((_, handle)) => {
                let was_pending = !handle.is_finished();
                handle.abort();
                debug!(campaign = %id, was_pending, "unscheduled campaign timer");
                was_pending
            }
            None => false,
        }
    }

    /// Whether a timer is currently pending for the campaign.
    pub fn armed(&self, id: &CampaignId) -> bool {
        self.timers
            .get(id)
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Abort every pending timer. Used on shutdown.
    pub fn clear(&self) {
        for entry in self.timers.iter() {
            entry.value().abort();
        }
        self.timers.clear();
    }
}

impl Drop for CampaignScheduler {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn mwf_kolkata() -> SendSchedule {
        SendSchedule {
            timezone: "Asia/Kolkata".to_string(),
            preferred_days: vec![Weekday::Mon, Weekday::Wed, Weekday::Fri],
            ..Default::default()
        }
    }

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_thursday_rolls_to_friday_morning_ist() {
        // 2024-07-11 is a Thursday; noon IST is 06:30 UTC.
        let after = utc("2024-07-11T06:30:00Z");
        let next = CampaignScheduler::next_run_after(&mwf_kolkata(), after).unwrap();
        // Friday 2024-07-12 09:00 IST == 03:30 UTC.
        assert_eq!(next, utc("2024-07-12T03:30:00Z"));
    }

    #[test]
    fn test_never_fires_same_day() {
        // Monday morning before business hours still rolls to Wednesday:
        // the next run always starts tomorrow at the earliest.
        let after = utc("2024-07-08T01:00:00Z"); // Monday 06:30 IST
        let next = CampaignScheduler::next_run_after(&mwf_kolkata(), after).unwrap();
        assert_eq!(next, utc("2024-07-10T03:30:00Z")); // Wednesday
    }

    #[test]
    fn test_weekend_days_are_advanced_past() {
        // 2026-08-21 is a Friday; Saturday and Sunday roll to Monday.
        let after = utc("2026-08-21T06:30:00Z");
        let next = CampaignScheduler::next_run_after(&mwf_kolkata(), after).unwrap();
        assert_eq!(next, utc("2026-08-24T03:30:00Z")); // Monday 09:00 IST
    }

    #[test]
    fn test_holiday_is_skipped() {
        let mut schedule = mwf_kolkata();
        schedule.avoid_holidays = true;
        schedule
            .holidays
            .push(NaiveDate::from_ymd_opt(2024, 7, 12).unwrap());
        let after = utc("2024-07-11T06:30:00Z"); // Thursday
        let next = CampaignScheduler::next_run_after(&schedule, after).unwrap();
        // Friday is a holiday; next preferred day is Monday 2024-07-15.
        assert_eq!(next, utc("2024-07-15T03:30:00Z"));
    }

    #[test]
    fn test_unknown_timezone_is_config_error() {
        let schedule = SendSchedule {
            timezone: "Mars/Olympus_Mons".to_string(),
            ..Default::default()
        };
        let err = CampaignScheduler::next_run_after(&schedule, Utc::now()).unwrap_err();
        assert!(matches!(err, OutreachError::ConfigError(_)));
    }

    #[test]
    fn test_empty_preferred_days_is_config_error() {
        let schedule = SendSchedule {
            preferred_days: vec![],
            ..Default::default()
        };
        let err = CampaignScheduler::next_run_after(&schedule, Utc::now()).unwrap_err();
        assert!(matches!(err, OutreachError::ConfigError(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_armed_timer_fires_once() {
        let now = Utc::now();
        let clock = Arc::new(ManualClock::new(now));
        let scheduler = CampaignScheduler::new(clock);
        let fired = Arc::new(AtomicBool::new(false));

        let flag = fired.clone();
        scheduler.arm("camp-1".to_string(), now + chrono::Duration::hours(1), async move {
            flag.store(true, Ordering::SeqCst);
        });
        assert!(scheduler.armed(&"camp-1".to_string()));

        tokio::time::sleep(std::time::Duration::from_secs(3601)).await;
        assert!(fired.load(Ordering::SeqCst));
        assert!(!scheduler.armed(&"camp-1".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unscheduled_timer_never_fires() {
        let now = Utc::now();
        let clock = Arc::new(ManualClock::new(now));
        let scheduler = CampaignScheduler::new(clock);
        let fired = Arc::new(AtomicBool::new(false));

        let flag = fired.clone();
        scheduler.arm("camp-1".to_string(), now + chrono::Duration::hours(1), async move {
            flag.store(true, Ordering::SeqCst);
        });
        assert!(scheduler.unschedule(&"camp-1".to_string()));

        tokio::time::sleep(std::time::Duration::from_secs(7200)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearming_replaces_previous_timer() {
        let now = Utc::now();
        let clock = Arc::new(ManualClock::new(now));
        let scheduler = CampaignScheduler::new(clock);
        let count = Arc::new(std::sync::atomic::AtomicU32::new(0));

        for _ in 0..2 {
            let counter = count.clone();
            scheduler.arm("camp-1".to_string(), now + chrono::Duration::hours(1), async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(std::time::Duration::from_secs(7200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
