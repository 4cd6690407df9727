//! Schedule kinds and next-fire computation (§4.12).

use std::str::FromStr;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::SchedulerError;

/// The tagged union of trigger kinds a `ScheduledTask` may carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Standard cron expression, evaluated in the system time zone.
    Cron(String),
    /// Fixed period between runs, in whole seconds.
    Interval { seconds: i64 },
    /// A single instant.
    Once(DateTime<Utc>),
}

/// Inputs `next_fire` needs beyond the schedule itself: everything it
/// depends on is persisted task state, never wall-clock state hidden
/// inside the `Schedule` value (§4.11: callers pass instants as abstract
/// values, the schedule stays pure data).
#[derive(Debug, Clone, Copy)]
pub struct ScheduleContext {
    pub now: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub has_succeeded: bool,
}

/// The `cron` crate (zslayton) requires a 6- or 7-field, seconds-first
/// expression. The spec's canonical expressions are the 5-field Unix form
/// (minute hour day-of-month month day-of-week); prepend a `"0"` seconds
/// field before parsing so both forms are accepted.
fn normalize_cron_expr(expr: &str) -> String {
    match expr.split_whitespace().count() {
        5 => format!("0 {expr}"),
        _ => expr.to_string(),
    }
}

impl Schedule {
    /// Compute the next instant this schedule should fire, or `None` if it
    /// will never fire again (an exhausted `Once`).
    pub fn next_fire(&self, ctx: ScheduleContext) -> Result<Option<DateTime<Utc>>, SchedulerError> {
        match self {
            Schedule::Cron(expr) => {
                let normalized = normalize_cron_expr(expr);
                let parsed = cron::Schedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidSchedule {
                    message: format!("invalid cron expression '{expr}': {e}"),
                })?;
                Ok(parsed.after(&ctx.now).next())
            }
            Schedule::Interval { seconds } => {
                let period = ChronoDuration::seconds(*seconds);
                let earliest = ctx.last_run_at.map(|t| t + period).unwrap_or(ctx.now);
                Ok(Some(earliest.max(ctx.now)))
            }
            Schedule::Once(at) => {
                if ctx.has_succeeded {
                    Ok(None)
                } else if *at <= ctx.now {
                    Ok(Some(ctx.now))
                } else {
                    Ok(Some(*at))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn interval_first_fire_is_now_when_never_run() {
        let schedule = Schedule::Interval { seconds: 60 };
        let ctx = ScheduleContext { now: at(1000), last_run_at: None, has_succeeded: false };
        assert_eq!(schedule.next_fire(ctx).unwrap(), Some(at(1000)));
    }

    #[test]
    fn interval_next_fire_is_last_run_plus_period() {
        let schedule = Schedule::Interval { seconds: 60 };
        let ctx = ScheduleContext { now: at(1000), last_run_at: Some(at(980)), has_succeeded: true };
        assert_eq!(schedule.next_fire(ctx).unwrap(), Some(at(1040)));
    }

    #[test]
    fn interval_never_fires_in_the_past() {
        let schedule = Schedule::Interval { seconds: 60 };
        let ctx = ScheduleContext { now: at(1000), last_run_at: Some(at(100)), has_succeeded: true };
        assert_eq!(schedule.next_fire(ctx).unwrap(), Some(at(1000)));
    }

    #[test]
    fn once_fires_immediately_if_in_past_and_never_succeeded() {
        let schedule = Schedule::Once(at(500));
        let ctx = ScheduleContext { now: at(1000), last_run_at: None, has_succeeded: false };
        assert_eq!(schedule.next_fire(ctx).unwrap(), Some(at(1000)));
    }

    #[test]
    fn once_does_not_refire_after_success() {
        let schedule = Schedule::Once(at(500));
        let ctx = ScheduleContext { now: at(1000), last_run_at: Some(at(500)), has_succeeded: true };
        assert_eq!(schedule.next_fire(ctx).unwrap(), None);
    }

    #[test]
    fn once_waits_for_future_instant() {
        let schedule = Schedule::Once(at(2000));
        let ctx = ScheduleContext { now: at(1000), last_run_at: None, has_succeeded: false };
        assert_eq!(schedule.next_fire(ctx).unwrap(), Some(at(2000)));
    }

    #[test]
    fn invalid_cron_expression_is_rejected() {
        let schedule = Schedule::Cron("not a cron expr".to_string());
        let ctx = ScheduleContext { now: at(0), last_run_at: None, has_succeeded: false };
        assert!(schedule.next_fire(ctx).is_err());
    }

    #[test]
    fn cron_every_minute_fires_within_the_next_sixty_seconds() {
        let schedule = Schedule::Cron("0 * * * * *".to_string());
        let now = Utc::now();
        let ctx = ScheduleContext { now, last_run_at: None, has_succeeded: false };
        let next = schedule.next_fire(ctx).unwrap().unwrap();
        assert!(next > now && next <= now + ChronoDuration::seconds(61));
    }

    #[test]
    fn five_field_cron_expression_is_accepted_p7() {
        // §8 P7: next_fire(cron("0 9 * * *"), at=2025-01-10T08:00Z) = 2025-01-10T09:00Z
        let schedule = Schedule::Cron("0 9 * * *".to_string());
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 8, 0, 0).unwrap();
        let ctx = ScheduleContext { now, last_run_at: None, has_succeeded: false };
        let next = schedule.next_fire(ctx).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap());
    }

    #[test]
    fn five_field_every_minute_expression_is_accepted() {
        // §8 Scenario 3 uses the 5-field "* * * * *" form.
        let schedule = Schedule::Cron("* * * * *".to_string());
        let now = Utc::now();
        let ctx = ScheduleContext { now, last_run_at: None, has_succeeded: false };
        let next = schedule.next_fire(ctx).unwrap().unwrap();
        assert!(next > now && next <= now + ChronoDuration::seconds(61));
    }
}
