use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};

use crate::db::Db;
use crate::error::Error;
use crate::models::{Actor, SchedulePolicy, UpdatePolicyReq};

// Fallback when no policy row has been configured yet: reset Friday 22:00
// local time, next week bookable a full week ahead.
pub const DEFAULT_RESET_DAY: i32 = 5;
pub const DEFAULT_RESET_HOUR: i32 = 22;
pub const DEFAULT_OPEN_HOURS: i32 = 168;

/// The slice of the policy row every time computation needs. All methods
/// take `now` explicitly; only the HTTP layer reads the wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetRule {
    pub week_reset_day: i32,
    pub week_reset_hour: i32,
    pub availability_open_hours: i32,
    pub next_open_date: Option<NaiveDate>,
}

impl Default for ResetRule {
    fn default() -> Self {
        Self {
            week_reset_day: DEFAULT_RESET_DAY,
            week_reset_hour: DEFAULT_RESET_HOUR,
            availability_open_hours: DEFAULT_OPEN_HOURS,
            next_open_date: None,
        }
    }
}

impl From<&SchedulePolicy> for ResetRule {
    fn from(p: &SchedulePolicy) -> Self {
        Self {
            week_reset_day: p.week_reset_day,
            week_reset_hour: p.week_reset_hour,
            availability_open_hours: p.availability_open_hours,
            next_open_date: p.next_open_date,
        }
    }
}

/// 0 = Sunday, matching the stored `week_reset_day` and `day_of_week`
/// numbering used across the schema.
pub fn day_of_week0(date: NaiveDate) -> i32 {
    date.weekday().num_days_from_sunday() as i32
}

fn at_hour(date: NaiveDate, hour: i32) -> NaiveDateTime {
    // hour is validated to 0..=23 before it ever reaches here
    date.and_hms_opt(hour as u32, 0, 0).expect("hour in 0..24")
}

impl ResetRule {
    /// The canonical week-bucket key for an arbitrary date: walk back to
    /// the most recent reset day, dropping time-of-day.
    pub fn week_start_of(&self, date: NaiveDate) -> NaiveDate {
        let back = (day_of_week0(date) - self.week_reset_day + 7) % 7;
        date - Duration::days(back as i64)
    }

    pub fn current_week_start(&self, now: NaiveDateTime) -> NaiveDate {
        self.week_start_of(now.date())
    }

    /// Next reset moment. An explicit `next_open_date` override is
    /// authoritative; if its weekday disagrees with `week_reset_day` we
    /// warn and honor the date anyway.
    pub fn next_reset_instant(&self, now: NaiveDateTime) -> NaiveDateTime {
        if let Some(date) = self.next_open_date {
            if day_of_week0(date) != self.week_reset_day {
                tracing::warn!(
                    next_open_date = %date,
                    week_reset_day = self.week_reset_day,
                    "next_open_date weekday disagrees with week_reset_day; using the explicit date"
                );
            }
            return at_hour(date, self.week_reset_hour);
        }

        let ahead = (self.week_reset_day - day_of_week0(now.date()) + 7) % 7;
        let candidate = at_hour(now.date() + Duration::days(ahead as i64), self.week_reset_hour);
        if candidate <= now {
            candidate + Duration::days(7)
        } else {
            candidate
        }
    }

    /// When the *next* week's slots become bookable.
    pub fn window_opens_at(&self, now: NaiveDateTime) -> NaiveDateTime {
        self.next_reset_instant(now) - Duration::hours(self.availability_open_hours as i64)
    }

    /// A week bucket is writable when it is the current week, or the next
    /// week once the open window has been reached.
    pub fn is_week_open(&self, week_start: NaiveDate, now: NaiveDateTime) -> bool {
        let current = self.current_week_start(now);
        if week_start == current {
            return true;
        }
        if week_start == current + Duration::days(7) {
            return now >= self.window_opens_at(now);
        }
        false
    }
}

pub async fn get_policy(db: &Db) -> Result<SchedulePolicy, Error> {
    sqlx::query_as::<_, SchedulePolicy>(
        r#"
        SELECT id, week_reset_day, week_reset_hour, availability_open_hours,
               next_open_date, updated_by, updated_at
        FROM schedule_policy
        "#,
    )
    .fetch_optional(db)
    .await?
    .ok_or(Error::NotConfigured)
}

/// Policy math for callers that must not fail just because nobody has
/// configured a policy yet.
pub async fn reset_rule(db: &Db) -> Result<ResetRule, Error> {
    match get_policy(db).await {
        Ok(p) => Ok(ResetRule::from(&p)),
        Err(Error::NotConfigured) => {
            tracing::debug!("no schedule policy configured; using default reset rule");
            Ok(ResetRule::default())
        }
        Err(e) => Err(e),
    }
}

fn validate(req: &UpdatePolicyReq) -> Result<(), Error> {
    if !(0..=6).contains(&req.week_reset_day) {
        return Err(Error::InvalidPolicy(format!(
            "week_reset_day {} out of range 0..=6",
            req.week_reset_day
        )));
    }
    if !(0..=23).contains(&req.week_reset_hour) {
        return Err(Error::InvalidPolicy(format!(
            "week_reset_hour {} out of range 0..=23",
            req.week_reset_hour
        )));
    }
    if req.availability_open_hours <= 0 {
        return Err(Error::InvalidPolicy(format!(
            "availability_open_hours {} must be positive",
            req.availability_open_hours
        )));
    }
    Ok(())
}

/// Upsert the singleton row. Takes effect on the next operation; nothing
/// caches the policy beyond a single request.
pub async fn update_policy(
    db: &Db,
    actor: &Actor,
    req: UpdatePolicyReq,
) -> Result<SchedulePolicy, Error> {
    actor.require_admin()?;
    validate(&req)?;

    let updated = sqlx::query_as::<_, SchedulePolicy>(
        r#"
        INSERT INTO schedule_policy
            (week_reset_day, week_reset_hour, availability_open_hours, next_open_date, updated_by)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (singleton) DO UPDATE SET
            week_reset_day = EXCLUDED.week_reset_day,
            week_reset_hour = EXCLUDED.week_reset_hour,
            availability_open_hours = EXCLUDED.availability_open_hours,
            next_open_date = EXCLUDED.next_open_date,
            updated_by = EXCLUDED.updated_by,
            updated_at = now()
        RETURNING id, week_reset_day, week_reset_hour, availability_open_hours,
                  next_open_date, updated_by, updated_at
        "#,
    )
    .bind(req.week_reset_day)
    .bind(req.week_reset_hour)
    .bind(req.availability_open_hours)
    .bind(req.next_open_date)
    .bind(actor.id)
    .fetch_one(db)
    .await?;

    tracing::info!(
        week_reset_day = updated.week_reset_day,
        week_reset_hour = updated.week_reset_hour,
        availability_open_hours = updated.availability_open_hours,
        "schedule policy updated"
    );
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use uuid::Uuid;

    fn rule(day: i32, hour: i32, open: i32) -> ResetRule {
        ResetRule {
            week_reset_day: day,
            week_reset_hour: hour,
            availability_open_hours: open,
            next_open_date: None,
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn dt(y: i32, m: u32, day: u32, h: u32) -> NaiveDateTime {
        d(y, m, day).and_hms_opt(h, 0, 0).unwrap()
    }

    // 2025-01-05 is a Sunday, so 2025-01-03 and 2025-01-10 are Fridays.

    #[test]
    fn test_week_start_walks_back_to_reset_day() {
        let r = rule(5, 22, 168);
        assert_eq!(r.current_week_start(dt(2025, 1, 11, 10)), d(2025, 1, 10));
        assert_eq!(r.current_week_start(dt(2025, 1, 9, 23)), d(2025, 1, 3));
        // on the reset day itself the bucket is that same day
        assert_eq!(r.current_week_start(dt(2025, 1, 10, 0)), d(2025, 1, 10));
    }

    #[test]
    fn test_week_start_stable_within_window() {
        let r = rule(5, 22, 168);
        let a = r.current_week_start(dt(2025, 1, 6, 1));
        let b = r.current_week_start(dt(2025, 1, 9, 23));
        assert_eq!(a, b);
    }

    #[test]
    fn test_next_reset_same_day_not_yet_passed() {
        let r = rule(5, 22, 168);
        assert_eq!(
            r.next_reset_instant(dt(2025, 1, 10, 21)),
            dt(2025, 1, 10, 22)
        );
    }

    #[test]
    fn test_next_reset_same_day_already_passed_rolls_a_week() {
        let r = rule(5, 22, 168);
        assert_eq!(
            r.next_reset_instant(dt(2025, 1, 10, 23)),
            dt(2025, 1, 17, 22)
        );
        // exactly at the reset instant also rolls
        assert_eq!(
            r.next_reset_instant(dt(2025, 1, 10, 22)),
            dt(2025, 1, 17, 22)
        );
    }

    #[test]
    fn test_explicit_next_open_date_wins() {
        let mut r = rule(5, 22, 168);
        r.next_open_date = Some(d(2025, 2, 1)); // a Saturday, weekday mismatch
        assert_eq!(
            r.next_reset_instant(dt(2025, 1, 10, 21)),
            dt(2025, 2, 1, 22)
        );
    }

    #[test]
    fn test_week_open_full_week_ahead() {
        // 168h opening means the next week is bookable the moment the
        // previous reset fires
        let r = rule(5, 22, 168);
        let now = dt(2025, 1, 9, 12);
        assert!(r.is_week_open(d(2025, 1, 3), now)); // current
        assert!(r.is_week_open(d(2025, 1, 10), now)); // next
        assert!(!r.is_week_open(d(2025, 1, 17), now)); // week after next
        assert!(!r.is_week_open(d(2024, 12, 27), now)); // elapsed
    }

    #[test]
    fn test_week_open_short_window() {
        let r = rule(5, 22, 24);
        // window for the Jan 10 week opens Jan 9 at 22:00
        assert!(!r.is_week_open(d(2025, 1, 10), dt(2025, 1, 9, 12)));
        assert!(r.is_week_open(d(2025, 1, 10), dt(2025, 1, 9, 22)));
        assert!(r.is_week_open(d(2025, 1, 10), dt(2025, 1, 10, 1)));
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let ok = UpdatePolicyReq {
            week_reset_day: 5,
            week_reset_hour: 22,
            availability_open_hours: 168,
            next_open_date: None,
        };
        assert!(validate(&ok).is_ok());

        let mut bad = ok.clone();
        bad.week_reset_day = 7;
        assert!(matches!(validate(&bad), Err(Error::InvalidPolicy(_))));

        let mut bad = ok.clone();
        bad.week_reset_hour = 24;
        assert!(matches!(validate(&bad), Err(Error::InvalidPolicy(_))));

        let mut bad = ok;
        bad.availability_open_hours = 0;
        assert!(matches!(validate(&bad), Err(Error::InvalidPolicy(_))));
    }

    #[test]
    fn test_only_admin_roles_pass_the_policy_gate() {
        let manager = Actor { id: Uuid::new_v4(), role: Role::Manager };
        let student = Actor { id: Uuid::new_v4(), role: Role::Student };
        assert!(manager.require_admin().is_ok());
        assert!(matches!(student.require_admin(), Err(Error::Forbidden)));
    }
}
