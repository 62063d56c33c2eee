use chrono::{NaiveDate, NaiveDateTime};
use sqlx::postgres::PgExecutor;
use uuid::Uuid;

use crate::db::Db;
use crate::error::{is_unique_violation, Error};
use crate::models::{Actor, AvailabilitySlot, PublishSlotReq};
use crate::policy::ResetRule;

pub fn validate_slot_range(day_of_week: i32, start_hour: i32, end_hour: i32) -> Result<(), Error> {
    if !(0..=6).contains(&day_of_week) {
        return Err(Error::InvalidRange(format!(
            "day_of_week {day_of_week} out of range 0..=6"
        )));
    }
    if !(0..=23).contains(&start_hour) || !(1..=24).contains(&end_hour) {
        return Err(Error::InvalidRange(format!(
            "hours {start_hour}..{end_hour} out of range"
        )));
    }
    if end_hour <= start_hour {
        return Err(Error::InvalidRange(format!(
            "end_hour {end_hour} must be greater than start_hour {start_hour}"
        )));
    }
    Ok(())
}

/// Publish one recurring weekly slot. The target week must be a canonical
/// bucket boundary and inside the open window, unless a manager/owner is
/// publishing on the instructor's behalf.
pub async fn publish_slot(
    db: &Db,
    actor: &Actor,
    rule: &ResetRule,
    req: PublishSlotReq,
    now: NaiveDateTime,
) -> Result<AvailabilitySlot, Error> {
    validate_slot_range(req.day_of_week, req.start_hour, req.end_hour)?;
    if !actor.role.is_admin() && actor.id != req.instructor_id {
        return Err(Error::Forbidden);
    }

    let expected = rule.week_start_of(req.week_start);
    if expected != req.week_start {
        return Err(Error::InvalidWeekStart {
            given: req.week_start,
            expected,
        });
    }
    if !actor.role.is_admin() && !rule.is_week_open(req.week_start, now) {
        return Err(Error::WindowClosed);
    }

    let slot = sqlx::query_as::<_, AvailabilitySlot>(
        r#"
        INSERT INTO availability_slots
            (id, instructor_id, track_id, week_start, day_of_week, start_hour, end_hour)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id, instructor_id, track_id, week_start, day_of_week,
                  start_hour, end_hour, is_booked, is_confirmed, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(req.instructor_id)
    .bind(req.track_id)
    .bind(req.week_start)
    .bind(req.day_of_week)
    .bind(req.start_hour)
    .bind(req.end_hour)
    .fetch_one(db)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            Error::SlotConflict
        } else {
            Error::Database(e)
        }
    })?;

    tracing::info!(
        slot_id = %slot.id,
        instructor_id = %slot.instructor_id,
        week_start = %slot.week_start,
        day_of_week = slot.day_of_week,
        "availability slot published"
    );
    Ok(slot)
}

/// Unbooked slots students can browse for a track/week, ordered so the
/// caller can group by instructor.
pub async fn list_available_slots(
    db: &Db,
    rule: &ResetRule,
    track_id: Uuid,
    week_start: NaiveDate,
) -> Result<Vec<AvailabilitySlot>, Error> {
    let week = rule.week_start_of(week_start);
    let slots = sqlx::query_as::<_, AvailabilitySlot>(
        r#"
        SELECT id, instructor_id, track_id, week_start, day_of_week,
               start_hour, end_hour, is_booked, is_confirmed, created_at
        FROM availability_slots
        WHERE track_id = $1 AND week_start = $2 AND is_booked = FALSE
        ORDER BY instructor_id, day_of_week, start_hour
        "#,
    )
    .bind(track_id)
    .bind(week)
    .fetch_all(db)
    .await?;
    Ok(slots)
}

/// An instructor's own published calendar for a week, booked or not.
pub async fn list_instructor_slots(
    db: &Db,
    rule: &ResetRule,
    instructor_id: Uuid,
    week_start: NaiveDate,
) -> Result<Vec<AvailabilitySlot>, Error> {
    let week = rule.week_start_of(week_start);
    let slots = sqlx::query_as::<_, AvailabilitySlot>(
        r#"
        SELECT id, instructor_id, track_id, week_start, day_of_week,
               start_hour, end_hour, is_booked, is_confirmed, created_at
        FROM availability_slots
        WHERE instructor_id = $1 AND week_start = $2
        ORDER BY day_of_week, start_hour
        "#,
    )
    .bind(instructor_id)
    .bind(week)
    .fetch_all(db)
    .await?;
    Ok(slots)
}

/// Instructor-side confirmation, independent of booking state.
pub async fn confirm_slot(db: &Db, actor: &Actor, slot_id: Uuid) -> Result<AvailabilitySlot, Error> {
    let slot = fetch_slot(db, slot_id).await?;
    if !actor.role.is_admin() && actor.id != slot.instructor_id {
        return Err(Error::Forbidden);
    }
    let slot = sqlx::query_as::<_, AvailabilitySlot>(
        r#"
        UPDATE availability_slots SET is_confirmed = TRUE
        WHERE id = $1
        RETURNING id, instructor_id, track_id, week_start, day_of_week,
                  start_hour, end_hour, is_booked, is_confirmed, created_at
        "#,
    )
    .bind(slot_id)
    .fetch_one(db)
    .await?;
    Ok(slot)
}

/// Remove an unbooked slot from the catalog.
pub async fn delete_slot(db: &Db, actor: &Actor, slot_id: Uuid) -> Result<(), Error> {
    let slot = fetch_slot(db, slot_id).await?;
    if !actor.role.is_admin() && actor.id != slot.instructor_id {
        return Err(Error::Forbidden);
    }
    if slot.is_booked {
        return Err(Error::SlotAlreadyBooked);
    }
    sqlx::query("DELETE FROM availability_slots WHERE id = $1 AND is_booked = FALSE")
        .bind(slot_id)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn fetch_slot(db: &Db, slot_id: Uuid) -> Result<AvailabilitySlot, Error> {
    sqlx::query_as::<_, AvailabilitySlot>(
        r#"
        SELECT id, instructor_id, track_id, week_start, day_of_week,
               start_hour, end_hour, is_booked, is_confirmed, created_at
        FROM availability_slots
        WHERE id = $1
        "#,
    )
    .bind(slot_id)
    .fetch_optional(db)
    .await?
    .ok_or(Error::SlotNotFound)
}

/// The only way a slot becomes booked. Conditional update so two
/// concurrent bookings cannot both win; zero affected rows means the flag
/// was already set.
pub async fn mark_booked<'e, E>(ex: E, slot_id: Uuid) -> Result<(), Error>
where
    E: PgExecutor<'e>,
{
    let affected = sqlx::query(
        "UPDATE availability_slots SET is_booked = TRUE WHERE id = $1 AND is_booked = FALSE",
    )
    .bind(slot_id)
    .execute(ex)
    .await?
    .rows_affected();
    if affected == 0 {
        return Err(Error::AlreadyBooked);
    }
    Ok(())
}

/// Inverse transition, only used by booking cancellation.
pub async fn mark_unbooked<'e, E>(ex: E, slot_id: Uuid) -> Result<(), Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query("UPDATE availability_slots SET is_booked = FALSE WHERE id = $1")
        .bind(slot_id)
        .execute(ex)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_range_accepts_sane_windows() {
        assert!(validate_slot_range(0, 0, 1).is_ok());
        assert!(validate_slot_range(5, 10, 11).is_ok());
        assert!(validate_slot_range(6, 23, 24).is_ok());
    }

    #[test]
    fn test_slot_range_rejects_inverted_or_empty() {
        assert!(matches!(
            validate_slot_range(5, 11, 11),
            Err(Error::InvalidRange(_))
        ));
        assert!(matches!(
            validate_slot_range(5, 11, 10),
            Err(Error::InvalidRange(_))
        ));
    }

    #[test]
    fn test_slot_range_rejects_out_of_bounds() {
        assert!(matches!(
            validate_slot_range(7, 10, 11),
            Err(Error::InvalidRange(_))
        ));
        assert!(matches!(
            validate_slot_range(-1, 10, 11),
            Err(Error::InvalidRange(_))
        ));
        assert!(matches!(
            validate_slot_range(3, 24, 25),
            Err(Error::InvalidRange(_))
        ));
    }
}
