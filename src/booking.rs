use chrono::NaiveDateTime;
use uuid::Uuid;

use crate::availability;
use crate::db::Db;
use crate::error::Error;
use crate::models::{Actor, BookSlotReq, Booking, BookingNotesReq, MatchQuery, MatchedBooking, Role};
use crate::policy::{self, ResetRule};

/// Half-open interval overlap on whole hours.
pub fn hours_overlap(a_start: i32, a_end: i32, b_start: i32, b_end: i32) -> bool {
    a_start < b_end && a_end > b_start
}

/// Cancellation rules, checked before any write: only the booking's
/// student or a manager/owner may cancel, and never once a session has
/// claimed the booking.
pub fn ensure_cancellable(booking: &Booking, actor: &Actor) -> Result<(), Error> {
    if !actor.role.is_admin() && actor.id != booking.student_id {
        return Err(Error::Forbidden);
    }
    if booking.session_id.is_some() {
        return Err(Error::CannotCancelLinkedBooking);
    }
    Ok(())
}

/// Commit a student's claim on a slot. Slot flip and booking insert live
/// in one transaction; the conditional update in `mark_booked` is what
/// makes concurrent calls on the same slot lose cleanly.
pub async fn book(
    db: &Db,
    actor: &Actor,
    rule: &ResetRule,
    req: BookSlotReq,
    now: NaiveDateTime,
) -> Result<Booking, Error> {
    if actor.role == Role::Student && actor.id != req.student_id {
        return Err(Error::Forbidden);
    }

    let mut tx = db.begin().await?;

    let slot = sqlx::query_as::<_, crate::models::AvailabilitySlot>(
        r#"
        SELECT id, instructor_id, track_id, week_start, day_of_week,
               start_hour, end_hour, is_booked, is_confirmed, created_at
        FROM availability_slots
        WHERE id = $1
        "#,
    )
    .bind(req.availability_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(Error::SlotNotFound)?;

    if slot.is_booked {
        return Err(Error::SlotAlreadyBooked);
    }
    if !actor.role.is_admin() && !rule.is_week_open(slot.week_start, now) {
        return Err(Error::WindowClosed);
    }

    let clash: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1
            FROM bookings b
            JOIN availability_slots s ON s.id = b.availability_id
            WHERE b.student_id = $1
              AND s.week_start = $2
              AND s.day_of_week = $3
              AND s.start_hour < $4
              AND s.end_hour > $5
        )
        "#,
    )
    .bind(req.student_id)
    .bind(slot.week_start)
    .bind(slot.day_of_week)
    .bind(slot.end_hour)
    .bind(slot.start_hour)
    .fetch_one(&mut *tx)
    .await?;
    if clash {
        return Err(Error::StudentDoubleBooked);
    }

    // the real race guard; losing it rolls the whole transaction back
    availability::mark_booked(&mut *tx, slot.id)
        .await
        .map_err(|e| match e {
            Error::AlreadyBooked => Error::SlotAlreadyBooked,
            other => other,
        })?;

    let booking = sqlx::query_as::<_, Booking>(
        r#"
        INSERT INTO bookings (id, student_id, availability_id, status, student_notes)
        VALUES ($1, $2, $3, 'BOOKED', $4)
        RETURNING id, student_id, availability_id, status, student_notes,
                  instructor_notes, session_id, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(req.student_id)
    .bind(slot.id)
    .bind(req.student_notes)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        booking_id = %booking.id,
        student_id = %booking.student_id,
        slot_id = %slot.id,
        "slot booked"
    );
    Ok(booking)
}

/// Delete an unlinked booking and release its slot, atomically.
pub async fn cancel(db: &Db, actor: &Actor, booking_id: Uuid) -> Result<(), Error> {
    let mut tx = db.begin().await?;

    let booking = fetch_booking_in(&mut tx, booking_id).await?;
    ensure_cancellable(&booking, actor)?;

    sqlx::query("DELETE FROM bookings WHERE id = $1")
        .bind(booking_id)
        .execute(&mut *tx)
        .await?;
    availability::mark_unbooked(&mut *tx, booking.availability_id).await?;

    tx.commit().await?;

    tracing::info!(booking_id = %booking_id, "booking cancelled, slot released");
    Ok(())
}

/// Bookings still waiting for a session whose slot overlaps the requested
/// window on that instructor's calendar.
pub async fn find_matching_slots(
    db: &Db,
    rule: &ResetRule,
    instructor_id: Uuid,
    q: MatchQuery,
) -> Result<Vec<MatchedBooking>, Error> {
    if q.end_hour <= q.start_hour {
        return Err(Error::InvalidRange(format!(
            "end_hour {} must be greater than start_hour {}",
            q.end_hour, q.start_hour
        )));
    }

    let week = rule.week_start_of(q.date);
    let dow = policy::day_of_week0(q.date);

    let candidates = sqlx::query_as::<_, MatchedBooking>(
        r#"
        SELECT b.id, b.student_id, b.availability_id,
               s.week_start, s.day_of_week, s.start_hour, s.end_hour
        FROM bookings b
        JOIN availability_slots s ON s.id = b.availability_id
        WHERE s.instructor_id = $1
          AND s.week_start = $2
          AND s.day_of_week = $3
          AND b.session_id IS NULL
        ORDER BY s.start_hour, b.created_at
        "#,
    )
    .bind(instructor_id)
    .bind(week)
    .bind(dow)
    .fetch_all(db)
    .await?;

    Ok(candidates
        .into_iter()
        .filter(|m| hours_overlap(m.start_hour, m.end_hour, q.start_hour, q.end_hour))
        .collect())
}

/// Notes stay editable even after the booking is linked to a session;
/// each side may only touch its own field.
pub async fn update_notes(
    db: &Db,
    actor: &Actor,
    booking_id: Uuid,
    req: BookingNotesReq,
) -> Result<Booking, Error> {
    let booking = fetch_booking(db, booking_id).await?;

    match actor.role {
        Role::Owner | Role::Manager => {}
        Role::Student => {
            if actor.id != booking.student_id || req.instructor_notes.is_some() {
                return Err(Error::Forbidden);
            }
        }
        Role::Instructor | Role::Coordinator => {
            if req.student_notes.is_some() {
                return Err(Error::Forbidden);
            }
        }
    }

    let updated = sqlx::query_as::<_, Booking>(
        r#"
        UPDATE bookings SET
            student_notes = COALESCE($2, student_notes),
            instructor_notes = COALESCE($3, instructor_notes)
        WHERE id = $1
        RETURNING id, student_id, availability_id, status, student_notes,
                  instructor_notes, session_id, created_at
        "#,
    )
    .bind(booking_id)
    .bind(req.student_notes)
    .bind(req.instructor_notes)
    .fetch_one(db)
    .await?;
    Ok(updated)
}

pub async fn fetch_booking(db: &Db, booking_id: Uuid) -> Result<Booking, Error> {
    sqlx::query_as::<_, Booking>(
        r#"
        SELECT id, student_id, availability_id, status, student_notes,
               instructor_notes, session_id, created_at
        FROM bookings
        WHERE id = $1
        "#,
    )
    .bind(booking_id)
    .fetch_optional(db)
    .await?
    .ok_or(Error::BookingNotFound)
}

async fn fetch_booking_in(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    booking_id: Uuid,
) -> Result<Booking, Error> {
    sqlx::query_as::<_, Booking>(
        r#"
        SELECT id, student_id, availability_id, status, student_notes,
               instructor_notes, session_id, created_at
        FROM bookings
        WHERE id = $1
        "#,
    )
    .bind(booking_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(Error::BookingNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn booking(session_id: Option<Uuid>, student_id: Uuid) -> Booking {
        Booking {
            id: Uuid::new_v4(),
            student_id,
            availability_id: Uuid::new_v4(),
            status: "BOOKED".into(),
            student_notes: None,
            instructor_notes: None,
            session_id,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_overlap_is_half_open() {
        // [10,11) vs [11,12): touching endpoints do not overlap
        assert!(!hours_overlap(10, 11, 11, 12));
        assert!(!hours_overlap(11, 12, 10, 11));
        // containment and partial overlap do
        assert!(hours_overlap(10, 12, 11, 13));
        assert!(hours_overlap(10, 14, 11, 12));
        assert!(hours_overlap(11, 12, 10, 14));
        assert!(hours_overlap(10, 11, 10, 11));
    }

    #[test]
    fn test_cancel_allowed_only_while_unlinked() {
        let student = Uuid::new_v4();
        let actor = Actor { id: student, role: Role::Student };

        let unlinked = booking(None, student);
        assert!(ensure_cancellable(&unlinked, &actor).is_ok());

        let linked = booking(Some(Uuid::new_v4()), student);
        assert!(matches!(
            ensure_cancellable(&linked, &actor),
            Err(Error::CannotCancelLinkedBooking)
        ));
    }

    #[test]
    fn test_cancel_forbidden_for_other_students() {
        let booking = booking(None, Uuid::new_v4());
        let other = Actor { id: Uuid::new_v4(), role: Role::Student };
        assert!(matches!(
            ensure_cancellable(&booking, &other),
            Err(Error::Forbidden)
        ));

        let manager = Actor { id: Uuid::new_v4(), role: Role::Manager };
        assert!(ensure_cancellable(&booking, &manager).is_ok());
    }
}
