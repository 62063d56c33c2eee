use uuid::Uuid;

use crate::db::Db;
use crate::error::Error;
use crate::models::{Actor, AttendanceMark, AttendanceRecord, AttendanceStats, Session};
use crate::session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Excused => "excused",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "present" => Some(AttendanceStatus::Present),
            "absent" => Some(AttendanceStatus::Absent),
            "late" => Some(AttendanceStatus::Late),
            "excused" => Some(AttendanceStatus::Excused),
            _ => None,
        }
    }
}

fn ensure_can_mark(session: &Session, actor: &Actor) -> Result<(), Error> {
    if actor.role.is_admin() || actor.id == session.instructor_id {
        Ok(())
    } else {
        Err(Error::Forbidden)
    }
}

/// Materialize the roster: one `absent` row per student. Idempotent; the
/// (session, student) unique constraint swallows repeats, so calling this
/// again after more bookings attach only adds the newcomers.
pub async fn initialize_roster(
    db: &Db,
    actor: &Actor,
    session_id: Uuid,
    student_ids: &[Uuid],
) -> Result<Vec<AttendanceRecord>, Error> {
    let sess = session::fetch_session(db, session_id).await?;
    ensure_can_mark(&sess, actor)?;

    let mut tx = db.begin().await?;
    for student_id in student_ids {
        sqlx::query(
            r#"
            INSERT INTO attendance_records (id, session_id, student_id, status, marked_by)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (session_id, student_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(session_id)
        .bind(student_id)
        .bind(AttendanceStatus::Absent.as_str())
        .bind(actor.id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    tracing::info!(
        session_id = %session_id,
        students = student_ids.len(),
        "roster initialized"
    );
    list_roster(db, session_id).await
}

/// Apply a batch of status marks in one transaction. Every status is
/// validated before the first write so a bad tuple rejects the whole
/// request instead of half-applying it.
pub async fn set_statuses(
    db: &Db,
    actor: &Actor,
    session_id: Uuid,
    marks: &[AttendanceMark],
) -> Result<Vec<AttendanceRecord>, Error> {
    let sess = session::fetch_session(db, session_id).await?;
    ensure_can_mark(&sess, actor)?;

    for mark in marks {
        if AttendanceStatus::parse(&mark.status).is_none() {
            return Err(Error::InvalidStatus(mark.status.clone()));
        }
    }

    let mut tx = db.begin().await?;
    for mark in marks {
        sqlx::query(
            r#"
            INSERT INTO attendance_records (id, session_id, student_id, status, marked_by, notes)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (session_id, student_id) DO UPDATE SET
                status = EXCLUDED.status,
                marked_at = now(),
                marked_by = EXCLUDED.marked_by,
                notes = COALESCE(EXCLUDED.notes, attendance_records.notes)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(session_id)
        .bind(mark.student_id)
        .bind(&mark.status)
        .bind(actor.id)
        .bind(&mark.notes)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    tracing::info!(session_id = %session_id, marks = marks.len(), "attendance marked");
    list_roster(db, session_id).await
}

pub async fn list_roster(db: &Db, session_id: Uuid) -> Result<Vec<AttendanceRecord>, Error> {
    let rows = sqlx::query_as::<_, AttendanceRecord>(
        r#"
        SELECT id, session_id, student_id, status, marked_at, marked_by, notes
        FROM attendance_records
        WHERE session_id = $1
        ORDER BY student_id
        "#,
    )
    .bind(session_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn compute_stats(db: &Db, session_id: Uuid) -> Result<AttendanceStats, Error> {
    let counts: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT status, COUNT(*)
        FROM attendance_records
        WHERE session_id = $1
        GROUP BY status
        "#,
    )
    .bind(session_id)
    .fetch_all(db)
    .await?;
    Ok(fold_counts(&counts))
}

/// Aggregate per-status counts; an empty roster yields a rate of 0.0
/// rather than a division fault.
pub fn fold_counts(counts: &[(String, i64)]) -> AttendanceStats {
    let mut stats = AttendanceStats::default();
    for (status, count) in counts {
        match AttendanceStatus::parse(status) {
            Some(AttendanceStatus::Present) => stats.present = *count,
            Some(AttendanceStatus::Absent) => stats.absent = *count,
            Some(AttendanceStatus::Late) => stats.late = *count,
            Some(AttendanceStatus::Excused) => stats.excused = *count,
            None => {
                tracing::warn!(status = %status, "unknown attendance status in ledger");
            }
        }
        stats.total += *count;
    }
    stats.attendance_rate = if stats.total > 0 {
        stats.present as f64 / stats.total as f64
    } else {
        0.0
    };
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_is_strict() {
        assert_eq!(AttendanceStatus::parse("present"), Some(AttendanceStatus::Present));
        assert_eq!(AttendanceStatus::parse("excused"), Some(AttendanceStatus::Excused));
        assert_eq!(AttendanceStatus::parse("Present"), None);
        assert_eq!(AttendanceStatus::parse("tardy"), None);
        assert_eq!(AttendanceStatus::parse(""), None);
    }

    #[test]
    fn test_stats_for_empty_roster() {
        let stats = fold_counts(&[]);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.attendance_rate, 0.0);
    }

    #[test]
    fn test_stats_counts_and_rate() {
        let counts = vec![
            ("present".to_string(), 6),
            ("absent".to_string(), 2),
            ("late".to_string(), 1),
            ("excused".to_string(), 1),
        ];
        let stats = fold_counts(&counts);
        assert_eq!(stats.present, 6);
        assert_eq!(stats.absent, 2);
        assert_eq!(stats.late, 1);
        assert_eq!(stats.excused, 1);
        assert_eq!(stats.total, 10);
        assert!((stats.attendance_rate - 0.6).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stats_ignore_unknown_status_for_buckets_but_count_total() {
        let counts = vec![("present".to_string(), 1), ("tardy".to_string(), 1)];
        let stats = fold_counts(&counts);
        assert_eq!(stats.present, 1);
        assert_eq!(stats.total, 2);
        assert!((stats.attendance_rate - 0.5).abs() < f64::EPSILON);
    }
}
