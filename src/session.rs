use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::db::Db;
use crate::error::Error;
use crate::models::{Actor, CreateSessionReq, ScheduleSessionReq, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Draft,
    Scheduled,
    Ready,
    Active,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Draft => "DRAFT",
            SessionStatus::Scheduled => "SCHEDULED",
            SessionStatus::Ready => "READY",
            SessionStatus::Active => "ACTIVE",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(SessionStatus::Draft),
            "SCHEDULED" => Some(SessionStatus::Scheduled),
            "READY" => Some(SessionStatus::Ready),
            "ACTIVE" => Some(SessionStatus::Active),
            "COMPLETED" => Some(SessionStatus::Completed),
            "CANCELLED" => Some(SessionStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }
}

/// The whole transition table in one place. Forward edges walk the
/// lifecycle strictly; CANCELLED is reachable from any non-terminal state.
pub fn can_transition(from: SessionStatus, to: SessionStatus) -> bool {
    use SessionStatus::*;
    match (from, to) {
        (Draft, Scheduled) => true,
        (Scheduled, Ready) => true,
        (Ready, Active) => true,
        (Active, Completed) => true,
        (from, Cancelled) => !from.is_terminal(),
        _ => false,
    }
}

/// The go-live gate: the stored link must be a non-blank http(s) URL with
/// a host. Format-based on purpose; a provider whitelist would reject
/// legitimate rooms.
pub fn can_start_session(external_link: Option<&str>) -> bool {
    let Some(link) = external_link else {
        return false;
    };
    let link = link.trim();
    if link.is_empty() {
        return false;
    }
    match Url::parse(link) {
        Ok(url) => {
            matches!(url.scheme(), "http" | "https") && url.host_str().is_some()
        }
        Err(_) => false,
    }
}

fn ensure_can_drive(session: &Session, actor: &Actor) -> Result<(), Error> {
    if actor.role.is_admin() || actor.id == session.instructor_id {
        Ok(())
    } else {
        Err(Error::Forbidden)
    }
}

pub async fn create_session(db: &Db, actor: &Actor, req: CreateSessionReq) -> Result<Session, Error> {
    if !actor.role.is_admin() && actor.id != req.instructor_id {
        return Err(Error::Forbidden);
    }
    let session = sqlx::query_as::<_, Session>(
        r#"
        INSERT INTO sessions (id, track_id, instructor_id, title, description, status)
        VALUES ($1, $2, $3, $4, $5, 'DRAFT')
        RETURNING id, track_id, instructor_id, title, description, session_date,
                  start_hour, end_hour, status, external_link, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(req.track_id)
    .bind(req.instructor_id)
    .bind(req.title)
    .bind(req.description)
    .fetch_one(db)
    .await?;

    tracing::info!(session_id = %session.id, track_id = %session.track_id, "session created");
    Ok(session)
}

pub async fn fetch_session(db: &Db, session_id: Uuid) -> Result<Session, Error> {
    sqlx::query_as::<_, Session>(
        r#"
        SELECT id, track_id, instructor_id, title, description, session_date,
               start_hour, end_hour, status, external_link, created_at, updated_at
        FROM sessions
        WHERE id = $1
        "#,
    )
    .bind(session_id)
    .fetch_optional(db)
    .await?
    .ok_or(Error::SessionNotFound)
}

/// Set date and time window and move DRAFT -> SCHEDULED in one step.
pub async fn schedule_session(
    db: &Db,
    actor: &Actor,
    session_id: Uuid,
    req: ScheduleSessionReq,
) -> Result<Session, Error> {
    if !(0..=23).contains(&req.start_hour) || req.end_hour > 24 || req.end_hour <= req.start_hour {
        return Err(Error::InvalidRange(format!(
            "session hours {}..{} out of range",
            req.start_hour, req.end_hour
        )));
    }
    let session = fetch_session(db, session_id).await?;
    ensure_can_drive(&session, actor)?;

    let from = parse_status(&session.status)?;
    if !can_transition(from, SessionStatus::Scheduled) {
        return Err(Error::IllegalTransition {
            from: from.as_str().into(),
            to: SessionStatus::Scheduled.as_str().into(),
        });
    }

    let updated = sqlx::query_as::<_, Session>(
        r#"
        UPDATE sessions SET
            session_date = $2, start_hour = $3, end_hour = $4,
            status = 'SCHEDULED', updated_at = now()
        WHERE id = $1 AND status = 'DRAFT'
        RETURNING id, track_id, instructor_id, title, description, session_date,
                  start_hour, end_hour, status, external_link, created_at, updated_at
        "#,
    )
    .bind(session_id)
    .bind(req.session_date)
    .bind(req.start_hour)
    .bind(req.end_hour)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| Error::IllegalTransition {
        from: SessionStatus::Draft.as_str().into(),
        to: SessionStatus::Scheduled.as_str().into(),
    })?;

    tracing::info!(session_id = %session_id, date = %req.session_date, "session scheduled");
    Ok(updated)
}

/// Store a validated meeting link; a SCHEDULED session advances to READY.
pub async fn set_external_link(
    db: &Db,
    actor: &Actor,
    session_id: Uuid,
    link: &str,
) -> Result<Session, Error> {
    if !can_start_session(Some(link)) {
        return Err(Error::InvalidLink(link.trim().to_string()));
    }

    let session = fetch_session(db, session_id).await?;
    ensure_can_drive(&session, actor)?;
    let from = parse_status(&session.status)?;
    if from.is_terminal() {
        return Err(Error::IllegalTransition {
            from: from.as_str().into(),
            to: SessionStatus::Ready.as_str().into(),
        });
    }

    // promote SCHEDULED -> READY as a side effect of the link landing;
    // other states keep their status and just gain the link
    let updated = sqlx::query_as::<_, Session>(
        r#"
        UPDATE sessions SET
            external_link = $2,
            status = CASE WHEN status = 'SCHEDULED' THEN 'READY' ELSE status END,
            updated_at = now()
        WHERE id = $1
        RETURNING id, track_id, instructor_id, title, description, session_date,
                  start_hour, end_hour, status, external_link, created_at, updated_at
        "#,
    )
    .bind(session_id)
    .bind(link.trim())
    .fetch_one(db)
    .await?;

    tracing::info!(session_id = %session_id, "external link set");
    Ok(updated)
}

/// Drive the state machine one edge. The write is a conditional update
/// keyed on the expected prior status; a concurrent transition makes the
/// affected-row count zero and the request fails instead of clobbering.
pub async fn transition(
    db: &Db,
    actor: &Actor,
    session_id: Uuid,
    target: SessionStatus,
) -> Result<Session, Error> {
    let session = fetch_session(db, session_id).await?;
    ensure_can_drive(&session, actor)?;

    let from = parse_status(&session.status)?;
    if target == SessionStatus::Active && !can_start_session(session.external_link.as_deref()) {
        return Err(Error::MissingExternalLink);
    }
    if !can_transition(from, target) {
        return Err(Error::IllegalTransition {
            from: from.as_str().into(),
            to: target.as_str().into(),
        });
    }

    let updated = sqlx::query_as::<_, Session>(
        r#"
        UPDATE sessions SET status = $2, updated_at = now()
        WHERE id = $1 AND status = $3
        RETURNING id, track_id, instructor_id, title, description, session_date,
                  start_hour, end_hour, status, external_link, created_at, updated_at
        "#,
    )
    .bind(session_id)
    .bind(target.as_str())
    .bind(from.as_str())
    .fetch_optional(db)
    .await?
    .ok_or_else(|| Error::IllegalTransition {
        from: from.as_str().into(),
        to: target.as_str().into(),
    })?;

    tracing::info!(
        session_id = %session_id,
        from = from.as_str(),
        to = target.as_str(),
        "session transitioned"
    );
    Ok(updated)
}

/// Claim a booking for this session. A booking belongs to at most one
/// session, enforced by the `session_id IS NULL` condition.
pub async fn attach_booking(
    db: &Db,
    actor: &Actor,
    session_id: Uuid,
    booking_id: Uuid,
) -> Result<(), Error> {
    let session = fetch_session(db, session_id).await?;
    ensure_can_drive(&session, actor)?;

    let affected = sqlx::query(
        "UPDATE bookings SET session_id = $1 WHERE id = $2 AND session_id IS NULL",
    )
    .bind(session_id)
    .bind(booking_id)
    .execute(db)
    .await?
    .rows_affected();

    if affected == 0 {
        // distinguish a missing booking from one that is already claimed
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM bookings WHERE id = $1)")
            .bind(booking_id)
            .fetch_one(db)
            .await?;
        return Err(if exists {
            Error::CannotRelinkBooking
        } else {
            Error::BookingNotFound
        });
    }

    tracing::info!(session_id = %session_id, booking_id = %booking_id, "booking attached");
    Ok(())
}

fn parse_status(s: &str) -> Result<SessionStatus, Error> {
    SessionStatus::parse(s).ok_or_else(|| Error::InvalidStatus(s.to_string()))
}

/// Parse a caller-supplied target status for the transition endpoint.
pub fn parse_target(s: &str) -> Result<SessionStatus, Error> {
    parse_status(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionStatus::*;

    #[test]
    fn test_forward_chain_is_legal() {
        assert!(can_transition(Draft, Scheduled));
        assert!(can_transition(Scheduled, Ready));
        assert!(can_transition(Ready, Active));
        assert!(can_transition(Active, Completed));
    }

    #[test]
    fn test_skipping_states_is_illegal() {
        assert!(!can_transition(Draft, Ready));
        assert!(!can_transition(Draft, Active));
        assert!(!can_transition(Scheduled, Active));
        assert!(!can_transition(Scheduled, Completed));
        assert!(!can_transition(Ready, Completed));
    }

    #[test]
    fn test_no_backward_edges() {
        assert!(!can_transition(Active, Ready));
        assert!(!can_transition(Ready, Scheduled));
        assert!(!can_transition(Completed, Active));
        assert!(!can_transition(Cancelled, Draft));
    }

    #[test]
    fn test_cancel_from_any_non_terminal_state() {
        for from in [Draft, Scheduled, Ready, Active] {
            assert!(can_transition(from, Cancelled), "{from:?} -> CANCELLED");
        }
        assert!(!can_transition(Completed, Cancelled));
        assert!(!can_transition(Cancelled, Cancelled));
    }

    #[test]
    fn test_link_gate_rejects_missing_or_blank() {
        assert!(!can_start_session(None));
        assert!(!can_start_session(Some("")));
        assert!(!can_start_session(Some("   ")));
    }

    #[test]
    fn test_link_gate_rejects_non_urls() {
        assert!(!can_start_session(Some("not a url")));
        assert!(!can_start_session(Some("meet.google.com/abc-defg-hij"))); // no scheme
        assert!(!can_start_session(Some("ftp://meet.example.com/room")));
        assert!(!can_start_session(Some("https://")));
    }

    #[test]
    fn test_link_gate_accepts_any_wellformed_meeting_url() {
        assert!(can_start_session(Some("https://meet.google.com/abc-defg-hij")));
        assert!(can_start_session(Some("https://zoom.us/j/123456789")));
        assert!(can_start_session(Some("https://teams.microsoft.com/l/meetup-join/xyz")));
        // format-based, not provider-whitelist-based
        assert!(can_start_session(Some("https://meet.example/abc")));
        assert!(can_start_session(Some("  https://meet.example/abc  ")));
        assert!(can_start_session(Some("http://10.0.0.4:8443/room/7")));
    }

    #[test]
    fn test_status_round_trips_through_storage_strings() {
        for s in [Draft, Scheduled, Ready, Active, Completed, Cancelled] {
            assert_eq!(SessionStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(SessionStatus::parse("RUNNING"), None);
    }
}
