use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::request::Parts,
    routing::{delete, get, patch, post},
    Json, Router,
};
use chrono::Local;
use uuid::Uuid;

use crate::db::Db;
use crate::error::Error;
use crate::models::*;
use crate::{attendance, availability, booking, policy, session};

pub fn router(db: Db) -> Router {
    Router::new()
        // schedule policy
        .route("/api/policy", get(get_policy).put(put_policy))
        // availability catalog
        .route("/api/slots", post(publish_slot))
        .route("/api/slots/:slot_id", delete(delete_slot))
        .route("/api/slots/:slot_id/confirm", post(confirm_slot))
        .route("/api/tracks/:track_id/slots", get(list_track_slots))
        .route(
            "/api/instructors/:instructor_id/slots",
            get(list_instructor_slots),
        )
        // booking
        .route("/api/bookings", post(book_slot))
        .route("/api/bookings/:booking_id", delete(cancel_booking))
        .route("/api/bookings/:booking_id/notes", patch(update_booking_notes))
        .route(
            "/api/instructors/:instructor_id/matching-bookings",
            get(matching_bookings),
        )
        // session lifecycle
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:session_id", get(get_session))
        .route("/api/sessions/:session_id/schedule", post(schedule_session))
        .route("/api/sessions/:session_id/link", post(set_link))
        .route(
            "/api/sessions/:session_id/transition",
            post(transition_session),
        )
        .route(
            "/api/sessions/:session_id/bookings/:booking_id",
            post(attach_booking),
        )
        // attendance ledger
        .route("/api/sessions/:session_id/roster", post(init_roster))
        .route(
            "/api/sessions/:session_id/attendance",
            get(get_roster).post(mark_attendance),
        )
        .route(
            "/api/sessions/:session_id/attendance/stats",
            get(attendance_stats),
        )
        .with_state(db)
}

// The platform edge authenticates and forwards the caller's claim in
// headers; requests without a parseable claim are rejected outright.
#[axum::async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get("x-actor-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or(Error::Forbidden)?;
        let role = parts
            .headers
            .get("x-actor-role")
            .and_then(|v| v.to_str().ok())
            .and_then(Role::parse)
            .ok_or(Error::Forbidden)?;
        Ok(Actor { id, role })
    }
}

// --- schedule policy ---

async fn get_policy(State(db): State<Db>) -> Result<Json<SchedulePolicy>, Error> {
    Ok(Json(policy::get_policy(&db).await?))
}

async fn put_policy(
    State(db): State<Db>,
    actor: Actor,
    Json(req): Json<UpdatePolicyReq>,
) -> Result<Json<SchedulePolicy>, Error> {
    Ok(Json(policy::update_policy(&db, &actor, req).await?))
}

// --- availability catalog ---

async fn publish_slot(
    State(db): State<Db>,
    actor: Actor,
    Json(req): Json<PublishSlotReq>,
) -> Result<Json<AvailabilitySlot>, Error> {
    let rule = policy::reset_rule(&db).await?;
    let now = Local::now().naive_local();
    Ok(Json(
        availability::publish_slot(&db, &actor, &rule, req, now).await?,
    ))
}

async fn delete_slot(
    State(db): State<Db>,
    actor: Actor,
    Path(slot_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, Error> {
    availability::delete_slot(&db, &actor, slot_id).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn confirm_slot(
    State(db): State<Db>,
    actor: Actor,
    Path(slot_id): Path<Uuid>,
) -> Result<Json<AvailabilitySlot>, Error> {
    Ok(Json(availability::confirm_slot(&db, &actor, slot_id).await?))
}

async fn list_track_slots(
    State(db): State<Db>,
    Path(track_id): Path<Uuid>,
    Query(q): Query<WeekQuery>,
) -> Result<Json<Vec<AvailabilitySlot>>, Error> {
    let rule = policy::reset_rule(&db).await?;
    Ok(Json(
        availability::list_available_slots(&db, &rule, track_id, q.week_start).await?,
    ))
}

async fn list_instructor_slots(
    State(db): State<Db>,
    Path(instructor_id): Path<Uuid>,
    Query(q): Query<WeekQuery>,
) -> Result<Json<Vec<AvailabilitySlot>>, Error> {
    let rule = policy::reset_rule(&db).await?;
    Ok(Json(
        availability::list_instructor_slots(&db, &rule, instructor_id, q.week_start).await?,
    ))
}

// --- booking ---

async fn book_slot(
    State(db): State<Db>,
    actor: Actor,
    Json(req): Json<BookSlotReq>,
) -> Result<Json<Booking>, Error> {
    let rule = policy::reset_rule(&db).await?;
    let now = Local::now().naive_local();
    Ok(Json(booking::book(&db, &actor, &rule, req, now).await?))
}

async fn cancel_booking(
    State(db): State<Db>,
    actor: Actor,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, Error> {
    booking::cancel(&db, &actor, booking_id).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn update_booking_notes(
    State(db): State<Db>,
    actor: Actor,
    Path(booking_id): Path<Uuid>,
    Json(req): Json<BookingNotesReq>,
) -> Result<Json<Booking>, Error> {
    Ok(Json(booking::update_notes(&db, &actor, booking_id, req).await?))
}

async fn matching_bookings(
    State(db): State<Db>,
    _actor: Actor,
    Path(instructor_id): Path<Uuid>,
    Query(q): Query<MatchQuery>,
) -> Result<Json<Vec<MatchedBooking>>, Error> {
    let rule = policy::reset_rule(&db).await?;
    Ok(Json(
        booking::find_matching_slots(&db, &rule, instructor_id, q).await?,
    ))
}

// --- session lifecycle ---

async fn create_session(
    State(db): State<Db>,
    actor: Actor,
    Json(req): Json<CreateSessionReq>,
) -> Result<Json<Session>, Error> {
    Ok(Json(session::create_session(&db, &actor, req).await?))
}

async fn get_session(
    State(db): State<Db>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Session>, Error> {
    Ok(Json(session::fetch_session(&db, session_id).await?))
}

async fn schedule_session(
    State(db): State<Db>,
    actor: Actor,
    Path(session_id): Path<Uuid>,
    Json(req): Json<ScheduleSessionReq>,
) -> Result<Json<Session>, Error> {
    Ok(Json(
        session::schedule_session(&db, &actor, session_id, req).await?,
    ))
}

async fn set_link(
    State(db): State<Db>,
    actor: Actor,
    Path(session_id): Path<Uuid>,
    Json(req): Json<SetLinkReq>,
) -> Result<Json<Session>, Error> {
    Ok(Json(
        session::set_external_link(&db, &actor, session_id, &req.external_link).await?,
    ))
}

async fn transition_session(
    State(db): State<Db>,
    actor: Actor,
    Path(session_id): Path<Uuid>,
    Json(req): Json<TransitionReq>,
) -> Result<Json<Session>, Error> {
    let target = session::parse_target(&req.target)?;
    Ok(Json(session::transition(&db, &actor, session_id, target).await?))
}

async fn attach_booking(
    State(db): State<Db>,
    actor: Actor,
    Path((session_id, booking_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, Error> {
    session::attach_booking(&db, &actor, session_id, booking_id).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

// --- attendance ledger ---

async fn init_roster(
    State(db): State<Db>,
    actor: Actor,
    Path(session_id): Path<Uuid>,
    Json(req): Json<RosterReq>,
) -> Result<Json<Vec<AttendanceRecord>>, Error> {
    Ok(Json(
        attendance::initialize_roster(&db, &actor, session_id, &req.student_ids).await?,
    ))
}

async fn get_roster(
    State(db): State<Db>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Vec<AttendanceRecord>>, Error> {
    Ok(Json(attendance::list_roster(&db, session_id).await?))
}

async fn mark_attendance(
    State(db): State<Db>,
    actor: Actor,
    Path(session_id): Path<Uuid>,
    Json(marks): Json<Vec<AttendanceMark>>,
) -> Result<Json<Vec<AttendanceRecord>>, Error> {
    Ok(Json(
        attendance::set_statuses(&db, &actor, session_id, &marks).await?,
    ))
}

async fn attendance_stats(
    State(db): State<Db>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<AttendanceStats>, Error> {
    Ok(Json(attendance::compute_stats(&db, session_id).await?))
}
