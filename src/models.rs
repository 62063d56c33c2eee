use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct SchedulePolicy {
    pub id: Uuid,
    pub week_reset_day: i32,
    pub week_reset_hour: i32,
    pub availability_open_hours: i32,
    pub next_open_date: Option<NaiveDate>,
    pub updated_by: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct AvailabilitySlot {
    pub id: Uuid,
    pub instructor_id: Uuid,
    pub track_id: Uuid,
    pub week_start: NaiveDate,
    pub day_of_week: i32,
    pub start_hour: i32,
    pub end_hour: i32,
    pub is_booked: bool,
    pub is_confirmed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Booking {
    pub id: Uuid,
    pub student_id: Uuid,
    pub availability_id: Uuid,
    pub status: String,
    pub student_notes: Option<String>,
    pub instructor_notes: Option<String>,
    pub session_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub track_id: Uuid,
    pub instructor_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub session_date: Option<NaiveDate>,
    pub start_hour: Option<i32>,
    pub end_hour: Option<i32>,
    pub status: String,
    pub external_link: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub student_id: Uuid,
    pub status: String,
    pub marked_at: DateTime<Utc>,
    pub marked_by: Option<Uuid>,
    pub notes: Option<String>,
}

/// A not-yet-linked booking returned by the matcher, joined with its
/// slot's time window so the instructor can see what they'd pull in.
#[derive(sqlx::FromRow, Serialize, Debug, Clone)]
pub struct MatchedBooking {
    pub id: Uuid,
    pub student_id: Uuid,
    pub availability_id: Uuid,
    pub week_start: NaiveDate,
    pub day_of_week: i32,
    pub start_hour: i32,
    pub end_hour: i32,
}

// --- caller identity (the platform edge authenticates; we only read the claim) ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Manager,
    Coordinator,
    Instructor,
    Student,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "owner" => Some(Role::Owner),
            "manager" => Some(Role::Manager),
            "coordinator" => Some(Role::Coordinator),
            "instructor" => Some(Role::Instructor),
            "student" => Some(Role::Student),
            _ => None,
        }
    }

    /// Managers and owners bypass the booking-window gate, may drive any
    /// session, and are the only roles allowed to edit the policy.
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Owner | Role::Manager)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn require_admin(&self) -> Result<(), Error> {
        if self.role.is_admin() {
            Ok(())
        } else {
            Err(Error::Forbidden)
        }
    }
}

// --- request/response bodies ---

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UpdatePolicyReq {
    pub week_reset_day: i32,
    pub week_reset_hour: i32,
    pub availability_open_hours: i32,
    pub next_open_date: Option<NaiveDate>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PublishSlotReq {
    pub instructor_id: Uuid,
    pub track_id: Uuid,
    pub week_start: NaiveDate,
    pub day_of_week: i32,
    pub start_hour: i32,
    pub end_hour: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BookSlotReq {
    pub student_id: Uuid,
    pub availability_id: Uuid,
    pub student_notes: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BookingNotesReq {
    pub student_notes: Option<String>,
    pub instructor_notes: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateSessionReq {
    pub track_id: Uuid,
    pub instructor_id: Uuid,
    pub title: String,
    pub description: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScheduleSessionReq {
    pub session_date: NaiveDate,
    pub start_hour: i32,
    pub end_hour: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SetLinkReq {
    pub external_link: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TransitionReq {
    pub target: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RosterReq {
    pub student_ids: Vec<Uuid>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AttendanceMark {
    pub student_id: Uuid,
    pub status: String,
    pub notes: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WeekQuery {
    pub week_start: NaiveDate,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MatchQuery {
    pub date: NaiveDate,
    pub start_hour: i32,
    pub end_hour: i32,
}

#[derive(Serialize, Debug, Clone, Default)]
pub struct AttendanceStats {
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub excused: i64,
    pub total: i64,
    pub attendance_rate: f64,
}
