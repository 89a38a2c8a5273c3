use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::dto::PublicUser;
use crate::auth::repo::{Role, User};
use crate::circulation::dto::LoanView;
use crate::circulation::repo::ReadingStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AdminAction {
    GetAllStudents,
    GetStudentDetails,
    UpdateStudent,
    ResetPassword,
    DeleteStudent,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminData {
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub password: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminRequest {
    pub action: AdminAction,
    pub student_id: Option<Uuid>,
    #[serde(default)]
    pub data: Option<AdminData>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub id: Uuid,
    pub username: String,
    pub full_name: String,
    pub role: Role,
    pub created_at: OffsetDateTime,
}

impl From<&User> for StudentSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            full_name: user.full_name.clone(),
            role: user.role,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StudentsListResponse {
    pub students: Vec<StudentSummary>,
}

/// Student record as shown to a supervisor. `password` carries the stored
/// digest, never a plaintext: the one privileged endpoint allowed to expose
/// it, and only for audit. There is no recovery path, only reset.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentDetails {
    pub id: Uuid,
    pub username: String,
    pub full_name: String,
    pub role: Role,
    pub created_at: OffsetDateTime,
    pub password: String,
}

impl From<&User> for StudentDetails {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            full_name: user.full_name.clone(),
            role: user.role,
            created_at: user.created_at,
            password: user.password_hash.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StudentDetailsResponse {
    pub student: StudentDetails,
    pub circulation: Vec<LoanView>,
    pub stats: ReadingStats,
}

#[derive(Debug, Serialize)]
pub struct UpdateStudentResponse {
    pub student: PublicUser,
}
