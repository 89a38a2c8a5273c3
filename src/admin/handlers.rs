use anyhow::Context;
use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    admin::dto::{
        AdminAction, AdminData, AdminRequest, StudentDetails, StudentDetailsResponse,
        StudentSummary, StudentsListResponse, UpdateStudentResponse,
    },
    auth::{
        dto::{is_valid_username, MessageResponse, PublicUser, MIN_PASSWORD_LEN},
        extractors::CurrentUser,
        password::hash_password,
        repo::{profile_email, Profile, Role, User},
        sessions::Session,
    },
    circulation::{
        dto::LoanView,
        repo::{Loan, Patron, ReadingStats},
    },
    error::AppError,
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new().route("/admin/students", post(manage_students))
}

/// Single supervisor endpoint dispatching on `action`. The caller's token is
/// re-verified by the extractor; the role check happens here, server-side,
/// before any action runs.
#[instrument(skip(state, current, payload), fields(action = ?payload.action))]
pub async fn manage_students(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(payload): Json<AdminRequest>,
) -> Result<Response, AppError> {
    if current.user.role != Role::Supervisor {
        warn!(user_id = %current.user.id, role = %current.user.role, "non-supervisor hit admin endpoint");
        return Err(AppError::Forbidden(
            "Access denied. Supervisor role required.".into(),
        ));
    }

    match payload.action {
        AdminAction::GetAllStudents => get_all_students(&state).await,
        AdminAction::GetStudentDetails => {
            get_student_details(&state, require_student_id(&payload)?).await
        }
        AdminAction::UpdateStudent => {
            let id = require_student_id(&payload)?;
            update_student(&state, id, payload.data.unwrap_or_default()).await
        }
        AdminAction::ResetPassword => {
            let id = require_student_id(&payload)?;
            reset_password(&state, id, payload.data.unwrap_or_default()).await
        }
        AdminAction::DeleteStudent => delete_student(&state, require_student_id(&payload)?).await,
    }
}

fn require_student_id(payload: &AdminRequest) -> Result<Uuid, AppError> {
    payload
        .student_id
        .ok_or_else(|| AppError::Validation("studentId is required".into()))
}

async fn get_all_students(state: &AppState) -> Result<Response, AppError> {
    let students = User::list_students(&state.db).await?;
    Ok(Json(StudentsListResponse {
        students: students.iter().map(StudentSummary::from).collect(),
    })
    .into_response())
}

async fn get_student_details(state: &AppState, id: Uuid) -> Result<Response, AppError> {
    let student = User::find_student(&state.db, id)
        .await?
        .ok_or(AppError::NotFound("Student"))?;

    // A student who has never borrowed has no patron row yet.
    let patron = Patron::find_by_email(&state.db, &profile_email(&student.username)).await?;
    let (circulation, stats) = match patron {
        Some(patron) => (
            Loan::list_for_patron(&state.db, patron.id).await?,
            Loan::reading_stats(&state.db, patron.id).await?,
        ),
        None => (
            Vec::new(),
            ReadingStats {
                total_loans: 0,
                returned_loans: 0,
                distinct_books: 0,
                overdue_loans: 0,
            },
        ),
    };

    Ok(Json(StudentDetailsResponse {
        student: StudentDetails::from(&student),
        circulation: circulation.into_iter().map(LoanView::from).collect(),
        stats,
    })
    .into_response())
}

async fn update_student(
    state: &AppState,
    id: Uuid,
    data: AdminData,
) -> Result<Response, AppError> {
    if let Some(username) = data.username.as_deref() {
        if !is_valid_username(username) {
            return Err(AppError::Validation(
                "Username must be 3-20 characters (letters, numbers, underscore only)".into(),
            ));
        }
        if User::username_taken_by_other(&state.db, username, id).await? {
            return Err(AppError::Conflict("Username already exists".into()));
        }
    }

    let password_hash = match data.password.as_deref() {
        Some(password) if password.len() < MIN_PASSWORD_LEN => {
            return Err(AppError::Validation(
                "Password must be at least 6 characters".into(),
            ))
        }
        Some(password) => Some(hash_password(password).map_err(AppError::Internal)?),
        None => None,
    };

    let updated = User::update_student(
        &state.db,
        id,
        data.username.as_deref(),
        data.full_name.as_deref(),
        password_hash.as_deref(),
    )
    .await?
    .ok_or(AppError::NotFound("Student"))?;

    // A changed password invalidates every session the student holds.
    if password_hash.is_some() {
        Session::revoke_all(&state.db, id).await?;
    }

    // Best-effort profile sync, same as signup.
    if data.username.is_some() || data.full_name.is_some() {
        let email = data.username.as_deref().map(profile_email);
        if let Err(e) = Profile::sync(
            &state.db,
            id,
            email.as_deref(),
            data.full_name.as_deref(),
        )
        .await
        {
            warn!(error = %e, user_id = %id, "profile sync failed after update");
        }
    }

    info!(user_id = %id, "student updated");
    Ok(Json(UpdateStudentResponse {
        student: PublicUser::from(&updated),
    })
    .into_response())
}

async fn reset_password(
    state: &AppState,
    id: Uuid,
    data: AdminData,
) -> Result<Response, AppError> {
    let new_password = data
        .new_password
        .as_deref()
        .ok_or_else(|| AppError::Validation("New password is required".into()))?;
    if new_password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(
            "Password must be at least 6 characters".into(),
        ));
    }

    let hash = hash_password(new_password).map_err(AppError::Internal)?;
    if !User::set_password_hash(&state.db, id, &hash).await? {
        return Err(AppError::NotFound("Student"));
    }

    // Critical: a stolen session must not outlive the password change.
    let revoked = Session::revoke_all(&state.db, id).await?;
    info!(user_id = %id, revoked, "password reset, sessions revoked");

    Ok(Json(MessageResponse {
        message: "Password reset successfully".into(),
    })
    .into_response())
}

async fn delete_student(state: &AppState, id: Uuid) -> Result<Response, AppError> {
    // Sessions and the account go in one transaction: no half-deleted state.
    let mut tx = state.db.begin().await.context("begin delete tx")?;
    Session::revoke_all_tx(&mut tx, id).await?;
    if !User::delete_student_tx(&mut tx, id).await? {
        return Err(AppError::NotFound("Student"));
    }
    tx.commit().await.context("commit delete tx")?;

    info!(user_id = %id, "student deleted");
    Ok(Json(MessageResponse {
        message: "Student deleted successfully".into(),
    })
    .into_response())
}
