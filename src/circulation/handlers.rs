use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    auth::extractors::CurrentUser,
    circulation::{
        dto::{
            BorrowRequest, BorrowResponse, LoanView, ReservationView, ReserveRequest,
            ReserveResponse,
        },
        services,
    },
    error::AppError,
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/circulation/borrow", post(borrow))
        .route("/circulation/reserve", post(reserve))
        .route("/circulation/mine", get(my_loans))
        .route("/circulation/:id/return", post(return_loan))
        .route("/circulation/:id/renew", post(renew_loan))
}

#[instrument(skip(state, current, payload))]
pub async fn borrow(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(payload): Json<BorrowRequest>,
) -> Result<(StatusCode, Json<BorrowResponse>), AppError> {
    let (loan, book) = services::borrow(&state, &current.user, payload.book_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(BorrowResponse {
            message: format!("Successfully borrowed \"{}\"", book.title),
            loan: LoanView::from_loan(&loan, Some(&book.title), OffsetDateTime::now_utc()),
        }),
    ))
}

#[instrument(skip(state, current))]
pub async fn return_loan(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<LoanView>, AppError> {
    let loan = services::return_loan(&state, &current.user, id).await?;
    Ok(Json(LoanView::from_loan(
        &loan,
        None,
        OffsetDateTime::now_utc(),
    )))
}

#[instrument(skip(state, current))]
pub async fn renew_loan(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<LoanView>, AppError> {
    let loan = services::renew_loan(&state, &current.user, id).await?;
    Ok(Json(LoanView::from_loan(
        &loan,
        None,
        OffsetDateTime::now_utc(),
    )))
}

#[instrument(skip(state, current, payload))]
pub async fn reserve(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(payload): Json<ReserveRequest>,
) -> Result<(StatusCode, Json<ReserveResponse>), AppError> {
    let reservation = services::reserve(&state, &current.user, payload.book_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(ReserveResponse {
            message: "Reservation created".into(),
            reservation: ReservationView::from(&reservation),
        }),
    ))
}

#[instrument(skip(state, current))]
pub async fn my_loans(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<Vec<LoanView>>, AppError> {
    let loans = services::my_loans(&state, &current.user).await?;
    Ok(Json(loans.into_iter().map(LoanView::from).collect()))
}
