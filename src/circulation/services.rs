use anyhow::Context;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::repo::{profile_email, Role, User};
use crate::circulation::policy::{self, RenewCheck};
use crate::circulation::repo::{
    Book, Loan, LoanStatus, LoanWithBook, Patron, Reservation,
};
use crate::error::{AppError, BorrowDenied};
use crate::state::AppState;

/// Borrow one copy of a book for the calling user's patron identity.
///
/// The whole sequence (patron lookup, limit check, copy claim, loan insert)
/// runs in one transaction, and the copy claim is a conditional update. An
/// aborted request rolls back as a unit; concurrent borrows of the last copy
/// cannot both succeed.
pub async fn borrow(
    state: &AppState,
    caller: &User,
    book_id: Uuid,
) -> Result<(Loan, Book), AppError> {
    let book = Book::find(&state.db, book_id)
        .await?
        .ok_or(AppError::NotFound("Book"))?;

    let mut tx = state.db.begin().await.context("begin borrow tx")?;

    let patron = Patron::find_or_create(
        &mut tx,
        &profile_email(&caller.username),
        &caller.full_name,
    )
    .await?;

    let outstanding = Loan::count_outstanding(&mut tx, patron.id).await?;
    if !policy::under_borrow_limit(outstanding, state.config.loans.max_books_per_patron) {
        return Err(AppError::CannotBorrow(BorrowDenied::LimitExceeded));
    }

    if !Book::try_claim_copy(&mut tx, book_id).await? {
        return Err(AppError::CannotBorrow(BorrowDenied::NoCopiesAvailable));
    }

    let due_date =
        OffsetDateTime::now_utc() + Duration::days(state.config.loans.loan_period_days);
    let loan = Loan::insert(&mut tx, book_id, patron.id, due_date, Some(caller.id)).await?;

    tx.commit().await.context("commit borrow tx")?;

    info!(loan_id = %loan.id, book_id = %book_id, patron_id = %patron.id, "book borrowed");
    Ok((loan, book))
}

/// Return a loan: flip it to returned, release the copy, and offer it to the
/// head of the reservation queue, all in one transaction.
pub async fn return_loan(
    state: &AppState,
    caller: &User,
    loan_id: Uuid,
) -> Result<Loan, AppError> {
    let loan = Loan::find(&state.db, loan_id)
        .await?
        .ok_or(AppError::NotFound("Circulation record"))?;
    authorize_loan_access(state, caller, &loan).await?;

    if loan.status == LoanStatus::Returned {
        return Err(AppError::AlreadyReturned);
    }

    let mut tx = state.db.begin().await.context("begin return tx")?;

    // Conditional: a racing return already flipped the row, reject it too.
    let Some(updated) = Loan::mark_returned(&mut tx, loan_id).await? else {
        return Err(AppError::AlreadyReturned);
    };

    if !Book::release_copy(&mut tx, updated.book_id).await? {
        // Only reachable if the availability invariant was already broken.
        warn!(book_id = %updated.book_id, "available_copies already at total on return");
    }

    if let Some(reservation) = Reservation::offer_next_waiting(&mut tx, updated.book_id).await? {
        info!(
            reservation_id = %reservation.id,
            patron_id = %reservation.patron_id,
            "returned copy offered to next reservation"
        );
    }

    tx.commit().await.context("commit return tx")?;

    info!(loan_id = %loan_id, book_id = %updated.book_id, "book returned");
    Ok(updated)
}

/// Renew a loan once within policy. The extension is a single conditional
/// update; on a miss, the fresh row tells us which precondition failed.
pub async fn renew_loan(
    state: &AppState,
    caller: &User,
    loan_id: Uuid,
) -> Result<Loan, AppError> {
    let loan = Loan::find(&state.db, loan_id)
        .await?
        .ok_or(AppError::NotFound("Circulation record"))?;
    authorize_loan_access(state, caller, &loan).await?;

    let loans = &state.config.loans;
    if let Some(renewed) =
        Loan::try_renew(&state.db, loan_id, loans.loan_period_days, loans.renewal_limit).await?
    {
        info!(loan_id = %loan_id, renewed_count = renewed.renewed_count, "loan renewed");
        return Ok(renewed);
    }

    let loan = Loan::find(&state.db, loan_id)
        .await?
        .ok_or(AppError::NotFound("Circulation record"))?;
    if loan.status == LoanStatus::Returned {
        return Err(AppError::AlreadyReturned);
    }
    match policy::check_renewal(
        loan.renewed_count,
        loans.renewal_limit,
        loan.due_date,
        OffsetDateTime::now_utc(),
    ) {
        RenewCheck::LimitReached => Err(AppError::RenewalLimitExceeded),
        RenewCheck::Overdue => Err(AppError::Overdue),
        RenewCheck::Ok => Err(AppError::Internal(anyhow::anyhow!(
            "renewal conditions changed concurrently"
        ))),
    }
}

/// Join the reservation queue for a book at the next priority slot.
pub async fn reserve(
    state: &AppState,
    caller: &User,
    book_id: Uuid,
) -> Result<Reservation, AppError> {
    Book::find(&state.db, book_id)
        .await?
        .ok_or(AppError::NotFound("Book"))?;

    let mut tx = state.db.begin().await.context("begin reserve tx")?;
    let patron = Patron::find_or_create(
        &mut tx,
        &profile_email(&caller.username),
        &caller.full_name,
    )
    .await?;
    let reservation = Reservation::append(&mut tx, book_id, patron.id).await?;
    tx.commit().await.context("commit reserve tx")?;

    info!(reservation_id = %reservation.id, book_id = %book_id, "reservation queued");
    Ok(reservation)
}

/// The caller's own circulation history, newest first. A user who has never
/// borrowed has no patron record yet, which is simply an empty history.
pub async fn my_loans(state: &AppState, caller: &User) -> Result<Vec<LoanWithBook>, AppError> {
    let email = profile_email(&caller.username);
    let Some(patron) = Patron::find_by_email(&state.db, &email).await? else {
        return Ok(Vec::new());
    };
    Ok(Loan::list_for_patron(&state.db, patron.id).await?)
}

/// Students may only touch their own loans; staff and supervisors may act on
/// any record. The check runs server-side regardless of what the UI shows.
async fn authorize_loan_access(
    state: &AppState,
    caller: &User,
    loan: &Loan,
) -> Result<(), AppError> {
    if caller.role != Role::Student {
        return Ok(());
    }
    let email = profile_email(&caller.username);
    let owns = Patron::find_by_email(&state.db, &email)
        .await?
        .map(|p| p.id == loan.patron_id)
        .unwrap_or(false);
    if owns {
        Ok(())
    } else {
        warn!(user_id = %caller.id, loan_id = %loan.id, "student touched another patron's loan");
        Err(AppError::Forbidden(
            "Access denied. This loan belongs to another patron.".into(),
        ))
    }
}

// Run against a scratch Postgres:
//   DATABASE_URL=postgres://... cargo test -- --ignored
#[cfg(test)]
mod db_tests {
    use super::*;
    use crate::config::{AppConfig, JwtConfig, LoanConfig};
    use sqlx::postgres::PgPoolOptions;
    use sqlx::PgPool;
    use std::sync::Arc;

    async fn state_from_env() -> AppState {
        let url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must point at a scratch database");
        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(&url)
            .await
            .expect("connect to test database");
        sqlx::migrate!("./migrations")
            .run(&db)
            .await
            .expect("apply migrations");
        AppState {
            db,
            config: Arc::new(AppConfig {
                database_url: url,
                jwt: JwtConfig {
                    secret: "test-secret".into(),
                    issuer: "test".into(),
                    audience: "test".into(),
                    ttl_hours: 24,
                },
                loans: LoanConfig {
                    loan_period_days: 14,
                    renewal_limit: 1,
                    max_books_per_patron: 5,
                },
            }),
        }
    }

    async fn make_user(db: &PgPool, role: Role) -> User {
        let name = format!("u{}", &Uuid::new_v4().simple().to_string()[..12]);
        User::create(db, &name, "not-a-real-digest", "Test User", role)
            .await
            .expect("create user")
    }

    async fn make_book(db: &PgPool, copies: i32) -> Uuid {
        let (id,): (Uuid,) = sqlx::query_as(
            "INSERT INTO books (title, total_copies, available_copies) \
             VALUES ($1, $2, $2) RETURNING id",
        )
        .bind(format!("Test Book {}", Uuid::new_v4()))
        .bind(copies)
        .fetch_one(db)
        .await
        .expect("insert book");
        id
    }

    async fn available(db: &PgPool, book_id: Uuid) -> i32 {
        let (n,): (i32,) =
            sqlx::query_as("SELECT available_copies FROM books WHERE id = $1")
                .bind(book_id)
                .fetch_one(db)
                .await
                .expect("read availability");
        n
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL pointing at a scratch Postgres"]
    async fn concurrent_borrows_grant_exactly_one_copy() {
        let state = state_from_env().await;
        let book_id = make_book(&state.db, 1).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let state = state.clone();
            let user = make_user(&state.db, Role::Student).await;
            handles.push(tokio::spawn(
                async move { borrow(&state, &user, book_id).await },
            ));
        }

        let mut granted = 0;
        let mut denied = 0;
        for handle in handles {
            match handle.await.expect("task") {
                Ok(_) => granted += 1,
                Err(AppError::CannotBorrow(BorrowDenied::NoCopiesAvailable)) => denied += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(granted, 1);
        assert_eq!(denied, 7);
        assert_eq!(available(&state.db, book_id).await, 0);
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL pointing at a scratch Postgres"]
    async fn double_return_is_rejected_without_count_drift() {
        let state = state_from_env().await;
        let book_id = make_book(&state.db, 3).await;
        let user = make_user(&state.db, Role::Student).await;

        let (loan, _) = borrow(&state, &user, book_id).await.expect("borrow");
        assert_eq!(available(&state.db, book_id).await, 2);

        return_loan(&state, &user, loan.id).await.expect("first return");
        assert_eq!(available(&state.db, book_id).await, 3);

        let err = return_loan(&state, &user, loan.id).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyReturned));
        assert_eq!(available(&state.db, book_id).await, 3);
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL pointing at a scratch Postgres"]
    async fn renew_succeeds_exactly_once_with_limit_one() {
        let state = state_from_env().await;
        let book_id = make_book(&state.db, 1).await;
        let user = make_user(&state.db, Role::Student).await;

        let (loan, _) = borrow(&state, &user, book_id).await.expect("borrow");

        let renewed = renew_loan(&state, &user, loan.id).await.expect("first renewal");
        assert_eq!(renewed.renewed_count, 1);
        assert!(renewed.due_date > loan.due_date);

        let err = renew_loan(&state, &user, loan.id).await.unwrap_err();
        assert!(matches!(err, AppError::RenewalLimitExceeded));
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL pointing at a scratch Postgres"]
    async fn borrow_limit_rejects_the_sixth_loan() {
        let state = state_from_env().await;
        let user = make_user(&state.db, Role::Student).await;

        for _ in 0..5 {
            let book_id = make_book(&state.db, 1).await;
            borrow(&state, &user, book_id).await.expect("borrow under limit");
        }

        let extra = make_book(&state.db, 1).await;
        let err = borrow(&state, &user, extra).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::CannotBorrow(BorrowDenied::LimitExceeded)
        ));
        // The rejected borrow must not have claimed the copy.
        assert_eq!(available(&state.db, extra).await, 1);
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL pointing at a scratch Postgres"]
    async fn return_offers_copy_to_next_reservation() {
        let state = state_from_env().await;
        let book_id = make_book(&state.db, 1).await;
        let borrower = make_user(&state.db, Role::Student).await;
        let waiter = make_user(&state.db, Role::Student).await;

        let (loan, _) = borrow(&state, &borrower, book_id).await.expect("borrow");
        let reservation = reserve(&state, &waiter, book_id).await.expect("reserve");
        assert_eq!(reservation.status, crate::circulation::repo::ReservationStatus::Waiting);

        return_loan(&state, &borrower, loan.id).await.expect("return");

        let (status,): (crate::circulation::repo::ReservationStatus,) =
            sqlx::query_as("SELECT status FROM reservations WHERE id = $1")
                .bind(reservation.id)
                .fetch_one(&state.db)
                .await
                .expect("read reservation");
        assert_eq!(
            status,
            crate::circulation::repo::ReservationStatus::AvailableForPickup
        );
    }
}
