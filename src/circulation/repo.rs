use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "loan_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    CheckedOut,
    Returned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "reservation_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Waiting,
    AvailableForPickup,
    Expired,
    Fulfilled,
}

/// Catalog entry, reduced to what circulation needs.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Book {
    pub id: Uuid,
    pub title: String,
    pub isbn: Option<String>,
    pub total_copies: i32,
    pub available_copies: i32,
    pub created_at: OffsetDateTime,
}

/// Borrowing-eligible identity, linked to a user account by email convention
/// and created lazily on first borrow.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Patron {
    pub id: Uuid,
    pub patron_code: String,
    pub full_name: String,
    pub email: String,
    pub patron_type: String,
    pub status: String,
    pub created_at: OffsetDateTime,
}

/// One loan, checkout through return.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Loan {
    pub id: Uuid,
    pub book_id: Uuid,
    pub patron_id: Uuid,
    pub checkout_date: OffsetDateTime,
    pub due_date: OffsetDateTime,
    pub return_date: Option<OffsetDateTime>,
    pub status: LoanStatus,
    pub renewed_count: i32,
    pub checked_out_by: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Reservation {
    pub id: Uuid,
    pub book_id: Uuid,
    pub patron_id: Uuid,
    pub priority: i32,
    pub status: ReservationStatus,
    pub created_at: OffsetDateTime,
}

/// Loan row joined with its book title, for listings.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LoanWithBook {
    pub id: Uuid,
    pub book_id: Uuid,
    pub title: String,
    pub checkout_date: OffsetDateTime,
    pub due_date: OffsetDateTime,
    pub return_date: Option<OffsetDateTime>,
    pub status: LoanStatus,
    pub renewed_count: i32,
}

/// Aggregates shown to supervisors on the student-details view.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReadingStats {
    pub total_loans: i64,
    pub returned_loans: i64,
    pub distinct_books: i64,
    pub overdue_loans: i64,
}

impl Book {
    pub async fn find(db: &PgPool, id: Uuid) -> anyhow::Result<Option<Book>> {
        let book = sqlx::query_as::<_, Book>(
            r#"
            SELECT id, title, isbn, total_copies, available_copies, created_at
            FROM books
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(book)
    }

    /// Atomic conditional decrement: claims one copy only if one is left.
    /// The precondition lives in the WHERE clause, so two concurrent borrows
    /// can never both claim the last copy.
    pub async fn try_claim_copy(
        tx: &mut Transaction<'_, Postgres>,
        book_id: Uuid,
    ) -> anyhow::Result<bool> {
        let row: Option<(i32,)> = sqlx::query_as(
            r#"
            UPDATE books
            SET available_copies = available_copies - 1
            WHERE id = $1 AND available_copies > 0
            RETURNING available_copies
            "#,
        )
        .bind(book_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.is_some())
    }

    /// Guarded increment on return: never pushes the count past total_copies.
    pub async fn release_copy(
        tx: &mut Transaction<'_, Postgres>,
        book_id: Uuid,
    ) -> anyhow::Result<bool> {
        let row: Option<(i32,)> = sqlx::query_as(
            r#"
            UPDATE books
            SET available_copies = available_copies + 1
            WHERE id = $1 AND available_copies < total_copies
            RETURNING available_copies
            "#,
        )
        .bind(book_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.is_some())
    }
}

impl Patron {
    pub async fn find_by_email(db: &PgPool, email: &str) -> anyhow::Result<Option<Patron>> {
        let patron = sqlx::query_as::<_, Patron>(
            r#"
            SELECT id, patron_code, full_name, email, patron_type, status, created_at
            FROM patrons
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(patron)
    }

    /// Lazy creation on first borrow. ON CONFLICT keeps two concurrent first
    /// borrows from racing on the unique email.
    pub async fn find_or_create(
        tx: &mut Transaction<'_, Postgres>,
        email: &str,
        full_name: &str,
    ) -> anyhow::Result<Patron> {
        let patron = sqlx::query_as::<_, Patron>(
            r#"
            INSERT INTO patrons (patron_code, full_name, email, patron_type, status)
            VALUES ($1, $2, $3, 'Student', 'Active')
            ON CONFLICT (email) DO UPDATE SET email = EXCLUDED.email
            RETURNING id, patron_code, full_name, email, patron_type, status, created_at
            "#,
        )
        .bind(format!("P{}", Uuid::new_v4().simple()))
        .bind(full_name)
        .bind(email)
        .fetch_one(&mut **tx)
        .await?;
        Ok(patron)
    }
}

impl Loan {
    pub async fn find(db: &PgPool, id: Uuid) -> anyhow::Result<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>(
            r#"
            SELECT id, book_id, patron_id, checkout_date, due_date, return_date,
                   status, renewed_count, checked_out_by
            FROM circulation
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(loan)
    }

    /// Open loans held by the patron, counted inside the borrow transaction.
    pub async fn count_outstanding(
        tx: &mut Transaction<'_, Postgres>,
        patron_id: Uuid,
    ) -> anyhow::Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM circulation
            WHERE patron_id = $1 AND status = 'checked_out'
            "#,
        )
        .bind(patron_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(count)
    }

    pub async fn insert(
        tx: &mut Transaction<'_, Postgres>,
        book_id: Uuid,
        patron_id: Uuid,
        due_date: OffsetDateTime,
        checked_out_by: Option<Uuid>,
    ) -> anyhow::Result<Loan> {
        let loan = sqlx::query_as::<_, Loan>(
            r#"
            INSERT INTO circulation (book_id, patron_id, due_date, status, checked_out_by)
            VALUES ($1, $2, $3, 'checked_out', $4)
            RETURNING id, book_id, patron_id, checkout_date, due_date, return_date,
                      status, renewed_count, checked_out_by
            "#,
        )
        .bind(book_id)
        .bind(patron_id)
        .bind(due_date)
        .bind(checked_out_by)
        .fetch_one(&mut **tx)
        .await?;
        Ok(loan)
    }

    /// Flip to returned only if still checked out. A second return misses the
    /// WHERE clause and changes nothing, so the availability count cannot be
    /// double-incremented.
    pub async fn mark_returned(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> anyhow::Result<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>(
            r#"
            UPDATE circulation
            SET return_date = now(), status = 'returned'
            WHERE id = $1 AND status = 'checked_out'
            RETURNING id, book_id, patron_id, checkout_date, due_date, return_date,
                      status, renewed_count, checked_out_by
            "#,
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(loan)
    }

    /// Conditional renewal: all preconditions sit in the WHERE clause so the
    /// extension and the counter bump are one atomic statement.
    pub async fn try_renew(
        db: &PgPool,
        id: Uuid,
        extend_days: i64,
        renewal_limit: i32,
    ) -> anyhow::Result<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>(
            r#"
            UPDATE circulation
            SET due_date = due_date + make_interval(days => $2::int),
                renewed_count = renewed_count + 1
            WHERE id = $1
              AND status = 'checked_out'
              AND renewed_count < $3
              AND due_date > now()
            RETURNING id, book_id, patron_id, checkout_date, due_date, return_date,
                      status, renewed_count, checked_out_by
            "#,
        )
        .bind(id)
        .bind(extend_days as i32)
        .bind(renewal_limit)
        .fetch_optional(db)
        .await?;
        Ok(loan)
    }

    pub async fn list_for_patron(db: &PgPool, patron_id: Uuid) -> anyhow::Result<Vec<LoanWithBook>> {
        let loans = sqlx::query_as::<_, LoanWithBook>(
            r#"
            SELECT c.id, c.book_id, b.title, c.checkout_date, c.due_date,
                   c.return_date, c.status, c.renewed_count
            FROM circulation c
            JOIN books b ON b.id = c.book_id
            WHERE c.patron_id = $1
            ORDER BY c.checkout_date DESC
            "#,
        )
        .bind(patron_id)
        .fetch_all(db)
        .await?;
        Ok(loans)
    }

    pub async fn reading_stats(db: &PgPool, patron_id: Uuid) -> anyhow::Result<ReadingStats> {
        let stats = sqlx::query_as::<_, ReadingStats>(
            r#"
            SELECT COUNT(*) AS total_loans,
                   COUNT(return_date) AS returned_loans,
                   COUNT(DISTINCT book_id) AS distinct_books,
                   COUNT(*) FILTER (WHERE status = 'checked_out' AND due_date < now())
                       AS overdue_loans
            FROM circulation
            WHERE patron_id = $1
            "#,
        )
        .bind(patron_id)
        .fetch_one(db)
        .await?;
        Ok(stats)
    }
}

impl Reservation {
    /// Append at the back of the queue for this book.
    pub async fn append(
        tx: &mut Transaction<'_, Postgres>,
        book_id: Uuid,
        patron_id: Uuid,
    ) -> anyhow::Result<Reservation> {
        let reservation = sqlx::query_as::<_, Reservation>(
            r#"
            INSERT INTO reservations (book_id, patron_id, priority, status)
            VALUES (
                $1, $2,
                COALESCE((SELECT MAX(priority) + 1 FROM reservations WHERE book_id = $1), 1),
                'waiting'
            )
            RETURNING id, book_id, patron_id, priority, status, created_at
            "#,
        )
        .bind(book_id)
        .bind(patron_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(reservation)
    }

    /// Offer a just-returned copy to the head of the waiting queue.
    /// SKIP LOCKED keeps two concurrent returns from offering to the same row.
    pub async fn offer_next_waiting(
        tx: &mut Transaction<'_, Postgres>,
        book_id: Uuid,
    ) -> anyhow::Result<Option<Reservation>> {
        let reservation = sqlx::query_as::<_, Reservation>(
            r#"
            UPDATE reservations
            SET status = 'available_for_pickup'
            WHERE id = (
                SELECT id FROM reservations
                WHERE book_id = $1 AND status = 'waiting'
                ORDER BY priority ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, book_id, patron_id, priority, status, created_at
            "#,
        )
        .bind(book_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(reservation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loan_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&LoanStatus::CheckedOut).unwrap(),
            "\"checked_out\""
        );
        assert_eq!(
            serde_json::to_string(&LoanStatus::Returned).unwrap(),
            "\"returned\""
        );
    }

    #[test]
    fn reservation_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&ReservationStatus::AvailableForPickup).unwrap(),
            "\"available_for_pickup\""
        );
    }
}
