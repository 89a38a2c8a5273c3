use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::circulation::policy;
use crate::circulation::repo::{Loan, LoanStatus, LoanWithBook, Reservation, ReservationStatus};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BorrowRequest {
    pub book_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveRequest {
    pub book_id: Uuid,
}

/// Loan as shown to clients, with the derived overdue flag.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanView {
    pub id: Uuid,
    pub book_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub checkout_date: OffsetDateTime,
    pub due_date: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_date: Option<OffsetDateTime>,
    pub status: LoanStatus,
    pub renewed_count: i32,
    pub overdue: bool,
}

impl LoanView {
    pub fn from_loan(loan: &Loan, title: Option<&str>, now: OffsetDateTime) -> Self {
        Self {
            id: loan.id,
            book_id: loan.book_id,
            title: title.map(str::to_owned),
            checkout_date: loan.checkout_date,
            due_date: loan.due_date,
            return_date: loan.return_date,
            status: loan.status,
            renewed_count: loan.renewed_count,
            overdue: policy::is_overdue(
                loan.status == LoanStatus::Returned,
                loan.due_date,
                now,
            ),
        }
    }
}

impl From<LoanWithBook> for LoanView {
    fn from(row: LoanWithBook) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: row.id,
            book_id: row.book_id,
            title: Some(row.title),
            checkout_date: row.checkout_date,
            due_date: row.due_date,
            return_date: row.return_date,
            status: row.status,
            renewed_count: row.renewed_count,
            overdue: policy::is_overdue(row.status == LoanStatus::Returned, row.due_date, now),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BorrowResponse {
    pub message: String,
    pub loan: LoanView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationView {
    pub id: Uuid,
    pub book_id: Uuid,
    pub priority: i32,
    pub status: ReservationStatus,
}

impl From<&Reservation> for ReservationView {
    fn from(r: &Reservation) -> Self {
        Self {
            id: r.id,
            book_id: r.book_id,
            priority: r.priority,
            status: r.status,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveResponse {
    pub message: String,
    pub reservation: ReservationView,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn open_loan(due_offset: Duration) -> Loan {
        let now = OffsetDateTime::now_utc();
        Loan {
            id: Uuid::new_v4(),
            book_id: Uuid::new_v4(),
            patron_id: Uuid::new_v4(),
            checkout_date: now - Duration::days(1),
            due_date: now + due_offset,
            return_date: None,
            status: LoanStatus::CheckedOut,
            renewed_count: 0,
            checked_out_by: None,
        }
    }

    #[test]
    fn overdue_flag_is_derived_not_stored() {
        let now = OffsetDateTime::now_utc();
        let late = open_loan(Duration::days(-2));
        let view = LoanView::from_loan(&late, None, now);
        assert_eq!(view.status, LoanStatus::CheckedOut);
        assert!(view.overdue);

        let on_time = open_loan(Duration::days(2));
        assert!(!LoanView::from_loan(&on_time, None, now).overdue);
    }

    #[test]
    fn borrow_request_parses_camel_case() {
        let id = Uuid::new_v4();
        let req: BorrowRequest =
            serde_json::from_str(&format!(r#"{{"bookId":"{id}"}}"#)).unwrap();
        assert_eq!(req.book_id, id);
    }
}
