use time::OffsetDateTime;

/// Outcome of checking a renewal against the loan policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewCheck {
    Ok,
    LimitReached,
    Overdue,
}

/// A patron may borrow while holding fewer than `max_books` open loans.
pub fn under_borrow_limit(outstanding: i64, max_books: i64) -> bool {
    outstanding < max_books
}

/// Overdue is derived, never stored: an open loan past its due date.
pub fn is_overdue(returned: bool, due_date: OffsetDateTime, now: OffsetDateTime) -> bool {
    !returned && now > due_date
}

/// Renewal preconditions, in the order failures are reported.
pub fn check_renewal(
    renewed_count: i32,
    renewal_limit: i32,
    due_date: OffsetDateTime,
    now: OffsetDateTime,
) -> RenewCheck {
    if renewed_count >= renewal_limit {
        RenewCheck::LimitReached
    } else if now > due_date {
        RenewCheck::Overdue
    } else {
        RenewCheck::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn borrow_limit_boundary() {
        assert!(under_borrow_limit(0, 5));
        assert!(under_borrow_limit(4, 5));
        assert!(!under_borrow_limit(5, 5));
        assert!(!under_borrow_limit(6, 5));
    }

    #[test]
    fn overdue_only_for_open_loans_past_due() {
        let now = OffsetDateTime::now_utc();
        assert!(is_overdue(false, now - Duration::days(1), now));
        assert!(!is_overdue(false, now + Duration::days(1), now));
        // A returned loan is never overdue, whatever the due date was.
        assert!(!is_overdue(true, now - Duration::days(30), now));
    }

    #[test]
    fn renewal_allowed_exactly_once_with_limit_one() {
        let now = OffsetDateTime::now_utc();
        let due = now + Duration::days(7);
        assert_eq!(check_renewal(0, 1, due, now), RenewCheck::Ok);
        assert_eq!(check_renewal(1, 1, due, now), RenewCheck::LimitReached);
    }

    #[test]
    fn renewal_limit_reported_even_when_not_overdue() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(
            check_renewal(1, 1, now + Duration::days(7), now),
            RenewCheck::LimitReached
        );
    }

    #[test]
    fn overdue_loan_cannot_be_renewed() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(
            check_renewal(0, 1, now - Duration::days(1), now),
            RenewCheck::Overdue
        );
    }
}
