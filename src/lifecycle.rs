use chrono::{DateTime, Utc};

/// Stored status of a per-student assignment record.
///
/// `Late` and `Missing` are never stored: they are read-time
/// classifications derived from the due date (see [`display_status`]).
/// The exempt flag is orthogonal and lives on the record itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    NotStarted,
    InProgress,
    Submitted,
    Graded,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::NotStarted => "Not Started",
            Status::InProgress => "In Progress",
            Status::Submitted => "Submitted",
            Status::Graded => "Graded",
        }
    }

    pub fn parse(s: &str) -> Option<Status> {
        match s {
            "Not Started" => Some(Status::NotStarted),
            "In Progress" => Some(Status::InProgress),
            "Submitted" => Some(Status::Submitted),
            "Graded" => Some(Status::Graded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    AlreadySubmitted,
    AlreadyGraded,
    AlreadyExempt,
    NotNotStarted,
}

impl TransitionError {
    pub fn message(self) -> &'static str {
        match self {
            TransitionError::AlreadySubmitted => "assignment is already submitted",
            TransitionError::AlreadyGraded => "assignment is already graded",
            TransitionError::AlreadyExempt => "assignment is exempt",
            TransitionError::NotNotStarted => "assignment has already been started",
        }
    }
}

/// `Not Started -> In Progress`, rejected anywhere else.
pub fn check_start(status: Status, is_exempt: bool) -> Result<(), TransitionError> {
    if is_exempt {
        return Err(TransitionError::AlreadyExempt);
    }
    match status {
        Status::NotStarted => Ok(()),
        Status::Graded => Err(TransitionError::AlreadyGraded),
        Status::Submitted => Err(TransitionError::AlreadySubmitted),
        Status::InProgress => Err(TransitionError::NotNotStarted),
    }
}

/// `Not Started | In Progress -> Submitted`.
pub fn check_submit(status: Status, is_exempt: bool) -> Result<(), TransitionError> {
    if is_exempt {
        return Err(TransitionError::AlreadyExempt);
    }
    match status {
        Status::NotStarted | Status::InProgress => Ok(()),
        Status::Submitted => Err(TransitionError::AlreadySubmitted),
        Status::Graded => Err(TransitionError::AlreadyGraded),
    }
}

/// Grading is deliberately lenient: any stored status except Graded is
/// accepted, so work handed in outside the portal can still be graded.
pub fn check_grade(status: Status, is_exempt: bool) -> Result<(), TransitionError> {
    if is_exempt {
        return Err(TransitionError::AlreadyExempt);
    }
    match status {
        Status::Graded => Err(TransitionError::AlreadyGraded),
        _ => Ok(()),
    }
}

/// The exempt flag is settable from any non-Graded state and does not
/// touch the stored status.
pub fn check_exempt(status: Status, is_exempt: bool) -> Result<(), TransitionError> {
    if is_exempt {
        return Err(TransitionError::AlreadyExempt);
    }
    match status {
        Status::Graded => Err(TransitionError::AlreadyGraded),
        _ => Ok(()),
    }
}

/// Read-time classification shown to clients.
///
/// Past the due date, a record that was never submitted reads as
/// "Missing" (untouched) or "Late" (started but unfinished). Exempt
/// records read as "Exempt" regardless of stored status.
pub fn display_status(
    status: Status,
    is_exempt: bool,
    due_date: DateTime<Utc>,
    now: DateTime<Utc>,
) -> &'static str {
    if is_exempt {
        return "Exempt";
    }
    if now > due_date {
        match status {
            Status::NotStarted => return "Missing",
            Status::InProgress => return "Late",
            _ => {}
        }
    }
    status.as_str()
}

/// Eligibility for the upcoming-deadlines dashboard card: unfinished,
/// not exempt, and still due in the future.
pub fn counts_as_upcoming(
    status: Status,
    is_exempt: bool,
    due_date: DateTime<Utc>,
    now: DateTime<Utc>,
) -> bool {
    !is_exempt && due_date > now && !matches!(status, Status::Submitted | Status::Graded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ts: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(ts).expect("rfc3339").with_timezone(&Utc)
    }

    #[test]
    fn status_round_trips_through_strings() {
        for s in [
            Status::NotStarted,
            Status::InProgress,
            Status::Submitted,
            Status::Graded,
        ] {
            assert_eq!(Status::parse(s.as_str()), Some(s));
        }
        assert_eq!(Status::parse("Late"), None);
        assert_eq!(Status::parse("Missing"), None);
    }

    #[test]
    fn submit_allowed_only_before_submission() {
        assert!(check_submit(Status::NotStarted, false).is_ok());
        assert!(check_submit(Status::InProgress, false).is_ok());
        assert_eq!(
            check_submit(Status::Submitted, false),
            Err(TransitionError::AlreadySubmitted)
        );
        assert_eq!(
            check_submit(Status::Graded, false),
            Err(TransitionError::AlreadyGraded)
        );
        assert_eq!(
            check_submit(Status::NotStarted, true),
            Err(TransitionError::AlreadyExempt)
        );
    }

    #[test]
    fn grading_is_lenient_but_terminal() {
        assert!(check_grade(Status::NotStarted, false).is_ok());
        assert!(check_grade(Status::InProgress, false).is_ok());
        assert!(check_grade(Status::Submitted, false).is_ok());
        assert_eq!(
            check_grade(Status::Graded, false),
            Err(TransitionError::AlreadyGraded)
        );
        assert_eq!(
            check_grade(Status::Submitted, true),
            Err(TransitionError::AlreadyExempt)
        );
    }

    #[test]
    fn exempt_blocked_only_by_graded_or_repeat() {
        assert!(check_exempt(Status::NotStarted, false).is_ok());
        assert!(check_exempt(Status::Submitted, false).is_ok());
        assert_eq!(
            check_exempt(Status::Graded, false),
            Err(TransitionError::AlreadyGraded)
        );
        assert_eq!(
            check_exempt(Status::InProgress, true),
            Err(TransitionError::AlreadyExempt)
        );
    }

    #[test]
    fn overdue_classification_is_derived() {
        let due = at("2025-03-01T00:00:00Z");
        let before = at("2025-02-20T00:00:00Z");
        let after = at("2025-03-02T00:00:00Z");

        assert_eq!(display_status(Status::NotStarted, false, due, before), "Not Started");
        assert_eq!(display_status(Status::NotStarted, false, due, after), "Missing");
        assert_eq!(display_status(Status::InProgress, false, due, after), "Late");
        // Submitted and Graded never degrade.
        assert_eq!(display_status(Status::Submitted, false, due, after), "Submitted");
        assert_eq!(display_status(Status::Graded, false, due, after), "Graded");
        // Exempt wins over everything, stored status untouched.
        assert_eq!(display_status(Status::NotStarted, true, due, after), "Exempt");
    }

    #[test]
    fn upcoming_excludes_done_exempt_and_overdue() {
        let due = at("2025-03-01T00:00:00Z");
        let before = at("2025-02-20T00:00:00Z");
        let after = at("2025-03-02T00:00:00Z");

        assert!(counts_as_upcoming(Status::NotStarted, false, due, before));
        assert!(counts_as_upcoming(Status::InProgress, false, due, before));
        assert!(!counts_as_upcoming(Status::Submitted, false, due, before));
        assert!(!counts_as_upcoming(Status::Graded, false, due, before));
        assert!(!counts_as_upcoming(Status::NotStarted, true, due, before));
        assert!(!counts_as_upcoming(Status::NotStarted, false, due, after));
    }
}
