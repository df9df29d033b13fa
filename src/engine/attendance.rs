use ulid::Ulid;

use crate::config::AttendancePolicy;
use crate::limits::{CODE_LEN, MAX_REMARKS_LEN};
use crate::model::*;

use super::EngineError;

// ── Attendance state machine ──────────────────────────────────────
//
//   pending ──check-in──▶ confirmed | late | substitute
//      │
//      └──sweep (window over, no check-in)──▶ absent
//
// Terminal states only move again through an administrative reset or override.

const CODE_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Draw a fresh code from the random half of a ULID (Crockford base32).
pub fn generate_code() -> String {
    let mut bits = Ulid::new().random();
    let mut code = String::with_capacity(CODE_LEN);
    for _ in 0..CODE_LEN {
        code.push(CODE_ALPHABET[(bits & 0x1f) as usize] as char);
        bits >>= 5;
    }
    code
}

/// Codes are typed by hand; compare them case-insensitively and without padding.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

pub fn classify(a: &ExamAssignment, person: Ulid) -> Classification {
    if a.assigned_proctor_id == person {
        Classification::AssignedMatch
    } else {
        Classification::AssignedMismatch
    }
}

/// Check `code` against the assignment's live code and classify `person`.
/// A code on a finalized assignment has expired. Does not change any state.
pub fn verify(a: &ExamAssignment, code: &str, person: Ulid) -> Result<Classification, EngineError> {
    match a.live_code() {
        Some(live) if !a.status.is_terminal() && live == normalize_code(code) => Ok(classify(a, person)),
        _ => Err(EngineError::CodeNotFound),
    }
}

pub(crate) fn clean_remarks(remarks: Option<&str>) -> Option<&str> {
    remarks.map(str::trim).filter(|r| !r.is_empty())
}

/// Decide the status a check-in would produce, without committing it.
pub fn plan_check_in(
    a: &ExamAssignment,
    role: CheckInRole,
    remarks: Option<&str>,
    now: Ms,
    policy: &AttendancePolicy,
) -> Result<AttendanceStatus, EngineError> {
    if a.status.is_terminal() {
        return Err(EngineError::AlreadyFinalized { id: a.id, status: a.status });
    }
    if a.live_code().is_none() {
        return Err(EngineError::CodeNotFound);
    }
    if let Some(r) = remarks
        && r.len() > MAX_REMARKS_LEN {
            return Err(EngineError::LimitExceeded("remarks too long"));
        }
    if role == CheckInRole::Substitute && clean_remarks(remarks).is_none() {
        return Err(EngineError::MissingRemarks);
    }

    Ok(if policy.is_late(&a.window, now) {
        AttendanceStatus::Late
    } else {
        match role {
            CheckInRole::Assigned => AttendanceStatus::Confirmed,
            CheckInRole::Substitute => AttendanceStatus::Substitute,
        }
    })
}

/// Validate and commit a check-in on a snapshot.
pub fn confirm(
    a: &mut ExamAssignment,
    role: CheckInRole,
    remarks: Option<&str>,
    checked_in_by: Option<Ulid>,
    now: Ms,
    policy: &AttendancePolicy,
) -> Result<AttendanceStatus, EngineError> {
    let status = plan_check_in(a, role, remarks, now, policy)?;
    record_check_in(a, status, checked_in_by, now, clean_remarks(remarks).map(str::to_string));
    Ok(status)
}

pub fn is_absent_due(a: &ExamAssignment, now: Ms) -> bool {
    a.status == AttendanceStatus::Pending && a.code_entry_time.is_none() && a.window.end < now
}

/// Mark every overdue pending assignment absent. Returns the ids that changed;
/// running it again on the same data changes nothing.
pub fn absence_sweep(assignments: &mut [ExamAssignment], now: Ms) -> Vec<Ulid> {
    let mut updated = Vec::new();
    for a in assignments.iter_mut() {
        if is_absent_due(a, now) {
            mark_absent(a);
            updated.push(a.id);
        }
    }
    updated
}

// ── Transitions (shared by snapshot callers and WAL replay) ───────

pub(crate) fn record_check_in(
    a: &mut ExamAssignment,
    status: AttendanceStatus,
    checked_in_by: Option<Ulid>,
    at: Ms,
    remarks: Option<String>,
) {
    a.status = status;
    a.code_entry_time = Some(at);
    a.code_consumed = true;
    a.checked_in_by = checked_in_by;
    a.remarks = remarks;
}

pub(crate) fn mark_absent(a: &mut ExamAssignment) {
    a.status = AttendanceStatus::Absent;
}

pub(crate) fn issue_code(a: &mut ExamAssignment, code: String) {
    a.one_time_code = Some(code);
    a.code_consumed = false;
}

/// Administrative reset: back to pending with no code.
pub(crate) fn reset(a: &mut ExamAssignment) {
    a.one_time_code = None;
    a.code_consumed = false;
    a.status = AttendanceStatus::Pending;
    a.code_entry_time = None;
    a.remarks = None;
    a.checked_in_by = None;
}

pub(crate) fn override_status(a: &mut ExamAssignment, status: AttendanceStatus, remarks: Option<String>) {
    a.status = status;
    if remarks.is_some() {
        a.remarks = remarks;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = HOUR_MS;
    const M: Ms = MINUTE_MS;
    const S: Ms = SECOND_MS;

    fn coded(proctor: Ulid) -> ExamAssignment {
        let mut a = ExamAssignment::new(Ulid::new(), Ulid::new(), proctor, None, Span::new(9 * H, 10 * H));
        issue_code(&mut a, "K7M2QX9P".into());
        a
    }

    #[test]
    fn generated_codes_use_the_alphabet() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.len(), CODE_LEN);
            assert!(code.bytes().all(|c| CODE_ALPHABET.contains(&c)), "bad code {code}");
        }
    }

    #[test]
    fn verify_classifies_person() {
        let p = Ulid::new();
        let a = coded(p);
        assert_eq!(verify(&a, "K7M2QX9P", p).unwrap(), Classification::AssignedMatch);
        assert_eq!(verify(&a, " k7m2qx9p ", Ulid::new()).unwrap(), Classification::AssignedMismatch);
        assert!(matches!(verify(&a, "WRONG000", p), Err(EngineError::CodeNotFound)));
    }

    #[test]
    fn verify_does_not_change_state() {
        let p = Ulid::new();
        let a = coded(p);
        let before = a.clone();
        let _ = verify(&a, "K7M2QX9P", p);
        assert_eq!(a, before);
    }

    #[test]
    fn confirm_assigned_on_time() {
        let p = Ulid::new();
        let mut a = coded(p);
        let policy = AttendancePolicy::default();
        let st = confirm(&mut a, CheckInRole::Assigned, None, Some(p), 9 * H + 2 * M, &policy).unwrap();
        assert_eq!(st, AttendanceStatus::Confirmed);
        assert_eq!(a.code_entry_time, Some(9 * H + 2 * M));
        assert!(a.code_consumed);
        assert!(matches!(verify(&a, "K7M2QX9P", p), Err(EngineError::CodeNotFound)));
    }

    #[test]
    fn lateness_boundary() {
        let policy = AttendancePolicy::default();
        let p = Ulid::new();
        let start = 9 * H;

        let mut a = coded(p);
        let st = confirm(&mut a, CheckInRole::Assigned, None, Some(p), start + 6 * M + 59 * S, &policy).unwrap();
        assert_eq!(st, AttendanceStatus::Confirmed);

        let mut a = coded(p);
        let st = confirm(&mut a, CheckInRole::Substitute, Some("covering"), Some(Ulid::new()), start + 6 * M + 59 * S, &policy).unwrap();
        assert_eq!(st, AttendanceStatus::Substitute);

        let mut a = coded(p);
        let st = confirm(&mut a, CheckInRole::Assigned, None, Some(p), start + 7 * M + S, &policy).unwrap();
        assert_eq!(st, AttendanceStatus::Late);

        let mut a = coded(p);
        let st = confirm(&mut a, CheckInRole::Substitute, Some("covering"), Some(Ulid::new()), start + 7 * M + S, &policy).unwrap();
        assert_eq!(st, AttendanceStatus::Late);
    }

    #[test]
    fn substitute_requires_remarks() {
        let policy = AttendancePolicy::default();
        let mut a = coded(Ulid::new());
        for remarks in [None, Some(""), Some("   ")] {
            let r = confirm(&mut a, CheckInRole::Substitute, remarks, Some(Ulid::new()), 9 * H, &policy);
            assert!(matches!(r, Err(EngineError::MissingRemarks)));
        }
        assert_eq!(a.status, AttendanceStatus::Pending);
        assert!(!a.code_consumed);
    }

    #[test]
    fn second_confirm_is_already_finalized() {
        let policy = AttendancePolicy::default();
        let p = Ulid::new();
        let mut a = coded(p);
        confirm(&mut a, CheckInRole::Assigned, None, Some(p), 9 * H, &policy).unwrap();
        let again = confirm(&mut a, CheckInRole::Substitute, Some("late swap"), Some(Ulid::new()), 9 * H + M, &policy);
        assert!(matches!(again, Err(EngineError::AlreadyFinalized { status: AttendanceStatus::Confirmed, .. })));
        assert_eq!(a.checked_in_by, Some(p));
    }

    #[test]
    fn confirm_without_code_fails() {
        let policy = AttendancePolicy::default();
        let mut a = ExamAssignment::new(Ulid::new(), Ulid::new(), Ulid::new(), None, Span::new(9 * H, 10 * H));
        let r = confirm(&mut a, CheckInRole::Assigned, None, None, 9 * H, &policy);
        assert!(matches!(r, Err(EngineError::CodeNotFound)));
    }

    #[test]
    fn sweep_is_idempotent() {
        let p = Ulid::new();
        let mut all = vec![coded(p), coded(p), coded(p)];
        all[2].window = Span::new(11 * H, 12 * H);
        let policy = AttendancePolicy::default();
        confirm(&mut all[1], CheckInRole::Assigned, None, Some(p), 9 * H, &policy).unwrap();

        let first = absence_sweep(&mut all, 10 * H + 1);
        assert_eq!(first, vec![all[0].id]);
        assert_eq!(all[0].status, AttendanceStatus::Absent);
        assert_eq!(all[1].status, AttendanceStatus::Confirmed);
        assert_eq!(all[2].status, AttendanceStatus::Pending);

        let second = absence_sweep(&mut all, 10 * H + 1);
        assert!(second.is_empty());
    }

    #[test]
    fn sweep_waits_for_window_end() {
        let mut all = vec![coded(Ulid::new())];
        // end is exclusive but "over" means strictly after it
        assert!(absence_sweep(&mut all, 10 * H).is_empty());
        assert_eq!(absence_sweep(&mut all, 10 * H + 1).len(), 1);
    }

    #[test]
    fn reset_returns_to_pending() {
        let policy = AttendancePolicy::default();
        let p = Ulid::new();
        let mut a = coded(p);
        confirm(&mut a, CheckInRole::Substitute, Some("swap"), Some(Ulid::new()), 9 * H, &policy).unwrap();
        reset(&mut a);
        assert_eq!(a.status, AttendanceStatus::Pending);
        assert_eq!(a.one_time_code, None);
        assert_eq!(a.code_entry_time, None);
        assert_eq!(a.remarks, None);
        assert_eq!(a.checked_in_by, None);
    }
}
