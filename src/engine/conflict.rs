use ulid::Ulid;

use crate::config::AttendancePolicy;
use crate::model::*;

use super::EngineError;

/// Reject instants outside the supported calendar range.
pub(crate) fn validate_instant(t: Ms) -> Result<(), EngineError> {
    use crate::limits::*;
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&t) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// Reject empty/inverted spans and anything outside sane bounds.
pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if !span.is_valid() {
        return Err(EngineError::InvalidInterval {
            start: span.start,
            end: span.end,
        });
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// Does `person` actually have to be in the room for this assignment?
///
/// Pending assignments bind the assigned proctor. Confirmed and late ones bind
/// whoever checked in, falling back to the assigned proctor when an override
/// recorded nobody. A substitute binds only the recorded substitute, so an
/// unnamed one binds nobody. Absent ones bind nobody.
pub fn is_commitment_of(person: Ulid, a: &ExamAssignment) -> bool {
    match a.status {
        AttendanceStatus::Pending => a.assigned_proctor_id == person,
        AttendanceStatus::Absent => false,
        AttendanceStatus::Confirmed | AttendanceStatus::Late => {
            a.checked_in_by.unwrap_or(a.assigned_proctor_id) == person
        }
        AttendanceStatus::Substitute => a.checked_in_by == Some(person),
    }
}

/// First of `commitments` on the same local day as `candidate` that overlaps it.
/// Touching windows (`end == start`) are not a conflict.
pub fn find_conflict<'a>(
    candidate: &Span,
    commitments: impl IntoIterator<Item = &'a ExamAssignment>,
    policy: &AttendancePolicy,
) -> Option<&'a ExamAssignment> {
    commitments.into_iter().find(|a| {
        policy.same_day(a.window.start, candidate.start) && a.window.overlaps(candidate)
    })
}

pub fn has_conflict<'a>(
    candidate: &Span,
    commitments: impl IntoIterator<Item = &'a ExamAssignment>,
    policy: &AttendancePolicy,
) -> bool {
    find_conflict(candidate, commitments, policy).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = HOUR_MS;
    const M: Ms = MINUTE_MS;
    const BASE: Ms = 20_000 * DAY_MS;

    fn assignment(proctor: Ulid, start: Ms, end: Ms) -> ExamAssignment {
        ExamAssignment::new(Ulid::new(), Ulid::new(), proctor, None, Span::new(BASE + start, BASE + end))
    }

    fn window(start: Ms, end: Ms) -> Span {
        Span::new(BASE + start, BASE + end)
    }

    #[test]
    fn touching_is_not_a_conflict() {
        let p = Ulid::new();
        let mine = [assignment(p, 9 * H, 10 * H)];
        let policy = AttendancePolicy::default();
        assert!(!has_conflict(&window(10 * H, 11 * H), &mine, &policy));
        assert!(!has_conflict(&window(8 * H, 9 * H), &mine, &policy));
    }

    #[test]
    fn overlap_is_a_conflict() {
        let p = Ulid::new();
        let mine = [assignment(p, 9 * H, 10 * H + 30 * M)];
        let policy = AttendancePolicy::default();
        let hit = find_conflict(&window(10 * H, 11 * H), &mine, &policy);
        assert_eq!(hit.map(|a| a.id), Some(mine[0].id));
    }

    #[test]
    fn different_day_never_compared() {
        let p = Ulid::new();
        // Same clock time, next day.
        let mine = [assignment(p, DAY_MS + 9 * H, DAY_MS + 10 * H)];
        assert!(!has_conflict(&window(9 * H, 10 * H), &mine, &AttendancePolicy::default()));
    }

    #[test]
    fn validate_span_rejects_inverted() {
        let bad = Span { start: BASE + 10, end: BASE + 10 };
        assert!(matches!(validate_span(&bad), Err(EngineError::InvalidInterval { .. })));
        assert!(validate_span(&window(9 * H, 10 * H)).is_ok());
        assert!(matches!(validate_span(&Span::new(0, 10)), Err(EngineError::LimitExceeded(_))));
    }

    #[test]
    fn commitment_follows_check_in() {
        let assigned = Ulid::new();
        let sub = Ulid::new();
        let mut a = assignment(assigned, 9 * H, 10 * H);
        assert!(is_commitment_of(assigned, &a));
        assert!(!is_commitment_of(sub, &a));

        a.status = AttendanceStatus::Substitute;
        a.checked_in_by = Some(sub);
        assert!(!is_commitment_of(assigned, &a));
        assert!(is_commitment_of(sub, &a));

        a.status = AttendanceStatus::Absent;
        a.checked_in_by = None;
        assert!(!is_commitment_of(assigned, &a));
    }

    #[test]
    fn unnamed_substitute_binds_nobody() {
        let assigned = Ulid::new();
        let mut a = assignment(assigned, 9 * H, 10 * H);
        a.status = AttendanceStatus::Substitute;
        a.checked_in_by = None;
        assert!(!is_commitment_of(assigned, &a));

    }

    #[test]
    fn overridden_present_binds_assigned_proctor() {
        let assigned = Ulid::new();
        let mut a = assignment(assigned, 9 * H, 10 * H);
        a.status = AttendanceStatus::Late;
        a.checked_in_by = None;
        assert!(is_commitment_of(assigned, &a));
        assert!(!is_commitment_of(Ulid::new(), &a));
    }
}
