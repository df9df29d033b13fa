use ulid::Ulid;

use crate::config::AttendancePolicy;
use crate::model::*;

use super::conflict::{has_conflict, is_commitment_of};

/// Assignments `person` may check in to as a substitute.
///
/// Excluded: assignments already theirs, assignments clashing with any of
/// their own same-day commitments, and assignments whose attendance is
/// already final. Exams that are not running right now are still included.
pub fn find_substitution_candidates(
    person: Ulid,
    all: &[ExamAssignment],
    policy: &AttendancePolicy,
) -> Vec<ExamAssignment> {
    let own: Vec<&ExamAssignment> = all.iter().filter(|a| is_commitment_of(person, a)).collect();

    all.iter()
        .filter(|a| a.assigned_proctor_id != person)
        .filter(|a| !a.status.is_terminal())
        .filter(|a| !has_conflict(&a.window, own.iter().copied(), policy))
        .cloned()
        .collect()
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

    fn ids(list: &[ExamAssignment]) -> Vec<Ulid> {
        list.iter().map(|a| a.id).collect()
    }

    #[test]
    fn person_p_scenario() {
        let p = Ulid::new();
        let other = Ulid::new();
        let a = assignment(p, 9 * H, 10 * H);
        let b = assignment(other, 9 * H + 30 * M, 10 * H + 30 * M);
        let c = assignment(other, 11 * H, 12 * H);
        let all = vec![a.clone(), b.clone(), c.clone()];

        let got = ids(&find_substitution_candidates(p, &all, &AttendancePolicy::default()));
        assert!(!got.contains(&a.id), "own assignment listed");
        assert!(!got.contains(&b.id), "conflicting assignment listed");
        assert_eq!(got, vec![c.id]);
    }

    #[test]
    fn finalized_assignments_excluded() {
        let p = Ulid::new();
        let other = Ulid::new();
        let mut all = Vec::new();
        for status in AttendanceStatus::ALL {
            let mut a = assignment(other, 13 * H, 14 * H);
            a.status = status;
            all.push(a);
        }
        let got = find_substitution_candidates(p, &all, &AttendancePolicy::default());
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].status, AttendanceStatus::Pending);
    }

    #[test]
    fn touching_assignment_is_eligible() {
        let p = Ulid::new();
        let other = Ulid::new();
        let all = vec![assignment(p, 9 * H, 10 * H), assignment(other, 10 * H, 11 * H)];
        let got = find_substitution_candidates(p, &all, &AttendancePolicy::default());
        assert_eq!(ids(&got), vec![all[1].id]);
    }

    #[test]
    fn substitute_commitments_count_as_own() {
        let p = Ulid::new();
        let other = Ulid::new();
        let mut covered = assignment(other, 9 * H, 10 * H);
        covered.status = AttendanceStatus::Substitute;
        covered.checked_in_by = Some(p);
        let clash = assignment(Ulid::new(), 9 * H + 15 * M, 9 * H + 45 * M);
        let all = vec![covered, clash];
        assert!(find_substitution_candidates(p, &all, &AttendancePolicy::default()).is_empty());
    }

    #[test]
    fn absent_assignment_frees_the_slot() {
        let p = Ulid::new();
        let mut missed = assignment(p, 9 * H, 10 * H);
        missed.status = AttendanceStatus::Absent;
        let open = assignment(Ulid::new(), 9 * H, 10 * H);
        let all = vec![missed, open.clone()];
        assert_eq!(ids(&find_substitution_candidates(p, &all, &AttendancePolicy::default())), vec![open.id]);
    }

    #[test]
    fn other_days_do_not_conflict() {
        let p = Ulid::new();
        let all = vec![
            assignment(p, 9 * H, 10 * H),
            assignment(Ulid::new(), DAY_MS + 9 * H, DAY_MS + 10 * H),
        ];
        assert_eq!(find_substitution_candidates(p, &all, &AttendancePolicy::default()).len(), 1);
    }
}
