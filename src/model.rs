use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

pub const SECOND_MS: Ms = 1_000;
pub const MINUTE_MS: Ms = 60 * SECOND_MS;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Wall-clock time. Engine operations take `now` explicitly; only the
/// surfaces (wire, background sweeper) read the clock.
pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as Ms)
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor for spans coming from outside the engine.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn is_valid(&self) -> bool {
        self.start < self.end
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Intersection with `window`, or `None` when the two don't overlap.
    pub fn clip(&self, window: &Span) -> Option<Span> {
        Span::try_new(self.start.max(window.start), self.end.min(window.end))
    }
}

/// One scheduled occupation of a resource timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub span: Span,
    /// Exam assignment this booking was derived from, if any.
    pub source_id: Option<Ulid>,
}

/// A contiguous slice of a resource's day, either busy or free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub span: Span,
    pub occupied: bool,
}

impl Interval {
    pub fn free(start: Ms, end: Ms) -> Self {
        Self { span: Span::new(start, end), occupied: false }
    }

    pub fn busy(start: Ms, end: Ms) -> Self {
        Self { span: Span::new(start, end), occupied: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Pending,
    Confirmed,
    Late,
    Absent,
    Substitute,
}

impl AttendanceStatus {
    pub const ALL: [AttendanceStatus; 5] = [
        AttendanceStatus::Pending,
        AttendanceStatus::Confirmed,
        AttendanceStatus::Late,
        AttendanceStatus::Absent,
        AttendanceStatus::Substitute,
    ];

    pub fn is_terminal(self) -> bool {
        !matches!(self, AttendanceStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Pending => "pending",
            AttendanceStatus::Confirmed => "confirmed",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Substitute => "substitute",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|st| st.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The capacity in which a person checks in to an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckInRole {
    Assigned,
    Substitute,
}

impl CheckInRole {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckInRole::Assigned => "assigned",
            CheckInRole::Substitute => "substitute",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "assigned" => Some(CheckInRole::Assigned),
            "substitute" => Some(CheckInRole::Substitute),
            _ => None,
        }
    }
}

/// Result of verifying a code: does the person entering it own the assignment?
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    AssignedMatch,
    AssignedMismatch,
}

impl Classification {
    pub fn as_str(self) -> &'static str {
        match self {
            Classification::AssignedMatch => "assigned-match",
            Classification::AssignedMismatch => "assigned-mismatch",
        }
    }

    /// The role a confirmation following this verification should use.
    pub fn role(self) -> CheckInRole {
        match self {
            Classification::AssignedMatch => CheckInRole::Assigned,
            Classification::AssignedMismatch => CheckInRole::Substitute,
        }
    }
}

/// Where an assignment sits relative to "now" from the proctor's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Upcoming,
    Ongoing,
    Completed,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Upcoming => "upcoming",
            Phase::Ongoing => "ongoing",
            Phase::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "upcoming" => Some(Phase::Upcoming),
            "ongoing" => Some(Phase::Ongoing),
            "completed" => Some(Phase::Completed),
            _ => None,
        }
    }
}

/// One proctor-to-exam-schedule pairing and its attendance record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamAssignment {
    pub id: Ulid,
    pub exam_schedule_id: Ulid,
    pub assigned_proctor_id: Ulid,
    pub room_id: Option<Ulid>,
    pub window: Span,
    pub one_time_code: Option<String>,
    pub code_consumed: bool,
    pub status: AttendanceStatus,
    pub code_entry_time: Option<Ms>,
    pub remarks: Option<String>,
    /// Who actually checked in; differs from the assigned proctor for substitutes.
    pub checked_in_by: Option<Ulid>,
}

impl ExamAssignment {
    pub fn new(
        id: Ulid,
        exam_schedule_id: Ulid,
        assigned_proctor_id: Ulid,
        room_id: Option<Ulid>,
        window: Span,
    ) -> Self {
        Self {
            id,
            exam_schedule_id,
            assigned_proctor_id,
            room_id,
            window,
            one_time_code: None,
            code_consumed: false,
            status: AttendanceStatus::Pending,
            code_entry_time: None,
            remarks: None,
            checked_in_by: None,
        }
    }

    /// The code, if one is issued and not yet used.
    pub fn live_code(&self) -> Option<&str> {
        match &self.one_time_code {
            Some(code) if !self.code_consumed => Some(code),
            _ => None,
        }
    }

    pub fn phase(&self, now: Ms) -> Phase {
        if self.status.is_terminal() || self.window.end <= now {
            Phase::Completed
        } else if self.window.start > now {
            Phase::Upcoming
        } else {
            Phase::Ongoing
        }
    }
}

/// Bookings on one resource timeline, sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct ResourceState {
    pub id: Ulid,
    pub bookings: Vec<Booking>,
}

impl ResourceState {
    pub fn new(id: Ulid) -> Self {
        Self { id, bookings: Vec::new() }
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    /// Return only bookings whose span overlaps the query window.
    /// Binary search skips bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }
}

/// Engine events, flat and unnested. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingAdded {
        id: Ulid,
        resource_id: Ulid,
        span: Span,
        source_id: Option<Ulid>,
    },
    BookingRemoved {
        id: Ulid,
        resource_id: Ulid,
    },
    AssignmentCreated {
        id: Ulid,
        exam_schedule_id: Ulid,
        proctor_id: Ulid,
        room_id: Option<Ulid>,
        window: Span,
    },
    CodeIssued {
        assignment_id: Ulid,
        code: String,
    },
    CodeReset {
        assignment_id: Ulid,
    },
    AttendanceConfirmed {
        assignment_id: Ulid,
        status: AttendanceStatus,
        checked_in_by: Option<Ulid>,
        code_entry_time: Ms,
        remarks: Option<String>,
    },
    MarkedAbsent {
        assignment_id: Ulid,
    },
    StatusOverridden {
        assignment_id: Ulid,
        status: AttendanceStatus,
        remarks: Option<String>,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub assignment: ExamAssignment,
    pub classification: Classification,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttendanceSummary {
    pub pending: usize,
    pub confirmed: usize,
    pub late: usize,
    pub absent: usize,
    pub substitute: usize,
}

impl AttendanceSummary {
    pub fn record(&mut self, status: AttendanceStatus) {
        match status {
            AttendanceStatus::Pending => self.pending += 1,
            AttendanceStatus::Confirmed => self.confirmed += 1,
            AttendanceStatus::Late => self.late += 1,
            AttendanceStatus::Absent => self.absent += 1,
            AttendanceStatus::Substitute => self.substitute += 1,
        }
    }

    pub fn count(&self, status: AttendanceStatus) -> usize {
        match status {
            AttendanceStatus::Pending => self.pending,
            AttendanceStatus::Confirmed => self.confirmed,
            AttendanceStatus::Late => self.late,
            AttendanceStatus::Absent => self.absent,
            AttendanceStatus::Substitute => self.substitute,
        }
    }

    /// Checked in one way or another (the "present" filter of the monitoring view).
    pub fn present(&self) -> usize {
        self.confirmed + self.late + self.substitute
    }
}
