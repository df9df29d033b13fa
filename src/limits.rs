use crate::model::{DAY_MS, Ms};

// ── Tenants ──────────────────────────────────────────────────────

pub const MAX_TENANTS: usize = 1_024;
pub const MAX_TENANT_NAME_LEN: usize = 128;

// ── Entities ─────────────────────────────────────────────────────

pub const MAX_ASSIGNMENTS_PER_TENANT: usize = 500_000;
pub const MAX_BOOKINGS_PER_RESOURCE: usize = 50_000;
pub const MAX_BATCH_SIZE: usize = 1_000;
pub const MAX_REMARKS_LEN: usize = 1_024;

// ── Time ─────────────────────────────────────────────────────────

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;
/// No single exam or booking runs longer than a day.
pub const MAX_SPAN_DURATION_MS: Ms = DAY_MS;
pub const MAX_QUERY_WINDOW_MS: Ms = 31 * DAY_MS;

// ── One-time codes ───────────────────────────────────────────────

pub const CODE_LEN: usize = 8;
/// Attempts at drawing a code that isn't already live before giving up.
pub const MAX_CODE_ATTEMPTS: usize = 16;
