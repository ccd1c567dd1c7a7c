pub const MAX_CIRCLES: usize = 1024;
pub const MAX_CIRCLE_NAME_LEN: usize = 128;

pub const MAX_SHIFTS_PER_DAY: usize = 256;
pub const MAX_EVENTS_PER_DAY: usize = 512;
pub const MAX_TASKS_PER_SHIFT: usize = 256;

/// Upper bound on shifts or events produced from one recurring draft.
pub const MAX_RECURRENCE_OCCURRENCES: usize = 400;

/// Widest date range a single gap scan may cover.
pub const MAX_GAP_QUERY_DAYS: i64 = 366;

pub const MAX_ID_LEN: usize = 128;
pub const MAX_TITLE_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 8 * 1024;
pub const MAX_COLOR_LEN: usize = 32;

pub const MAX_QUERY_LIMIT: usize = 1000;

/// Longest request line accepted by the JSON front end.
pub const MAX_LINE_LEN: usize = 256 * 1024;
