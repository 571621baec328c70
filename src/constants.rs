pub const APP_NAME: &str = "TRIBUTARY";
pub const DEFAULT_CONF: &str = "tributary";

// matches the scheduler UI's alert fade-out
pub const BANNER_TTL_MS: u64 = 5000;
pub const NOTICE_HISTORY: usize = 64;

// how long a change feed request waits before answering with no news
pub const LONG_POLL_MS: u64 = 25_000;

// log lines fetched per head/tail request
pub const LOG_LINES: u32 = 100;
