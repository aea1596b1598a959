use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

pub const LOCAL_LIVE_PREFIX: &str = "local-live-";

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

/// Placeholder id for a live event the store has not acknowledged yet.
pub fn local_live_id(started_at: DateTime<Utc>) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{LOCAL_LIVE_PREFIX}{}-{sequence}", started_at.timestamp_millis())
}

pub fn is_local_placeholder(id: &str) -> bool {
    id.starts_with(LOCAL_LIVE_PREFIX)
}
