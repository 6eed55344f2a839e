//! Sleep session data model.

use serde::{Deserialize, Serialize};

/// Quality value stored until the user rates the night.
pub const UNRATED_QUALITY: i32 = -1;

/// Lowest and highest rating the tracker accepts from the user.
pub const MIN_QUALITY: i32 = 0;
pub const MAX_QUALITY: i32 = 5;

/// One tracked night. `id` is assigned by the store on insert; a session that
/// has not been inserted yet carries `id == 0`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SleepSession {
    pub id: i64,
    pub start_time_ms: i64,
    /// Equal to `start_time_ms` until the session is stopped.
    pub end_time_ms: i64,
    pub quality_rating: i32,
}

impl SleepSession {
    pub fn new(start_time_ms: i64) -> Self {
        Self {
            id: 0,
            start_time_ms,
            end_time_ms: start_time_ms,
            quality_rating: UNRATED_QUALITY,
        }
    }

    pub fn is_active(&self) -> bool {
        self.start_time_ms == self.end_time_ms
    }

    pub fn is_rated(&self) -> bool {
        self.quality_rating != UNRATED_QUALITY
    }

    pub fn duration_ms(&self) -> i64 {
        self.end_time_ms.saturating_sub(self.start_time_ms).max(0)
    }
}
