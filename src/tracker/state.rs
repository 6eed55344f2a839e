use serde::{Deserialize, Serialize};

use crate::db::SleepSession;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TrackerStatus {
    #[default]
    Idle,
    Active,
    AwaitingRating,
}

impl TrackerStatus {
    pub fn derive(tonight: Option<&SleepSession>, pending_rating: Option<i64>) -> Self {
        match (tonight, pending_rating) {
            (Some(_), _) => TrackerStatus::Active,
            (None, Some(_)) => TrackerStatus::AwaitingRating,
            (None, None) => TrackerStatus::Idle,
        }
    }
}

/// Point-in-time copy of everything the view layer binds to.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrackerSnapshot {
    pub status: TrackerStatus,
    pub tonight: Option<SleepSession>,
    pub start_enabled: bool,
    pub stop_enabled: bool,
    pub clear_enabled: bool,
    pub history_len: usize,
    pub navigate_to_quality: Option<i64>,
    pub navigate_to_tracker: bool,
    pub history_cleared: bool,
}

pub fn start_enabled(tonight: &Option<SleepSession>) -> bool {
    tonight.is_none()
}

pub fn stop_enabled(tonight: &Option<SleepSession>) -> bool {
    tonight.is_some()
}

pub fn clear_enabled(history: &[SleepSession]) -> bool {
    !history.is_empty()
}

/// Session the tracker should resume after a restart: the newest row, but only
/// while it has not been stopped.
pub fn reconcile_tonight(most_recent: Option<SleepSession>) -> Option<SleepSession> {
    most_recent.filter(SleepSession::is_active)
}
