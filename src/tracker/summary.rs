use anyhow::Result;
use log::warn;
use serde::Serialize;

use crate::db::{helpers::datetime_from_millis, SleepSession};

const TIME_FORMAT: &str = "%a %b %d %Y %H:%M";

pub fn quality_label(rating: i32) -> &'static str {
    match rating {
        0 => "Very bad",
        1 => "Poor",
        2 => "So-so",
        3 => "OK",
        4 => "Pretty good",
        5 => "Excellent",
        _ => "--",
    }
}

pub fn format_duration(duration_ms: i64) -> String {
    let total_minutes = duration_ms.max(0) / 60_000;
    format!("{}h {}m", total_minutes / 60, total_minutes % 60)
}

/// Display-ready view of one history row.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: i64,
    pub started: String,
    pub ended: String,
    pub duration: String,
    pub quality: String,
}

impl SessionSummary {
    pub fn from_session(session: &SleepSession) -> Result<Self> {
        let started = datetime_from_millis(session.start_time_ms, "start_time_ms")?;
        let ended = if session.is_active() {
            "in progress".to_string()
        } else {
            datetime_from_millis(session.end_time_ms, "end_time_ms")?
                .format(TIME_FORMAT)
                .to_string()
        };

        Ok(Self {
            id: session.id,
            started: started.format(TIME_FORMAT).to_string(),
            ended,
            duration: format_duration(session.duration_ms()),
            quality: quality_label(session.quality_rating).to_string(),
        })
    }

    pub fn line(&self) -> String {
        format!(
            "Start: {} | End: {} | Slept: {} | Quality: {}",
            self.started, self.ended, self.duration, self.quality
        )
    }
}

/// Summaries for every session that can be rendered; rows with timestamps
/// chrono cannot represent are skipped.
pub fn summarize(sessions: &[SleepSession]) -> Vec<SessionSummary> {
    sessions
        .iter()
        .filter_map(|session| match SessionSummary::from_session(session) {
            Ok(summary) => Some(summary),
            Err(err) => {
                warn!("Skipping summary for session {}: {err:#}", session.id);
                None
            }
        })
        .collect()
}
