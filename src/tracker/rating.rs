use anyhow::Result;

use crate::observable::Observable;

use super::TrackerController;

/// Rating step for a single stopped session. Obtained from
/// [`TrackerController::rating_for`] with the id carried by the
/// `navigate_to_quality` signal.
#[derive(Clone)]
pub struct RatingController {
    tracker: TrackerController,
    session_id: i64,
}

impl RatingController {
    pub(crate) fn new(tracker: TrackerController, session_id: i64) -> Self {
        Self {
            tracker,
            session_id,
        }
    }

    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    pub async fn on_set_quality(&self, rating: i32) -> Result<()> {
        self.tracker.on_set_quality(self.session_id, rating).await
    }

    pub fn navigate_to_tracker(&self) -> &Observable<bool> {
        self.tracker.navigate_to_tracker()
    }

    pub fn done_navigating(&self) {
        self.tracker.done_navigating();
    }
}
