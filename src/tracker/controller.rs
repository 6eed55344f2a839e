use std::{
    future::Future,
    sync::{Arc, Mutex as StdMutex, PoisonError},
};

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    db::{
        models::{MAX_QUALITY, MIN_QUALITY},
        Database, SleepSession,
    },
    observable::Observable,
};

use super::{
    rating::RatingController,
    state::{self, TrackerSnapshot, TrackerStatus},
    summary::{summarize, SessionSummary},
};

/// Source of "now" in epoch milliseconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| Utc::now().timestamp_millis())
}

struct TrackerInner {
    db: Database,
    clock: Clock,
    /// Serialises user actions and history reloads, so a double tap cannot
    /// start two sessions and a reload cannot land after a newer one.
    action_lock: Arc<Mutex<()>>,
    cancel_token: CancellationToken,
    watcher: StdMutex<Option<JoinHandle<()>>>,

    tonight: Observable<Option<SleepSession>>,
    awaiting_rating: Observable<Option<i64>>,
    history: Observable<Vec<SleepSession>>,
    summaries: Observable<Vec<SessionSummary>>,
    start_enabled: Observable<bool>,
    stop_enabled: Observable<bool>,
    clear_enabled: Observable<bool>,
    navigate_to_quality: Observable<Option<i64>>,
    navigate_to_tracker: Observable<bool>,
    history_cleared: Observable<bool>,
}

impl TrackerInner {
    fn stop_watcher(&self) {
        self.cancel_token.cancel();
        let handle = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Drop for TrackerInner {
    fn drop(&mut self) {
        self.stop_watcher();
    }
}

/// Mediates between the session store and the view layer: owns the current
/// session pointer, the derived button flags and the navigation signals.
#[derive(Clone)]
pub struct TrackerController {
    inner: Arc<TrackerInner>,
}

impl TrackerController {
    pub async fn start(db: Database) -> Result<Self> {
        Self::start_with_clock(db, system_clock()).await
    }

    pub async fn start_with_clock(db: Database, clock: Clock) -> Result<Self> {
        let tonight: Observable<Option<SleepSession>> = Observable::new(None);
        let history: Observable<Vec<SleepSession>> = Observable::new(Vec::new());

        let controller = Self {
            inner: Arc::new(TrackerInner {
                db,
                clock,
                action_lock: Arc::new(Mutex::new(())),
                cancel_token: CancellationToken::new(),
                watcher: StdMutex::new(None),
                start_enabled: tonight.map(state::start_enabled),
                stop_enabled: tonight.map(state::stop_enabled),
                clear_enabled: history.map(|sessions| state::clear_enabled(sessions)),
                summaries: history.map(|sessions| summarize(sessions)),
                tonight,
                awaiting_rating: Observable::new(None),
                history,
                navigate_to_quality: Observable::new(None),
                navigate_to_tracker: Observable::new(false),
                history_cleared: Observable::new(false),
            }),
        };

        controller.initialize_tonight().await?;
        controller.refresh_history().await?;
        controller.spawn_history_watcher();

        Ok(controller)
    }

    async fn initialize_tonight(&self) -> Result<()> {
        let most_recent = self.inner.db.get_most_recent_session().await?;
        let tonight = state::reconcile_tonight(most_recent);
        if let Some(session) = &tonight {
            info!("Resuming active sleep session {}", session.id);
        }
        self.inner.tonight.set(tonight);
        Ok(())
    }

    async fn refresh_history(&self) -> Result<()> {
        let sessions = self.cancellable(self.inner.db.list_sessions()).await?;
        self.inner.history.set_if_changed(sessions);
        Ok(())
    }

    fn spawn_history_watcher(&self) {
        let db = self.inner.db.clone();
        let history = self.inner.history.clone();
        let action_lock = Arc::clone(&self.inner.action_lock);
        let token = self.inner.cancel_token.clone();
        let mut changes = db.subscribe_changes();
        changes.borrow_and_update();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let _guard = action_lock.lock().await;
                        match db.list_sessions().await {
                            Ok(sessions) => {
                                history.set_if_changed(sessions);
                            }
                            Err(err) => error!("Failed to reload sleep history: {err:#}"),
                        }
                    }
                }
            }
            debug!("History watcher stopped");
        });

        *self
            .inner
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Runs one store operation unless the tracker is shut down first. Work
    /// already handed to the database thread still completes there.
    async fn cancellable<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.inner.cancel_token.cancelled() => {
                Err(anyhow!("sleep tracker has been shut down"))
            }
            result = operation => result,
        }
    }

    fn now_ms(&self) -> i64 {
        (self.inner.clock)()
    }

    pub async fn on_start_tracking(&self) -> Result<()> {
        let _guard = self.inner.action_lock.lock().await;

        if let Some(active) = self.inner.tonight.get() {
            debug!("Start ignored: session {} is still active", active.id);
            return Ok(());
        }

        let mut night = SleepSession::new(self.now_ms());
        let id = self
            .cancellable(self.inner.db.insert_session(&night))
            .await?;
        night.id = id;
        info!("Started sleep session {}", night.id);

        self.inner.tonight.set(Some(night));
        self.refresh_history().await
    }

    pub async fn on_stop_tracking(&self) -> Result<()> {
        let _guard = self.inner.action_lock.lock().await;

        let Some(mut night) = self.inner.tonight.get() else {
            debug!("Stop ignored: no active session");
            return Ok(());
        };

        // end == start would read back as still active.
        night.end_time_ms = self.now_ms().max(night.start_time_ms.saturating_add(1));
        self.cancellable(self.inner.db.update_session(&night))
            .await?;
        info!(
            "Stopped sleep session {} after {} ms",
            night.id,
            night.duration_ms()
        );

        self.inner.tonight.set(None);
        self.inner.awaiting_rating.set(Some(night.id));
        self.inner.navigate_to_quality.set(Some(night.id));
        self.refresh_history().await
    }

    pub async fn on_set_quality(&self, session_id: i64, rating: i32) -> Result<()> {
        if !(MIN_QUALITY..=MAX_QUALITY).contains(&rating) {
            bail!("sleep quality {rating} is outside {MIN_QUALITY}..={MAX_QUALITY}");
        }

        let _guard = self.inner.action_lock.lock().await;

        match self
            .cancellable(self.inner.db.get_session(session_id))
            .await?
        {
            Some(mut night) => {
                night.quality_rating = rating;
                self.cancellable(self.inner.db.update_session(&night))
                    .await?;
                info!("Rated sleep session {session_id} as {rating}");
            }
            None => warn!("Rating dropped: sleep session {session_id} no longer exists"),
        }

        if self.inner.awaiting_rating.get() == Some(session_id) {
            self.inner.awaiting_rating.set(None);
        }
        self.inner.navigate_to_tracker.set(true);
        self.refresh_history().await
    }

    pub async fn on_clear(&self) -> Result<()> {
        let _guard = self.inner.action_lock.lock().await;

        self.cancellable(self.inner.db.clear_sessions()).await?;
        info!("Cleared sleep history");

        self.inner.tonight.set(None);
        self.inner.history_cleared.set(true);
        self.refresh_history().await
    }

    /// Acknowledges both navigation signals once the view has acted on them.
    pub fn done_navigating(&self) {
        self.inner.navigate_to_quality.set_if_changed(None);
        self.inner.navigate_to_tracker.set_if_changed(false);
    }

    pub fn done_showing_cleared(&self) {
        self.inner.history_cleared.set_if_changed(false);
    }

    pub fn rating_for(&self, session_id: i64) -> RatingController {
        RatingController::new(self.clone(), session_id)
    }

    /// Stops the history watcher and fails any action still waiting on the
    /// database. Observables keep their last values.
    pub fn shutdown(&self) {
        info!("Shutting down sleep tracker");
        self.inner.stop_watcher();
    }

    #[cfg(test)]
    fn is_shut_down(&self) -> bool {
        self.inner.cancel_token.is_cancelled()
    }

    pub fn status(&self) -> TrackerStatus {
        TrackerStatus::derive(
            self.inner.tonight.get().as_ref(),
            self.inner.awaiting_rating.get(),
        )
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        let tonight = self.inner.tonight.get();
        TrackerSnapshot {
            status: TrackerStatus::derive(tonight.as_ref(), self.inner.awaiting_rating.get()),
            tonight,
            start_enabled: self.inner.start_enabled.get(),
            stop_enabled: self.inner.stop_enabled.get(),
            clear_enabled: self.inner.clear_enabled.get(),
            history_len: self.inner.history.with(Vec::len),
            navigate_to_quality: self.inner.navigate_to_quality.get(),
            navigate_to_tracker: self.inner.navigate_to_tracker.get(),
            history_cleared: self.inner.history_cleared.get(),
        }
    }

    pub fn database(&self) -> &Database {
        &self.inner.db
    }

    pub fn tonight(&self) -> &Observable<Option<SleepSession>> {
        &self.inner.tonight
    }

    pub fn history(&self) -> &Observable<Vec<SleepSession>> {
        &self.inner.history
    }

    pub fn summaries(&self) -> &Observable<Vec<SessionSummary>> {
        &self.inner.summaries
    }

    pub fn start_enabled(&self) -> &Observable<bool> {
        &self.inner.start_enabled
    }

    pub fn stop_enabled(&self) -> &Observable<bool> {
        &self.inner.stop_enabled
    }

    pub fn clear_enabled(&self) -> &Observable<bool> {
        &self.inner.clear_enabled
    }

    pub fn navigate_to_quality(&self) -> &Observable<Option<i64>> {
        &self.inner.navigate_to_quality
    }

    pub fn navigate_to_tracker(&self) -> &Observable<bool> {
        &self.inner.navigate_to_tracker
    }

    pub fn history_cleared(&self) -> &Observable<bool> {
        &self.inner.history_cleared
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicI64, Ordering},
        time::Duration,
    };

    use super::*;

    /// Clock that advances one minute per reading.
    fn stepping_clock(start: i64) -> Clock {
        let now = Arc::new(AtomicI64::new(start));
        Arc::new(move || now.fetch_add(60_000, Ordering::SeqCst))
    }

    async fn tracker() -> TrackerController {
        let db = Database::open_in_memory().unwrap();
        TrackerController::start_with_clock(db, stepping_clock(1_000_000))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn starts_idle_on_empty_store() {
        let tracker = tracker().await;
        let snapshot = tracker.snapshot();

        assert_eq!(snapshot.status, TrackerStatus::Idle);
        assert!(snapshot.start_enabled);
        assert!(!snapshot.stop_enabled);
        assert!(!snapshot.clear_enabled);
        assert_eq!(snapshot.history_len, 0);
    }

    #[tokio::test]
    async fn start_then_stop_toggles_buttons() {
        let tracker = tracker().await;

        tracker.on_start_tracking().await.unwrap();
        let tonight = tracker.tonight().get().unwrap();
        assert_eq!(tonight.start_time_ms, tonight.end_time_ms);
        assert!(!tracker.start_enabled().get());
        assert!(tracker.stop_enabled().get());
        assert!(tracker.clear_enabled().get());
        assert_eq!(tracker.status(), TrackerStatus::Active);

        tracker.on_stop_tracking().await.unwrap();
        let stored = tracker
            .database()
            .get_session(tonight.id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.end_time_ms > stored.start_time_ms);
        assert!(tracker.start_enabled().get());
        assert!(!tracker.stop_enabled().get());
        assert_eq!(tracker.navigate_to_quality().get(), Some(tonight.id));
        assert_eq!(tracker.status(), TrackerStatus::AwaitingRating);
    }

    #[tokio::test]
    async fn second_start_while_active_is_ignored() {
        let tracker = tracker().await;

        tracker.on_start_tracking().await.unwrap();
        tracker.on_start_tracking().await.unwrap();

        assert_eq!(tracker.database().session_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_starts_create_one_session() {
        let tracker = tracker().await;

        let (a, b) = tokio::join!(tracker.on_start_tracking(), tracker.on_start_tracking());
        a.unwrap();
        b.unwrap();

        assert_eq!(tracker.database().session_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn stop_without_active_session_does_nothing() {
        let tracker = tracker().await;
        let mut changes = tracker.database().subscribe_changes();
        changes.borrow_and_update();

        tracker.on_stop_tracking().await.unwrap();

        assert!(!changes.has_changed().unwrap());
        assert_eq!(tracker.navigate_to_quality().get(), None);
    }

    #[tokio::test]
    async fn stop_in_same_millisecond_still_ends_session() {
        let db = Database::open_in_memory().unwrap();
        let tracker = TrackerController::start_with_clock(db, Arc::new(|| 5_000_i64))
            .await
            .unwrap();

        tracker.on_start_tracking().await.unwrap();
        let id = tracker.tonight().get().unwrap().id;
        tracker.on_stop_tracking().await.unwrap();

        let stored = tracker.database().get_session(id).await.unwrap().unwrap();
        assert_eq!(stored.end_time_ms, 5_001);
        assert!(!stored.is_active());
    }

    #[tokio::test]
    async fn stop_with_extreme_start_time_does_not_overflow() {
        let db = Database::open_in_memory().unwrap();
        db.insert_session(&SleepSession::new(i64::MIN)).await.unwrap();
        crate::init_logging("info");

        let tracker = TrackerController::start(db).await.unwrap();
        let id = tracker.tonight().get().unwrap().id;
        tracker.on_stop_tracking().await.unwrap();

        let stored = tracker.database().get_session(id).await.unwrap().unwrap();
        assert!(!stored.is_active());
        assert_eq!(stored.duration_ms(), i64::MAX);
        assert!(tracker.summaries().get().is_empty());
    }

    #[tokio::test]
    async fn set_quality_updates_row_and_navigates_back() {
        let tracker = tracker().await;
        tracker.on_start_tracking().await.unwrap();
        tracker.on_stop_tracking().await.unwrap();
        let id = tracker.navigate_to_quality().get().unwrap();

        tracker.on_set_quality(id, 3).await.unwrap();

        let stored = tracker.database().get_session(id).await.unwrap().unwrap();
        assert_eq!(stored.quality_rating, 3);
        assert!(tracker.navigate_to_tracker().get());
        assert_eq!(tracker.status(), TrackerStatus::Idle);

        tracker.done_navigating();
        assert_eq!(tracker.navigate_to_quality().get(), None);
        assert!(!tracker.navigate_to_tracker().get());
    }

    #[tokio::test]
    async fn set_quality_rejects_out_of_range_rating() {
        let tracker = tracker().await;
        assert!(tracker.on_set_quality(1, 6).await.is_err());
        assert!(tracker.on_set_quality(1, -1).await.is_err());
    }

    #[tokio::test]
    async fn rating_after_clear_is_absorbed() {
        let tracker = tracker().await;
        tracker.on_start_tracking().await.unwrap();
        tracker.on_stop_tracking().await.unwrap();
        let id = tracker.navigate_to_quality().get().unwrap();

        tracker.on_clear().await.unwrap();
        assert_eq!(tracker.navigate_to_quality().get(), Some(id));

        tracker.on_set_quality(id, 2).await.unwrap();
        assert!(tracker.database().get_session(id).await.unwrap().is_none());
        assert!(tracker.navigate_to_tracker().get());
    }

    #[tokio::test]
    async fn clear_resets_tonight_and_emits_notice() {
        let tracker = tracker().await;
        tracker.on_start_tracking().await.unwrap();

        tracker.on_clear().await.unwrap();

        assert!(tracker.tonight().get().is_none());
        assert!(tracker.history().get().is_empty());
        assert!(!tracker.clear_enabled().get());
        assert!(tracker.start_enabled().get());
        assert!(tracker.history_cleared().get());

        tracker.done_showing_cleared();
        assert!(!tracker.history_cleared().get());
    }

    #[tokio::test]
    async fn history_is_newest_first_with_summaries() {
        let tracker = tracker().await;
        for _ in 0..3 {
            tracker.on_start_tracking().await.unwrap();
            tracker.on_stop_tracking().await.unwrap();
        }

        let ids: Vec<i64> = tracker.history().get().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);

        let summaries = tracker.summaries().get();
        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[0].duration, "0h 1m");
        assert_eq!(summaries[0].quality, "--");
    }

    #[tokio::test]
    async fn resumes_active_session_from_store() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert_session(&SleepSession::new(42)).await.unwrap();

        let tracker = TrackerController::start(db).await.unwrap();

        assert_eq!(tracker.tonight().get().map(|s| s.id), Some(id));
        assert!(!tracker.start_enabled().get());
        assert!(tracker.stop_enabled().get());
    }

    #[tokio::test]
    async fn stopped_most_recent_session_is_not_resumed() {
        let db = Database::open_in_memory().unwrap();
        let mut night = SleepSession::new(42);
        night.end_time_ms = 100;
        db.insert_session(&night).await.unwrap();

        let tracker = TrackerController::start(db).await.unwrap();

        assert!(tracker.tonight().get().is_none());
        assert!(tracker.start_enabled().get());
        assert!(tracker.clear_enabled().get());
    }

    #[tokio::test]
    async fn watcher_picks_up_external_writes() {
        let tracker = tracker().await;
        let other_handle = tracker.database().clone();

        other_handle
            .insert_session(&SleepSession::new(7))
            .await
            .unwrap();

        let mut seen = false;
        for _ in 0..50 {
            if tracker.history().get().len() == 1 {
                seen = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(seen, "history never reflected the external insert");
        assert!(tracker.clear_enabled().get());
    }

    #[tokio::test]
    async fn actions_fail_after_shutdown() {
        let tracker = tracker().await;
        tracker.shutdown();

        assert!(tracker.is_shut_down());
        assert!(tracker.on_start_tracking().await.is_err());
        assert_eq!(tracker.database().session_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn snapshot_serializes_camel_case() {
        let tracker = tracker().await;
        tracker.on_start_tracking().await.unwrap();

        let json = serde_json::to_value(tracker.snapshot()).unwrap();
        assert_eq!(json["status"], "active");
        assert_eq!(json["startEnabled"], false);
        assert_eq!(json["historyLen"], 1);
    }
}
