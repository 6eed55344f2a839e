pub mod db;
pub mod observable;
pub mod settings;
pub mod tracker;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;

pub use db::{Database, SleepSession};
pub use observable::{Observable, SubscriptionId};
pub use settings::{Settings, SettingsStore, SETTINGS_FILE_NAME};
pub use tracker::{
    RatingController, SessionSummary, TrackerController, TrackerSnapshot, TrackerStatus,
};

/// Everything a front end needs, wired together from one data directory.
///
/// The state owns its tracker: dropping it shuts the tracker down, and any
/// clone taken through [`AppState::tracker`] fails its actions from then on.
pub struct AppState {
    pub db: Database,
    tracker: TrackerController,
    pub settings: SettingsStore,
    data_dir: PathBuf,
}

impl AppState {
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir).with_context(|| {
            format!("failed to create data directory {}", data_dir.display())
        })?;

        let settings = SettingsStore::new(data_dir.join(SETTINGS_FILE_NAME))?;
        init_logging(&settings.settings().log_level);

        let db_path = data_dir.join(settings.settings().database_file);
        let db = Database::new(db_path)?;
        let tracker = TrackerController::start(db.clone()).await?;

        info!("Sleep tracker ready in {}", data_dir.display());

        Ok(Self {
            db,
            tracker,
            settings,
            data_dir,
        })
    }

    pub fn tracker(&self) -> &TrackerController {
        &self.tracker
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

impl Drop for AppState {
    fn drop(&mut self) {
        self.tracker.shutdown();
    }
}

/// Initializes `env_logger`. `RUST_LOG` wins over `default_filter`; calling
/// this more than once is harmless.
pub fn init_logging(default_filter: &str) {
    if logger_builder(default_filter).try_init().is_ok() {
        info!("Sleep tracker logging initialized");
    }
}

fn logger_builder(default_filter: &str) -> env_logger::Builder {
    let env = env_logger::Env::default().default_filter_or(default_filter);
    env_logger::Builder::from_env(env)
}
