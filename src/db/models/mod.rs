pub mod session;

pub use session::{SleepSession, MAX_QUALITY, MIN_QUALITY, UNRATED_QUALITY};
