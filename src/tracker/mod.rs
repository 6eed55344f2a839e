pub mod controller;
pub mod rating;
pub mod state;
pub mod summary;

pub use controller::{system_clock, Clock, TrackerController};
pub use rating::RatingController;
pub use state::{TrackerSnapshot, TrackerStatus};
pub use summary::SessionSummary;
