pub mod config;
pub mod error;

pub use config::SchedulerConfig;
pub use error::{SchedError, SchedResult};
