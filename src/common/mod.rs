pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use config::{Config, ReentryPolicy};
pub use error::{GateError, Result};
pub use logging::setup_logging;
pub use paths::{Paths, EVENT_TOPIC};
