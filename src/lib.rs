// Core modules
pub mod common;
pub mod core;
pub mod events;
pub mod gate;
pub mod service;
pub mod storage;

// Re-export commonly used types
pub use common::{Config, GateError, Paths, Result};
pub use core::{Gatekeeper, Matcher, ProbeResult};
pub use events::RecognitionEvent;
pub use service::{protocol, ServiceClient};
pub use storage::{AuditEntry, EmbeddingStore, EnrolledUser};
