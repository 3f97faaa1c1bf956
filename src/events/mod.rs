pub mod models;
pub mod repo;

pub use models::{EventFilter, SecurityEvent, SecurityEventType};
pub use repo::EventRepo;
