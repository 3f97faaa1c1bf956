pub mod models;
pub mod repo;

pub use models::{Session, SessionMeta};
pub use repo::SessionRepo;
