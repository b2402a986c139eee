pub mod db;
pub mod revision;
pub mod session;

pub use db::OpexDb;
pub use revision::{Message, PriorArtifacts, RevisionState, Role};
pub use session::{SessionManager, SessionStore};
