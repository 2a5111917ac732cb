// Authentication module
// Session persistence, credential attachment and single-flight refresh

mod attacher;
mod refresh;
mod store;
pub mod types;

pub use attacher::{attacher_for, BearerAttacher, CookieAttacher, CredentialAttacher};
pub use refresh::{Episode, RefreshCoordinator, RefreshError, RefreshState};
pub use store::{CredentialStore, MemoryStore, SqliteStore};
pub use types::{AuthMode, Session, TokenGrant, UserProfile};
