// Typed service APIs built on the authenticated gateway

pub mod auth;
pub mod players;

pub use auth::AuthApi;
pub use players::{CreatedPlayer, PlayersApi};
