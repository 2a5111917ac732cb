// Roster client - library root

pub mod api;
pub mod auth;
pub mod chat;
pub mod clock;
pub mod config;
pub mod error;
pub mod http_client;
pub mod models;
pub mod transport;
pub mod upload;
