pub mod agent;
pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod generation;
pub mod session;
pub mod store;
