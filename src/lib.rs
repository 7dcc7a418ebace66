pub mod accounts;
pub mod analytics;
pub mod app_state;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod feedback;
pub mod machines;
pub mod messages;
pub mod models;
pub mod notification_hub;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod shops;
pub mod sync;
pub mod web_socket_server;
