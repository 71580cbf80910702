pub mod api;
pub mod client;
pub mod config;
pub mod tracker;
pub mod tracking;
pub mod watcher;
