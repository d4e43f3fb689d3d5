pub mod config;
pub mod connection_manager;
pub mod database;
pub mod database_manager;
pub mod draw_manager;
pub mod error;
