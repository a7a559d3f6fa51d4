pub mod command;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod game;
pub mod lobby;
pub mod platform;
pub mod services;
pub mod transport;
