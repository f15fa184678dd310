// src/lib.rs

pub mod config;
pub mod db;
pub mod locks;
pub mod repositories;
pub mod services;
pub mod tasks;

pub use config::SupportConfig;
pub use db::Database;
pub use supportbot_common::error::Error;
