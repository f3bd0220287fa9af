//! Command handlers

pub mod backup;
pub mod config;
pub mod quota;
pub mod record;
