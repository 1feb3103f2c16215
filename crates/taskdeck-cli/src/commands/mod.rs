//! Command handlers

pub mod config;
pub mod serve;
pub mod session;
pub mod status;
pub mod task;
