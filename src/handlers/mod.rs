//! HTTP handlers

pub mod health;
pub mod rounds;
pub mod services;
pub mod status;
