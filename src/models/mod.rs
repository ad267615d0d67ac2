//! Data models

pub mod service;
pub mod outcome;
pub mod state;
pub mod round;

pub use service::*;
pub use outcome::*;
pub use state::*;
pub use round::*;
