pub mod api;
pub mod config;
pub mod error;
pub mod executor;
pub mod feed;
pub mod models;
pub mod presence;
pub mod rep;
pub mod retry;
pub mod scheduler;
pub mod shutdown;

pub use error::{RepError, Result};
pub use rep::Rep;
