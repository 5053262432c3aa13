pub mod annotations;
pub mod api;
pub mod catalog;
pub mod config;
pub mod elastic;
pub mod error;
pub mod identity;
pub mod logging;
pub mod metrics;
pub mod models;

pub use error::{BackendError, Result};
