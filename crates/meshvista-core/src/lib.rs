//! `meshvista-core`: configuration and shared error types.

pub mod config;
pub mod error;

pub use config::MeshvistaConfig;
pub use error::{CoreError, Result};
