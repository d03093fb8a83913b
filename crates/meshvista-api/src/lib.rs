//! `meshvista-api`: the seam between collectors and the upstream mesh API.
//!
//! Collectors depend only on the [`MeshApi`] trait. [`HttpMeshApi`] is the
//! production implementation: a thin JSON client authenticated by a session
//! cookie. Tests substitute their own fakes.

pub mod client;
pub mod error;
pub mod types;

pub use client::{HttpMeshApi, MeshApi};
pub use error::{ApiError, Result};
pub use types::*;
