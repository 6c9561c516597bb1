//! Equinix Metal provider.
//!
//! Implements the capacity, device and event services against the
//! Equinix Metal REST API.

mod client;
mod models;

pub use client::{Equinix, API_BASE_URL};
pub use models::*;
