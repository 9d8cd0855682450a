//! GridAware backend API client
//!
//! Account login, charging-box registration, and telemetry queries against
//! the GridAware charging backend, plus local persistence of the session
//! token between CLI invocations.

pub mod client;
pub mod token;

pub use client::{ApiClient, ApiError, DEFAULT_BASE_URL, Device, Measurement};
pub use token::{TokenError, TokenStore, gridaware_home};
