//! VantageEdge - multi-tenant API gateway core
//!
//! The data plane matches each request to a tenant route, enforces the
//! route's authentication, rate limit and cache policy, and forwards it to
//! a healthy origin chosen by weighted load balancing behind per-origin
//! circuit breakers. The management API under `/api/v1` is how tenants
//! configure all of it.

pub mod admin;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod infrastructure;

pub use application::Application;
pub use error::{Error, Result};
