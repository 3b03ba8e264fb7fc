//! Application wiring
//!
//! Builds the store and runtime components from [`Settings`], then runs the
//! data plane, the management API and the background tasks together.
//!
//! [`Settings`]: crate::config::Settings

pub mod app;
pub mod maintenance;

pub use app::Application;
