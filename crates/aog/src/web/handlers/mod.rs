//! HTTP request handlers, organized by domain
//!
//! Handlers stay thin: validation and response shaping here, business logic
//! in the scheduler, engine manager, acquisition engine and repositories.

pub mod control_panel;
pub mod health;
pub mod models;
pub mod plugins;
pub mod providers;
pub mod service_admin;
pub mod services;
pub mod speech_ws;
