//! Image recaptioning service
//!
//! Accepts an uploaded image, captions it through a hosted inference API,
//! generates a new image from that caption and emails the result. Uploads are
//! handled by the HTTP server; the heavy lifting happens in the queue worker.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod worker;
