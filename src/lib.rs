//! Getravio body-simulation service.
//!
//! Users upload a photo, a worker process turns it into simulated
//! "after" views through an image-generation backend, and progress is pushed
//! back to the browser over a WebSocket. Images are stored encrypted and
//! served only through short-lived signed URLs.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
