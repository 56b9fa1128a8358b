//! conveyor-server
//!
//! HTTP front end for `conveyor-core`: environment config, `POST /enqueue`,
//! `GET /healthz`, JSON logging, and the signal-driven shutdown sequence.

pub mod app;
pub mod config;
pub mod http;
pub mod observability;
pub mod server;
