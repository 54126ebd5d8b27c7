//! HTTP request handlers.
//!
//! # Handler Modules
//!
//! - [`uploads`]: `POST /upload`, authenticated file intake
//! - [`files`]: `GET /{id}`, stored file retrieval
//! - [`static_assets`]: `GET /` and `GET /favicon.ico`

pub mod files;
pub mod static_assets;
pub mod uploads;
