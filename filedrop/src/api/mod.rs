//! HTTP layer.
//!
//! - **[`handlers`]**: Axum route handlers, one module per route group
//!
//! Every handler returns [`crate::errors::Result`], so failures reach the client as a status code
//! plus a short plaintext message.

pub mod handlers;
