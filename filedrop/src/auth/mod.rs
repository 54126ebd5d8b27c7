//! Upload authorization.
//!
//! Uploads are guarded by a single shared secret. Clients send it verbatim in the configured
//! header (default `Authorization`, no scheme prefix):
//!
//! ```bash
//! curl -H "Authorization: $SECRET" -F "file=@photo.png" https://files.example.com/upload
//! ```
//!
//! Retrieval is not authenticated. Anyone holding a link can fetch the file.
//!
//! Handlers opt in by taking [`shared_secret::Authorized`] as an argument; the extractor runs
//! before the body is read, so unauthorized uploads never touch the disk.

pub mod shared_secret;
