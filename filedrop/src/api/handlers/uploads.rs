//! `POST /upload`: authenticated intake of a single multipart file.
//!
//! Checks run in a fixed order, and each rejection leaves nothing behind on disk:
//!
//! 1. shared secret ([`Authorized`] extractor)
//! 2. declared `Content-Length`
//! 3. multipart framing and the `file` field
//! 4. content type sniffed from the leading bytes, checked against the allow-list
//! 5. streamed size, counted while writing (the partial file is removed on failure)

use std::io;

use axum::{
    extract::{
        Multipart, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::{HeaderMap, StatusCode, header},
};
use bytes::Bytes;
use futures::Stream;
use mime::Mime;
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::{debug, info, instrument, warn};

use crate::{
    AppState,
    auth::shared_secret::Authorized,
    config::ExtensionPolicy,
    errors::{Error, Result},
    sniff::{PeekStream, sniff},
};

/// Name of the multipart field carrying the upload.
pub const FILE_FIELD: &str = "file";

/// Room for multipart boundaries and part headers on top of the file size limit.
pub const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Fresh names tried before giving up when collisions are rejected.
const MAX_NAME_ATTEMPTS: usize = 8;

const MAX_SANITIZED_EXTENSION_LEN: usize = 16;

/// Body limit for the upload route.
pub fn body_limit(max_file_size: u64) -> usize {
    usize::try_from(max_file_size.saturating_add(MULTIPART_OVERHEAD)).unwrap_or(usize::MAX)
}

/// Whether the request announces a body that cannot fit under the limit.
pub fn declared_length_exceeds(headers: &HeaderMap, max_file_size: u64) -> bool {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .is_some_and(|declared| declared > max_file_size.saturating_add(MULTIPART_OVERHEAD))
}

#[instrument(skip_all)]
pub async fn upload(
    State(state): State<AppState>,
    _authorized: Authorized,
    headers: HeaderMap,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, String)> {
    let uploads = &state.config.uploads;
    let limit = uploads.max_file_size;

    if declared_length_exceeds(&headers, limit) {
        return Err(Error::PayloadTooLarge { limit });
    }

    let mut multipart = multipart.map_err(|e| Error::MalformedRequest { message: e.body_text() })?;

    let field = loop {
        match multipart.next_field().await.map_err(|e| multipart_error(e, limit))? {
            Some(field) if field.name() == Some(FILE_FIELD) => break field,
            Some(field) => debug!(field = ?field.name(), "Skipping multipart field"),
            None => {
                return Err(Error::MalformedRequest {
                    message: format!("Missing required field: '{FILE_FIELD}'"),
                });
            }
        }
    };

    let client_name = field.file_name().map(str::to_owned);
    let mut stream = PeekStream::new(Box::pin(field));

    let prefix = stream.peek(uploads.sniff_len).await.map_err(|e| multipart_error(e, limit))?;
    let mime = sniff(prefix);
    if !state.allow_list.contains(&mime) {
        return Err(Error::UnsupportedContentType { mime: mime.to_string() });
    }

    let extension = file_extension(uploads.extension_policy, client_name.as_deref(), &mime);
    let (name, mut file) = open_unique(&state, &extension).await?;

    match copy_limited(&mut stream, &mut file, limit).await {
        Ok(written) => {
            info!(file_name = %name, mime = %mime, bytes = written, client_name = ?client_name, "Stored upload");
            Ok((StatusCode::CREATED, state.config.public_url(&name)))
        }
        Err(failure) => {
            drop(file);
            state.store.discard(&name).await;
            Err(failure.into_error(&name, limit))
        }
    }
}

/// Generate a name and open it for writing, honouring the collision policy.
async fn open_unique(state: &AppState, extension: &str) -> Result<(String, File)> {
    let uploads = &state.config.uploads;

    if !uploads.reject_collisions {
        let name = format!("{}{extension}", state.ids.generate(uploads.name_length));
        let file = state
            .store
            .create(&name, false)
            .await
            .map_err(|source| Error::StorageWrite { name: name.clone(), source })?;
        return Ok((name, file));
    }

    let mut last_name = String::new();
    for attempt in 1..=MAX_NAME_ATTEMPTS {
        let name = format!("{}{extension}", state.ids.generate(uploads.name_length));
        match state.store.create(&name, true).await {
            Ok(file) => return Ok((name, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                warn!(file_name = %name, attempt, "Generated name already taken, drawing another");
                last_name = name;
            }
            Err(source) => return Err(Error::StorageWrite { name, source }),
        }
    }

    Err(Error::StorageWrite {
        name: last_name,
        source: io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free name after {MAX_NAME_ATTEMPTS} attempts"),
        ),
    })
}

#[derive(Debug)]
enum CopyFailure {
    TooLarge,
    Read(MultipartError),
    Write(io::Error),
}

impl CopyFailure {
    fn into_error(self, name: &str, limit: u64) -> Error {
        match self {
            CopyFailure::TooLarge => Error::PayloadTooLarge { limit },
            CopyFailure::Read(e) => multipart_error(e, limit),
            CopyFailure::Write(source) => Error::StorageWrite {
                name: name.to_string(),
                source,
            },
        }
    }
}

/// Drain the upload into `file`, failing once more than `limit` bytes have arrived.
async fn copy_limited<S>(stream: &mut PeekStream<S>, file: &mut File, limit: u64) -> std::result::Result<u64, CopyFailure>
where
    S: Stream<Item = std::result::Result<Bytes, MultipartError>> + Unpin,
{
    let mut written = 0u64;
    while let Some(chunk) = stream.next_chunk().await {
        let chunk = chunk.map_err(CopyFailure::Read)?;
        written += chunk.len() as u64;
        if written > limit {
            return Err(CopyFailure::TooLarge);
        }
        file.write_all(&chunk).await.map_err(CopyFailure::Write)?;
    }
    file.flush().await.map_err(CopyFailure::Write)?;
    Ok(written)
}

fn multipart_error(e: MultipartError, limit: u64) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge { limit }
    } else {
        Error::MalformedRequest { message: e.body_text() }
    }
}

/// Final path component of a client-supplied name, for either separator style.
fn base_name(client_name: &str) -> &str {
    client_name.rsplit(['/', '\\']).next().unwrap_or(client_name)
}

/// Extension of the client's file name including the dot, or `""`.
fn client_extension(client_name: &str) -> &str {
    let base = base_name(client_name);
    base.rfind('.').map(|idx| &base[idx..]).unwrap_or("")
}

/// Conventional extension for a detected type.
fn extension_for(mime: &Mime) -> Option<&'static str> {
    let known = match mime.essence_str() {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/png" => Some("png"),
        "text/plain" => Some("txt"),
        "video/mp4" => Some("mp4"),
        "video/webm" => Some("webm"),
        "application/zip" => Some("zip"),
        _ => None,
    };
    known.or_else(|| mime_guess::get_mime_extensions(mime).and_then(|exts| exts.first().copied()))
}

/// The extension appended to a generated name, including its leading dot.
pub fn file_extension(policy: ExtensionPolicy, client_name: Option<&str>, mime: &Mime) -> String {
    match policy {
        ExtensionPolicy::Verbatim => client_name.map(client_extension).unwrap_or_default().to_string(),
        ExtensionPolicy::Sanitized => {
            let ext = client_name.map(client_extension).unwrap_or_default();
            let bare = ext.strip_prefix('.').unwrap_or_default();
            if (1..=MAX_SANITIZED_EXTENSION_LEN).contains(&bare.len()) && bare.bytes().all(|b| b.is_ascii_alphanumeric()) {
                ext.to_string()
            } else {
                String::new()
            }
        }
        ExtensionPolicy::Detected => extension_for(mime).map(|ext| format!(".{ext}")).unwrap_or_default(),
    }
}
