//! Content sniffing for uploads.
//!
//! The detected type is decided from the leading bytes only, never from the client's filename or
//! declared `Content-Type`. Classification follows the browser sniffing table: HTML/XML
//! signatures first, then an ordered list of byte signatures, then plain text unless a binary
//! control byte shows up. Formats outside that table are never reported, so an MP4 with a
//! QuickTime major brand is still `video/mp4` and a shell script is still `text/plain`.

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use mime::Mime;

/// Default number of leading bytes inspected by [`sniff`].
pub const DEFAULT_SNIFF_LEN: usize = 512;

/// Default upload allow-list.
pub const DEFAULT_ALLOWED_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/gif",
    "image/png",
    "text/plain",
    "video/mp4",
    "video/webm",
    "application/zip",
];

// Tag prefixes that mark a document as HTML when followed by a space or '>'.
const HTML_SIGNATURES: &[&[u8]] = &[
    b"<!DOCTYPE HTML",
    b"<HTML",
    b"<HEAD",
    b"<SCRIPT",
    b"<IFRAME",
    b"<H1",
    b"<DIV",
    b"<FONT",
    b"<TABLE",
    b"<A",
    b"<STYLE",
    b"<TITLE",
    b"<B",
    b"<BODY",
    b"<BR",
    b"<P",
    b"<!--",
];

enum Pattern {
    /// Leading bytes equal the pattern.
    Exact(&'static [u8]),
    /// Leading bytes equal the pattern after masking; `mask` and `pattern` have the same length.
    Masked {
        mask: &'static [u8],
        pattern: &'static [u8],
    },
    Matcher(fn(&[u8]) -> bool),
}

struct Signature {
    pattern: Pattern,
    mime: &'static str,
}

const fn exact(pattern: &'static [u8], mime: &'static str) -> Signature {
    Signature {
        pattern: Pattern::Exact(pattern),
        mime,
    }
}

const fn masked(mask: &'static [u8], pattern: &'static [u8], mime: &'static str) -> Signature {
    Signature {
        pattern: Pattern::Masked { mask, pattern },
        mime,
    }
}

const fn matcher(matches: fn(&[u8]) -> bool, mime: &'static str) -> Signature {
    Signature {
        pattern: Pattern::Matcher(matches),
        mime,
    }
}

// Checked in order; the first match wins.
const SIGNATURES: &[Signature] = &[
    exact(b"%PDF-", "application/pdf"),
    exact(b"%!PS-Adobe-", "application/postscript"),
    masked(b"\xFF\xFF\x00\x00", b"\xFE\xFF\x00\x00", "text/plain; charset=utf-16be"),
    masked(b"\xFF\xFF\x00\x00", b"\xFF\xFE\x00\x00", "text/plain; charset=utf-16le"),
    masked(b"\xFF\xFF\xFF\x00", b"\xEF\xBB\xBF\x00", "text/plain; charset=utf-8"),
    exact(b"\x00\x00\x01\x00", "image/x-icon"),
    exact(b"\x00\x00\x02\x00", "image/x-icon"),
    exact(b"BM", "image/bmp"),
    exact(b"GIF87a", "image/gif"),
    exact(b"GIF89a", "image/gif"),
    masked(
        b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF\xFF\xFF",
        b"RIFF\x00\x00\x00\x00WEBPVP",
        "image/webp",
    ),
    exact(b"\x89PNG\r\n\x1A\n", "image/png"),
    matcher(infer::image::is_jpeg, "image/jpeg"),
    masked(
        b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF",
        b"FORM\x00\x00\x00\x00AIFF",
        "audio/aiff",
    ),
    exact(b"ID3", "audio/mpeg"),
    exact(b"OggS\x00", "application/ogg"),
    exact(b"MThd\x00\x00\x00\x06", "audio/midi"),
    masked(
        b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF",
        b"RIFF\x00\x00\x00\x00AVI ",
        "video/avi",
    ),
    masked(
        b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF",
        b"RIFF\x00\x00\x00\x00WAVE",
        "audio/wave",
    ),
    matcher(is_mp4, "video/mp4"),
    matcher(infer::video::is_webm, "video/webm"),
    exact(b"\x00\x01\x00\x00", "font/ttf"),
    exact(b"OTTO", "font/otf"),
    exact(b"ttcf", "font/collection"),
    exact(b"wOFF", "font/woff"),
    exact(b"wOF2", "font/woff2"),
    exact(b"\x1F\x8B\x08", "application/x-gzip"),
    exact(b"PK\x03\x04", "application/zip"),
    exact(b"Rar!\x1A\x07\x00", "application/x-rar-compressed"),
    exact(b"Rar!\x1A\x07\x01\x00", "application/x-rar-compressed"),
    exact(b"\x00asm", "application/wasm"),
];

impl Signature {
    fn matches(&self, data: &[u8]) -> bool {
        match self.pattern {
            Pattern::Exact(pattern) => data.starts_with(pattern),
            Pattern::Masked { mask, pattern } => {
                data.len() >= pattern.len()
                    && data.iter().zip(mask).zip(pattern).all(|((&b, &m), &p)| b & m == p)
            }
            Pattern::Matcher(matches) => matches(data),
        }
    }
}

/// Best-guess MIME type of a payload from its leading bytes.
pub fn sniff(prefix: &[u8]) -> Mime {
    let text = trim_leading_whitespace(prefix);
    if HTML_SIGNATURES.iter().any(|sig| has_tag_prefix(text, sig)) {
        return mime::TEXT_HTML_UTF_8;
    }
    if text.starts_with(b"<?xml") {
        return "text/xml; charset=utf-8".parse().unwrap_or(mime::TEXT_XML);
    }

    if let Some(signature) = SIGNATURES.iter().find(|sig| sig.matches(prefix)) {
        return signature.mime.parse().unwrap_or(mime::APPLICATION_OCTET_STREAM);
    }

    if prefix.iter().any(|&b| is_binary_byte(b)) {
        return mime::APPLICATION_OCTET_STREAM;
    }
    mime::TEXT_PLAIN_UTF_8
}

/// An ISO base media file whose `ftyp` box lists an `mp4*` brand, major or compatible.
fn is_mp4(data: &[u8]) -> bool {
    if data.len() < 12 {
        return false;
    }
    let box_size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if data.len() < box_size || box_size % 4 != 0 || &data[4..8] != b"ftyp" {
        return false;
    }
    // Brands are 4-byte words from offset 8; offset 12 holds the minor version.
    (8..box_size)
        .step_by(4)
        .filter(|&offset| offset != 12)
        .any(|offset| data[offset..].starts_with(b"mp4"))
}

fn trim_leading_whitespace(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !matches!(b, b'\t' | b'\n' | b'\x0c' | b'\r' | b' '))
        .unwrap_or(data.len());
    &data[start..]
}

fn has_tag_prefix(data: &[u8], sig: &[u8]) -> bool {
    if data.len() <= sig.len() || !data[..sig.len()].eq_ignore_ascii_case(sig) {
        return false;
    }
    matches!(data[sig.len()], b' ' | b'>')
}

fn is_binary_byte(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F)
}

/// The set of MIME types accepted for upload.
///
/// Membership compares only the essence (`type/subtype`), so `text/plain; charset=utf-8`
/// matches an allow-listed `text/plain`.
#[derive(Debug, Clone)]
pub struct AllowList {
    types: Vec<Mime>,
}

impl AllowList {
    pub fn new(types: Vec<Mime>) -> Self {
        Self { types }
    }

    /// Parse allow-list entries, failing on the first malformed one.
    pub fn parse<I, S>(entries: I) -> Result<Self, mime::FromStrError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let types = entries
            .into_iter()
            .map(|entry| entry.as_ref().trim().parse::<Mime>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { types })
    }

    pub fn contains(&self, mime: &Mime) -> bool {
        self.types
            .iter()
            .any(|allowed| allowed.essence_str().eq_ignore_ascii_case(mime.essence_str()))
    }
}

impl Default for AllowList {
    fn default() -> Self {
        Self::parse(DEFAULT_ALLOWED_TYPES).unwrap_or_else(|_| Self::new(Vec::new()))
    }
}

/// A byte stream that can be inspected ahead of time without losing data.
///
/// Bytes pulled in by [`PeekStream::peek`] are kept and handed out again, in order, by the next
/// call to [`PeekStream::next_chunk`], so a consumer always sees the stream from offset zero.
pub struct PeekStream<S> {
    inner: S,
    head: BytesMut,
    exhausted: bool,
}

impl<S, E> PeekStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            head: BytesMut::new(),
            exhausted: false,
        }
    }

    /// Look at up to `n` leading bytes. Fewer are returned only when the stream ends first.
    pub async fn peek(&mut self, n: usize) -> Result<&[u8], E> {
        while self.head.len() < n && !self.exhausted {
            match self.inner.next().await {
                Some(Ok(chunk)) => self.head.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(e),
                None => self.exhausted = true,
            }
        }
        let len = self.head.len().min(n);
        Ok(&self.head[..len])
    }

    /// Next chunk of the stream, starting with anything buffered by `peek`.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, E>> {
        if !self.head.is_empty() {
            return Some(Ok(self.head.split().freeze()));
        }
        if self.exhausted {
            return None;
        }
        self.inner.next().await
    }
}
