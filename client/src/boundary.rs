use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tracing::{debug, warn};

use crate::error::{ConnectionError, ProtocolError, StreamError};

/// Delimiter assumed when the content type carries no usable boundary.
pub const DEFAULT_BOUNDARY: &str = "--frame";

const MAX_HEADER_BYTES: usize = 16 * 1024;
// Longest line kept whole while searching for a boundary.
const MAX_LINE_BYTES: usize = 8 * 1024;
const LINE_CAPACITY: usize = 256;
// RFC 2046 caps the boundary parameter at 70 characters.
const MAX_BOUNDARY_PARAM: usize = 70;

/// The `--`-prefixed delimiter that separates parts of a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boundary {
    token: String,
}

impl Boundary {
    /// Builds the delimiter from a `boundary=` parameter value. A single
    /// leading `--` is tolerated, since some cameras include it.
    pub fn new(param: &str) -> Option<Self> {
        let bare = param.strip_prefix("--").unwrap_or(param);
        if bare.is_empty()
            || bare.len() > MAX_BOUNDARY_PARAM
            || bare.chars().any(|c| c.is_control())
        {
            return None;
        }
        Some(Self {
            token: format!("--{bare}"),
        })
    }

    /// Derives the delimiter from a `Content-Type` header, falling back to
    /// [`DEFAULT_BOUNDARY`].
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        match content_type.and_then(boundary_param).and_then(Self::new) {
            Some(boundary) => boundary,
            None => {
                warn!(
                    content_type,
                    default = DEFAULT_BOUNDARY,
                    "could not find boundary in Content-Type, assuming default"
                );
                Self::default()
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.token
    }
}

impl Default for Boundary {
    fn default() -> Self {
        Self {
            token: DEFAULT_BOUNDARY.to_owned(),
        }
    }
}

/// Extract the raw `boundary` parameter from a `multipart/*` content type.
fn boundary_param(content_type: &str) -> Option<&str> {
    let mut parts = content_type.split(';');
    let media_type = parts.next()?.trim();
    if !media_type
        .get(..10)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("multipart/"))
    {
        return None;
    }
    parts.find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("boundary")
            .then(|| value.trim().trim_matches('"'))
    })
}

/// Why a part was dropped without ending the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingLength,
    InvalidLength(String),
    EmptyPayload,
    TooLarge { len: usize, limit: usize },
}

/// One step of the scanner.
#[derive(Debug)]
pub enum Part {
    /// Exactly `Content-Length` payload bytes.
    Payload(Bytes),
    /// The part's headers were unusable. An oversized payload is consumed
    /// unread; anything else is discarded while searching for the next
    /// boundary.
    Skipped(SkipReason),
    /// The body is exhausted or the closing delimiter was seen.
    End,
}

/// Pulls parts out of a multipart body, one per [`PartScanner::next_part`]
/// call.
pub struct PartScanner {
    boundary: Boundary,
    close_delimiter: Vec<u8>,
    max_payload: usize,
    line: Vec<u8>,
}

impl PartScanner {
    pub fn new(boundary: Boundary, max_payload: usize) -> Self {
        let close_delimiter = format!("{}--", boundary.as_str()).into_bytes();
        Self {
            boundary,
            close_delimiter,
            max_payload,
            line: Vec::with_capacity(LINE_CAPACITY),
        }
    }

    pub fn boundary(&self) -> &Boundary {
        &self.boundary
    }

    /// Reads the next part. Anything before the boundary line is discarded.
    ///
    /// Returns [`Part::End`] when the reader is exhausted between parts;
    /// running out of bytes inside a header block or payload is a
    /// [`ProtocolError`].
    pub async fn next_part<R>(&mut self, reader: &mut R) -> Result<Part, StreamError>
    where
        R: AsyncBufRead + Unpin + ?Sized,
    {
        if !self.seek_boundary(reader).await? {
            return Ok(Part::End);
        }

        let content_length = self.read_headers(reader).await?;
        let len = match content_length {
            None => return Ok(Part::Skipped(SkipReason::MissingLength)),
            Some(Err(raw)) => return Ok(Part::Skipped(SkipReason::InvalidLength(raw))),
            Some(Ok(0)) => return Ok(Part::Skipped(SkipReason::EmptyPayload)),
            Some(Ok(len)) if len > self.max_payload => {
                discard(reader, len).await?;
                return Ok(Part::Skipped(SkipReason::TooLarge {
                    len,
                    limit: self.max_payload,
                }));
            }
            Some(Ok(len)) => len,
        };

        let mut payload = vec![0u8; len];
        let mut got = 0;
        while got < len {
            let n = reader
                .read(&mut payload[got..])
                .await
                .map_err(ConnectionError::Io)?;
            if n == 0 {
                return Err(ProtocolError::TruncatedPayload { expected: len, got }.into());
            }
            got += n;
        }
        debug!(len, "extracted part payload");
        Ok(Part::Payload(Bytes::from(payload)))
    }

    /// Returns `false` if the stream ends before another part begins.
    async fn seek_boundary<R>(&mut self, reader: &mut R) -> Result<bool, StreamError>
    where
        R: AsyncBufRead + Unpin + ?Sized,
    {
        loop {
            self.line.clear();
            self.line.shrink_to(LINE_CAPACITY);
            loop {
                let n = (&mut *reader)
                    .take(MAX_LINE_BYTES as u64)
                    .read_until(b'\n', &mut self.line)
                    .await
                    .map_err(ConnectionError::Io)?;
                if n == 0 {
                    return Ok(false);
                }
                if n < MAX_LINE_BYTES || self.line.ends_with(b"\n") {
                    break;
                }
                // Overlong line: keep only enough tail for a delimiter that
                // straddles the cut.
                let cut = self.line.len().saturating_sub(self.close_delimiter.len());
                self.line.drain(..cut);
            }
            if self.line.trim_ascii() == self.close_delimiter.as_slice() {
                debug!("closing multipart delimiter");
                return Ok(false);
            }
            if find_subsequence(&self.line, self.boundary.as_str().as_bytes()).is_some() {
                return Ok(true);
            }
        }
    }

    /// Reads header lines up to the blank separator line. Yields the
    /// `Content-Length` value if one was present, unparsed text on failure.
    async fn read_headers<R>(
        &mut self,
        reader: &mut R,
    ) -> Result<Option<Result<usize, String>>, StreamError>
    where
        R: AsyncBufRead + Unpin + ?Sized,
    {
        let mut content_length = None;
        let mut header_bytes = 0;
        loop {
            self.line.clear();
            // One byte past the budget is enough to detect the overrun.
            let budget = (MAX_HEADER_BYTES - header_bytes + 1) as u64;
            let n = (&mut *reader)
                .take(budget)
                .read_until(b'\n', &mut self.line)
                .await
                .map_err(ConnectionError::Io)?;
            if n == 0 {
                return Err(ProtocolError::UnterminatedHeaders.into());
            }
            header_bytes += n;
            if header_bytes > MAX_HEADER_BYTES {
                return Err(ProtocolError::HeaderBlockTooLarge {
                    limit: MAX_HEADER_BYTES,
                }
                .into());
            }

            let line = self.line.trim_ascii();
            if line.is_empty() {
                return Ok(content_length);
            }
            if let Some(value) = header_value(line, "content-length") {
                let raw = String::from_utf8_lossy(value).into_owned();
                content_length = Some(raw.parse::<usize>().map_err(|_| raw));
            }
        }
    }
}

/// Consumes exactly `len` payload bytes without buffering them.
async fn discard<R>(reader: &mut R, len: usize) -> Result<(), StreamError>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let got = tokio::io::copy(&mut (&mut *reader).take(len as u64), &mut tokio::io::sink())
        .await
        .map_err(ConnectionError::Io)?;
    if got < len as u64 {
        return Err(ProtocolError::TruncatedPayload {
            expected: len,
            got: got as usize,
        }
        .into());
    }
    debug!(len, "discarded oversized part");
    Ok(())
}

/// Returns the trimmed value of `name` if `line` is that header.
fn header_value<'a>(line: &'a [u8], name: &str) -> Option<&'a [u8]> {
    let colon = line.iter().position(|&b| b == b':')?;
    let (key, rest) = line.split_at(colon);
    key.trim_ascii()
        .eq_ignore_ascii_case(name.as_bytes())
        .then(|| rest[1..].trim_ascii())
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
