//! Response body framing: chunked transfer coding or plain length-bounded
//! reads, both capped by the content limit.

use std::io::{self, Read};

use super::error::FetchError;
use super::headers::Headers;
use super::parse::{latin1, parse_headers, read_line};
use super::reader::PushbackReader;

pub(crate) const BUFFER_SIZE: usize = 8 * 1024;

/// Raw body bytes and whether the content cap cut them short.
#[derive(Debug, Default)]
pub(crate) struct Body {
    pub content: Vec<u8>,
    pub truncated: bool,
}

/// Read the body that follows `headers`. Chunked trailers are merged into
/// `headers`.
pub(crate) fn read_body<R: Read>(
    input: &mut PushbackReader<R>,
    headers: &mut Headers,
    max_content: Option<usize>,
) -> Result<Body, FetchError> {
    let chunked = headers
        .get("Transfer-Encoding")
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("chunked"));
    if chunked {
        read_chunked(input, headers, max_content)
    } else {
        read_plain(input, headers, max_content)
    }
}

fn read_plain<R: Read>(
    input: &mut PushbackReader<R>,
    headers: &Headers,
    max_content: Option<usize>,
) -> Result<Body, FetchError> {
    let declared = match headers.get("Content-Length").map(str::trim) {
        None | Some("") => None,
        Some(v) => Some(
            v.parse::<u64>()
                .map_err(|_| FetchError::protocol(format!("bad content length: {v}")))?,
        ),
    };
    let cap = max_content.map(|m| m as u64);
    let limit = match (declared, cap) {
        (Some(d), Some(m)) => Some(d.min(m)),
        (d, m) => d.or(m),
    };

    let mut content = Vec::with_capacity(limit.map_or(BUFFER_SIZE, |l| l.min(BUFFER_SIZE as u64) as usize));
    let mut buf = [0u8; BUFFER_SIZE];
    loop {
        let want = match limit {
            Some(l) => {
                let remaining = l - content.len() as u64;
                if remaining == 0 {
                    break;
                }
                remaining.min(BUFFER_SIZE as u64) as usize
            }
            None => BUFFER_SIZE,
        };
        match input.read(&mut buf[..want]) {
            Ok(0) => break,
            Ok(n) => content.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            // Peers that close without TLS close_notify surface this way.
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
    }

    let truncated = match cap {
        Some(m) => content.len() as u64 == m && declared.map_or(true, |d| d > m),
        None => false,
    };
    Ok(Body { content, truncated })
}

fn read_chunked<R: Read>(
    input: &mut PushbackReader<R>,
    headers: &mut Headers,
    max_content: Option<usize>,
) -> Result<Body, FetchError> {
    let mut line = Vec::new();
    let mut content = Vec::new();
    loop {
        read_line(input, &mut line, false)?;
        let text = latin1(&line);
        let size_field = text.split_once(';').map_or(text.as_str(), |(s, _)| s).trim();
        let size = usize::from_str_radix(size_field, 16)
            .map_err(|_| FetchError::protocol(format!("bad chunk length: {text}")))?;

        if size == 0 {
            parse_headers(input, &mut line, headers)?;
            return Ok(Body {
                content,
                truncated: false,
            });
        }

        let take = match max_content {
            Some(m) => size.min(m.saturating_sub(content.len())),
            None => size,
        };
        read_chunk_data(input, take, &mut content)?;
        if take < size {
            tracing::trace!(limit = ?max_content, "content limit reached inside chunk");
            return Ok(Body {
                content,
                truncated: true,
            });
        }
        // CRLF after the chunk data
        read_line(input, &mut line, false)?;
    }
}

fn read_chunk_data<R: Read>(
    input: &mut PushbackReader<R>,
    len: usize,
    content: &mut Vec<u8>,
) -> Result<(), FetchError> {
    let before = content.len();
    let mut buf = [0u8; BUFFER_SIZE];
    let mut remaining = len;
    while remaining > 0 {
        let want = remaining.min(BUFFER_SIZE);
        match input.read(&mut buf[..want]) {
            Ok(0) => {
                return Err(FetchError::protocol(format!(
                    "chunk eof after {} bytes in successful chunks and {} in current chunk",
                    before,
                    len - remaining
                )))
            }
            Ok(n) => {
                content.extend_from_slice(&buf[..n]);
                remaining -= n;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
