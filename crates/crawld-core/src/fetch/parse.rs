//! Response head parsing: status line, header lines, interim responses.

use std::io::Read;

use super::error::FetchError;
use super::headers::Headers;
use super::reader::PushbackReader;

/// Markers of an HTML document that started where a header line was expected.
const HTML_MARKERS: [&[u8]; 3] = [b"<!DOCTYPE", b"<HTML", b"<html"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StatusLine {
    pub code: u16,
    pub reason: String,
}

/// Header bytes are treated as ISO-8859-1.
pub(crate) fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Read one line into `line` (terminator stripped) and return its length.
///
/// CR, LF and CRLF all end a line; so does end of stream once at least one
/// byte was read. With `allow_continued`, a non-empty line
/// followed by SP/HT continues on the next physical line; the folded
/// whitespace becomes a single space.
pub(crate) fn read_line<R: Read>(
    input: &mut PushbackReader<R>,
    line: &mut Vec<u8>,
    allow_continued: bool,
) -> Result<usize, FetchError> {
    line.clear();
    loop {
        let Some(b) = input.read_byte()? else {
            if line.is_empty() {
                return Err(FetchError::eof());
            }
            return Ok(line.len());
        };
        match b {
            b'\r' | b'\n' => {
                if b == b'\r' && input.peek_byte()? == Some(b'\n') {
                    input.read_byte()?;
                }
                if allow_continued && !line.is_empty() && is_folding(input.peek_byte()?) {
                    while is_folding(input.peek_byte()?) {
                        input.read_byte()?;
                    }
                    line.push(b' ');
                    continue;
                }
                return Ok(line.len());
            }
            other => line.push(other),
        }
    }
}

fn is_folding(b: Option<u8>) -> bool {
    matches!(b, Some(b' ') | Some(b'\t'))
}

/// Parse `HTTP/x.y CODE [REASON]`. The code runs from the first space to
/// the next space or end of line; the reason may be empty.
pub(crate) fn parse_status_line(line: &str) -> Result<StatusLine, FetchError> {
    let bad = |detail: &str| FetchError::protocol(format!("bad status line '{line}': {detail}"));
    let (_, rest) = line.split_once(' ').ok_or_else(|| bad("no status code"))?;
    let (code, reason) = rest.split_once(' ').unwrap_or((rest, ""));
    let code: u16 = code.parse().map_err(|_| bad("status code is not a number"))?;
    Ok(StatusLine {
        code,
        reason: reason.to_string(),
    })
}

fn read_status_line<R: Read>(
    input: &mut PushbackReader<R>,
    line: &mut Vec<u8>,
) -> Result<StatusLine, FetchError> {
    read_line(input, line, false)?;
    parse_status_line(&latin1(line))
}

/// Parse one `Name: value` line into `headers`. A blank line without a
/// colon is ignored; any other colon-less line is a protocol error.
pub(crate) fn process_header_line(line: &[u8], headers: &mut Headers) -> Result<(), FetchError> {
    let text = latin1(line);
    let Some((name, value)) = text.split_once(':') else {
        if text.trim().is_empty() {
            return Ok(());
        }
        return Err(FetchError::protocol(format!("no colon in header: {text}")));
    };
    headers.set(name.trim(), value.trim());
    Ok(())
}

/// Read header lines up to the blank line that ends the head.
///
/// When a line turns out to contain the start of an HTML document (a server
/// that forgot the blank line), the document bytes are pushed back onto the
/// stream and header parsing stops.
pub(crate) fn parse_headers<R: Read>(
    input: &mut PushbackReader<R>,
    line: &mut Vec<u8>,
    headers: &mut Headers,
) -> Result<(), FetchError> {
    loop {
        if read_line(input, line, true)? == 0 {
            return Ok(());
        }
        if let Some(pos) = find_html_start(line) {
            input.unread(&line[pos..]);
            line.truncate(pos);
            if let Err(e) = process_header_line(line, headers) {
                tracing::debug!("dropping header fragment before document start: {e}");
            }
            return Ok(());
        }
        process_header_line(line, headers)?;
    }
}

fn find_html_start(line: &[u8]) -> Option<usize> {
    HTML_MARKERS
        .iter()
        .filter_map(|marker| line.windows(marker.len()).position(|w| w == *marker))
        .min()
}

/// Read the response head, skipping any `100 Continue` interim responses.
/// Headers of skipped interim responses stay in the map.
pub(crate) fn read_head<R: Read>(
    input: &mut PushbackReader<R>,
    line: &mut Vec<u8>,
    headers: &mut Headers,
) -> Result<StatusLine, FetchError> {
    loop {
        let status = read_status_line(input, line)?;
        parse_headers(input, line, headers)?;
        if status.code != 100 {
            return Ok(status);
        }
        tracing::trace!("skipping interim 100 response");
    }
}
