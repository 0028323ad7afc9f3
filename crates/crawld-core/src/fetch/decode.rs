//! Content-Encoding handling.

use std::io::Read;

use flate2::read::GzDecoder;

use super::error::FetchError;

pub(crate) fn is_gzip(content_encoding: Option<&str>) -> bool {
    content_encoding.is_some_and(|v| {
        let v = v.trim();
        v.eq_ignore_ascii_case("gzip") || v.eq_ignore_ascii_case("x-gzip")
    })
}

/// Inflate a gzip body, keeping at most `max_content` bytes. When the
/// compressed input was itself cut at the content limit, whatever inflated
/// before the cut is returned.
pub(crate) fn gunzip(
    data: &[u8],
    max_content: Option<usize>,
    input_truncated: bool,
) -> Result<Vec<u8>, FetchError> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    let res = match max_content {
        Some(m) => (&mut decoder).take(m as u64).read_to_end(&mut out),
        None => decoder.read_to_end(&mut out),
    };
    match res {
        Ok(_) => Ok(out),
        Err(e) if input_truncated && !out.is_empty() => {
            tracing::debug!(inflated = out.len(), "partial gzip content: {e}");
            Ok(out)
        }
        Err(e) => Err(FetchError::Decode(e)),
    }
}
