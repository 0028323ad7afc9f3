//! HTTP/1.0 GET request serialisation.

use chrono::{DateTime, Utc};

/// Everything that goes into one request head.
#[derive(Debug)]
pub(crate) struct RequestHead<'a> {
    /// Origin-form path or, when talking to a proxy, the absolute URI.
    pub target: &'a str,
    /// Host header value; carries `:port` only if the URL named one.
    pub host: &'a str,
    pub accept: &'a str,
    pub user_agent: &'a str,
    pub if_modified_since: Option<DateTime<Utc>>,
}

/// RFC 1123 date as used in HTTP headers.
pub fn http_date(t: DateTime<Utc>) -> String {
    t.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

impl RequestHead<'_> {
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut req = format!("GET {} HTTP/1.0\r\n", self.target);
        req.push_str(&format!("Host: {}\r\n", self.host));
        req.push_str("Accept-Encoding: x-gzip, gzip\r\n");
        if !self.accept.is_empty() {
            req.push_str(&format!("Accept: {}\r\n", self.accept));
        }
        if self.user_agent.is_empty() {
            tracing::error!("user agent is not set; sending request without one");
        } else {
            req.push_str(&format!("User-Agent: {}\r\n", self.user_agent));
        }
        if let Some(t) = self.if_modified_since {
            req.push_str(&format!("If-Modified-Since: {}\r\n", http_date(t)));
        }
        req.push_str("\r\n");
        req.into_bytes()
    }
}
