//! Socket setup: connect with timeout, proxy CONNECT tunnels, and the
//! plain/TLS stream the request is written to.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::error::FetchError;
use super::headers::Headers;
use super::parse::{read_head, StatusLine};
use super::reader::PushbackReader;
use super::tls::TlsStream;

/// Plain or TLS connection to the origin (or proxy).
pub(crate) enum Conn {
    Plain(TcpStream),
    Tls(Box<TlsStream>),
}

impl Read for Conn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Conn::Plain(s) => s.read(buf),
            Conn::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Conn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Conn::Plain(s) => s.write(buf),
            Conn::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Conn::Plain(s) => s.flush(),
            Conn::Tls(s) => s.flush(),
        }
    }
}

/// Open a TCP connection, trying each resolved address in turn. `timeout`
/// bounds the connect and every later read/write; `None` waits forever.
pub(crate) fn connect(
    host: &str,
    port: u16,
    timeout: Option<Duration>,
) -> Result<TcpStream, FetchError> {
    let addr = format!("{host}:{port}");
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|source| FetchError::Connect {
            addr: addr.clone(),
            source,
        })?
        .collect();

    let mut last_err = io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses");
    for sa in addrs {
        let res = match timeout {
            Some(t) => TcpStream::connect_timeout(&sa, t),
            None => TcpStream::connect(sa),
        };
        match res {
            Ok(sock) => {
                sock.set_read_timeout(timeout)?;
                sock.set_write_timeout(timeout)?;
                sock.set_nodelay(true)?;
                return Ok(sock);
            }
            Err(e) => last_err = e,
        }
    }
    if matches!(
        last_err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    ) {
        return Err(FetchError::ConnectTimeout { addr });
    }
    Err(FetchError::Connect {
        addr,
        source: last_err,
    })
}

/// Ask an HTTP proxy to open a tunnel to `host:port`. The proxy's reply is
/// read byte by byte so that no TLS bytes are consumed.
pub(crate) fn tunnel(sock: &mut TcpStream, host: &str, port: u16) -> Result<(), FetchError> {
    let target = format!("{host}:{port}");
    let req = format!("CONNECT {target} HTTP/1.0\r\nHost: {target}\r\n\r\n");
    sock.write_all(req.as_bytes())?;
    sock.flush()?;

    let mut input = PushbackReader::new(&mut *sock);
    let mut line = Vec::new();
    let mut headers = Headers::new();
    let StatusLine { code, reason } = read_head(&mut input, &mut line, &mut headers)?;
    if !(200..300).contains(&code) {
        return Err(FetchError::protocol(format!(
            "proxy refused tunnel to {target}: {code} {reason}"
        )));
    }
    tracing::trace!(%target, "proxy tunnel established");
    Ok(())
}
