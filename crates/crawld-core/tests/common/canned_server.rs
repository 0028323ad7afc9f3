//! Minimal TCP server for integration tests that answers every connection
//! with the same raw bytes.
//!
//! The response is written verbatim, so tests can serve malformed heads,
//! chunked bodies or interim responses. Each request head is recorded.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub struct CannedServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
}

impl CannedServer {
    /// Starts a server in a background thread that answers with `response`
    /// and then closes the connection. Runs until the process exits.
    pub fn start(response: impl Into<Vec<u8>>) -> Self {
        Self::spawn(Some(Arc::new(response.into())))
    }

    /// Accepts connections and reads the request but never answers.
    pub fn start_silent() -> Self {
        Self::spawn(None)
    }

    fn spawn(response: Option<Arc<Vec<u8>>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let response = response.clone();
                let seen = Arc::clone(&seen);
                thread::spawn(move || handle(stream, response.as_deref(), &seen));
            }
        });
        Self { addr, requests }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// `http://127.0.0.1:<port><path>`
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Request heads received so far, in arrival order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

fn handle(mut stream: TcpStream, response: Option<&Vec<u8>>, seen: &Mutex<Vec<String>>) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
    let head = read_head(&mut stream);
    seen.lock().unwrap().push(head);
    match response {
        Some(bytes) => {
            let _ = stream.write_all(bytes);
            let _ = stream.flush();
        }
        None => thread::sleep(Duration::from_secs(5)),
    }
}

fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}

/// A port that nothing listens on.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().unwrap().port()
}
