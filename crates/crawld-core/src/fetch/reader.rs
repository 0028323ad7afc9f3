//! Byte reader with push-back, used by the response parser to hand bytes
//! that were read as a header line back to the body stream.

use std::io::{self, Read};

pub struct PushbackReader<R> {
    inner: R,
    // Stack: the last element is the next byte to read.
    pushed: Vec<u8>,
}

impl<R: Read> PushbackReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pushed: Vec::new(),
        }
    }

    /// Next byte, or `None` at end of stream.
    pub fn read_byte(&mut self) -> io::Result<Option<u8>> {
        if let Some(b) = self.pushed.pop() {
            return Ok(Some(b));
        }
        let mut buf = [0u8; 1];
        loop {
            match self.inner.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(buf[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn peek_byte(&mut self) -> io::Result<Option<u8>> {
        let b = self.read_byte()?;
        if let Some(b) = b {
            self.pushed.push(b);
        }
        Ok(b)
    }

    /// Push `bytes` back so that they are read next, in order.
    pub fn unread(&mut self, bytes: &[u8]) {
        self.pushed.extend(bytes.iter().rev());
    }
}

impl<R: Read> Read for PushbackReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pushed.is_empty() {
            return self.inner.read(buf);
        }
        let mut n = 0;
        while n < buf.len() {
            match self.pushed.pop() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unread_bytes_come_back_in_order() {
        let mut r = PushbackReader::new(&b"xyz"[..]);
        assert_eq!(r.read_byte().unwrap(), Some(b'x'));
        r.unread(b"ab");
        assert_eq!(r.peek_byte().unwrap(), Some(b'a'));
        let mut buf = [0u8; 8];
        let n = r.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ab");
        let mut rest = Vec::new();
        r.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"yz");
        assert_eq!(r.read_byte().unwrap(), None);
    }
}
