/// Just enough HTTP/1.1 to fetch a descriptor or a file
///
/// One request line plus a few headers go out; on the way back only the status
/// code and `Content-Length` are looked at.
use std::io::{self, ErrorKind, Write};

use crate::platform::Connection;

const USER_AGENT: &str = concat!("esp32-ota-updater/", env!("CARGO_PKG_VERSION"));
const READ_CHUNK: usize = 512;
/// Longest status or header line accepted
pub const MAX_HEAD_LINE: usize = 1024;

/// Write a `GET` request for `path` to `conn`
pub fn send_get<W: Write>(conn: &mut W, host: &str, port: u16, path: &str) -> io::Result<()> {
    let host_header = if port == 80 {
        host.to_string()
    } else {
        format!("{}:{}", host, port)
    };
    let request = format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Accept: text/html,application/json,application/octet-stream\r\n\
         User-Agent: {}\r\n\
         Connection: close\r\n\r\n",
        path, host_header, USER_AGENT
    );
    log::trace!("-> GET {} ({})", path, host_header);
    conn.write_all(request.as_bytes())?;
    conn.flush()
}

/// True for the error kinds a read deadline produces
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResponseHead {
    pub status: u16,
    pub content_length: Option<u64>,
}

impl ResponseHead {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Status code from a line such as `HTTP/1.1 200 OK`, 0 if it is not one
pub fn parse_status_line(line: &str) -> u16 {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(proto), Some(code)) if proto.starts_with("HTTP/") => code.parse().unwrap_or(0),
        _ => 0,
    }
}

/// `Content-Length` value from one header line, if that is what it is
pub fn parse_content_length(line: &str) -> Option<u64> {
    let (name, value) = line.split_once(':')?;
    if !name.trim().eq_ignore_ascii_case("content-length") {
        return None;
    }
    value.trim().parse().ok()
}

/// Buffered reader over a connection with line and raw body access.
///
/// Every read on the underlying connection is bounded by the connection's read
/// timeout, so a silent peer surfaces as a `TimedOut`/`WouldBlock` error.
pub struct ResponseReader<C> {
    conn: C,
    buf: Vec<u8>,
    pos: usize,
    received: u64,
    eof: bool,
}

impl<C: Connection> ResponseReader<C> {
    pub fn new(conn: C) -> Self {
        Self {
            conn,
            buf: Vec::with_capacity(READ_CHUNK),
            pos: 0,
            received: 0,
            eof: false,
        }
    }

    /// Total bytes received from the peer so far
    pub fn bytes_received(&self) -> u64 {
        self.received
    }

    pub fn into_inner(self) -> C {
        self.conn
    }

    fn fill(&mut self) -> io::Result<usize> {
        if self.eof {
            return Ok(0);
        }
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.conn.read(&mut chunk)?;
        if n == 0 {
            self.eof = true;
        }
        self.buf.extend_from_slice(&chunk[..n]);
        self.received += n as u64;
        Ok(n)
    }

    /// Next line without its `\r\n`, or `None` once the peer has closed and
    /// nothing is left. A final line without a newline is still returned.
    pub fn read_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(offset) = self.buf[self.pos..].iter().position(|&b| b == b'\n') {
                let end = self.pos + offset;
                let line = String::from_utf8_lossy(&self.buf[self.pos..end])
                    .trim_end_matches('\r')
                    .to_string();
                self.pos = end + 1;
                return Ok(Some(line));
            }

            if self.buf.len() - self.pos > MAX_HEAD_LINE {
                return Err(io::Error::new(
                    ErrorKind::InvalidData,
                    format!("line longer than {} bytes", MAX_HEAD_LINE),
                ));
            }

            if self.fill()? == 0 {
                if self.pos == self.buf.len() {
                    return Ok(None);
                }
                let line = String::from_utf8_lossy(&self.buf[self.pos..])
                    .trim_end_matches('\r')
                    .to_string();
                self.pos = self.buf.len();
                return Ok(Some(line));
            }
        }
    }

    /// Status line and headers, up to and including the blank line
    pub fn read_head(&mut self) -> io::Result<ResponseHead> {
        let status_line = self
            .read_line()?
            .ok_or_else(|| io::Error::new(ErrorKind::UnexpectedEof, "empty response"))?;

        let mut head = ResponseHead {
            status: parse_status_line(&status_line),
            content_length: None,
        };

        while let Some(line) = self.read_line()? {
            if line.is_empty() {
                break;
            }
            if let Some(len) = parse_content_length(&line) {
                head.content_length = Some(len);
            }
        }

        log::debug!(
            "<- HTTP {} (content-length: {:?})",
            head.status,
            head.content_length
        );
        Ok(head)
    }

    /// Feed the body to `on_line` one line at a time, without the `\r\n`.
    ///
    /// The body ends at `limit` bytes, when the peer closes, or when the stream
    /// goes quiet for longer than the read timeout; a trailing line without a
    /// newline is still delivered. More than `max_body` bytes in total, or a
    /// line longer than `max_line`, fails with `InvalidData`. Returns the
    /// number of body bytes consumed.
    pub fn read_body_lines<F>(
        &mut self,
        limit: Option<u64>,
        max_body: u64,
        max_line: usize,
        mut on_line: F,
    ) -> io::Result<u64>
    where
        F: FnMut(&str),
    {
        let mut line = Vec::new();
        let mut total = 0u64;
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let want = match limit {
                Some(limit) if total >= limit => break,
                Some(limit) => (limit - total).min(READ_CHUNK as u64) as usize,
                None => READ_CHUNK,
            };
            let n = match self.read_body(&mut buf[..want]) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if is_timeout(&e) && total > 0 => break,
                Err(e) => return Err(e),
            };

            total += n as u64;
            if total > max_body {
                return Err(io::Error::new(
                    ErrorKind::InvalidData,
                    format!("body larger than {} bytes", max_body),
                ));
            }

            for &b in &buf[..n] {
                if b == b'\n' {
                    on_line(String::from_utf8_lossy(&line).trim_end_matches('\r'));
                    line.clear();
                } else if line.len() >= max_line {
                    return Err(io::Error::new(
                        ErrorKind::InvalidData,
                        format!("line longer than {} bytes", max_line),
                    ));
                } else {
                    line.push(b);
                }
            }
        }

        if !line.is_empty() {
            on_line(String::from_utf8_lossy(&line).trim_end_matches('\r'));
        }
        Ok(total)
    }

    /// Raw body bytes; buffered bytes first, then straight from the connection.
    /// `Ok(0)` means the peer closed the stream.
    pub fn read_body(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos < self.buf.len() {
            let n = (self.buf.len() - self.pos).min(out.len());
            out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            return Ok(n);
        }
        if self.eof {
            return Ok(0);
        }
        let n = self.conn.read(out)?;
        if n == 0 {
            self.eof = true;
        }
        self.received += n as u64;
        Ok(n)
    }
}
