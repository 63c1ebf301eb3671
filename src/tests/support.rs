use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// One canned response, served to one connection
pub struct Reply {
    head: String,
    body: Vec<u8>,
    hold_open: Option<Duration>,
}

impl Reply {
    pub fn ok(body: &[u8]) -> Self {
        Self::truncated(body, body.len())
    }

    pub fn text(body: &str) -> Self {
        Self::ok(body.as_bytes())
    }

    pub fn status(code: u16) -> Self {
        Self {
            head: format!("HTTP/1.1 {} Status\r\nContent-Length: 0\r\n\r\n", code),
            body: Vec::new(),
            hold_open: None,
        }
    }

    /// Announces `declared` bytes but sends `body` and closes
    pub fn truncated(body: &[u8], declared: usize) -> Self {
        Self {
            head: format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", declared),
            body: body.to_vec(),
            hold_open: None,
        }
    }

    /// No Content-Length; the body ends when the socket closes
    pub fn until_close(body: &[u8]) -> Self {
        Self {
            head: "HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n".to_string(),
            body: body.to_vec(),
            hold_open: None,
        }
    }

    /// Keep the socket open after the body, like a stuck keep-alive server
    pub fn then_stall(mut self, duration: Duration) -> Self {
        self.hold_open = Some(duration);
        self
    }
}

pub struct TestServer {
    pub port: u16,
    paths: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    /// A server handle for a port nobody answers on
    pub fn detached(port: u16) -> Self {
        Self {
            port,
            paths: Arc::default(),
        }
    }

    /// Request paths seen so far, in arrival order
    pub fn paths(&self) -> Vec<String> {
        self.paths.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

/// Serve `replies` to successive connections on a loopback port
pub fn serve(replies: Vec<Reply>) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let paths = Arc::new(Mutex::new(Vec::new()));

    let seen = Arc::clone(&paths);
    thread::spawn(move || {
        for reply in replies {
            let Ok((stream, _)) = listener.accept() else {
                return;
            };
            answer(stream, reply, &seen);
        }
    });

    TestServer { port, paths }
}

fn answer(stream: TcpStream, reply: Reply, seen: &Mutex<Vec<String>>) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    if reader.read_line(&mut line).is_err() {
        return;
    }
    if let Some(path) = line.split_whitespace().nth(1) {
        seen.lock().unwrap().push(path.to_string());
    }
    // drain the header block
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) if line == "\r\n" || line == "\n" => break,
            Ok(_) => {}
        }
    }

    let mut stream = reader.into_inner();
    let _ = stream.write_all(reply.head.as_bytes());
    let _ = stream.write_all(&reply.body);
    let _ = stream.flush();
    if let Some(hold) = reply.hold_open {
        thread::sleep(hold);
    }
}
