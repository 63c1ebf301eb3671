// Scripted in-memory collaborators for unit tests

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::io::{self, ErrorKind, Read, Write};
use std::rc::Rc;
use std::time::Duration;

use crate::platform::{
    Connection, FirmwareOutcome, FirmwareRequest, FirmwareUpdater, Indicator, MonotonicClock,
    Storage, Transport,
};

#[derive(Debug, Clone)]
enum Step {
    Data(Vec<u8>),
    Timeout,
}

/// Connection that replays a script of chunks, then either closes or stalls
#[derive(Debug, Clone)]
pub struct MockConnection {
    steps: VecDeque<Step>,
    stall_at_end: bool,
    sent: Rc<RefCell<Vec<u8>>>,
    pub read_timeout: Option<Duration>,
}

impl MockConnection {
    /// Delivers `chunks` one read at a time, then closes
    pub fn chunks(chunks: &[&[u8]]) -> Self {
        Self {
            steps: chunks.iter().map(|c| Step::Data(c.to_vec())).collect(),
            stall_at_end: false,
            sent: Rc::default(),
            read_timeout: None,
        }
    }

    /// Full text response delivered in one read
    pub fn response(text: &str) -> Self {
        Self::chunks(&[text.as_bytes()])
    }

    /// Never sends anything
    pub fn silent() -> Self {
        Self::chunks(&[]).stalling()
    }

    /// Time out instead of closing once the script is exhausted
    pub fn stalling(mut self) -> Self {
        self.stall_at_end = true;
        self
    }

    pub fn then_timeout(mut self) -> Self {
        self.steps.push_back(Step::Timeout);
        self
    }
}

impl Read for MockConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.steps.pop_front() {
            Some(Step::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    self.steps.push_front(Step::Data(data.split_off(n)));
                }
                Ok(n)
            }
            Some(Step::Timeout) => Err(io::Error::new(ErrorKind::TimedOut, "read timed out")),
            None if self.stall_at_end => {
                Err(io::Error::new(ErrorKind::WouldBlock, "no data"))
            }
            None => Ok(0),
        }
    }
}

impl Write for MockConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sent.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Connection for MockConnection {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.read_timeout = Some(timeout);
        Ok(())
    }
}

/// Hands out scripted connections in order and records what was requested
#[derive(Debug, Default)]
pub struct MockTransport {
    script: VecDeque<io::Result<MockConnection>>,
    requests: Rc<RefCell<Vec<String>>>,
    pub connects: Vec<(String, u16, Duration)>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&mut self, conn: MockConnection) -> &mut Self {
        self.script.push_back(Ok(conn));
        self
    }

    pub fn respond_text(&mut self, text: &str) -> &mut Self {
        self.respond(MockConnection::response(text))
    }

    pub fn refuse(&mut self) -> &mut Self {
        self.script
            .push_back(Err(io::Error::new(ErrorKind::TimedOut, "connect timed out")));
        self
    }

    /// Request lines (`GET /path HTTP/1.1`) seen so far
    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

/// Connection handed out by [`MockTransport`]; logs its request line on drop
pub struct RecordingConnection {
    inner: MockConnection,
    requests: Rc<RefCell<Vec<String>>>,
}

impl Read for RecordingConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for RecordingConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Connection for RecordingConnection {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.inner.set_read_timeout(timeout)
    }
}

impl Drop for RecordingConnection {
    fn drop(&mut self) {
        let sent = String::from_utf8_lossy(&self.inner.sent.borrow()).to_string();
        if let Some(line) = sent.lines().next() {
            self.requests.borrow_mut().push(line.to_string());
        }
    }
}

impl Transport for MockTransport {
    type Conn = RecordingConnection;

    fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> io::Result<Self::Conn> {
        self.connects.push((host.to_string(), port, timeout));
        let inner = self
            .script
            .pop_front()
            .unwrap_or_else(|| Err(io::Error::new(ErrorKind::ConnectionRefused, "unscripted")))?;
        Ok(RecordingConnection {
            inner,
            requests: Rc::clone(&self.requests),
        })
    }
}

/// In-memory filesystem with an optional write budget to simulate a full disk
#[derive(Debug, Default, Clone)]
pub struct MemStorage {
    pub files: Rc<RefCell<BTreeMap<String, Vec<u8>>>>,
    pub formats: Rc<RefCell<usize>>,
    pub write_budget: Option<usize>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.files.borrow().get(path).cloned()
    }

    pub fn insert(&self, path: &str, data: &[u8]) {
        self.files.borrow_mut().insert(path.to_string(), data.to_vec());
    }

    pub fn format_count(&self) -> usize {
        *self.formats.borrow()
    }
}

pub struct MemFile {
    path: String,
    files: Rc<RefCell<BTreeMap<String, Vec<u8>>>>,
    budget: Option<usize>,
}

impl Write for MemFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut files = self.files.borrow_mut();
        let file = files.entry(self.path.clone()).or_default();
        if let Some(budget) = self.budget {
            if file.len() + buf.len() > budget {
                return Err(io::Error::new(ErrorKind::Other, "no space left"));
            }
        }
        file.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Storage for MemStorage {
    type File = MemFile;

    fn format(&mut self) -> io::Result<()> {
        self.files.borrow_mut().clear();
        *self.formats.borrow_mut() += 1;
        Ok(())
    }

    fn remove(&mut self, path: &str) -> io::Result<()> {
        self.files.borrow_mut().remove(path);
        Ok(())
    }

    fn create(&mut self, path: &str) -> io::Result<Self::File> {
        self.files.borrow_mut().insert(path.to_string(), Vec::new());
        Ok(MemFile {
            path: path.to_string(),
            files: Rc::clone(&self.files),
            budget: self.write_budget,
        })
    }
}

/// Firmware collaborator that only records the requests it was given
#[derive(Debug, Clone)]
pub struct MockFirmware {
    pub outcome: FirmwareOutcome,
    pub calls: Rc<RefCell<Vec<FirmwareRequest>>>,
}

impl MockFirmware {
    pub fn returning(outcome: FirmwareOutcome) -> Self {
        Self {
            outcome,
            calls: Rc::default(),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }
}

impl FirmwareUpdater for MockFirmware {
    fn update(&mut self, request: &FirmwareRequest) -> FirmwareOutcome {
        self.calls.borrow_mut().push(request.clone());
        self.outcome
    }
}

/// Records every level written
#[derive(Debug, Default, Clone)]
pub struct MockIndicator {
    pub writes: Rc<RefCell<Vec<(u8, bool)>>>,
}

impl Indicator for MockIndicator {
    fn set_level(&mut self, pin: u8, high: bool) {
        self.writes.borrow_mut().push((pin, high));
    }
}

/// Clock that advances by a fixed step every time it is read
#[derive(Debug, Default, Clone)]
pub struct MockClock {
    pub now: Rc<RefCell<u32>>,
    pub step: u32,
}

impl MockClock {
    pub fn at(now: u32) -> Self {
        Self {
            now: Rc::new(RefCell::new(now)),
            step: 0,
        }
    }

    pub fn stepping(mut self, step: u32) -> Self {
        self.step = step;
        self
    }

    pub fn set(&self, now: u32) {
        *self.now.borrow_mut() = now;
    }

    pub fn advance_secs(&self, secs: u32) {
        let mut now = self.now.borrow_mut();
        *now = now.wrapping_add(secs * 1000);
    }
}

impl MonotonicClock for MockClock {
    fn now_ms(&self) -> u32 {
        let mut now = self.now.borrow_mut();
        let current = *now;
        *now = now.wrapping_add(self.step);
        current
    }
}

/// HTTP response carrying `body` with a correct `Content-Length`
pub fn http_ok(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    )
}

/// Descriptor body for version `a.b.c.d` with an optional file list
pub fn descriptor(v: [u8; 4], format: bool, files: &[&str]) -> String {
    let list: Vec<String> = files.iter().map(|f| format!("\"{}\"", f)).collect();
    format!(
        r#"{{"v1":{},"v2":{},"v3":{},"v4":{},"SPIFFS_format":{},"SPIFFS_update_files":[{}]}}"#,
        v[0],
        v[1],
        v[2],
        v[3],
        u8::from(format),
        list.join(",")
    )
}
