use std::io::{self, ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use updater_core::{Connection, Transport};

/// Plain TCP to the update server. lwIP sockets on the device, the OS stack on host.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransport;

impl TcpTransport {
    pub fn new() -> Self {
        Self
    }
}

pub struct TcpConnection {
    stream: TcpStream,
}

impl Read for TcpConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Connection for TcpConnection {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        // a zero timeout means "block forever" to the socket layer
        self.stream
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))
    }
}

impl Transport for TcpTransport {
    type Conn = TcpConnection;

    fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> io::Result<TcpConnection> {
        let deadline = Instant::now() + timeout;
        let mut last_err = io::Error::new(
            ErrorKind::NotFound,
            format!("{} did not resolve to any address", host),
        );

        for addr in (host, port).to_socket_addrs()? {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                last_err = io::Error::new(ErrorKind::TimedOut, "connect deadline exceeded");
                break;
            }
            match TcpStream::connect_timeout(&addr, remaining) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_write_timeout(Some(timeout.max(Duration::from_millis(1))))?;
                    log::debug!("Connected to {}", addr);
                    return Ok(TcpConnection { stream });
                }
                Err(e) => {
                    log::debug!("Connect to {} failed: {}", addr, e);
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }
}
