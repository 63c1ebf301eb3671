pub mod tcp;
#[cfg(target_os = "espidf")]
pub mod wifi;

pub use self::tcp::TcpTransport;
