use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to open capture on {0}: {1}")]
    CaptureOpen(String, String),
    #[error("no such file: {0}")]
    NoSuchFile(String),
    #[error("failed to get next packet: {0}")]
    CaptureRead(String),
    #[error("IPv4 header too short: {0} bytes")]
    Ipv4HeaderTooShort(usize),
    #[error("IPv6 header too short: {0} bytes")]
    Ipv6HeaderTooShort(usize),
    #[error("stdin capture is not supported on this platform")]
    StdinUnsupported,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
