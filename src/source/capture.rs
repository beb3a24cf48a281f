use std::path::Path;
use std::time::Duration;

use log::info;
use pcap::{Active, Capture, Device, Offline, Precision};

use super::error::{Error, Result};

const SNAPLEN: i32 = 65535;
const POLL_TIMEOUT_MS: i32 = 1000;

// Sub-second timestamp resolution of a capture handle, fixed at open for
// the lifetime of the capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Micro,
    Nano,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub ts_sec: u64,
    // Nanoseconds or microseconds depending on the reader resolution.
    pub ts_sub: u64,
    pub caplen: usize,
    pub wire_len: usize,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn timestamp(&self, resolution: Resolution) -> Duration {
        let nanos = match resolution {
            Resolution::Nano => self.ts_sub,
            Resolution::Micro => self.ts_sub * 1000,
        };
        Duration::new(self.ts_sec, nanos as u32)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Next {
    Frame(Frame),
    TimedOut,
    End,
}

enum Handle {
    Live(Capture<Active>),
    Offline(Capture<Offline>),
}

// Wraps a libpcap handle over a live interface, a trace file or stdin.
// After end of stream or a read error the handle is closed and `next`
// keeps returning `Next::End`.
pub struct Reader {
    handle: Option<Handle>,
    resolution: Resolution,
    live: bool,
}

impl Reader {
    pub fn open(input: &str) -> Result<Reader> {
        if let Some(device) = Device::list()
            .unwrap_or_default()
            .into_iter()
            .find(|d| d.name == input)
        {
            let capture = Capture::from_device(device)
                .and_then(|c| c.promisc(true).snaplen(SNAPLEN).timeout(POLL_TIMEOUT_MS).open())
                .map_err(|e| Error::CaptureOpen(input.to_owned(), e.to_string()))?;
            info!("listening on interface {}", input);
            return Ok(Reader {
                handle: Some(Handle::Live(capture)),
                resolution: Resolution::Micro,
                live: true,
            });
        }

        let capture = if input == "-" {
            Self::open_stdin()?
        } else {
            if !Path::new(input).exists() {
                return Err(Error::NoSuchFile(input.to_owned()));
            }
            Capture::from_file_with_precision(input, Precision::Nano)
                .map_err(|e| Error::CaptureOpen(input.to_owned(), e.to_string()))?
        };
        info!("reading trace from {}", input);
        Ok(Reader {
            handle: Some(Handle::Offline(capture)),
            resolution: Resolution::Nano,
            live: false,
        })
    }

    #[cfg(unix)]
    fn open_stdin() -> Result<Capture<Offline>> {
        unsafe { Capture::from_raw_fd_with_precision(0, Precision::Nano) }
            .map_err(|e| Error::CaptureOpen("-".to_owned(), e.to_string()))
    }

    #[cfg(not(unix))]
    fn open_stdin() -> Result<Capture<Offline>> {
        Err(Error::StdinUnsupported)
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn next(&mut self) -> Result<Next> {
        let handle = match self.handle.as_mut() {
            Some(handle) => handle,
            None => return Ok(Next::End),
        };
        let packet = match handle {
            Handle::Live(capture) => capture.next_packet(),
            Handle::Offline(capture) => capture.next_packet(),
        };
        match packet {
            Ok(packet) => {
                let header = *packet.header;
                Ok(Next::Frame(Frame {
                    ts_sec: header.ts.tv_sec as u64,
                    ts_sub: header.ts.tv_usec as u64,
                    caplen: header.caplen as usize,
                    wire_len: header.len as usize,
                    data: packet.data.to_vec(),
                }))
            }
            Err(pcap::Error::TimeoutExpired) => Ok(Next::TimedOut),
            Err(pcap::Error::NoMorePackets) => {
                self.handle = None;
                Ok(Next::End)
            }
            Err(e) => {
                self.handle = None;
                Err(Error::CaptureRead(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_fatal() {
        match Reader::open("/nonexistent/trace.pcap") {
            Err(Error::NoSuchFile(path)) => assert_eq!(path, "/nonexistent/trace.pcap"),
            other => panic!("unexpected open result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn frame_timestamp_resolution() {
        let frame = Frame {
            ts_sec: 10,
            ts_sub: 500,
            caplen: 0,
            wire_len: 0,
            data: vec![],
        };
        assert_eq!(
            frame.timestamp(Resolution::Nano),
            Duration::new(10, 500)
        );
        assert_eq!(
            frame.timestamp(Resolution::Micro),
            Duration::new(10, 500_000)
        );
    }
}
