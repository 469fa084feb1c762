use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::stream::ApiStream;

/// TCP transport.
///
/// Resolves `host:port` strings and connects, optionally bounded by a timeout.
pub struct TcpTransport;

impl TcpTransport {
    /// Connect to `addr` (blocking, no timeout).
    pub fn dial(addr: &str) -> Result<ApiStream> {
        Self::dial_timeout(addr, Duration::ZERO)
    }

    /// Connect to `addr`. A zero `timeout` means "use the OS default".
    ///
    /// Every resolved address is tried in order; the last connect error is
    /// returned when none of them accept.
    pub fn dial_timeout(addr: &str, timeout: Duration) -> Result<ApiStream> {
        let candidates: Vec<SocketAddr> = addr
            .to_socket_addrs()
            .map_err(|source| TransportError::Resolve {
                addr: addr.to_string(),
                source,
            })?
            .collect();

        let mut last_err = None;
        for candidate in candidates {
            let attempt = if timeout.is_zero() {
                TcpStream::connect(candidate)
            } else {
                TcpStream::connect_timeout(&candidate, timeout)
            };
            match attempt {
                Ok(stream) => {
                    debug!(%candidate, "connected to device");
                    let stream = ApiStream::from(stream);
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(err) => {
                    debug!(%candidate, error = %err, "connect attempt failed");
                    last_err = Some(err);
                }
            }
        }

        Err(TransportError::Connect {
            addr: addr.to_string(),
            source: last_err.unwrap_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    "address resolved to nothing",
                )
            }),
        })
    }
}
