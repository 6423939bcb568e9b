//! UDP socket layer sending and receiving Krpc messages.

use std::fmt::Debug;
use std::net::{SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use tracing::trace;

use crate::common::{Message, MessageType};

const MTU: usize = 2048;

pub const DEFAULT_PORT: u16 = 6881;
/// How long [KrpcSocket::recv_from] blocks before giving the caller a chance to stop.
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Best effort datagram transport, the seam between lookups and the network.
pub trait Transport: Debug + Send + Sync {
    fn send(&self, bytes: &[u8], to: SocketAddrV4) -> std::io::Result<()>;
}

/// A UdpSocket wrapper that sends and decodes DHT messages.
#[derive(Debug)]
pub struct KrpcSocket {
    socket: UdpSocket,
    local_addr: SocketAddrV4,
}

impl KrpcSocket {
    /// Bind to `port` if given, otherwise try [DEFAULT_PORT], then any available port.
    pub fn bind(port: Option<u16>) -> Result<Self, std::io::Error> {
        let socket = if let Some(port) = port {
            UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], port)))?
        } else {
            match UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT))) {
                Ok(socket) => Ok(socket),
                Err(_) => UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0))),
            }?
        };

        let local_addr = match socket.local_addr()? {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "KrpcSocket does not support Ipv6",
                ))
            }
        };

        socket.set_read_timeout(Some(READ_TIMEOUT))?;

        Ok(Self { socket, local_addr })
    }

    /// A second handle to the same socket, for the receiving thread.
    pub fn try_clone(&self) -> Result<Self, std::io::Error> {
        Ok(Self {
            socket: self.socket.try_clone()?,
            local_addr: self.local_addr,
        })
    }

    // === Getters ===

    /// Returns the address the server is listening to.
    #[inline]
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    // === Public Methods ===

    /// Receives a single krpc message on the socket, blocking for at most [READ_TIMEOUT].
    /// On success, returns the dht message and the origin.
    pub fn recv_from(&self) -> Option<(Message, SocketAddrV4)> {
        let mut buf = [0u8; MTU];

        match self.socket.recv_from(&mut buf) {
            Ok((amt, SocketAddr::V4(from))) => {
                let bytes = &buf[..amt];

                if from.port() == 0 {
                    trace!(
                        context = "socket_validation",
                        message = "Response from port 0"
                    );
                    return None;
                }

                match Message::from_bytes(bytes) {
                    Ok(message) => {
                        trace!(
                            context = "socket_message_receiving",
                            ?message,
                            ?from,
                            request = matches!(message.message_type, MessageType::Request(_)),
                            "Received message"
                        );

                        return Some((message, from));
                    }
                    Err(error) => {
                        trace!(
                            context = "socket_error",
                            ?error,
                            ?from,
                            message = ?String::from_utf8_lossy(bytes),
                            "Received invalid Bencode message."
                        );
                    }
                }
            }
            Ok((_, SocketAddr::V6(_))) => {
                trace!(
                    context = "socket_validation",
                    message = "Received IPv6 packet"
                );
            }
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                trace!(
                    context = "socket_error",
                    ?e,
                    "recv_from failed unexpectedly"
                );
            }
        }

        None
    }
}

impl Transport for KrpcSocket {
    fn send(&self, bytes: &[u8], to: SocketAddrV4) -> std::io::Result<()> {
        self.socket.send_to(bytes, to)?;
        trace!(context = "socket_message_sending", ?to, len = bytes.len());
        Ok(())
    }
}
