use thiserror::Error;

/// Errors raised while decoding datagrams off the wire.
///
/// Per the error handling design, a malformed datagram is dropped and
/// logged; it never aborts the replica's event loop.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed datagram: {0}")]
    MalformedDatagram(#[from] serde_json::Error),

    #[error("datagram exceeds maximum size ({0} bytes)")]
    DatagramTooLarge(usize),
}
