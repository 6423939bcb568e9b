//! Main Crate Error

#[derive(thiserror::Error, Debug)]
/// Mainline node finder error enum.
pub enum Error {
    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),

    #[error("Failed to parse packet bytes: {0}")]
    BencodeError(#[from] serde_bencode::Error),

    /// Id is not exactly 20 bytes.
    #[error("Invalid Id size, expected 20, got {0}")]
    InvalidIdSize(usize),

    /// Id is not 40 hex characters.
    #[error("Invalid Id encoding: {0}")]
    InvalidIdEncoding(String),

    /// Compact IPv4 address is not exactly 6 bytes.
    #[error("Invalid socket address size, expected 6, got {0}")]
    InvalidSocketAddress(usize),

    /// Indicates that the message transaction_id is not two bytes.
    #[error("Invalid transaction_id: {0:?}")]
    InvalidTransactionId(Vec<u8>),

    /// None of the configured bootstrapping nodes could be resolved.
    #[error("Could not resolve any bootstrapping node from {0:?}")]
    Bootstrap(Vec<String>),
}
