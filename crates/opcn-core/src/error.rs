/// Core type errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid node id: {0}")]
    InvalidNodeId(String),

    #[error("invalid hex identifier: {0}")]
    InvalidHex(String),

    #[error("identifier has wrong length: expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },
}
