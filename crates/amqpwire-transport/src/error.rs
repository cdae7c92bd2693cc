/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The stream failed a read, write, timeout or shutdown call.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// The underlying `std::io::Error`.
    pub fn into_io(self) -> std::io::Error {
        match self {
            TransportError::Io(err) => err,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
