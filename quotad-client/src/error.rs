use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("name too long for the wire format ({0} bytes, max 255)")]
    NameTooLong(usize),

    #[error("server sent an unknown status code {0}")]
    UnknownStatus(u8),
}
