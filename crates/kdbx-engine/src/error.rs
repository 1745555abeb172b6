//! Error types for kdbx-engine

use thiserror::Error;

/// Result type alias for kdbx-engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading or writing a KDBX container
///
/// Every load or save call surfaces exactly one of these; nothing is retried
/// internally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Unknown cipher, KDF or inner stream identifier
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Structural failure while parsing the outer/inner header or a parameter dictionary
    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    /// Header HMAC, header hash, stream start bytes, block hash/HMAC or padding mismatch.
    ///
    /// These causes are deliberately reported with a single message.
    #[error("Invalid credentials or corrupted file")]
    IntegrityFailure,

    /// File, dictionary or KDF version outside the supported range
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(String),

    /// Key file present but unreadable or malformed
    #[error("Invalid key file: {0}")]
    KeyFileError(String),

    /// Neither a password nor a key file was supplied
    #[error("Empty credentials: a password or key file is required")]
    EmptyCredentials,

    /// The decrypted XML body is not a valid database document
    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    /// The caller cancelled the operation between two pipeline phases
    #[error("Operation cancelled")]
    Cancelled,

    /// Entry not found
    #[error("Entry not found: {0}")]
    EntryNotFound(uuid::Uuid),

    /// Group not found
    #[error("Group not found: {0}")]
    GroupNotFound(uuid::Uuid),

    /// Invalid group operation
    #[error("Invalid group operation: {0}")]
    InvalidGroup(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),
}

impl Error {
    /// Wrap this error so it can travel through `std::io::Read`/`Write` adapters.
    pub(crate) fn into_io(self) -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::InvalidData, self)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        if err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            if let Some(Ok(inner)) = err.into_inner().map(|e| e.downcast::<Error>()) {
                return *inner;
            }
            return Error::Io("tunnelled error lost".to_string());
        }
        Error::Io(err.to_string())
    }
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        match err {
            quick_xml::Error::Io(io) => Error::Io(io.to_string()),
            other => Error::MalformedDocument(other.to_string()),
        }
    }
}

impl From<quick_xml::events::attributes::AttrError> for Error {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Error::MalformedDocument(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_survives_io_tunnel() {
        let io_err = Error::IntegrityFailure.into_io();
        assert_eq!(Error::from(io_err), Error::IntegrityFailure);
    }

    #[test]
    fn test_plain_io_error_maps_to_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        assert!(matches!(Error::from(io_err), Error::Io(_)));
    }
}
