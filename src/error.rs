//! Error taxonomy for the IHC controller client
//!
//! Distinguishes transport, protocol and auth failures, one `thiserror`
//! variant per failure kind.

use thiserror::Error;

/// Result type for IHC client operations
pub type IhcResult<T> = std::result::Result<T, IhcError>;

/// Errors that can occur while talking to the controller
#[derive(Error, Debug)]
pub enum IhcError {
    /// HTTP request failed, or exceeded the transient-retry budget
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Certificate or other file I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS setup or certificate-pinning failure
    #[error("TLS error: {0}")]
    Tls(String),

    /// XML parsing error
    #[error("XML error: {0}")]
    Xml(String),

    /// Response had an unexpected shape: a missing required child element,
    /// or a value kind the caller required but the controller didn't send
    #[error("protocol error: {0}")]
    Protocol(String),

    /// `loginWasSuccessful` was false
    #[error("authentication failed")]
    Auth,

    /// Controller never reached `text.ctrl.state.ready` within the wait budget
    #[error("controller not ready")]
    NotReady,

    /// Project payload failed to base64/zlib decode
    #[error("failed to decompress project data: {0}")]
    Decompress(String),

    /// The session was explicitly closed and can no longer be used
    #[error("session is closed")]
    SessionClosed,
}

impl From<quick_xml::Error> for IhcError {
    fn from(err: quick_xml::Error) -> Self {
        IhcError::Xml(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_stable() {
        assert_eq!(IhcError::Auth.to_string(), "authentication failed");
        assert_eq!(IhcError::NotReady.to_string(), "controller not ready");
        assert_eq!(
            IhcError::Protocol("missing resourceID".into()).to_string(),
            "protocol error: missing resourceID"
        );
    }
}
