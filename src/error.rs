use thiserror::Error;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Error taxonomy for the Wibeee bridge.
///
/// Discovery-phase errors of any kind abort setup; steady-state poll and
/// push errors degrade the affected sensors to "unavailable" instead of
/// stopping the process.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Timeouts, connection failures and non-2xx responses from the device
    /// or the cloud upstream.
    #[error("network error: {0}")]
    Network(String),

    /// Payload that could not be decoded, even after the JSON repair pass.
    /// Carries the original (unrepaired) text.
    #[error("cannot decode payload: {reason}")]
    Parse { reason: String, text: String },

    /// A successful fetch that is missing required fields.
    #[error("incomplete device data: {0}")]
    IncompleteData(String),

    /// Push data from a device identity nobody registered for.
    #[error("no registration for device {0}")]
    NotRegistered(String),

    /// Push request without the required identity field.
    #[error("malformed push request: {0}")]
    MalformedRequest(String),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    pub fn parse(reason: impl std::fmt::Display, text: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.to_string(),
            text: text.into(),
        }
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        BridgeError::Network(err.to_string())
    }
}
