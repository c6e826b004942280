use thiserror::Error;

/// Failures acquiring or enumerating capture devices
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),
}

/// Failures driving a call against a voice provider
#[derive(Error, Debug)]
pub enum CallError {
    /// The credential route answered but handed back no usable credential
    #[error("{0}")]
    CredentialMissing(String),

    #[error("Credential request failed: {0}")]
    Transport(String),

    #[error("Remote session failure: {0}")]
    RemoteSession(String),

    #[error(transparent)]
    Media(#[from] MediaError),
}

impl From<reqwest::Error> for CallError {
    fn from(e: reqwest::Error) -> Self {
        CallError::Transport(e.to_string())
    }
}

/// Local recording faults. Never fatal to the call itself.
#[derive(Error, Debug)]
pub enum RecorderFault {
    #[error("No active stream to record")]
    NoActiveStream,

    #[error("None of the candidate encodings are supported: {0:?}")]
    UnsupportedEncoding(Vec<String>),

    #[error("Recorder stopped without flushing any data")]
    NoData,

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("Failed to write recording: {0}")]
    Io(#[from] std::io::Error),
}
