use ustepper_protocol::ParseError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A command was dropped because the connection isn't open. Nothing is queued.
    #[error("not connected, dropped {0:?}")]
    TransportUnavailable(String),

    #[error("malformed frame {raw:?}: {source}")]
    MalformedFrame {
        raw: String,
        #[source]
        source: ParseError,
    },

    #[error("{what} must be a finite number, got {value}")]
    InvalidValue { what: &'static str, value: f64 },

    #[error("unknown response {0:?}")]
    UnknownFrameTag(String),

    #[error("upload rejected: {0}")]
    UploadRejected(#[from] UploadRejection),

    #[error("transport error: {0}")]
    Transport(anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadRejection {
    #[error("incorrect file type {mime:?}, expected text/plain")]
    WrongType { mime: String },

    #[error("file is {size} bytes, the limit is {limit}")]
    TooLarge { size: u64, limit: u64 },
}

pub type Result<T> = std::result::Result<T, Error>;
