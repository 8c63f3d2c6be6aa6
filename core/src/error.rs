use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetsiftError {
    #[error("Capture format error: {0}")]
    Format(String),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Capture device error: {0}")]
    CaptureDevice(String),

    #[error("Enrichment error: {0}")]
    Enrichment(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failure of a single protocol layer inside one frame.
///
/// Never escapes the decoder: it shortens the layer stack of that frame
/// and is kept on the record as text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{layer}: truncated (need {needed} bytes, have {have})")]
    Truncated {
        layer: &'static str,
        needed: usize,
        have: usize,
    },

    #[error("{layer}: {reason}")]
    Invalid { layer: &'static str, reason: String },
}

impl DecodeError {
    pub fn truncated(layer: &'static str, needed: usize, have: usize) -> Self {
        DecodeError::Truncated { layer, needed, have }
    }

    pub fn invalid(layer: &'static str, reason: impl Into<String>) -> Self {
        DecodeError::Invalid {
            layer,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, NetsiftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::truncated("IPv4", 20, 7);
        assert_eq!(err.to_string(), "IPv4: truncated (need 20 bytes, have 7)");

        let wrapped: NetsiftError = err.into();
        assert!(wrapped.to_string().starts_with("Decode error: IPv4"));
    }
}
