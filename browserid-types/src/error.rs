use std::fmt;

/// Errors produced while parsing a declaration of support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentError {
    /// The document is not valid JSON, or it is valid JSON that is not an object.
    MalformedDocument,
    /// The document declares support but a required member is absent or of the wrong type.
    MissingRequiredField(&'static str),
    /// The `public-key` member could not be parsed into a supported algorithm and key size.
    InvalidPublicKey,
}

impl fmt::Display for DocumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentError::MalformedDocument => f.write_str("malformed declaration of support"),
            DocumentError::MissingRequiredField(name) => {
                write!(f, "missing required key: {name}")
            }
            DocumentError::InvalidPublicKey => f.write_str("unsupported or invalid public key"),
        }
    }
}

impl std::error::Error for DocumentError {}
