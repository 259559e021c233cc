/// Errors raised when reading or updating values.
#[derive(Debug, thiserror::Error)]
pub enum ValueError {
    /// The value has no payload yet; it is waiting for its owner to provide one.
    #[error("value '{0}' is pending")]
    Pending(String),

    /// Only props can be assigned directly.
    #[error("value '{0}' is computed and cannot be set")]
    NotSettable(String),

    /// The compute function of a derived value failed.
    #[error("computing '{name}' failed: {message}")]
    Compute { name: String, message: String },
}

impl ValueError {
    /// Convenience for compute closures that fail with a plain message.
    pub fn compute(name: impl Into<String>, message: impl Into<String>) -> Self {
        ValueError::Compute {
            name: name.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ValueError>;
