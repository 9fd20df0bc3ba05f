use meshtrace_common::FromMessage;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Identity(#[from] meshtrace_identity::Error),

    #[error(transparent)]
    Persistence(#[from] meshtrace_persistence::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("export {name} failed: {reason}")]
    Export { name: String, reason: String },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn export(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Export {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

meshtrace_common::impl_context!();
