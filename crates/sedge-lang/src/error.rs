use thiserror::Error;

/// Failure reported by the host interop bridge when a dotted path cannot be
/// resolved against the host environment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InteropError {
    #[error("no host member matches `{path}`")]
    MemberNotFound { path: String },

    #[error("cannot convert `{value}` for host member `{path}`")]
    Cast { path: String, value: String },
}

/// Any failure surfaced while normalizing, parsing, or evaluating a script.
/// Line-bearing variants carry the number and text of the statement that
/// triggered them.
#[derive(Debug, Error)]
pub enum Error {
    #[error("syntax error at line {line}: {message}\n    {text}")]
    Syntax {
        line: usize,
        text: String,
        message: String,
    },

    #[error("runtime error at line {line}: {message}\n    {text}")]
    Runtime {
        line: usize,
        text: String,
        message: String,
    },

    #[error("interop error at line {line}: {source}\n    {text}")]
    Interop {
        line: usize,
        text: String,
        source: InteropError,
    },

    #[error("unknown syntax `{0}`")]
    UnknownSyntax(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn syntax(line: usize, text: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Syntax { line, text: text.into(), message: message.into() }
    }

    pub fn runtime(line: usize, text: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Runtime { line, text: text.into(), message: message.into() }
    }
}
