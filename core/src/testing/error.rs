use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Cannot launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Cannot spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to communicate with '{program}': {source}")]
    Pipe {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Cannot create temporary file: {0}")]
    TempFile(#[source] io::Error),

    #[error("Memory limit is set, but peak memory cannot be measured on this platform")]
    MemoryAccountingUnsupported,

    #[error("Invalid case format '{0}': {1}")]
    InvalidFormat(String, &'static str),

    #[error("Duplicate testcase name '{0}'")]
    DuplicateCase(String),

    #[error("Cancelled")]
    Cancelled,

    #[error(transparent)]
    Fs(#[from] fsutil::Error),
}

/// Who is to blame for an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad command or missing file. Only the affected case fails.
    User,
    /// The host cannot run the judge at all. Fatal for the whole run.
    Environment,
    Cancelled,
}

impl Error {
    pub(crate) fn launch(program: impl Into<String>, source: io::Error) -> Self {
        let program = program.into();
        match source.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                Self::Launch { program, source }
            }
            _ => Self::Spawn { program, source },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        use Error::*;
        match self {
            Launch { .. } | InvalidFormat(..) | DuplicateCase(_) | Fs(_) => ErrorKind::User,
            Spawn { .. } | Pipe { .. } | TempFile(_) | MemoryAccountingUnsupported => {
                ErrorKind::Environment
            }
            Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether the error must abort the whole run instead of one case.
    pub fn is_fatal(&self) -> bool {
        self.kind() != ErrorKind::User
    }
}
