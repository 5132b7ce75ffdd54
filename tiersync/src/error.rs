//! Error types and result definitions for replication and load operations.
//!
//! [`SyncError`] carries a classification ([`ErrorKind`]), a static description, optional
//! dynamic detail, an optional source error and the callsite that raised it. Several errors can
//! be aggregated into one, which is how worker failures are reported together.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Result type used across the engine.
pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type of the engine.
#[derive(Debug, Clone)]
pub struct SyncError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    /// Several aggregated errors, mainly failures of concurrent workers.
    Many {
        errors: Vec<SyncError>,
        location: &'static Location<'static>,
    },
}

/// Categories of failures, grouped by the tier or stage that raised them.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Connection errors, retried by the resilience layer.
    SourceConnectionFailed,
    ReplicaConnectionFailed,
    WarehouseConnectionFailed,
    /// Deadlocks, lock wait timeouts and serialization failures.
    TransactionConflict,
    /// Every attempt of a statement failed with a transient error.
    ConnectionExhausted,

    // Statement errors, never retried.
    SourceQueryFailed,
    ReplicaQueryFailed,
    WarehouseQueryFailed,

    // Schema & data errors
    SourceSchemaError,
    SchemaIncompatibility,
    ConversionError,
    InvalidData,

    // Configuration errors
    ConfigError,
    ValidationError,

    // IO & serialization errors
    IoError,
    SerializationError,
    DeserializationError,

    // Workflow errors
    Timeout,
    Cancelled,
    InvalidState,
    WorkerPanic,

    Unknown,

    // Kinds raised by fault injection in tests.
    #[cfg(feature = "failpoints")]
    FailpointTransient,
    #[cfg(feature = "failpoints")]
    FailpointFatal,
}

impl ErrorKind {
    /// Returns `true` when a statement failing with this kind may succeed on a new attempt.
    pub fn is_transient(self) -> bool {
        match self {
            ErrorKind::SourceConnectionFailed
            | ErrorKind::ReplicaConnectionFailed
            | ErrorKind::WarehouseConnectionFailed
            | ErrorKind::TransactionConflict => true,
            #[cfg(feature = "failpoints")]
            ErrorKind::FailpointTransient => true,
            _ => false,
        }
    }
}

impl SyncError {
    /// Returns the kind of this error, or of the first aggregated error.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns the kinds of every error contained in this one.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns `true` when every contained error is transient.
    pub fn is_transient(&self) -> bool {
        let kinds = self.kinds();
        !kinds.is_empty() && kinds.into_iter().all(ErrorKind::is_transient)
    }

    pub fn description(&self) -> &str {
        match self.repr {
            ErrorRepr::Single(ref payload) => &payload.description,
            ErrorRepr::Many { .. } => "multiple errors",
        }
    }

    /// Returns the dynamic detail, or the first one found among aggregated errors.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches an originating error. Has no effect on aggregated errors.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    /// Renders the error on one line, without location or backtrace, for reports.
    pub fn summary(&self) -> String {
        match self.detail() {
            Some(detail) => format!("{}: {}", self.description(), detail),
            None => self.description().to_string(),
        }
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        SyncError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }

    /// Builds an error that wraps `source`, using its rendering as detail.
    #[track_caller]
    pub(crate) fn wrap<E>(kind: ErrorKind, description: &'static str, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        let detail = source.to_string();
        SyncError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(source)),
        )
    }
}

impl PartialEq for SyncError {
    fn eq(&self, other: &SyncError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    write_block("Detail", detail, f)?;
                }

                let backtrace = payload.backtrace.to_string();
                if !backtrace.trim().is_empty() {
                    write_block("Backtrace", &backtrace, f)?;
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    write!(f, "\n  {}. {}", index + 1, lines.next().unwrap_or_default())?;
                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

/// Writes an indented, titled block of lines.
fn write_block(title: &str, text: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if text.trim().is_empty() {
        return write!(f, "\n  {title}: <empty>");
    }

    write!(f, "\n  {title}:")?;
    for line in text.lines() {
        if line.trim().is_empty() {
            write!(f, "\n    ")?;
        } else {
            write!(f, "\n    {line}")?;
        }
    }

    Ok(())
}

impl error::Error for SyncError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

impl From<(ErrorKind, &'static str)> for SyncError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> SyncError {
        SyncError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for SyncError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> SyncError {
        SyncError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates errors. A single error is returned as is.
impl<E> From<Vec<E>> for SyncError
where
    E: Into<SyncError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> SyncError {
        let location = Location::caller();
        let mut errors: Vec<SyncError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1 {
            if let Some(error) = errors.pop() {
                return error;
            }
        }

        SyncError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<std::io::Error> for SyncError {
    #[track_caller]
    fn from(err: std::io::Error) -> SyncError {
        SyncError::wrap(ErrorKind::IoError, "I/O operation failed", err)
    }
}

impl From<serde_json::Error> for SyncError {
    #[track_caller]
    fn from(err: serde_json::Error) -> SyncError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => {
                (ErrorKind::DeserializationError, "JSON deserialization failed")
            }
        };

        SyncError::wrap(kind, description, err)
    }
}

impl From<std::num::ParseIntError> for SyncError {
    #[track_caller]
    fn from(err: std::num::ParseIntError) -> SyncError {
        SyncError::wrap(ErrorKind::ConversionError, "Integer parsing failed", err)
    }
}

impl From<std::num::ParseFloatError> for SyncError {
    #[track_caller]
    fn from(err: std::num::ParseFloatError) -> SyncError {
        SyncError::wrap(ErrorKind::ConversionError, "Float parsing failed", err)
    }
}

impl From<chrono::ParseError> for SyncError {
    #[track_caller]
    fn from(err: chrono::ParseError) -> SyncError {
        SyncError::wrap(ErrorKind::ConversionError, "Temporal parsing failed", err)
    }
}

impl From<bigdecimal::ParseBigDecimalError> for SyncError {
    #[track_caller]
    fn from(err: bigdecimal::ParseBigDecimalError) -> SyncError {
        SyncError::wrap(ErrorKind::ConversionError, "Decimal parsing failed", err)
    }
}

impl From<tiersync_config::shared::ValidationError> for SyncError {
    #[track_caller]
    fn from(err: tiersync_config::shared::ValidationError) -> SyncError {
        SyncError::wrap(ErrorKind::ValidationError, "Invalid configuration", err)
    }
}
