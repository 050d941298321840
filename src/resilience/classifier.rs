use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::io;

use crate::error::GuardError;

/// Failure taxonomy for errors coming out of a protected dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Connection drops, busy servers; worth retrying
    Transient,
    /// Authentication failures, missing resources; not worth retrying quickly
    Persistent,
    /// Malformed requests; a caller bug, not a dependency fault
    Query,
    /// Deadline exceeded
    Timeout,
    /// Anything unrecognized
    System,
}

impl ErrorCategory {
    /// Whether the retry executor should try again after this category
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorCategory::Transient | ErrorCategory::Timeout)
    }

    /// Whether a failure of this category counts toward tripping the circuit
    pub fn counts_as_failure(self) -> bool {
        !matches!(self, ErrorCategory::Query)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Persistent => "persistent",
            ErrorCategory::Query => "query",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::System => "system",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying a single error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub category: ErrorCategory,
    pub counts_as_failure: bool,
}

impl From<ErrorCategory> for Classification {
    fn from(category: ErrorCategory) -> Self {
        Self {
            category,
            counts_as_failure: category.counts_as_failure(),
        }
    }
}

/// An error explicitly tagged with its category by the caller.
///
/// The classifier trusts this tag over anything it could infer from the
/// message, so client libraries with their own error codes can map them once
/// at the call site.
#[derive(Debug)]
pub struct CategorizedError {
    category: ErrorCategory,
    source: Box<dyn StdError + Send + Sync>,
}

impl CategorizedError {
    pub fn new(category: ErrorCategory, source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self {
            category,
            source: source.into(),
        }
    }

    pub fn transient(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::new(ErrorCategory::Transient, source)
    }

    pub fn persistent(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::new(ErrorCategory::Persistent, source)
    }

    pub fn query(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::new(ErrorCategory::Query, source)
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }
}

impl fmt::Display for CategorizedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl StdError for CategorizedError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Keywords checked in order; the first match wins
const DEFAULT_KEYWORDS: &[(ErrorCategory, &str)] = &[
    (ErrorCategory::Query, "syntax error"),
    (ErrorCategory::Query, "invalid input"),
    (ErrorCategory::Query, "malformed"),
    (ErrorCategory::Query, "no such column"),
    (ErrorCategory::Query, "duplicate key"),
    (ErrorCategory::Query, "constraint failed"),
    (ErrorCategory::Query, "violates"),
    (ErrorCategory::Query, "wrong number of arguments"),
    (ErrorCategory::Query, "wrongtype"),
    (ErrorCategory::Timeout, "timed out"),
    (ErrorCategory::Timeout, "timeout"),
    (ErrorCategory::Timeout, "deadline exceeded"),
    (ErrorCategory::Persistent, "authentication failed"),
    (ErrorCategory::Persistent, "access denied"),
    (ErrorCategory::Persistent, "permission denied"),
    (ErrorCategory::Persistent, "does not exist"),
    (ErrorCategory::Persistent, "no such table"),
    (ErrorCategory::Persistent, "unknown database"),
    (ErrorCategory::Transient, "connection refused"),
    (ErrorCategory::Transient, "connection reset"),
    (ErrorCategory::Transient, "connection closed"),
    (ErrorCategory::Transient, "broken pipe"),
    (ErrorCategory::Transient, "too many connections"),
    (ErrorCategory::Transient, "server busy"),
    (ErrorCategory::Transient, "temporarily unavailable"),
    (ErrorCategory::Transient, "database is locked"),
    (ErrorCategory::Transient, "deadlock"),
];

/// Maps errors onto the failure taxonomy.
///
/// Typed errors are matched first (walking the source chain), then the
/// rendered message is searched for known keywords, and anything left over is
/// `System`. Classification has no side effects.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    keywords: Vec<(ErrorCategory, String)>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self {
            keywords: DEFAULT_KEYWORDS
                .iter()
                .map(|(category, keyword)| (*category, keyword.to_string()))
                .collect(),
        }
    }
}

impl ErrorClassifier {
    /// A classifier with no keyword table; only typed matches apply
    pub fn empty() -> Self {
        Self {
            keywords: Vec::new(),
        }
    }

    /// Add a keyword ahead of the existing table
    pub fn with_keyword(mut self, category: ErrorCategory, keyword: impl Into<String>) -> Self {
        self.keywords
            .insert(0, (category, keyword.into().to_lowercase()));
        self
    }

    pub fn classify(&self, err: &(dyn StdError + 'static)) -> Classification {
        if let Some(category) = categorize_typed(err) {
            return category.into();
        }

        self.classify_message(&render_chain(err)).into()
    }

    /// Keyword-only classification of an already rendered message
    pub fn classify_message(&self, message: &str) -> ErrorCategory {
        let message = message.to_lowercase();
        self.keywords
            .iter()
            .find(|(_, keyword)| message.contains(keyword.as_str()))
            .map(|(category, _)| *category)
            .unwrap_or(ErrorCategory::System)
    }
}

fn categorize_typed(err: &(dyn StdError + 'static)) -> Option<ErrorCategory> {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);

    while let Some(err) = current {
        if let Some(tagged) = err.downcast_ref::<CategorizedError>() {
            return Some(tagged.category());
        }
        if let Some(guard) = err.downcast_ref::<GuardError>() {
            if let Some(category) = guard.category() {
                return Some(category);
            }
        }
        if let Some(redis_err) = err.downcast_ref::<redis::RedisError>() {
            if let Some(category) = categorize_redis(redis_err) {
                return Some(category);
            }
        }
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if let Some(category) = categorize_io(io_err) {
                return Some(category);
            }
        }
        if err.is::<tokio::time::error::Elapsed>() {
            return Some(ErrorCategory::Timeout);
        }

        current = err.source();
    }

    None
}

/// Category for a Redis error based on its kind, when the kind is decisive
pub(crate) fn categorize_redis(err: &redis::RedisError) -> Option<ErrorCategory> {
    if err.is_timeout() {
        return Some(ErrorCategory::Timeout);
    }
    if err.is_connection_refusal() || err.is_connection_dropped() {
        return Some(ErrorCategory::Transient);
    }

    match err.kind() {
        redis::ErrorKind::IoError
        | redis::ErrorKind::BusyLoadingError
        | redis::ErrorKind::TryAgain
        | redis::ErrorKind::ClusterDown
        | redis::ErrorKind::MasterDown => Some(ErrorCategory::Transient),
        redis::ErrorKind::AuthenticationFailed | redis::ErrorKind::InvalidClientConfig => {
            Some(ErrorCategory::Persistent)
        }
        redis::ErrorKind::ResponseError
        | redis::ErrorKind::TypeError
        | redis::ErrorKind::ExecAbortError
        | redis::ErrorKind::NoScriptError => Some(ErrorCategory::Query),
        _ => None,
    }
}

fn categorize_io(err: &io::Error) -> Option<ErrorCategory> {
    match err.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => Some(ErrorCategory::Transient),
        io::ErrorKind::TimedOut => Some(ErrorCategory::Timeout),
        io::ErrorKind::PermissionDenied | io::ErrorKind::NotFound => {
            Some(ErrorCategory::Persistent)
        }
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => Some(ErrorCategory::Query),
        _ => None,
    }
}

fn render_chain(err: &(dyn StdError + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut current = err.source();
    while let Some(source) = current {
        rendered.push_str(": ");
        rendered.push_str(&source.to_string());
        current = source.source();
    }
    rendered
}
