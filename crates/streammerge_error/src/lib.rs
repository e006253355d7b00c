use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;
use std::fmt;

pub type Result<T, E = StreamMergeError> = std::result::Result<T, E>;

#[derive(Debug)]
pub struct StreamMergeError {
    inner: Box<StreamMergeErrorInner>,
}

#[derive(Debug)]
struct StreamMergeErrorInner {
    /// Message for the error.
    msg: String,

    /// Optional error that caused this one.
    source: Option<Box<dyn Error + Send + Sync>>,

    /// Captured backtrace. Only populated when RUST_BACKTRACE is set.
    backtrace: Backtrace,
}

impl StreamMergeError {
    pub fn new(msg: impl Into<String>) -> Self {
        StreamMergeError {
            inner: Box::new(StreamMergeErrorInner {
                msg: msg.into(),
                source: None,
                backtrace: Backtrace::capture(),
            }),
        }
    }

    pub fn with_source(msg: impl Into<String>, source: Box<dyn Error + Send + Sync>) -> Self {
        StreamMergeError {
            inner: Box::new(StreamMergeErrorInner {
                msg: msg.into(),
                source: Some(source),
                backtrace: Backtrace::capture(),
            }),
        }
    }

    pub fn get_msg(&self) -> &str {
        self.inner.msg.as_str()
    }

    pub fn get_backtrace(&self) -> Option<&Backtrace> {
        match self.inner.backtrace.status() {
            BacktraceStatus::Captured => Some(&self.inner.backtrace),
            _ => None,
        }
    }
}

impl From<fmt::Error> for StreamMergeError {
    fn from(value: fmt::Error) -> Self {
        Self::with_source("Format error", Box::new(value))
    }
}

impl From<std::io::Error> for StreamMergeError {
    fn from(value: std::io::Error) -> Self {
        Self::with_source("IO error", Box::new(value))
    }
}

impl fmt::Display for StreamMergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.msg)?;
        if let Some(source) = &self.inner.source {
            write!(f, "\nError source: {source}")?;
        }

        if let Some(bt) = self.get_backtrace() {
            write!(f, "\nBacktrace: {bt}")?;
        }

        Ok(())
    }
}

impl Error for StreamMergeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Helper for wrapping foreign errors with some context.
pub trait ResultExt<T, E> {
    /// Wrap an error with a static context string.
    fn context(self, msg: &'static str) -> Result<T>;

    /// Wrap an error with a context string generated from a function.
    fn context_fn<F: Fn() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Error + Send + Sync + 'static> ResultExt<T, E> for std::result::Result<T, E> {
    fn context(self, msg: &'static str) -> Result<T> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(StreamMergeError::with_source(msg, Box::new(e))),
        }
    }

    fn context_fn<F: Fn() -> String>(self, f: F) -> Result<T> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(StreamMergeError::with_source(f(), Box::new(e))),
        }
    }
}

pub trait OptionExt<T> {
    /// Return an error indicating that `thing` was required but missing.
    fn required(self, thing: &'static str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn required(self, thing: &'static str) -> Result<T> {
        match self {
            Some(v) => Ok(v),
            None => Err(StreamMergeError::new(format!(
                "Missing required value: {thing}"
            ))),
        }
    }
}
