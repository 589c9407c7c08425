//! Normalized error type carried by every failed or cancelled evaluation.
//!
//! 每个失败或被取消的求值所携带的规范化错误类型。

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Message that marks an error as a cancellation.
///
/// Any error whose message equals this text exactly is classified as
/// cancelled, whatever variant carries it.
///
/// 将错误标记为取消的消息。
pub const CANCELLED_MESSAGE: &str = "cancelled";

/// Code used by [`Error::cancelled`].
///
/// [`Error::cancelled`] 使用的错误码。
pub const CANCELLED_CODE: i32 = -2_000_000_000;

/// Code reported by errors that carry no structured code.
pub const UNKNOWN_CODE: i32 = -1;

/// Error produced by a failed or cancelled evaluation
///
/// Cheap to clone: native payloads are held behind `Arc`, so a memoized error
/// can be handed to every caller that forces the evaluator.
///
/// 失败或被取消的求值所产生的错误
///
/// 克隆开销低：原生负载保存在 `Arc` 中，因此记忆化的错误可以交给每个强制求值的调用者。
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Structured error with a code and a message
    ///
    /// 带有错误码和消息的结构化错误
    #[error("{message}")]
    Expected { code: i32, message: String },

    /// Wrapped native error
    ///
    /// 包装的原生错误
    #[error("{0}")]
    Exceptional(Arc<dyn std::error::Error + Send + Sync + 'static>),

    /// Panic raised by a user function and caught at the evaluation boundary
    ///
    /// 用户函数引发并在求值边界捕获的 panic
    #[error("{0}")]
    Panicked(String),

    /// Several errors collected together
    ///
    /// 收集在一起的多个错误
    #[error("{}", join(.0))]
    Many(Vec<Error>),
}

fn join(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create a structured error with code 0
    ///
    /// 创建错误码为 0 的结构化错误
    pub fn new(message: impl Into<String>) -> Self {
        Error::Expected {
            code: 0,
            message: message.into(),
        }
    }

    /// Create a structured error with an explicit code
    ///
    /// 创建带有显式错误码的结构化错误
    pub fn with_code(code: i32, message: impl Into<String>) -> Self {
        Error::Expected {
            code,
            message: message.into(),
        }
    }

    /// The cancellation sentinel
    ///
    /// 取消哨兵错误
    pub fn cancelled() -> Self {
        Error::with_code(CANCELLED_CODE, CANCELLED_MESSAGE)
    }

    /// Wrap any native error
    ///
    /// 包装任意原生错误
    pub fn from_error<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Exceptional(Arc::new(error))
    }

    /// Normalize a panic payload caught by `catch_unwind`
    ///
    /// Payloads that are neither `&str` nor `String` keep a generic message.
    ///
    /// 规范化 `catch_unwind` 捕获的 panic 负载
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => (*message).to_owned(),
                Err(_) => "evaluation panicked".to_owned(),
            },
        };
        Error::Panicked(message)
    }

    /// Collect errors into one, flattening nested aggregates
    ///
    /// A single error is returned as-is.
    ///
    /// 将多个错误合并为一个，并展开嵌套的聚合错误
    pub fn many(errors: impl IntoIterator<Item = Error>) -> Self {
        let mut flat = Vec::new();
        for error in errors {
            match error {
                Error::Many(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            flat.remove(0)
        } else {
            Error::Many(flat)
        }
    }

    /// Returns true if this error's message is the cancellation sentinel
    ///
    /// 如果错误消息是取消哨兵则返回 true
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Expected { message, .. } => message == CANCELLED_MESSAGE,
            Error::Panicked(message) => message == CANCELLED_MESSAGE,
            Error::Exceptional(error) => error.to_string() == CANCELLED_MESSAGE,
            Error::Many(_) => false,
        }
    }

    /// Structured code, or [`UNKNOWN_CODE`] for unstructured errors
    ///
    /// 结构化错误码，非结构化错误返回 [`UNKNOWN_CODE`]
    pub fn code(&self) -> i32 {
        match self {
            Error::Expected { code, .. } => *code,
            _ => UNKNOWN_CODE,
        }
    }

    /// Human-readable message
    ///
    /// 可读的错误消息
    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl PartialEq for Error {
    /// Compares code and message; any two cancellations are equal
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Error::Many(a), Error::Many(b)) => a == b,
            (Error::Many(_), _) | (_, Error::Many(_)) => false,
            // Every sentinel-carrying error means the same cancellation
            _ if self.is_cancelled() || other.is_cancelled() => {
                self.is_cancelled() && other.is_cancelled()
            }
            _ => self.code() == other.code() && self.message() == other.message(),
        }
    }
}

impl Eq for Error {}

impl From<&str> for Error {
    fn from(message: &str) -> Self {
        Error::new(message)
    }
}

impl From<String> for Error {
    fn from(message: String) -> Self {
        Error::new(message)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::from_error(error)
    }
}

/// Formats as `code: message` for structured errors, used by state descriptions.
pub(crate) struct Detailed<'a>(pub(crate) &'a Error);

impl fmt::Display for Detailed<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Error::Expected { code, message } if *code != 0 => write!(f, "{code}: {message}"),
            other => write!(f, "{other}"),
        }
    }
}
