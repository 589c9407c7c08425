//! The result envelope produced by every evaluator.
//!
//! 每个求值器产生的结果封装。

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;

use crate::dispose::{Acquired, Dispose};
use crate::error::Error;
use crate::state::ThunkState;

/// Outcome of an evaluation
///
/// A success carries the value plus every disposable handle acquired while
/// producing it. The handles are not released by the evaluator; the caller
/// picks the release point with [`ThunkResult::dispose_acquired`].
///
/// 求值的结果
///
/// 成功时携带值以及产生该值期间获取的所有可释放句柄。求值器不会释放这些句柄，
/// 由调用者通过 [`ThunkResult::dispose_acquired`] 选择释放时机。
#[derive(Clone)]
pub enum ThunkResult<A> {
    Success { value: A, acquired: Acquired },
    Failure(Error),
}

impl<A> ThunkResult<A> {
    /// Success with no acquired handles
    ///
    /// 无获取句柄的成功结果
    #[inline]
    pub fn success(value: A) -> Self {
        ThunkResult::Success {
            value,
            acquired: Acquired::new(),
        }
    }

    /// Failure with `error`; the cancellation sentinel classifies as cancelled
    ///
    /// 以 `error` 失败；取消哨兵会被归类为取消
    #[inline]
    pub fn failure(error: impl Into<Error>) -> Self {
        ThunkResult::Failure(error.into())
    }

    #[inline]
    pub fn cancelled() -> Self {
        ThunkResult::Failure(Error::cancelled())
    }

    /// Track an extra handle on a success; failures are returned unchanged
    /// and the handle is not tracked.
    ///
    /// 在成功结果上跟踪额外的句柄；失败结果原样返回。
    pub fn with_acquired(self, handle: Arc<dyn Dispose>) -> Self {
        match self {
            ThunkResult::Success {
                value,
                mut acquired,
            } => {
                acquired.insert(handle);
                ThunkResult::Success { value, acquired }
            }
            failure => failure,
        }
    }

    /// Terminal tag this outcome memoizes as
    ///
    /// 此结果记忆化后对应的终止状态
    pub fn state(&self) -> ThunkState {
        match self {
            ThunkResult::Success { .. } => ThunkState::Success,
            ThunkResult::Failure(error) if error.is_cancelled() => ThunkState::Cancelled,
            ThunkResult::Failure(_) => ThunkState::Failed,
        }
    }

    /// Returns true if the outcome is a success
    ///
    /// 结果为成功时返回 true
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, ThunkResult::Success { .. })
    }

    /// Returns true for any failure, cancellation included
    ///
    /// 任何失败（包括取消）都返回 true
    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(self, ThunkResult::Failure(_))
    }

    /// Returns true if the outcome is the cancellation
    ///
    /// 结果为取消时返回 true
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.state() == ThunkState::Cancelled
    }

    /// Successful value, if any
    ///
    /// 成功值（如有）
    #[inline]
    pub fn value(&self) -> Option<&A> {
        match self {
            ThunkResult::Success { value, .. } => Some(value),
            ThunkResult::Failure(_) => None,
        }
    }

    /// Error, if any
    ///
    /// 错误（如有）
    #[inline]
    pub fn error(&self) -> Option<&Error> {
        match self {
            ThunkResult::Success { .. } => None,
            ThunkResult::Failure(error) => Some(error),
        }
    }

    /// Handles tracked by a success; empty for failures
    pub fn acquired(&self) -> &Acquired {
        static EMPTY: Acquired = Acquired::new();
        match self {
            ThunkResult::Success { acquired, .. } => acquired,
            ThunkResult::Failure(_) => &EMPTY,
        }
    }

    /// Map the value, keeping the acquired handles
    ///
    /// 映射值，保留已获取的句柄
    pub fn map<B>(self, f: impl FnOnce(A) -> B) -> ThunkResult<B> {
        match self {
            ThunkResult::Success { value, acquired } => ThunkResult::Success {
                value: f(value),
                acquired,
            },
            ThunkResult::Failure(error) => ThunkResult::Failure(error),
        }
    }

    /// Map both sides
    ///
    /// 同时映射成功和失败两侧
    pub fn bi_map<B>(
        self,
        succ: impl FnOnce(A) -> B,
        fail: impl FnOnce(Error) -> Error,
    ) -> ThunkResult<B> {
        match self {
            ThunkResult::Success { value, acquired } => ThunkResult::Success {
                value: succ(value),
                acquired,
            },
            ThunkResult::Failure(error) => ThunkResult::Failure(fail(error)),
        }
    }

    /// Map the value with a function that may suspend
    ///
    /// 使用可挂起的函数映射值
    pub async fn map_async<B, F, Fut>(self, f: F) -> ThunkResult<B>
    where
        F: FnOnce(A) -> Fut,
        Fut: Future<Output = B>,
    {
        match self {
            ThunkResult::Success { value, acquired } => ThunkResult::Success {
                value: f(value).await,
                acquired,
            },
            ThunkResult::Failure(error) => ThunkResult::Failure(error),
        }
    }

    /// Map both sides with functions that may suspend
    ///
    /// 使用可挂起的函数映射两侧
    pub async fn bi_map_async<B, S, SFut, F, FFut>(self, succ: S, fail: F) -> ThunkResult<B>
    where
        S: FnOnce(A) -> SFut,
        SFut: Future<Output = B>,
        F: FnOnce(Error) -> FFut,
        FFut: Future<Output = Error>,
    {
        match self {
            ThunkResult::Success { value, acquired } => ThunkResult::Success {
                value: succ(value).await,
                acquired,
            },
            ThunkResult::Failure(error) => ThunkResult::Failure(fail(error).await),
        }
    }

    /// Chain a scoped step; the acquired sets of both steps are unioned
    ///
    /// If the second step fails, the handles of the first step stay tracked
    /// nowhere, so they are released here before the failure is returned.
    ///
    /// 链接一个作用域步骤；两个步骤的获取集合取并集
    pub fn and_then<B>(self, f: impl FnOnce(A) -> ThunkResult<B>) -> ThunkResult<B> {
        match self {
            ThunkResult::Success {
                value,
                acquired: mut first,
            } => match f(value) {
                ThunkResult::Success { value, acquired } => ThunkResult::Success {
                    value,
                    acquired: first.union(acquired),
                },
                ThunkResult::Failure(error) => {
                    // Release errors are already logged per handle; the step's own failure wins
                    let _ = first.release();
                    ThunkResult::Failure(error)
                }
            },
            ThunkResult::Failure(error) => ThunkResult::Failure(error),
        }
    }

    /// Drop handle tracking without releasing anything
    ///
    /// 放弃句柄跟踪而不释放任何资源
    pub fn into_result(self) -> Result<A, Error> {
        match self {
            ThunkResult::Success { value, .. } => Ok(value),
            ThunkResult::Failure(error) => Err(error),
        }
    }

    /// Release every acquired handle and return the plain outcome
    ///
    /// Release is best effort: all handles are attempted. If any release
    /// fails, a success turns into the aggregated release error; a failure
    /// keeps its own error.
    ///
    /// 释放所有获取的句柄并返回普通结果
    ///
    /// 尽力释放：会尝试所有句柄。如果有释放失败，成功结果变为聚合的释放错误；
    /// 失败结果保留其原有错误。
    pub fn dispose_acquired(self) -> Result<A, Error> {
        match self {
            ThunkResult::Success {
                value,
                mut acquired,
            } => {
                if acquired.is_empty() {
                    return Ok(value);
                }
                acquired.release().map(|()| value)
            }
            ThunkResult::Failure(error) => Err(error),
        }
    }

    /// Run `f`, turning a panic into a failure
    ///
    /// 运行 `f`，将 panic 转换为失败结果
    pub fn catch(f: impl FnOnce() -> ThunkResult<A>) -> Self {
        panic::catch_unwind(AssertUnwindSafe(f))
            .unwrap_or_else(|payload| ThunkResult::Failure(Error::from_panic(payload)))
    }

    /// Await `future`, turning a panic during any poll into a failure
    ///
    /// 等待 `future`，将任意一次 poll 中的 panic 转换为失败结果
    pub async fn catch_async<Fut>(future: Fut) -> Self
    where
        Fut: Future<Output = ThunkResult<A>>,
    {
        AssertUnwindSafe(future)
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| ThunkResult::Failure(Error::from_panic(payload)))
    }
}

impl<T: Dispose + 'static> ThunkResult<Arc<T>> {
    /// Success whose value is itself a tracked handle
    ///
    /// 值本身就是被跟踪句柄的成功结果
    pub fn acquire(handle: Arc<T>) -> Self {
        let mut acquired = Acquired::new();
        acquired.insert(handle.clone());
        ThunkResult::Success {
            value: handle,
            acquired,
        }
    }
}

impl<A> From<Result<A, Error>> for ThunkResult<A> {
    fn from(result: Result<A, Error>) -> Self {
        match result {
            Ok(value) => ThunkResult::success(value),
            Err(error) => ThunkResult::Failure(error),
        }
    }
}

impl<A: PartialEq> PartialEq for ThunkResult<A> {
    /// Compares outcomes; acquired handles are ignored
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ThunkResult::Success { value: a, .. }, ThunkResult::Success { value: b, .. }) => a == b,
            (ThunkResult::Failure(a), ThunkResult::Failure(b)) => a == b,
            _ => false,
        }
    }
}

impl<A: fmt::Debug> fmt::Debug for ThunkResult<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThunkResult::Success { value, acquired } if acquired.is_empty() => {
                f.debug_tuple("Success").field(value).finish()
            }
            ThunkResult::Success { value, acquired } => f
                .debug_struct("Success")
                .field("value", value)
                .field("acquired", &acquired.len())
                .finish(),
            ThunkResult::Failure(error) => f.debug_tuple("Failure").field(error).finish(),
        }
    }
}
