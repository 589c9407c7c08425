//! Synchronous memoizing evaluator.
//!
//! 同步记忆化求值器。

use std::fmt;
use std::sync::Arc;

use crate::error::{Detailed, Error};
use crate::result::ThunkResult;
use crate::state::{Memo, ThunkState};

type Deferred<A> = Arc<dyn Fn() -> ThunkResult<A> + Send + Sync>;

struct Inner<A> {
    memo: Memo<A>,
    // Kept for `Clone`; never re-run by this instance once terminal
    deferred: Option<Deferred<A>>,
}

impl<A: Clone + Send + Sync + 'static> Inner<A> {
    fn force(&self) -> ThunkResult<A> {
        // Fast path: already terminal
        if let Some(result) = self.memo.get() {
            return result;
        }
        match self.memo.try_begin() {
            Some(guard) => {
                let result = match &self.deferred {
                    Some(deferred) => ThunkResult::catch(|| deferred()),
                    None => ThunkResult::failure("thunk has no deferred computation"),
                };
                guard.complete(result)
            }
            None => self.memo.wait(),
        }
    }
}

/// Lazy value computed at most once
///
/// Any number of threads may call [`Thunk::value`] concurrently; the deferred
/// function runs exactly once, on the thread that wins the race, and every
/// caller gets the same memoized [`ThunkResult`]. Panics inside the function
/// are caught and memoized as failures, or as a cancellation when the panic
/// message is [`CANCELLED_MESSAGE`](crate::CANCELLED_MESSAGE).
///
/// [`Clone`] builds an independent evaluator. A lazily built thunk clones back
/// to [`ThunkState::NotEvaluated`] and re-runs its function on the next force;
/// a thunk built from a known value or error clones its terminal state.
///
/// Forcing a thunk from inside its own deferred function never returns.
///
/// 最多计算一次的惰性值
///
/// 任意数量的线程可以并发调用 [`Thunk::value`]；延迟函数只在赢得竞争的线程上运行一次，
/// 每个调用者都得到相同的记忆化 [`ThunkResult`]。函数内的 panic 会被捕获并记忆化为失败。
///
/// # Examples
///
/// ```
/// use lite_thunk::{Thunk, ThunkResult, ThunkState};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let calls = Arc::new(AtomicUsize::new(0));
/// let counter = calls.clone();
/// let thunk = Thunk::lazy(move || {
///     counter.fetch_add(1, Ordering::SeqCst);
///     Ok(21)
/// });
///
/// let doubled = thunk.map(|v| v * 2);
/// assert_eq!(thunk.state(), ThunkState::NotEvaluated);
///
/// assert_eq!(doubled.value(), ThunkResult::success(42));
/// assert_eq!(thunk.value(), ThunkResult::success(21));
/// assert_eq!(calls.load(Ordering::SeqCst), 1);
/// ```
pub struct Thunk<A> {
    inner: Arc<Inner<A>>,
}

impl<A: Clone + Send + Sync + 'static> Thunk<A> {
    /// Defer a computation
    ///
    /// 延迟一个计算
    pub fn lazy<F>(f: F) -> Self
    where
        F: Fn() -> Result<A, Error> + Send + Sync + 'static,
    {
        Self::from_deferred(Arc::new(move || ThunkResult::<A>::from(f())))
    }

    /// Defer a computation that reports the handles it acquires
    ///
    /// 延迟一个会报告其获取句柄的计算
    pub fn lazy_result<F>(f: F) -> Self
    where
        F: Fn() -> ThunkResult<A> + Send + Sync + 'static,
    {
        Self::from_deferred(Arc::new(f))
    }

    fn from_deferred(deferred: Deferred<A>) -> Self {
        Self {
            inner: Arc::new(Inner {
                memo: Memo::pending(),
                deferred: Some(deferred),
            }),
        }
    }

    /// Already evaluated to `value`
    ///
    /// 已求值为 `value`
    pub fn success(value: A) -> Self {
        Self::from_result(ThunkResult::success(value))
    }

    /// Already failed with `error`
    ///
    /// The cancellation sentinel yields a cancelled thunk.
    ///
    /// 已以 `error` 失败
    pub fn fail(error: impl Into<Error>) -> Self {
        Self::from_result(ThunkResult::failure(error))
    }

    /// Already cancelled
    ///
    /// 已被取消
    pub fn cancelled() -> Self {
        Self::from_result(ThunkResult::cancelled())
    }

    /// Already terminal with `result`
    pub fn from_result(result: ThunkResult<A>) -> Self {
        Self {
            inner: Arc::new(Inner {
                memo: Memo::ready(result),
                deferred: None,
            }),
        }
    }

    /// Force evaluation
    ///
    /// Runs the deferred function if nobody has yet, otherwise waits for the
    /// evaluating caller or returns the memoized outcome.
    ///
    /// 强制求值
    pub fn value(&self) -> ThunkResult<A> {
        self.inner.force()
    }

    /// Lazily map the successful value
    ///
    /// The source is not forced. If it is already terminal the new thunk is
    /// terminal too; otherwise forcing the new thunk forces the source.
    ///
    /// 惰性映射成功值
    pub fn map<B, F>(&self, f: F) -> Thunk<B>
    where
        B: Clone + Send + Sync + 'static,
        F: Fn(A) -> B + Send + Sync + 'static,
    {
        if let Some(result) = self.inner.memo.get() {
            return Thunk::from_result(ThunkResult::catch(|| result.map(f)));
        }
        let source = Arc::clone(&self.inner);
        Thunk::from_deferred(Arc::new(move || source.force().map(&f)))
    }

    /// Lazily map both the successful value and the error
    ///
    /// 惰性映射成功值和错误
    pub fn bi_map<B, S, F>(&self, succ: S, fail: F) -> Thunk<B>
    where
        B: Clone + Send + Sync + 'static,
        S: Fn(A) -> B + Send + Sync + 'static,
        F: Fn(Error) -> Error + Send + Sync + 'static,
    {
        if let Some(result) = self.inner.memo.get() {
            return Thunk::from_result(ThunkResult::catch(|| result.bi_map(succ, fail)));
        }
        let source = Arc::clone(&self.inner);
        Thunk::from_deferred(Arc::new(move || source.force().bi_map(&succ, &fail)))
    }
}

impl<A> Thunk<A> {
    /// Current evaluation state
    ///
    /// 当前求值状态
    #[inline]
    pub fn state(&self) -> ThunkState {
        self.inner.memo.state()
    }

    /// Returns true once a terminal state is memoized
    ///
    /// 记忆化终止状态后返回 true
    #[inline]
    pub fn is_evaluated(&self) -> bool {
        self.state().is_terminal()
    }

    /// Returns true if the outcome is a success
    ///
    /// 结果为成功时返回 true
    #[inline]
    pub fn is_success(&self) -> bool {
        self.state() == ThunkState::Success
    }

    /// Returns true if the outcome is a failure other than cancellation
    ///
    /// 结果为非取消的失败时返回 true
    #[inline]
    pub fn is_failed(&self) -> bool {
        self.state() == ThunkState::Failed
    }

    /// Returns true if the outcome is the cancellation
    ///
    /// 结果为取消时返回 true
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.state() == ThunkState::Cancelled
    }
}

impl<A: Clone + Send + Sync + 'static> Clone for Thunk<A> {
    /// Independent evaluator; lazily built thunks start over
    fn clone(&self) -> Self {
        match &self.inner.deferred {
            Some(deferred) => Self::from_deferred(Arc::clone(deferred)),
            None => match self.inner.memo.get() {
                Some(result) => Self::from_result(result),
                None => Self::fail("thunk has no deferred computation"),
            },
        }
    }
}

/// Describes the state, including the payload once terminal
///
/// 描述状态，终止后包含结果负载
impl<A: Clone + fmt::Display> fmt::Display for Thunk<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        describe(self.state(), self.inner.memo.get(), f)
    }
}

pub(crate) fn describe<A: fmt::Display>(
    state: ThunkState,
    result: Option<ThunkResult<A>>,
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    match (state, result) {
        (ThunkState::Success, Some(ThunkResult::Success { value, .. })) => {
            write!(f, "success({value})")
        }
        (ThunkState::Failed, Some(ThunkResult::Failure(error))) => {
            write!(f, "failed({})", Detailed(&error))
        }
        (state, _) => write!(f, "{state}"),
    }
}

impl<A> fmt::Debug for Thunk<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thunk")
            .field("state", &self.state())
            .field("lazy", &self.inner.deferred.is_some())
            .finish()
    }
}
