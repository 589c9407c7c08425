//! Asynchronous memoizing evaluator parameterized by an execution context.
//!
//! 由执行上下文参数化的异步记忆化求值器。

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{self, BoxFuture};

use crate::cancel::Cancel;
use crate::error::Error;
use crate::result::ThunkResult;
use crate::state::{Memo, ThunkState};
use crate::thunk::describe;

type Deferred<E, A> = Arc<dyn Fn(E) -> BoxFuture<'static, ThunkResult<A>> + Send + Sync>;

struct Inner<E, A> {
    memo: Memo<A>,
    deferred: Option<Deferred<E, A>>,
}

impl<E, A> Inner<E, A>
where
    E: Cancel + Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    async fn force(&self, env: &E) -> ThunkResult<A> {
        if let Some(result) = self.memo.get() {
            return result;
        }
        match self.memo.try_begin() {
            Some(guard) => {
                let result = match &self.deferred {
                    Some(deferred) => {
                        ThunkResult::catch_async(async { deferred(env.clone()).await }).await
                    }
                    None => ThunkResult::failure("thunk has no deferred computation"),
                };
                // Sampled once, after completion and before memoizing
                let result = match panic::catch_unwind(AssertUnwindSafe(|| env.is_cancelled())) {
                    Ok(false) => result,
                    Ok(true) => replace_outcome(result, ThunkResult::cancelled()),
                    Err(payload) => {
                        replace_outcome(result, ThunkResult::Failure(Error::from_panic(payload)))
                    }
                };
                guard.complete(result)
            }
            None => self.memo.wait_async().await,
        }
    }
}

/// Replace an outcome after the cancellation check
///
/// The replacement is the cancellation, or the failure raised by a panicking
/// check. Handles acquired by an overridden success would never reach a
/// caller, so they are released here.
fn replace_outcome<A>(result: ThunkResult<A>, replacement: ThunkResult<A>) -> ThunkResult<A> {
    if result.state() != replacement.state() {
        tracing::debug!(
            overridden = %result.state(),
            replacement = %replacement.state(),
            "cancellation check overrode evaluation outcome"
        );
    }
    if let ThunkResult::Success { mut acquired, .. } = result {
        // Failures are already logged per handle by `release`
        let _ = acquired.release();
    }
    replacement
}

/// Lazy value computed at most once by a future that needs a context
///
/// Works like [`ThunkAsync`](crate::ThunkAsync), except that the deferred
/// computation receives a clone of the context passed to
/// [`ThunkAsyncEnv::value`]. Once the computation completes, and before the
/// outcome is memoized, the context's cancellation signal is sampled exactly
/// once: if it is set, [`ThunkState::Cancelled`] is memoized whatever the
/// computation produced. A check that panics memoizes that panic as a
/// failure, so no panic escapes [`ThunkAsyncEnv::value`]. Callers that find
/// the evaluator already terminal get the memoized outcome regardless of the
/// context they pass.
///
/// 需要上下文的 future 最多计算一次的惰性值
///
/// 与 [`ThunkAsync`](crate::ThunkAsync) 相同，但延迟计算会收到传给
/// [`ThunkAsyncEnv::value`] 的上下文的克隆。计算完成后、结果记忆化之前，
/// 会对上下文的取消信号恰好采样一次：如果已设置，无论计算结果如何都记忆化为
/// [`ThunkState::Cancelled`]。
///
/// # Examples
///
/// ```
/// use lite_thunk::{CancelToken, ThunkAsyncEnv, ThunkState};
///
/// # tokio_test::block_on(async {
/// let thunk = ThunkAsyncEnv::lazy(|token: CancelToken| async move {
///     // Cancellation arrives while the computation finishes
///     token.cancel();
///     Ok(1)
/// });
///
/// let result = thunk.value(&CancelToken::new()).await;
/// assert!(result.is_cancelled());
/// assert_eq!(thunk.state(), ThunkState::Cancelled);
/// # });
/// ```
pub struct ThunkAsyncEnv<E, A> {
    inner: Arc<Inner<E, A>>,
}

impl<E, A> ThunkAsyncEnv<E, A>
where
    E: Cancel + Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    /// Defer an asynchronous computation over a context
    ///
    /// 延迟一个基于上下文的异步计算
    pub fn lazy<F, Fut>(f: F) -> Self
    where
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<A, Error>> + Send + 'static,
    {
        Self::from_deferred(Arc::new(move |env: E| f(env).map(ThunkResult::<A>::from).boxed()))
    }

    /// Defer an asynchronous computation that reports the handles it acquires
    ///
    /// 延迟一个会报告其获取句柄的异步计算
    pub fn lazy_result<F, Fut>(f: F) -> Self
    where
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ThunkResult<A>> + Send + 'static,
    {
        Self::from_deferred(Arc::new(move |env: E| f(env).boxed()))
    }

    /// Defer a synchronous computation over a context
    ///
    /// 延迟一个基于上下文的同步计算
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(E) -> Result<A, Error> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::from_deferred(Arc::new(move |env: E| {
            let f = Arc::clone(&f);
            future::lazy(move |_| ThunkResult::<A>::from(f(env))).boxed()
        }))
    }

    fn from_deferred(deferred: Deferred<E, A>) -> Self {
        Self {
            inner: Arc::new(Inner {
                memo: Memo::pending(),
                deferred: Some(deferred),
            }),
        }
    }

    /// Already succeeded with `value`
    ///
    /// 已以 `value` 成功
    pub fn success(value: A) -> Self {
        Self::from_result(ThunkResult::success(value))
    }

    /// Already failed with `error`; the cancellation sentinel yields a
    /// cancelled evaluator
    ///
    /// 已以 `error` 失败；取消哨兵会得到已取消的求值器
    pub fn fail(error: impl Into<Error>) -> Self {
        Self::from_result(ThunkResult::failure(error))
    }

    /// Already cancelled
    ///
    /// 已取消
    pub fn cancelled() -> Self {
        Self::from_result(ThunkResult::cancelled())
    }

    /// Already terminal with `result`
    ///
    /// 已以 `result` 终止
    pub fn from_result(result: ThunkResult<A>) -> Self {
        Self {
            inner: Arc::new(Inner {
                memo: Memo::ready(result),
                deferred: None,
            }),
        }
    }

    /// Force evaluation within `env`
    ///
    /// 在 `env` 中强制求值
    pub async fn value(&self, env: &E) -> ThunkResult<A> {
        self.inner.force(env).await
    }

    /// Lazily map the successful value with a synchronous function
    ///
    /// The derived evaluator forces this one when it runs. If the future
    /// evaluating the derived evaluator is dropped while it is also the one
    /// evaluating this source, both memoize a cancellation.
    ///
    /// 使用同步函数惰性映射成功值
    pub fn map<B, F>(&self, f: F) -> ThunkAsyncEnv<E, B>
    where
        B: Clone + Send + Sync + 'static,
        F: Fn(A) -> B + Send + Sync + 'static,
    {
        if let Some(result) = self.inner.memo.get() {
            return ThunkAsyncEnv::from_result(ThunkResult::catch(|| result.map(f)));
        }
        let source = Arc::clone(&self.inner);
        let f = Arc::new(f);
        ThunkAsyncEnv::from_deferred(Arc::new(move |env: E| {
            let source = Arc::clone(&source);
            let f = Arc::clone(&f);
            async move { source.force(&env).await.map(&*f) }.boxed()
        }))
    }

    /// Lazily map both sides with synchronous functions
    ///
    /// 使用同步函数惰性映射两侧
    pub fn bi_map<B, S, F>(&self, succ: S, fail: F) -> ThunkAsyncEnv<E, B>
    where
        B: Clone + Send + Sync + 'static,
        S: Fn(A) -> B + Send + Sync + 'static,
        F: Fn(Error) -> Error + Send + Sync + 'static,
    {
        if let Some(result) = self.inner.memo.get() {
            return ThunkAsyncEnv::from_result(ThunkResult::catch(|| result.bi_map(succ, fail)));
        }
        let source = Arc::clone(&self.inner);
        let fns = Arc::new((succ, fail));
        ThunkAsyncEnv::from_deferred(Arc::new(move |env: E| {
            let source = Arc::clone(&source);
            let fns = Arc::clone(&fns);
            async move {
                let (succ, fail) = &*fns;
                source.force(&env).await.bi_map(succ, fail)
            }
            .boxed()
        }))
    }

    /// Lazily map the successful value with a function that may suspend
    ///
    /// The derived evaluator forces this one when it runs. If the future
    /// evaluating the derived evaluator is dropped while it is also the one
    /// evaluating this source, both memoize a cancellation.
    ///
    /// 使用可挂起的函数惰性映射成功值
    pub fn map_async<B, F, Fut>(&self, f: F) -> ThunkAsyncEnv<E, B>
    where
        B: Clone + Send + Sync + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = B> + Send + 'static,
    {
        let source = Arc::clone(&self.inner);
        let f = Arc::new(f);
        ThunkAsyncEnv::from_deferred(Arc::new(move |env: E| {
            let source = Arc::clone(&source);
            let f = Arc::clone(&f);
            async move { source.force(&env).await.map_async(&*f).await }.boxed()
        }))
    }

    /// Lazily map both sides with functions that may suspend
    ///
    /// 使用可挂起的函数惰性映射两侧
    pub fn bi_map_async<B, S, SFut, F, FFut>(&self, succ: S, fail: F) -> ThunkAsyncEnv<E, B>
    where
        B: Clone + Send + Sync + 'static,
        S: Fn(A) -> SFut + Send + Sync + 'static,
        SFut: Future<Output = B> + Send + 'static,
        F: Fn(Error) -> FFut + Send + Sync + 'static,
        FFut: Future<Output = Error> + Send + 'static,
    {
        let source = Arc::clone(&self.inner);
        let fns = Arc::new((succ, fail));
        ThunkAsyncEnv::from_deferred(Arc::new(move |env: E| {
            let source = Arc::clone(&source);
            let fns = Arc::clone(&fns);
            async move {
                let (succ, fail) = &*fns;
                source.force(&env).await.bi_map_async(succ, fail).await
            }
            .boxed()
        }))
    }
}

impl<E, A> ThunkAsyncEnv<E, A> {
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

impl<E, A> Clone for ThunkAsyncEnv<E, A>
where
    E: Cancel + Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    /// Independent evaluator; lazily built evaluators start over
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

impl<E, A: Clone + fmt::Display> fmt::Display for ThunkAsyncEnv<E, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        describe(self.state(), self.inner.memo.get(), f)
    }
}

impl<E, A> fmt::Debug for ThunkAsyncEnv<E, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThunkAsyncEnv")
            .field("state", &self.state())
            .field("lazy", &self.inner.deferred.is_some())
            .finish()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::cancel::{CancelToken, NeverCancel};
    use crate::dispose::Dispose;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::time::{Duration, sleep};

    /// Context whose signal flips to cancelled on its n-th sample
    #[derive(Clone)]
    struct FlipAt {
        samples: Arc<AtomicUsize>,
        flip_at: usize,
    }

    impl FlipAt {
        fn new(flip_at: usize) -> Self {
            Self {
                samples: Arc::new(AtomicUsize::new(0)),
                flip_at,
            }
        }

        fn samples(&self) -> usize {
            self.samples.load(Ordering::SeqCst)
        }
    }

    impl Cancel for FlipAt {
        fn is_cancelled(&self) -> bool {
            self.samples.fetch_add(1, Ordering::SeqCst) + 1 >= self.flip_at
        }
    }

    #[derive(Debug, Default)]
    struct Lease {
        returned: AtomicBool,
    }

    impl PartialEq for Lease {
        fn eq(&self, other: &Self) -> bool {
            self.returned.load(Ordering::SeqCst) == other.returned.load(Ordering::SeqCst)
        }
    }

    impl Dispose for Lease {
        fn dispose(&self) -> Result<(), Error> {
            self.returned.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cancellation_after_success_overrides() {
        let thunk = ThunkAsyncEnv::lazy(|_env: FlipAt| async { Ok(10) });
        // The inner computation never samples; the evaluator's single
        // post-completion check is the first sample and sees cancellation
        let env = FlipAt::new(1);

        let result = thunk.value(&env).await;
        assert!(result.is_cancelled());
        assert_eq!(thunk.state(), ThunkState::Cancelled);
        assert_eq!(env.samples(), 1);

        // Memoized: a healthy context does not bring the success back
        assert!(thunk.value(&FlipAt::new(usize::MAX)).await.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancellation_overrides_failure() {
        let thunk: ThunkAsyncEnv<CancelToken, i32> = ThunkAsyncEnv::lazy(|token: CancelToken| async move {
            token.cancel();
            Err(Error::new("boom"))
        });
        assert!(thunk.value(&CancelToken::new()).await.is_cancelled());
        assert!(thunk.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_after_memoized_success_is_ignored() {
        let token = CancelToken::new();
        let thunk = ThunkAsyncEnv::lazy(|_: CancelToken| async { Ok("kept") });

        assert_eq!(thunk.value(&token).await, ThunkResult::success("kept"));
        token.cancel();
        assert_eq!(thunk.value(&token).await, ThunkResult::success("kept"));
        assert!(thunk.is_success());
    }

    #[tokio::test]
    async fn test_env_reaches_computation() {
        #[derive(Clone)]
        struct Config {
            base: i32,
            token: CancelToken,
        }

        impl Cancel for Config {
            fn is_cancelled(&self) -> bool {
                self.token.is_cancelled()
            }
        }

        let thunk = ThunkAsyncEnv::lazy(|cfg: Config| async move { Ok(cfg.base * 2) });
        let cfg = Config {
            base: 21,
            token: CancelToken::new(),
        };
        assert_eq!(thunk.value(&cfg).await, ThunkResult::success(42));
    }

    #[tokio::test]
    async fn test_overridden_success_releases_handles() {
        let lease = Arc::new(Lease::default());
        let handed_out = lease.clone();
        let thunk = ThunkAsyncEnv::lazy_result(move |_: FlipAt| {
            let lease = handed_out.clone();
            async move { ThunkResult::acquire(lease) }
        });

        assert!(thunk.value(&FlipAt::new(1)).await.is_cancelled());
        assert!(lease.returned.load(Ordering::SeqCst));
    }

    /// Context whose cancellation check panics with `message`
    #[derive(Clone)]
    struct PanickingCheck {
        message: &'static str,
    }

    impl Cancel for PanickingCheck {
        fn is_cancelled(&self) -> bool {
            panic!("{}", self.message)
        }
    }

    #[tokio::test]
    async fn test_panicking_check_is_memoized_as_failure() {
        let lease = Arc::new(Lease::default());
        let handed_out = lease.clone();
        let thunk = ThunkAsyncEnv::lazy_result(move |_: PanickingCheck| {
            let lease = handed_out.clone();
            async move { ThunkResult::acquire(lease) }
        });
        let ctx = PanickingCheck { message: "check exploded" };

        let forced = AssertUnwindSafe(thunk.value(&ctx)).catch_unwind().await;
        let result = forced.expect("panic must not escape value()");
        assert_eq!(result, ThunkResult::Failure(Error::Panicked("check exploded".into())));
        assert_eq!(thunk.state(), ThunkState::Failed);
        assert!(lease.returned.load(Ordering::SeqCst));

        // Every later caller sees the same memoized failure
        assert_eq!(thunk.value(&ctx).await, result);
    }

    #[tokio::test]
    async fn test_panicking_check_with_sentinel_is_cancelled() {
        let thunk = ThunkAsyncEnv::from_fn(|_: PanickingCheck| Ok(3));
        let ctx = PanickingCheck { message: "cancelled" };

        assert_eq!(thunk.value(&ctx).await, ThunkResult::cancelled());
        assert_eq!(thunk.state(), ThunkState::Cancelled);
    }

    #[tokio::test]
    async fn test_healthy_success_keeps_handles() {
        let lease = Arc::new(Lease::default());
        let handed_out = lease.clone();
        let thunk = ThunkAsyncEnv::lazy_result(move |_: NeverCancel| {
            let lease = handed_out.clone();
            async move { ThunkResult::acquire(lease) }
        });

        let result = thunk.value(&NeverCancel).await;
        assert_eq!(result.acquired().len(), 1);
        assert!(!lease.returned.load(Ordering::SeqCst));
        assert!(result.dispose_acquired().is_ok());
        assert!(lease.returned.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_forces_run_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let thunk = Arc::new(ThunkAsyncEnv::lazy(move |_: CancelToken| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(20)).await;
                Ok(42)
            }
        }));
        let token = CancelToken::new();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let thunk = thunk.clone();
                let token = token.clone();
                tokio::spawn(async move { thunk.value(&token).await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), ThunkResult::success(42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_from_fn_and_panics() {
        let thunk = ThunkAsyncEnv::from_fn(|_: NeverCancel| Ok(5));
        assert_eq!(thunk.value(&NeverCancel).await, ThunkResult::success(5));

        let panicked: ThunkAsyncEnv<NeverCancel, i32> =
            ThunkAsyncEnv::from_fn(|_| -> Result<i32, Error> { panic!("sync panic") });
        assert_eq!(
            panicked.value(&NeverCancel).await,
            ThunkResult::Failure(Error::Panicked("sync panic".into()))
        );
    }

    #[tokio::test]
    async fn test_clone_semantics() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let thunk = ThunkAsyncEnv::from_fn(move |_: NeverCancel| {
            Ok(counter.fetch_add(1, Ordering::SeqCst))
        });
        assert_eq!(thunk.value(&NeverCancel).await, ThunkResult::success(0));
        assert_eq!(thunk.clone().value(&NeverCancel).await, ThunkResult::success(1));

        let failed = ThunkAsyncEnv::<NeverCancel, i32>::fail("boom").clone();
        assert_eq!(failed.value(&NeverCancel).await, ThunkResult::failure("boom"));
    }

    #[tokio::test]
    async fn test_maps_pass_env_through() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let thunk = ThunkAsyncEnv::lazy(move |_: CancelToken| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(3) }
        });
        let mapped = thunk.map(|v| v + 1);
        let mapped_async = thunk.map_async(|v| async move { v * 2 });
        let both = thunk.bi_map_async(|v| async move { v.to_string() }, |e| async move { e });
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let token = CancelToken::new();
        assert_eq!(mapped.value(&token).await, ThunkResult::success(4));
        assert_eq!(mapped_async.value(&token).await, ThunkResult::success(6));
        assert_eq!(both.value(&token).await, ThunkResult::success("3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_mapped_cancellation_is_memoized_per_layer() {
        let thunk = ThunkAsyncEnv::lazy(|_: CancelToken| async { Ok(1) });
        let mapped = thunk.map(|v| v * 100);

        let token = CancelToken::new();
        token.cancel();
        // Source and mapped layer both sample the cancelled context
        assert!(mapped.value(&token).await.is_cancelled());
        assert!(thunk.is_cancelled());
        assert!(mapped.is_cancelled());
    }

    #[tokio::test]
    async fn test_bi_map_on_terminal_is_eager() {
        let mapped = ThunkAsyncEnv::<NeverCancel, i32>::fail("boom")
            .bi_map(|v| v, |e| Error::new(format!("mapped {e}")));
        assert_eq!(mapped.state(), ThunkState::Failed);
        assert_eq!(mapped.value(&NeverCancel).await, ThunkResult::failure("mapped boom"));
    }

    #[tokio::test]
    async fn test_display() {
        let thunk = ThunkAsyncEnv::from_fn(|_: NeverCancel| Ok(42));
        assert_eq!(thunk.to_string(), "not evaluated");
        thunk.value(&NeverCancel).await;
        assert_eq!(thunk.to_string(), "success(42)");
        assert_eq!(ThunkAsyncEnv::<NeverCancel, i32>::cancelled().to_string(), "cancelled");
    }
}
