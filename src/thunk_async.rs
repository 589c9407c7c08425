//! Asynchronous memoizing evaluator.
//!
//! 异步记忆化求值器。

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{self, BoxFuture};

use crate::error::Error;
use crate::result::ThunkResult;
use crate::state::{Memo, ThunkState};
use crate::thunk::describe;

type Deferred<A> = Arc<dyn Fn() -> BoxFuture<'static, ThunkResult<A>> + Send + Sync>;

struct Inner<A> {
    memo: Memo<A>,
    deferred: Option<Deferred<A>>,
}

impl<A: Clone + Send + Sync + 'static> Inner<A> {
    async fn force(&self) -> ThunkResult<A> {
        if let Some(result) = self.memo.get() {
            return result;
        }
        match self.memo.try_begin() {
            Some(guard) => {
                let result = match &self.deferred {
                    // The deferred call happens inside the caught future, so a
                    // panic while building the future is caught too
                    Some(deferred) => ThunkResult::catch_async(async { deferred().await }).await,
                    None => ThunkResult::failure("thunk has no deferred computation"),
                };
                guard.complete(result)
            }
            None => self.memo.wait_async().await,
        }
    }
}

/// Lazy value computed at most once by a future
///
/// Same state machine as [`Thunk`](crate::Thunk), but the deferred computation
/// and the `*_async` transforms may suspend. The caller that wins the race
/// polls the computation; other callers spin briefly and then yield to the
/// executor until the outcome is published, so they never block a thread.
///
/// If the future returned by [`ThunkAsync::value`] is dropped while it is the
/// one evaluating, the evaluator memoizes a cancellation.
///
/// 由 future 最多计算一次的惰性值
///
/// 与 [`Thunk`](crate::Thunk) 使用相同的状态机，但延迟计算和 `*_async` 变换可以挂起。
/// 赢得竞争的调用者轮询计算；其他调用者短暂自旋后让出给执行器，直到结果发布，
/// 因此不会阻塞线程。
///
/// # Examples
///
/// ```
/// use lite_thunk::{ThunkAsync, ThunkResult};
///
/// # tokio_test::block_on(async {
/// let thunk = ThunkAsync::lazy(|| async {
///     tokio::task::yield_now().await;
///     Ok("hello".to_string())
/// });
/// let shout = thunk.map_async(|s| async move { s.to_uppercase() });
///
/// assert_eq!(shout.value().await, ThunkResult::success("HELLO".to_string()));
/// assert_eq!(thunk.value().await, ThunkResult::success("hello".to_string()));
/// # });
/// ```
pub struct ThunkAsync<A> {
    inner: Arc<Inner<A>>,
}

impl<A: Clone + Send + Sync + 'static> ThunkAsync<A> {
    /// Defer an asynchronous computation
    ///
    /// 延迟一个异步计算
    pub fn lazy<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<A, Error>> + Send + 'static,
    {
        Self::from_deferred(Arc::new(move || f().map(ThunkResult::<A>::from).boxed()))
    }

    /// Defer an asynchronous computation that reports the handles it acquires
    ///
    /// 延迟一个会报告其获取句柄的异步计算
    pub fn lazy_result<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ThunkResult<A>> + Send + 'static,
    {
        Self::from_deferred(Arc::new(move || f().boxed()))
    }

    /// Defer a synchronous computation, run by the first caller that polls
    ///
    /// 延迟一个同步计算，由第一个轮询的调用者运行
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> Result<A, Error> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::from_deferred(Arc::new(move || {
            let f = Arc::clone(&f);
            future::lazy(move |_| ThunkResult::<A>::from(f())).boxed()
        }))
    }

    fn from_deferred(deferred: Deferred<A>) -> Self {
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

    /// Force evaluation
    ///
    /// 强制求值
    pub async fn value(&self) -> ThunkResult<A> {
        self.inner.force().await
    }

    /// Lazily map the successful value with a synchronous function
    ///
    /// A terminal source maps eagerly into a terminal evaluator.
    ///
    /// The derived evaluator forces this one when it runs. If the future
    /// evaluating the derived evaluator is dropped while it is also the one
    /// evaluating this source, both memoize a cancellation.
    ///
    /// 使用同步函数惰性映射成功值
    pub fn map<B, F>(&self, f: F) -> ThunkAsync<B>
    where
        B: Clone + Send + Sync + 'static,
        F: Fn(A) -> B + Send + Sync + 'static,
    {
        if let Some(result) = self.inner.memo.get() {
            return ThunkAsync::from_result(ThunkResult::catch(|| result.map(f)));
        }
        let source = Arc::clone(&self.inner);
        let f = Arc::new(f);
        ThunkAsync::from_deferred(Arc::new(move || {
            let source = Arc::clone(&source);
            let f = Arc::clone(&f);
            async move { source.force().await.map(&*f) }.boxed()
        }))
    }

    /// Lazily map both sides with synchronous functions
    ///
    /// 使用同步函数惰性映射两侧
    pub fn bi_map<B, S, F>(&self, succ: S, fail: F) -> ThunkAsync<B>
    where
        B: Clone + Send + Sync + 'static,
        S: Fn(A) -> B + Send + Sync + 'static,
        F: Fn(Error) -> Error + Send + Sync + 'static,
    {
        if let Some(result) = self.inner.memo.get() {
            return ThunkAsync::from_result(ThunkResult::catch(|| result.bi_map(succ, fail)));
        }
        let source = Arc::clone(&self.inner);
        let fns = Arc::new((succ, fail));
        ThunkAsync::from_deferred(Arc::new(move || {
            let source = Arc::clone(&source);
            let fns = Arc::clone(&fns);
            async move {
                let (succ, fail) = &*fns;
                source.force().await.bi_map(succ, fail)
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
    pub fn map_async<B, F, Fut>(&self, f: F) -> ThunkAsync<B>
    where
        B: Clone + Send + Sync + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = B> + Send + 'static,
    {
        let source = Arc::clone(&self.inner);
        let f = Arc::new(f);
        ThunkAsync::from_deferred(Arc::new(move || {
            let source = Arc::clone(&source);
            let f = Arc::clone(&f);
            async move { source.force().await.map_async(&*f).await }.boxed()
        }))
    }

    /// Lazily map both sides with functions that may suspend
    ///
    /// 使用可挂起的函数惰性映射两侧
    pub fn bi_map_async<B, S, SFut, F, FFut>(&self, succ: S, fail: F) -> ThunkAsync<B>
    where
        B: Clone + Send + Sync + 'static,
        S: Fn(A) -> SFut + Send + Sync + 'static,
        SFut: Future<Output = B> + Send + 'static,
        F: Fn(Error) -> FFut + Send + Sync + 'static,
        FFut: Future<Output = Error> + Send + 'static,
    {
        let source = Arc::clone(&self.inner);
        let fns = Arc::new((succ, fail));
        ThunkAsync::from_deferred(Arc::new(move || {
            let source = Arc::clone(&source);
            let fns = Arc::clone(&fns);
            async move {
                let (succ, fail) = &*fns;
                source.force().await.bi_map_async(succ, fail).await
            }
            .boxed()
        }))
    }
}

impl<A> ThunkAsync<A> {
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

impl<A: Clone + Send + Sync + 'static> Clone for ThunkAsync<A> {
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

impl<A: Clone + fmt::Display> fmt::Display for ThunkAsync<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        describe(self.state(), self.inner.memo.get(), f)
    }
}

impl<A> fmt::Debug for ThunkAsync<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThunkAsync")
            .field("state", &self.state())
            .field("lazy", &self.inner.deferred.is_some())
            .finish()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{Duration, sleep};

    fn counted(value: i32, delay: Duration) -> (ThunkAsync<i32>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let thunk = ThunkAsync::lazy(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                sleep(delay).await;
                Ok(value)
            }
        });
        (thunk, calls)
    }

    #[test]
    fn test_value_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ThunkAsync<String>>();

        let thunk = ThunkAsync::<String>::success("x".into());
        let fut = thunk.value();
        assert_send(&fut);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_eight_concurrent_forces_run_once() {
        let (thunk, calls) = counted(42, Duration::from_millis(20));
        let thunk = Arc::new(thunk);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let thunk = thunk.clone();
                tokio::spawn(async move { thunk.value().await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), ThunkResult::success(42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_concurrent_forces_on_one_thread() {
        let (thunk, calls) = counted(7, Duration::from_millis(10));

        let results = futures::future::join_all((0..8).map(|_| thunk.value())).await;

        assert!(results.iter().all(|r| *r == ThunkResult::success(7)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_and_panic_classification() {
        let failed: ThunkAsync<i32> = ThunkAsync::lazy(|| async { Err(Error::new("boom")) });
        assert_eq!(failed.value().await, ThunkResult::failure("boom"));
        assert!(failed.is_failed());

        let panicked: ThunkAsync<i32> = ThunkAsync::lazy(|| async {
            tokio::task::yield_now().await;
            if true {
                panic!("exploded");
            }
            Ok(1)
        });
        assert_eq!(
            panicked.value().await,
            ThunkResult::Failure(Error::Panicked("exploded".into()))
        );
        assert!(panicked.is_failed());

        let cancelled: ThunkAsync<i32> = ThunkAsync::lazy(|| async {
            if true {
                panic!("cancelled");
            }
            Ok(1)
        });
        assert!(cancelled.value().await.is_cancelled());
        assert!(cancelled.is_cancelled());

        let returned: ThunkAsync<i32> = ThunkAsync::lazy(|| async { Err(Error::cancelled()) });
        returned.value().await;
        assert!(returned.is_cancelled());
    }

    #[tokio::test]
    async fn test_panic_while_building_future() {
        let thunk: ThunkAsync<i32> = ThunkAsync::lazy_result(|| -> future::Ready<ThunkResult<i32>> {
            panic!("eager panic")
        });
        assert_eq!(
            thunk.value().await,
            ThunkResult::Failure(Error::Panicked("eager panic".into()))
        );
    }

    #[tokio::test]
    async fn test_dropped_evaluation_memoizes_cancellation() {
        let (thunk, calls) = counted(1, Duration::from_secs(60));

        let timed_out = tokio::time::timeout(Duration::from_millis(10), thunk.value()).await;
        assert!(timed_out.is_err());
        assert_eq!(thunk.state(), ThunkState::Cancelled);
        assert!(thunk.value().await.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_mapped_evaluation_cancels_source() {
        let (thunk, calls) = counted(1, Duration::from_secs(60));
        let mapped = thunk.map_async(|v| async move { v + 1 });

        let timed_out = tokio::time::timeout(Duration::from_millis(10), mapped.value()).await;
        assert!(timed_out.is_err());
        assert_eq!(mapped.state(), ThunkState::Cancelled);
        assert_eq!(thunk.state(), ThunkState::Cancelled);
        assert!(thunk.value().await.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_from_fn() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let thunk = ThunkAsync::from_fn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(3)
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(thunk.value().await, ThunkResult::success(3));
        assert_eq!(thunk.value().await, ThunkResult::success(3));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clone_semantics() {
        let (thunk, calls) = counted(5, Duration::ZERO);
        thunk.value().await;
        let cloned = thunk.clone();
        assert_eq!(cloned.state(), ThunkState::NotEvaluated);
        assert_eq!(cloned.value().await, ThunkResult::success(5));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let failed = ThunkAsync::<i32>::fail("boom");
        let cloned = failed.clone();
        assert_eq!(cloned.state(), ThunkState::Failed);
        assert_eq!(cloned.value().await, ThunkResult::failure("boom"));

        let cancelled = ThunkAsync::<i32>::cancelled().clone();
        assert!(cancelled.is_cancelled());
    }

    #[tokio::test]
    async fn test_map_does_not_force_source_twice() {
        let (thunk, calls) = counted(2, Duration::from_millis(5));
        let mapped = thunk.map(|v| v * 10);
        let mapped_async = thunk.map_async(|v| async move {
            sleep(Duration::from_millis(1)).await;
            v + 1
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(thunk.state(), ThunkState::NotEvaluated);

        let (a, b) = tokio::join!(mapped.value(), mapped_async.value());
        assert_eq!(a, ThunkResult::success(20));
        assert_eq!(b, ThunkResult::success(3));
        assert_eq!(mapped.value().await, ThunkResult::success(20));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_map_of_terminal_is_eager() {
        let mapped = ThunkAsync::success(4).map(|v| v * 2);
        assert_eq!(mapped.state(), ThunkState::Success);
        assert_eq!(mapped.value().await, ThunkResult::success(8));
    }

    #[tokio::test]
    async fn test_map_laws() {
        let f = |v: i32| v + 1;
        let g = |v: i32| v * 2;

        for source in [ThunkAsync::success(4), counted(4, Duration::ZERO).0] {
            assert_eq!(source.clone().map(|v| v).value().await, source.clone().value().await);
            assert_eq!(
                source.clone().map(f).map(g).value().await,
                source.clone().map(move |v| g(f(v))).value().await
            );
            assert_eq!(
                source.clone().map_async(move |v| async move { f(v) }).map(g).value().await,
                source.clone().map(move |v| g(f(v))).value().await
            );
        }
    }

    #[tokio::test]
    async fn test_bi_map_variants() {
        let failed: ThunkAsync<i32> = ThunkAsync::lazy(|| async { Err(Error::new("boom")) });

        let sync = failed.bi_map(|v| v, |e| Error::new(format!("sync {e}")));
        assert_eq!(sync.value().await, ThunkResult::failure("sync boom"));

        let suspended = failed.bi_map_async(
            |v| async move { v },
            |e| async move {
                tokio::task::yield_now().await;
                Error::new(format!("async {e}"))
            },
        );
        assert_eq!(suspended.value().await, ThunkResult::failure("async boom"));

        let ok = ThunkAsync::success(1).bi_map_async(
            |v| async move { v.to_string() },
            |e| async move { e },
        );
        assert_eq!(ok.value().await, ThunkResult::success("1".to_string()));
    }

    #[tokio::test]
    async fn test_map_async_panic_is_caught() {
        let mapped = ThunkAsync::success(1).map_async(|_| async {
            if true {
                panic!("bad transform");
            }
            0
        });
        assert_eq!(
            mapped.value().await,
            ThunkResult::Failure(Error::Panicked("bad transform".into()))
        );
    }

    #[tokio::test]
    async fn test_display() {
        let (thunk, _) = counted(42, Duration::ZERO);
        assert_eq!(thunk.to_string(), "not evaluated");
        thunk.value().await;
        assert_eq!(thunk.to_string(), "success(42)");
        assert_eq!(ThunkAsync::<i32>::fail("boom").to_string(), "failed(boom)");
        assert_eq!(ThunkAsync::<i32>::cancelled().to_string(), "cancelled");
    }
}
