//! # lite-thunk
//!
//! Lock-minimized, memoizing lazy evaluators for Rust.
//!
//! 轻量级、无锁优先的 Rust 记忆化惰性求值器。
//!
//! ## Overview / 概述
//!
//! A thunk wraps a possibly asynchronous, possibly failing computation and
//! runs it **at most once**, however many callers race to force it. Every
//! caller receives the same memoized [`ThunkResult`].
//!
//! thunk 包装一个可能异步、可能失败的计算，无论有多少调用者竞争强制求值，
//! 都**最多运行一次**。每个调用者都会收到相同的记忆化 [`ThunkResult`]。
//!
//! ## Key Features / 主要特性
//!
//! - **Lock-free fast path**: a terminal evaluator is read with one atomic load
//! - **Single CAS race**: `NotEvaluated -> Evaluating` decides who runs the computation
//! - **No wait queue**: losers spin briefly, then yield (to the OS or to the executor)
//! - **Errors are values**: failures and panics are memoized, never re-thrown
//! - **Tracked resources**: disposable handles acquired by a success are released
//!   at a point the caller chooses
//!
//! - **无锁快速路径**：已终止的求值器只需一次原子加载即可读取
//! - **单次 CAS 竞争**：`NotEvaluated -> Evaluating` 决定由谁运行计算
//! - **无等待队列**：竞争失败者短暂自旋后让出（给操作系统或执行器）
//! - **错误即值**：失败和 panic 会被记忆化，绝不重新抛出
//! - **资源跟踪**：成功结果获取的可释放句柄在调用者选择的时机释放
//!
//! ## Evaluators / 求值器
//!
//! ### [`Thunk`]
//!
//! Synchronous evaluator. Concurrent callers on other threads spin-wait for
//! the winner.
//!
//! 同步求值器。其他线程上的并发调用者自旋等待获胜者。
//!
//! ### [`ThunkAsync`]
//!
//! Asynchronous evaluator: the computation and the `*_async` transforms may
//! suspend. If the evaluating future is dropped, a cancellation is memoized.
//!
//! 异步求值器：计算和 `*_async` 变换可以挂起。如果正在求值的 future 被丢弃，
//! 则记忆化一个取消结果。
//!
//! ### [`ThunkAsyncEnv`]
//!
//! Asynchronous evaluator whose computation receives a context implementing
//! [`Cancel`]. The cancellation signal is checked once after the computation
//! completes; if set, the memoized outcome is `Cancelled`.
//!
//! 计算会接收实现 [`Cancel`] 的上下文的异步求值器。计算完成后检查一次取消信号；
//! 如果已设置，记忆化结果为 `Cancelled`。
//!
//! ## Examples / 示例
//!
//! ### Eight racing threads, one evaluation
//!
//! ```
//! use lite_thunk::{Thunk, ThunkResult};
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! let calls = Arc::new(AtomicUsize::new(0));
//! let counter = calls.clone();
//! let thunk = Arc::new(Thunk::lazy(move || {
//!     counter.fetch_add(1, Ordering::SeqCst);
//!     std::thread::sleep(std::time::Duration::from_millis(10));
//!     Ok(42)
//! }));
//!
//! let handles: Vec<_> = (0..8)
//!     .map(|_| {
//!         let thunk = thunk.clone();
//!         std::thread::spawn(move || thunk.value())
//!     })
//!     .collect();
//!
//! for handle in handles {
//!     assert_eq!(handle.join().unwrap(), ThunkResult::success(42));
//! }
//! assert_eq!(calls.load(Ordering::SeqCst), 1);
//! ```
//!
//! ### Known errors survive cloning
//!
//! ```
//! use lite_thunk::{Thunk, ThunkResult};
//!
//! let thunk = Thunk::<i32>::fail("boom");
//! assert_eq!(thunk.value(), ThunkResult::failure("boom"));
//! assert_eq!(thunk.clone().value(), ThunkResult::failure("boom"));
//! ```
//!
//! ### Releasing acquired handles
//!
//! ```
//! use lite_thunk::{Dispose, Error, ThunkAsync, ThunkResult};
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicBool, Ordering};
//!
//! #[derive(Default)]
//! struct Connection {
//!     closed: AtomicBool,
//! }
//!
//! impl Dispose for Connection {
//!     fn dispose(&self) -> Result<(), Error> {
//!         self.closed.store(true, Ordering::SeqCst);
//!         Ok(())
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let thunk = ThunkAsync::lazy_result(|| async {
//!     ThunkResult::acquire(Arc::new(Connection::default()))
//! });
//!
//! let result = thunk.value().await;
//! let conn = result.dispose_acquired().unwrap();
//! assert!(conn.closed.load(Ordering::SeqCst));
//! # });
//! ```
//!
//! ## Safety / 安全性
//!
//! The memoized payload lives in an `UnsafeCell` guarded by an atomic tag.
//! Only the CAS winner writes it, before the Release store that publishes the
//! terminal tag; readers load the tag with Acquire and never see a partial
//! payload. The `loom` feature model-checks this protocol.
//!
//! 记忆化的负载保存在由原子标记保护的 `UnsafeCell` 中。只有 CAS 获胜者会在发布终止标记的
//! Release 存储之前写入它；读取者以 Acquire 加载标记，永远不会看到不完整的负载。
//! `loom` 特性会对该协议进行模型检查。

mod backoff;
mod shim;
mod state;

pub mod cancel;
pub mod dispose;
pub mod error;
pub mod result;
pub mod thunk;
pub mod thunk_async;
pub mod thunk_env;

pub use cancel::{Cancel, CancelToken, NeverCancel};
pub use dispose::{Acquired, Dispose};
pub use error::{CANCELLED_CODE, CANCELLED_MESSAGE, Error};
pub use result::ThunkResult;
pub use state::ThunkState;
pub use thunk::Thunk;
pub use thunk_async::ThunkAsync;
pub use thunk_env::ThunkAsyncEnv;
