//! Cooperative cancellation for environment-parameterized evaluators.
//!
//! 环境参数化求值器的协作式取消。
//!
//! Cancellation is polled, never preemptive: an evaluator samples the signal
//! once, right after its inner computation completes.

use std::sync::Arc;

use crate::shim::atomic::{AtomicBool, Ordering};

/// Capability of an execution context to report cancellation
///
/// 执行上下文报告取消状态的能力
pub trait Cancel {
    /// Returns true once cancellation has been requested
    ///
    /// 请求取消后返回 true
    fn is_cancelled(&self) -> bool;
}

impl<T: Cancel + ?Sized> Cancel for &T {
    #[inline]
    fn is_cancelled(&self) -> bool {
        (**self).is_cancelled()
    }
}

impl<T: Cancel + ?Sized> Cancel for Box<T> {
    #[inline]
    fn is_cancelled(&self) -> bool {
        (**self).is_cancelled()
    }
}

impl<T: Cancel + ?Sized> Cancel for Arc<T> {
    #[inline]
    fn is_cancelled(&self) -> bool {
        (**self).is_cancelled()
    }
}

/// Cloneable cancellation flag
///
/// All clones share one flag; cancelling any clone cancels them all. The
/// flag only ever goes from "running" to "cancelled".
///
/// 可克隆的取消标志
///
/// 所有克隆共享同一个标志；取消任意一个克隆即取消全部。
///
/// # Example
///
/// ```
/// use lite_thunk::{Cancel, CancelToken};
///
/// let token = CancelToken::new();
/// let observer = token.clone();
/// assert!(!observer.is_cancelled());
///
/// token.cancel();
/// assert!(observer.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    #[inline]
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation
    ///
    /// 请求取消
    #[inline]
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancel for CancelToken {
    #[inline]
    fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Context that is never cancelled
///
/// 永不取消的上下文
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NeverCancel;

impl Cancel for NeverCancel {
    #[inline]
    fn is_cancelled(&self) -> bool {
        false
    }
}
