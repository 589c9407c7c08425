//! The evaluation state machine shared by every evaluator.
//!
//! 所有求值器共享的求值状态机。
//!
//! A [`Memo`] is an atomic tag guarding a plain payload cell:
//!
//! ```text
//! NotEvaluated --CAS--> Evaluating --publish--> Success | Failed | Cancelled
//! ```
//!
//! Only the thread that wins the CAS writes the payload, and it writes it
//! before the Release store of the terminal tag. Any reader that observes a
//! terminal tag with Acquire therefore sees a fully initialized payload, and
//! the payload is never written again.

use std::fmt;

use crate::backoff::Backoff;
use crate::result::ThunkResult;
use crate::shim::atomic::{AtomicU8, Ordering};
use crate::shim::cell::UnsafeCell;

const NOT_EVALUATED: u8 = 0;
const EVALUATING: u8 = 1;
const SUCCESS: u8 = 2;
const FAILED: u8 = 3;
const CANCELLED: u8 = 4;

/// Evaluation state of an evaluator
///
/// 求值器的求值状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThunkState {
    /// Deferred computation not started yet
    ///
    /// 延迟计算尚未开始
    NotEvaluated,
    /// A caller is running the deferred computation
    ///
    /// 某个调用者正在运行延迟计算
    Evaluating,
    /// Memoized a value
    ///
    /// 已记忆化一个值
    Success,
    /// Memoized an error other than the cancellation sentinel
    ///
    /// 已记忆化一个非取消哨兵的错误
    Failed,
    /// Memoized the cancellation sentinel
    ///
    /// 已记忆化取消哨兵
    Cancelled,
}

impl ThunkState {
    /// Encode as the atomic tag value
    ///
    /// 编码为原子标记值
    #[inline]
    pub const fn to_u8(self) -> u8 {
        match self {
            ThunkState::NotEvaluated => NOT_EVALUATED,
            ThunkState::Evaluating => EVALUATING,
            ThunkState::Success => SUCCESS,
            ThunkState::Failed => FAILED,
            ThunkState::Cancelled => CANCELLED,
        }
    }

    /// Decode an atomic tag value; `None` for unknown values
    ///
    /// 解码原子标记值；未知值返回 `None`
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            NOT_EVALUATED => Some(ThunkState::NotEvaluated),
            EVALUATING => Some(ThunkState::Evaluating),
            SUCCESS => Some(ThunkState::Success),
            FAILED => Some(ThunkState::Failed),
            CANCELLED => Some(ThunkState::Cancelled),
            _ => None,
        }
    }

    /// Terminal states never change again
    ///
    /// 终止状态不会再改变
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            ThunkState::Success | ThunkState::Failed | ThunkState::Cancelled
        )
    }
}

impl fmt::Display for ThunkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ThunkState::NotEvaluated => "not evaluated",
            ThunkState::Evaluating => "evaluating",
            ThunkState::Success => "success",
            ThunkState::Failed => "failed",
            ThunkState::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

/// Atomic state tag plus the memoized outcome
///
/// 原子状态标记加上记忆化的结果
pub(crate) struct Memo<A> {
    state: AtomicU8,
    result: UnsafeCell<Option<ThunkResult<A>>>,
}

// SAFETY: the payload is written once, by the CAS winner, before the Release
// store of a terminal tag; afterwards it is only read through shared
// references, so sharing needs `A: Sync` and moving needs `A: Send`.
unsafe impl<A: Send> Send for Memo<A> {}
unsafe impl<A: Send + Sync> Sync for Memo<A> {}

impl<A> Memo<A> {
    /// Create a memo waiting for its first evaluation
    #[inline]
    pub(crate) fn pending() -> Self {
        Self {
            state: AtomicU8::new(NOT_EVALUATED),
            result: UnsafeCell::new(None),
        }
    }

    /// Create a memo that is already terminal
    #[inline]
    pub(crate) fn ready(result: ThunkResult<A>) -> Self {
        Self {
            state: AtomicU8::new(result.state().to_u8()),
            result: UnsafeCell::new(Some(result)),
        }
    }

    #[inline]
    pub(crate) fn state(&self) -> ThunkState {
        // Only values produced by `ThunkState::to_u8` are ever stored
        ThunkState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(ThunkState::Evaluating)
    }

    /// Claim the right to evaluate
    ///
    /// Returns a guard for exactly one caller; everybody else gets `None` and
    /// should wait for the terminal state.
    ///
    /// 获取求值权
    ///
    /// 只有一个调用者会得到 guard；其他调用者得到 `None`，应等待终止状态。
    #[inline]
    pub(crate) fn try_begin(&self) -> Option<EvalGuard<'_, A>> {
        self.state
            .compare_exchange(
                NOT_EVALUATED,
                EVALUATING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()
            .map(|_| {
                tracing::trace!("thunk evaluation started");
                EvalGuard {
                    memo: self,
                    published: false,
                }
            })
    }

    /// Install the outcome; the tag store comes last
    fn publish(&self, result: ThunkResult<A>) {
        let state = result.state();
        // SAFETY: only the holder of the single `EvalGuard` gets here, while
        // the tag is EVALUATING, so nobody else reads or writes the slot.
        self.result.with_mut(|slot| unsafe { *slot = Some(result) });
        self.state.store(state.to_u8(), Ordering::Release);
        tracing::trace!(%state, "thunk evaluated");
    }
}

impl<A: Clone> Memo<A> {
    /// Memoized outcome, if the tag is terminal
    ///
    /// 如果状态已终止，返回记忆化的结果
    #[inline]
    pub(crate) fn get(&self) -> Option<ThunkResult<A>> {
        if !self.state().is_terminal() {
            return None;
        }
        // SAFETY: the Acquire load above saw a terminal tag, so the slot was
        // written before it and is never written again.
        self.result.with(|slot| unsafe { (*slot).clone() })
    }

    /// Spin until another caller publishes the outcome
    ///
    /// Must not be called by the evaluating caller itself: a reentrant force
    /// never returns.
    ///
    /// 自旋等待其他调用者发布结果
    pub(crate) fn wait(&self) -> ThunkResult<A> {
        let mut backoff = Backoff::new();
        loop {
            if let Some(result) = self.get() {
                return result;
            }
            backoff.snooze();
        }
    }

    /// Async flavour of [`Memo::wait`]
    ///
    /// [`Memo::wait`] 的异步版本
    pub(crate) async fn wait_async(&self) -> ThunkResult<A> {
        let mut backoff = Backoff::new();
        loop {
            if let Some(result) = self.get() {
                return result;
            }
            backoff.snooze_async().await;
        }
    }
}

impl<A> fmt::Debug for Memo<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Exclusive right to evaluate a [`Memo`]
///
/// Dropping the guard without completing it, for example because the future
/// holding it was dropped mid-evaluation, memoizes a cancellation so waiters
/// are released.
///
/// 对 [`Memo`] 求值的独占权
///
/// 如果 guard 未完成就被丢弃（例如持有它的 future 在求值中途被丢弃），
/// 会记忆化一个取消结果，以释放等待者。
pub(crate) struct EvalGuard<'a, A> {
    memo: &'a Memo<A>,
    published: bool,
}

impl<A: Clone> EvalGuard<'_, A> {
    /// Publish the outcome and hand a copy back to the evaluating caller
    ///
    /// 发布结果并将其副本交回正在求值的调用者
    #[inline]
    pub(crate) fn complete(mut self, result: ThunkResult<A>) -> ThunkResult<A> {
        let out = result.clone();
        self.memo.publish(result);
        self.published = true;
        out
    }
}

impl<A> Drop for EvalGuard<'_, A> {
    fn drop(&mut self) {
        if !self.published {
            tracing::debug!("thunk evaluation abandoned before completion");
            self.memo.publish(ThunkResult::cancelled());
        }
    }
}
