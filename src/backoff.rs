//! Spin-then-yield waiting for the losers of an evaluation race.
//!
//! 求值竞争失败者使用的先自旋后让出的等待策略。
//!
//! Contention on an evaluator is expected to be rare and short, so losers
//! spin with exponentially growing bursts first and only then start giving
//! the processor away: to the OS scheduler in blocking code, to the executor
//! in async code. Nothing here allocates.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::shim::{hint, thread};

/// Number of spin bursts before a waiter starts yielding
///
/// Burst `n` spins `2^n` times.
#[cfg(not(feature = "loom"))]
pub(crate) const SPIN_LIMIT: u32 = 6;

#[cfg(feature = "loom")]
pub(crate) const SPIN_LIMIT: u32 = 0;

#[derive(Debug, Default)]
pub(crate) struct Backoff {
    step: u32,
}

impl Backoff {
    #[inline]
    pub(crate) const fn new() -> Self {
        Self { step: 0 }
    }

    /// Spin one burst, returning false once the spin budget is used up
    #[inline]
    fn spin(&mut self) -> bool {
        if self.step > SPIN_LIMIT {
            return false;
        }
        for _ in 0..1u32 << self.step {
            hint::spin_loop();
        }
        self.step += 1;
        true
    }

    /// Wait a little in blocking code
    ///
    /// 在阻塞代码中短暂等待
    #[inline]
    pub(crate) fn snooze(&mut self) {
        if !self.spin() {
            thread::yield_now();
        }
    }

    /// Wait a little in async code
    ///
    /// Spins while the budget lasts, then hands back a future that returns
    /// `Pending` once so the executor can run other tasks, including the one
    /// that is evaluating.
    ///
    /// 在异步代码中短暂等待
    #[inline]
    pub(crate) fn snooze_async(&mut self) -> YieldNow {
        YieldNow {
            yielded: self.spin(),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_yielding(&self) -> bool {
        self.step > SPIN_LIMIT
    }
}

/// Future that is pending exactly once, waking itself before returning
///
/// 只挂起一次的 future，返回前会唤醒自身
#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub(crate) struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        // Let loom schedule the evaluating thread instead of re-polling us
        #[cfg(feature = "loom")]
        thread::yield_now();
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
