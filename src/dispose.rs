//! Disposable resources and the set of handles acquired by an evaluation.
//!
//! 可释放资源以及求值期间获取的句柄集合。

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::Error;

/// Capability for anything that can be released explicitly
///
/// `dispose` may be called through a shared reference from any thread, so
/// implementors keep their own bookkeeping about whether the release already
/// happened.
///
/// 任何可以被显式释放的资源的能力
pub trait Dispose: Send + Sync {
    /// Release the resource
    ///
    /// 释放资源
    fn dispose(&self) -> Result<(), Error>;
}

impl<T: Dispose + ?Sized> Dispose for Arc<T> {
    #[inline]
    fn dispose(&self) -> Result<(), Error> {
        (**self).dispose()
    }
}

impl<T: Dispose + ?Sized> Dispose for Box<T> {
    #[inline]
    fn dispose(&self) -> Result<(), Error> {
        (**self).dispose()
    }
}

/// Set of handles acquired while producing a successful value
///
/// Identity is by allocation: inserting the same `Arc` twice keeps one entry.
/// Cloning the set shares the handles, it does not duplicate the resources.
///
/// 产生成功值期间获取的句柄集合
///
/// 以分配地址判断同一性：同一个 `Arc` 插入两次只保留一项。
#[derive(Clone, Default)]
pub struct Acquired {
    handles: Vec<Arc<dyn Dispose>>,
}

#[inline]
fn address(handle: &Arc<dyn Dispose>) -> *const () {
    Arc::as_ptr(handle) as *const ()
}

impl Acquired {
    /// Create an empty set
    ///
    /// 创建一个空集合
    #[inline]
    pub const fn new() -> Self {
        Self { handles: Vec::new() }
    }

    /// Track a handle, returning false if it was already tracked
    ///
    /// 跟踪一个句柄，如果已被跟踪则返回 false
    pub fn insert(&mut self, handle: Arc<dyn Dispose>) -> bool {
        let addr = address(&handle);
        if self.handles.iter().any(|h| address(h) == addr) {
            return false;
        }
        self.handles.push(handle);
        true
    }

    /// Union of two sets
    ///
    /// 两个集合的并集
    pub fn union(mut self, other: Acquired) -> Acquired {
        for handle in other.handles {
            self.insert(handle);
        }
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Drain and release every tracked handle
    ///
    /// Every handle is released even if an earlier one fails or panics.
    /// Failures are collected: one failure is returned as-is, several are
    /// returned as [`Error::Many`].
    ///
    /// 取出并释放所有被跟踪的句柄
    ///
    /// 即使前面的句柄释放失败或 panic，也会释放所有句柄。失败会被收集：
    /// 单个失败原样返回，多个失败以 [`Error::Many`] 返回。
    pub fn release(&mut self) -> Result<(), Error> {
        let mut failures = Vec::new();
        for handle in self.handles.drain(..) {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handle.dispose()))
                .unwrap_or_else(|payload| Err(Error::from_panic(payload)));
            if let Err(error) = outcome {
                tracing::warn!(error = %error, "failed to release acquired handle");
                failures.push(error);
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::many(failures))
        }
    }
}

impl fmt::Debug for Acquired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acquired")
            .field("len", &self.handles.len())
            .finish()
    }
}
