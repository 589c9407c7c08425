//! Shim module to abstract over core and loom primitives.
//!
//! Everything the evaluators touch concurrently goes through here, so the
//! `loom` feature can swap in model-checked atomics, cells, spin hints and
//! yields without touching the state machine.

#[cfg(not(feature = "loom"))]
pub(crate) mod atomic {
    pub use core::sync::atomic::*;
}

#[cfg(feature = "loom")]
pub(crate) mod atomic {
    pub use loom::sync::atomic::*;
}

#[cfg(not(feature = "loom"))]
pub(crate) mod cell {
    #[derive(Debug)]
    #[repr(transparent)]
    pub struct UnsafeCell<T: ?Sized>(core::cell::UnsafeCell<T>);

    impl<T> UnsafeCell<T> {
        #[inline]
        pub const fn new(data: T) -> UnsafeCell<T> {
            UnsafeCell(core::cell::UnsafeCell::new(data))
        }
    }

    impl<T: ?Sized> UnsafeCell<T> {
        #[inline]
        pub fn with<F, R>(&self, f: F) -> R
        where
            F: FnOnce(*const T) -> R,
        {
            f(self.0.get())
        }

        #[inline]
        pub fn with_mut<F, R>(&self, f: F) -> R
        where
            F: FnOnce(*mut T) -> R,
        {
            f(self.0.get())
        }
    }
}

#[cfg(feature = "loom")]
pub(crate) mod cell {
    pub use loom::cell::UnsafeCell;
}

#[cfg(not(feature = "loom"))]
pub(crate) mod hint {
    pub use core::hint::spin_loop;
}

#[cfg(feature = "loom")]
pub(crate) mod hint {
    pub use loom::hint::spin_loop;
}

#[cfg(not(feature = "loom"))]
pub(crate) mod thread {
    pub use std::thread::yield_now;
}

#[cfg(feature = "loom")]
pub(crate) mod thread {
    pub use loom::thread::yield_now;
}
