use core::cell::UnsafeCell;
use core::hint;
use core::ops::{Deref, DerefMut};
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::proc::Cpu;
use crate::proc::{Cpus, InterruptLock};

/// A mutual-exclusion lock that spins with interrupts disabled on the owning
/// hart. Locked when `cpu` is non-null; the pointer also identifies the
/// holder for the `holding()` self-deadlock check.
// Safety: UnsafeCell is not Sync but it can only be consumed through a guard
// or an exclusive reference, so SpinLock is safe to share across harts as
// long as the inner type is.
#[derive(Debug)]
pub struct SpinLock<T> {
    name: &'static str,
    cpu: AtomicPtr<Cpu>,
    data: UnsafeCell<T>,
}

unsafe impl<T> Sync for SpinLock<T> where T: Send {}

pub struct SpinLockGuard<'a, T: 'a> {
    lock: &'a SpinLock<T>,
    _intr_lock: InterruptLock,
}

// Safety: the UnsafeCell inside SpinLock is not Sync, but only one hart can
// hold this guard at a time.
unsafe impl<T> Sync for SpinLockGuard<'_, T> where T: Sync {}

impl<T> SpinLock<T> {
    pub const fn new(value: T, name: &'static str) -> Self {
        SpinLock {
            name,
            cpu: AtomicPtr::new(ptr::null_mut()),
            data: UnsafeCell::new(value),
        }
    }

    // Safety: must be called with interrupts disabled.
    unsafe fn holding(&self) -> bool {
        self.cpu.load(Ordering::Relaxed) == unsafe { Cpus::mycpu() }
    }

    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let _intr_lock = Cpus::lock_mycpu();

        unsafe {
            assert!(!self.holding(), "acquire lock {}", self.name);

            loop {
                if self
                    .cpu
                    .compare_exchange(
                        ptr::null_mut(),
                        Cpus::mycpu(),
                        Ordering::Acquire,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    break SpinLockGuard {
                        lock: self,
                        _intr_lock,
                    };
                }

                hint::spin_loop()
            }
        }
    }

    /// Drops `guard`'s lock-holding without dropping its interrupt lock, and
    /// hands the underlying `SpinLock` back so the caller can re-lock it
    /// later (used by `proc::sleep`, which must release the condition lock
    /// and the process table lock in a specific order around the context
    /// switch).
    pub fn unlock(guard: SpinLockGuard<'_, T>) -> &'_ SpinLock<T> {
        let lock = guard.lock;
        // Safety: releasing the lock state directly; the `InterruptLock`
        // embedded in `guard` is forgotten, not dropped, so interrupts stay
        // exactly as disabled as they were before this call. The caller is
        // responsible for eventually re-enabling them (by dropping an
        // `InterruptLock` of their own, or relocking and unlocking again).
        assert!(unsafe { lock.holding() }, "unlock {}", lock.name);
        lock.cpu.store(ptr::null_mut(), Ordering::Release);
        core::mem::forget(guard);
        lock
    }

    /// Releases the lock without a guard to consume. Used only by
    /// `proc::fork_ret`, whose stack never had a Rust guard value for the
    /// table lock the scheduler took on its behalf -- `swtch` jumped
    /// straight here instead of returning into `scheduler()`'s frame.
    ///
    /// # Safety
    /// The caller must actually be the current holder of this lock, and
    /// must be prepared to have left interrupts however they were before
    /// the matching `lock()` call (this does not touch the interrupt
    /// nesting count).
    pub unsafe fn force_unlock(&self) {
        assert!(unsafe { self.holding() }, "force_unlock {}", self.name);
        self.cpu.store(ptr::null_mut(), Ordering::Release);
    }

    // Since this call consumes self, we can guarantee no one else is holding a reference.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    // Since this call mutably borrows self, we can guarantee no one else is holding a reference.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    // Use this over `get_mut` when you need unsafe mutable access.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut_unchecked(&self) -> &mut T {
        unsafe { &mut *self.data.get() }
    }
}

// Dropping the guard releases the lock on the spinlock and the interrupt lock.
impl<'a, T: 'a> Drop for SpinLockGuard<'a, T> {
    fn drop(&mut self) {
        // Safety: this guard holds an interrupt lock, so calling holding is safe.
        unsafe {
            assert!(self.lock.holding(), "release lock {}", self.lock.name);
        }

        self.lock.cpu.store(ptr::null_mut(), Ordering::Release);
    }
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.data.get() }
    }
}
