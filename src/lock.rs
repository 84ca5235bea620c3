//! Mutex recovery so a panic on one thread does not wedge shared capture buffers.

use std::sync::{Mutex, MutexGuard};

use tracing::debug;

pub(crate) fn lock_or_recover<'a, T>(lock: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            debug!("Mutex poisoned in {context}; recovering");
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::lock_or_recover;
    use std::sync::Mutex;

    #[test]
    fn returns_normal_guard_when_not_poisoned() {
        let lock = Mutex::new(Vec::<u8>::new());
        lock_or_recover(&lock, "capture").extend_from_slice(b"ok");
        assert_eq!(*lock_or_recover(&lock, "capture"), b"ok");
    }

    #[test]
    fn recovers_contents_from_poisoned_mutex() {
        let lock = Mutex::new(vec![1_u8]);
        let _ = std::panic::catch_unwind(|| {
            let _guard = lock_or_recover(&lock, "poison-setup");
            panic!("intentional poisoning");
        });
        assert!(lock.is_poisoned(), "lock should be poisoned by panic");

        lock_or_recover(&lock, "poison-recovery").push(2);
        assert_eq!(*lock_or_recover(&lock, "poison-recovery"), vec![1, 2]);
    }
}
