//! Coarse scene lock shared by the event thread and the render thread.

use std::{
    ops::{Deref, DerefMut},
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, TryLockError},
};

use super::state::SceneState;

/// A value that records whether its lock is currently held, so that its
/// methods can check they were called under the lock.
pub trait LockTracked {
    fn set_locked(&mut self, locked: bool);
}

impl LockTracked for SceneState {
    fn set_locked(&mut self, locked: bool) {
        SceneState::set_locked(self, locked);
    }
}

/// Mutex around a scene. The guard marks the scene locked for as long as it lives.
pub struct SceneLock<T: LockTracked> {
    inner: Mutex<T>,
}

impl<T: LockTracked> SceneLock<T> {
    /// Takes ownership of `value` and marks it unlocked.
    pub fn new(mut value: T) -> Self {
        value.set_locked(false);
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Blocks until the lock is acquired. A panic on another thread while
    /// holding the lock does not make the scene unusable.
    pub fn lock(&self) -> SceneGuard<'_, T> {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.set_locked(true);
        SceneGuard { guard }
    }

    /// Acquires the lock only if no other guard holds it.
    pub fn try_lock(&self) -> Option<SceneGuard<'_, T>> {
        let mut guard = match self.inner.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        guard.set_locked(true);
        Some(SceneGuard { guard })
    }
}

pub struct SceneGuard<'a, T: LockTracked> {
    guard: MutexGuard<'a, T>,
}

impl<T: LockTracked> Deref for SceneGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T: LockTracked> DerefMut for SceneGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T: LockTracked> Drop for SceneGuard<'_, T> {
    fn drop(&mut self) {
        self.guard.set_locked(false);
    }
}

/// One-shot handoff of a scene built on another thread.
pub struct SceneSlot<T: LockTracked> {
    value: Mutex<Option<Result<Arc<SceneLock<T>>, String>>>,
    ready: Condvar,
}

impl<T: LockTracked> Default for SceneSlot<T> {
    fn default() -> Self {
        Self {
            value: Mutex::new(None),
            ready: Condvar::new(),
        }
    }
}

impl<T: LockTracked> SceneSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the construction result and wakes every waiter.
    pub fn publish(&self, result: Result<Arc<SceneLock<T>>, String>) {
        let mut value = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        *value = Some(result);
        self.ready.notify_all();
    }

    /// Blocks until a result is published.
    pub fn wait(&self) -> Result<Arc<SceneLock<T>>, String> {
        let mut value = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(result) = value.as_ref() {
                return result.clone();
            }
            value = self.ready.wait(value).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Point3;

    #[test]
    fn test_guard_tracks_lock() {
        let lock = SceneLock::new(SceneState::new());
        {
            let mut state = lock.lock();
            assert!(state.is_locked());
            state.set_camera_position(Point3::new(1.0, 2.0, 3.0));
        }
        let state = lock.lock();
        assert_eq!(state.camera_position(), Point3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_try_lock_fails_while_held() {
        let lock = SceneLock::new(SceneState::new());
        {
            let _guard = lock.lock();
            assert!(lock.try_lock().is_none());
        }
        let guard = lock.try_lock().unwrap();
        assert!(guard.is_locked());
    }

    #[test]
    fn test_new_lock_releases_construction_lock() {
        let state = SceneState::new();
        assert!(state.is_locked());
        let lock = SceneLock::new(state);
        // Peek without the guard
        let inner = lock.inner.lock().unwrap();
        assert!(!inner.is_locked());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "without holding the scene lock")]
    fn test_mutation_without_lock_panics() {
        let lock = SceneLock::new(SceneState::new());
        let mut inner = lock.inner.lock().unwrap();
        inner.stop_painting();
    }

    #[test]
    fn test_slot_hands_over_across_threads() {
        let slot = Arc::new(SceneSlot::<SceneState>::new());
        let producer = {
            let slot = Arc::clone(&slot);
            std::thread::spawn(move || {
                slot.publish(Ok(Arc::new(SceneLock::new(SceneState::new()))));
            })
        };
        let scene = slot.wait().unwrap();
        producer.join().unwrap();
        assert!(scene.lock().should_paint());
    }

    #[test]
    fn test_slot_reports_failure() {
        let slot = SceneSlot::<SceneState>::new();
        slot.publish(Err("no adapter".to_string()));
        assert_eq!(slot.wait().err().as_deref(), Some("no adapter"));
    }
}
