//! The profile store: mapping state and the layer stack behind one
//! reentrant lock.
//!
//! The two pieces form a single unit of consistency: dispatch must read a
//! mapping and the active layer together, and a layer push triggered from
//! inside an already-locked dispatch path must re-enter without deadlock.
//! The reentrant mutex hands out shared access to a `RefCell`; borrow
//! scopes are kept short so nested operations can re-borrow.

use std::cell::RefCell;

use config::Profile;
use parking_lot::ReentrantMutex;

use crate::stack::LayerStack;

/// Mapping store plus layer stack, guarded together.
pub struct ProfileState {
    /// The active profile. Swapped whole on import, never patched in place.
    pub profile: Profile,
    /// The active layer stack; top is the effective layer.
    pub stack: LayerStack,
}

/// Reentrant cell around [`ProfileState`].
pub struct ProfileCell {
    inner: ReentrantMutex<RefCell<ProfileState>>,
}

impl ProfileCell {
    /// Wrap a profile; the stack starts at the profile's base layer.
    pub fn new(profile: Profile) -> Self {
        let stack = LayerStack::new(profile.base_layer.clone());
        Self {
            inner: ReentrantMutex::new(RefCell::new(ProfileState { profile, stack })),
        }
    }

    /// Run `f` with shared access to the state.
    pub fn with<R>(&self, f: impl FnOnce(&ProfileState) -> R) -> R {
        let guard = self.inner.lock();
        let state = guard.borrow();
        f(&state)
    }

    /// Hold the reentrant lock across a multi-step operation, making it a
    /// single atomic unit for other threads. `f` may call [`Self::with`]
    /// and [`Self::with_mut`] freely; no borrow is held while it runs.
    pub fn locked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.inner.lock();
        f()
    }

    /// Run `f` with exclusive access to the state.
    ///
    /// The borrow is dropped before `f`'s return value leaves, so `f` must
    /// not call back into the cell; nested calls take their own borrow via
    /// the public engine operations instead.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut ProfileState) -> R) -> R {
        let guard = self.inner.lock();
        let mut state = guard.borrow_mut();
        f(&mut state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_starts_at_base_layer() {
        let cell = ProfileCell::new(Profile::new("P", "Home"));
        cell.with(|st| {
            assert_eq!(st.stack.current(), "Home");
            assert_eq!(st.profile.base_layer, "Home");
        });
    }

    #[test]
    fn lock_is_reentrant() {
        let cell = ProfileCell::new(Profile::default());
        cell.with(|_outer| {
            // A nested acquisition on the same thread must not deadlock.
            cell.with(|inner| assert_eq!(inner.stack.depth(), 1));
        });
    }
}
