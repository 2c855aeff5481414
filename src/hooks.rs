//! Completion hooks (`spec.md` §4.7).
//!
//! Hooks are plain `FnMut(&JobHandle)` closures fired synchronously, in
//! registration order, exactly once, the first time an observation call
//! (`alive`, `wait`, or any status-reading operation) sees the job has
//! reached a terminal state — unless a die-file was observed first or the
//! job was cancelled, in which case hooks never fire (`spec.md` §4.8).

use crate::handle::JobHandle;

pub type Hook = Box<dyn FnMut(&JobHandle) + Send>;

/// An ordered list of not-yet-fired completion hooks.
#[derive(Default)]
pub struct HookList(Vec<Hook>);

impl HookList {
    pub fn new() -> Self {
        HookList(Vec::new())
    }

    pub fn push(&mut self, hook: impl FnMut(&JobHandle) + Send + 'static) {
        self.0.push(Box::new(hook));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Remove and return all hooks, leaving this list empty. The handle
    /// calls this immediately before firing so that the hooks can be
    /// invoked with an (immutable) reference to the handle that still owns
    /// this `HookList`, without a self-referential mutable borrow.
    pub fn take(&mut self) -> Vec<Hook> {
        std::mem::take(&mut self.0)
    }
}

impl std::fmt::Debug for HookList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HookList({} pending)", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn take_empties_the_list_and_preserves_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut hooks = HookList::new();
        for i in 0..3 {
            let order = Arc::clone(&order);
            hooks.push(move |_h| order.lock().expect("lock").push(i));
        }
        assert_eq!(hooks.len(), 3);
        let fns = hooks.take();
        assert!(hooks.is_empty());
        assert_eq!(fns.len(), 3);
    }

    #[test]
    fn counts_invocations() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut hooks = HookList::new();
        let c = Arc::clone(&count);
        hooks.push(move |_h| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let taken = hooks.take();
        assert_eq!(taken.len(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
