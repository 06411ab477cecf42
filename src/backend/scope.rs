use std::cell::RefCell;
use std::collections::HashMap;

/// Per-function variable environment, mapping names to whatever handle the
/// backend uses for a stack slot. Interior mutability lets expression
/// lowering bind and look up names through a shared reference.
#[derive(Debug, Default)]
pub struct Scope<V: Copy> {
    slots: RefCell<HashMap<String, V>>,
}

impl<V: Copy> Scope<V> {
    pub fn new() -> Self {
        Self {
            slots: RefCell::new(HashMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Option<V> {
        self.slots.borrow().get(name).copied()
    }

    /// Bind with no restoration bookkeeping. Used for function parameters,
    /// which live until the next `clear`.
    pub fn insert(&self, name: &str, slot: V) {
        self.slots.borrow_mut().insert(name.to_owned(), slot);
    }

    /// Drop every binding; called when lowering enters a new function body.
    pub fn clear(&self) {
        self.slots.borrow_mut().clear();
    }

    /// Open a frame for bindings that must not outlive a region of code,
    /// like loop induction variables and `let` names.
    pub fn frame(&self) -> ScopeFrame<'_, V> {
        ScopeFrame {
            scope: self,
            saved: Vec::new(),
        }
    }

    fn replace(&self, name: &str, slot: V) -> Option<V> {
        self.slots.borrow_mut().insert(name.to_owned(), slot)
    }

    fn restore(&self, name: &str, prior: Option<V>) {
        let mut slots = self.slots.borrow_mut();
        match prior {
            Some(slot) => {
                slots.insert(name.to_owned(), slot);
            }
            None => {
                slots.remove(name);
            }
        }
    }
}

/// Records what each `bind` shadowed and puts it back when dropped, so the
/// scope ends up exactly as it was whether the lowering that owns the frame
/// succeeds or bails out with an error.
pub struct ScopeFrame<'scope, V: Copy> {
    scope: &'scope Scope<V>,
    saved: Vec<(String, Option<V>)>,
}

impl<V: Copy> ScopeFrame<'_, V> {
    pub fn bind(&mut self, name: &str, slot: V) {
        let prior = self.scope.replace(name, slot);
        self.saved.push((name.to_owned(), prior));
    }
}

impl<V: Copy> Drop for ScopeFrame<'_, V> {
    fn drop(&mut self) {
        // newest first, so rebinding one name twice in a frame unwinds to
        // the binding that preceded the frame
        for (name, prior) in self.saved.drain(..).rev() {
            self.scope.restore(&name, prior);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadowed_bindings_are_restored() {
        let scope: Scope<u32> = Scope::new();
        scope.insert("a", 1);

        {
            let mut frame = scope.frame();
            frame.bind("a", 2);
            assert_eq!(scope.get("a"), Some(2));
        }

        assert_eq!(scope.get("a"), Some(1));
    }

    #[test]
    fn fresh_bindings_are_removed() {
        let scope: Scope<u32> = Scope::new();

        {
            let mut frame = scope.frame();
            frame.bind("b", 7);
            assert_eq!(scope.get("b"), Some(7));
        }

        assert_eq!(scope.get("b"), None);
    }

    #[test]
    fn nested_frames_unwind_in_order() {
        let scope: Scope<u32> = Scope::new();
        scope.insert("x", 1);

        let mut outer = scope.frame();
        outer.bind("x", 2);
        {
            let mut inner = scope.frame();
            inner.bind("x", 3);
            assert_eq!(scope.get("x"), Some(3));
        }
        assert_eq!(scope.get("x"), Some(2));

        drop(outer);
        assert_eq!(scope.get("x"), Some(1));
    }

    #[test]
    fn rebinding_within_one_frame_unwinds_past_both() {
        let scope: Scope<u32> = Scope::new();
        scope.insert("n", 1);

        {
            let mut frame = scope.frame();
            frame.bind("n", 2);
            frame.bind("n", 3);
            assert_eq!(scope.get("n"), Some(3));
        }

        assert_eq!(scope.get("n"), Some(1));
    }

    #[test]
    fn clear_empties_everything() {
        let scope: Scope<u32> = Scope::new();
        scope.insert("p", 1);
        scope.insert("q", 2);
        scope.clear();
        assert_eq!(scope.get("p"), None);
        assert_eq!(scope.get("q"), None);
    }
}
