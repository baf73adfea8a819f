//! A small string interner used for SSA value names and local-variable
//! scopes carried through to the debug-locals pass.
//!
//! Adapted from the driver-level interner of earlier register allocator
//! prototypes: rather than a thread-local singleton reached via a global
//! `session()`, the allocator's caller owns an `Interner` and hands out
//! `Ident`s through it. This keeps the allocator's public API free of
//! hidden global state, which matters once callers start allocating many
//! methods concurrently (see the crate-level concurrency notes).

use std::borrow::Borrow;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

/// An identifier referring to an interned string (a local-variable name, a
/// method name used in diagnostics, ...).
#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Ident(pub usize);

impl fmt::Debug for Ident {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, PartialEq, Hash, PartialOrd)]
struct InternedString {
    string: Rc<String>,
}

impl InternedString {
    fn new(string: &str) -> InternedString {
        InternedString {
            string: Rc::new(string.to_owned()),
        }
    }
}

impl Eq for InternedString {}

impl Ord for InternedString {
    fn cmp(&self, other: &InternedString) -> Ordering {
        self[..].cmp(&other[..])
    }
}

impl Borrow<str> for InternedString {
    fn borrow(&self) -> &str {
        &self.string[..]
    }
}

impl Deref for InternedString {
    type Target = str;

    fn deref(&self) -> &str {
        &self.string[..]
    }
}

/// A string intern pool. Not global: the embedder owns one (or several, one
/// per compilation unit) and resolves `Ident`s back to text only when
/// producing diagnostics or debug info.
#[derive(Default)]
pub struct Interner {
    map: RefCell<HashMap<InternedString, Ident>>,
    vec: RefCell<Vec<InternedString>>,
}

impl Interner {
    pub fn new() -> Interner {
        Interner {
            map: RefCell::new(HashMap::new()),
            vec: RefCell::new(Vec::new()),
        }
    }

    /// Intern a string (if not already interned) and return its identifier.
    pub fn intern(&self, val: &str) -> Ident {
        let mut map = self.map.borrow_mut();
        let mut vec = self.vec.borrow_mut();

        if let Some(&idx) = map.get(val) {
            return idx;
        }

        let idx = Ident(vec.len());
        let val = InternedString::new(val);
        map.insert(val.clone(), idx);
        vec.push(val);
        idx
    }

    /// Get the string value of an identifier.
    ///
    /// # Panics
    ///
    /// Panics if the `Ident` was not produced by this interner.
    pub fn resolve(&self, ident: Ident) -> String {
        let Ident(idx) = ident;
        self.vec.borrow()[idx].to_string()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn interning_is_stable() {
        let interner = Interner::new();
        let a = interner.intern("x");
        let b = interner.intern("y");
        let a2 = interner.intern("x");
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(interner.resolve(a), "x");
        assert_eq!(interner.resolve(b), "y");
    }
}
