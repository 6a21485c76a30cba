//! Defines a global symbol type and its associated interning pool
use std::sync::{Mutex, OnceLock, PoisonError};
use string_interner::{
    backend::BucketBackend, symbol::SymbolU32, StringInterner,
};

/// A Globally interned symbol.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct GSym(SymbolU32);

type Pool = StringInterner<BucketBackend>;

fn with_pool<R>(f: impl FnOnce(&mut Pool) -> R) -> R {
    static POOL: OnceLock<Mutex<Pool>> = OnceLock::new();
    let mut pool = POOL
        .get_or_init(|| Mutex::new(Pool::new()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    f(&mut pool)
}

impl GSym {
    /// Intern a string into the global symbol table.
    pub fn new(s: impl AsRef<str>) -> Self {
        GSym(with_pool(|pool| pool.get_or_intern(s.as_ref())))
    }

    /// Convert this symbol into the string in the static, global symbol table.
    pub fn as_str(&self) -> &'static str {
        with_pool(|pool| {
            let s: *const str = pool
                .resolve(self.0)
                .expect("symbols are only created by the global pool");
            // SAFETY:
            // - the bucket backend never moves an interned string once it has
            //   been written into a bucket
            // - the pool lives in a static and strings are never removed
            unsafe { &*s }
        })
    }
}

impl From<&str> for GSym {
    fn from(s: &str) -> Self {
        GSym::new(s)
    }
}

impl From<String> for GSym {
    fn from(s: String) -> Self {
        GSym::new(s)
    }
}

impl From<&String> for GSym {
    fn from(s: &String) -> Self {
        GSym::new(s)
    }
}

impl From<GSym> for &'static str {
    fn from(sym: GSym) -> Self {
        sym.as_str()
    }
}

impl std::fmt::Debug for GSym {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self.as_str(), f)
    }
}

impl std::fmt::Display for GSym {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self.as_str(), f)
    }
}
