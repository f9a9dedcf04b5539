//! Identifier interning on top of the index hash table
//!
//! Interned strings are stored once, in a list owned by the interner, and
//! referred to by small copyable symbols. The index hash maps each string to
//! its position in that list, so equal identifiers always resolve to the same
//! symbol and symbol comparison stands in for string comparison.

use super::index_hash::IndexHash;
use std::num::NonZeroU32;

/// An interned string handle (32-bit index).
///
/// Symbols are 4 bytes, cheap to copy, and compare equal exactly when the
/// underlying strings are equal. Use [`Interner::resolve`] to get the string
/// back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol(NonZeroU32);

impl Symbol {
    /// Build a symbol from a list index. Offset by one so the niche stays
    /// available for `Option<Symbol>`.
    #[inline]
    fn from_raw(raw: u32) -> Symbol {
        Symbol(NonZeroU32::new(raw + 1).unwrap())
    }

    /// Index into the interner's string list.
    #[inline]
    fn index(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

/// String interner: deduplicates identifiers into symbols.
pub struct Interner {
    /// String-to-index table; keys are hashed, the strings live in `strings`.
    hash: IndexHash,

    /// The interned strings, indexed by symbol.
    strings: Vec<String>,
}

impl Interner {
    /// Create an empty interner.
    pub fn new() -> Interner {
        Interner::with_capacity(0)
    }

    /// Create an interner sized for `capacity` distinct identifiers.
    pub fn with_capacity(capacity: u32) -> Interner {
        Interner {
            hash: IndexHash::with_expected(capacity),
            strings: Vec::with_capacity(capacity as usize),
        }
    }

    /// Intern a string, returning its symbol.
    ///
    /// Returns the existing symbol when the string was interned before;
    /// otherwise stores the string and assigns the next index.
    pub fn intern(&mut self, name: &str) -> Symbol {
        if let Some(idx) = self.hash.fetch(&self.strings, name) {
            return Symbol::from_raw(idx);
        }

        let idx = self.strings.len() as u32;
        self.strings.push(name.to_string());
        self.hash.insert_nocheck(&self.strings, idx);
        Symbol::from_raw(idx)
    }

    /// Resolve a symbol back to its string.
    ///
    /// # Panics
    ///
    /// Panics if the symbol did not come from this interner.
    #[inline]
    pub fn resolve(&self, sym: Symbol) -> &str {
        &self.strings[sym.index()]
    }

    /// Number of interned strings.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Whether nothing has been interned yet.
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

impl Default for Interner {
    fn default() -> Interner {
        Interner::new()
    }
}
