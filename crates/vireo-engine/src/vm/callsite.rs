//! Callsite descriptors and the process-wide interning store
//!
//! A callsite describes the shape of one call: the kind of each argument,
//! how many are positional, and the names of the named ones. Shapes repeat
//! heavily across a program, so the VM interns them: equal descriptors share
//! one `Arc`, and shape checks become pointer comparisons.
//!
//! Nine shapes are so common they are built once at process start and
//! installed into every store at VM startup; after that they are
//! indistinguishable from dynamically interned shapes.

use super::interner::Symbol;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::ops::BitOr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Maximum arity the store interns; also the bucket count.
///
/// Shapes at or above this arity are rare enough that sharing them buys
/// nothing, so they stay owned by their creator.
pub const ARITY_LIMIT: usize = 8;

/// Per-argument tag: a kind in the low bits plus modifier bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ArgFlag(u8);

impl ArgFlag {
    /// Object argument.
    pub const OBJ: ArgFlag = ArgFlag(1);
    /// Native integer argument.
    pub const INT: ArgFlag = ArgFlag(2);
    /// Native floating point argument.
    pub const NUM: ArgFlag = ArgFlag(4);
    /// String argument.
    pub const STR: ArgFlag = ArgFlag(8);
    /// The argument is a literal.
    pub const LITERAL: ArgFlag = ArgFlag(16);
    /// The argument is named; its name travels with the value.
    pub const NAMED: ArgFlag = ArgFlag(32);
    /// The argument is a flattened collection of positionals.
    pub const FLAT: ArgFlag = ArgFlag(64);
    /// The argument is a flattened collection of named arguments.
    pub const FLAT_NAMED: ArgFlag = ArgFlag(128);

    const KIND_MASK: u8 = 0x0f;

    /// Raw bit pattern.
    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// The kind bits alone, with modifiers stripped.
    #[inline]
    pub fn kind(self) -> ArgFlag {
        ArgFlag(self.0 & Self::KIND_MASK)
    }

    /// True when the flag carries no named or flattening modifier, so it can
    /// fill a positional slot.
    #[inline]
    pub fn is_positional_kind(self) -> bool {
        self.0 & (Self::NAMED.0 | Self::FLAT.0 | Self::FLAT_NAMED.0) == 0
    }

    /// True when the argument is named.
    #[inline]
    pub fn is_named(self) -> bool {
        self.0 & Self::NAMED.0 != 0
    }

    /// True when the argument flattens a collection into the call.
    #[inline]
    pub fn is_flattening(self) -> bool {
        self.0 & (Self::FLAT.0 | Self::FLAT_NAMED.0) != 0
    }
}

impl BitOr for ArgFlag {
    type Output = ArgFlag;

    fn bitor(self, rhs: ArgFlag) -> ArgFlag {
        ArgFlag(self.0 | rhs.0)
    }
}

/// Immutable descriptor of one call shape.
///
/// Interned callsites are shared as `Arc<Callsite>` and live until VM
/// teardown; pointer identity (`Arc::ptr_eq`) then coincides with structural
/// equality.
#[derive(Debug)]
pub struct Callsite {
    /// One tag per argument.
    arg_flags: Box<[ArgFlag]>,

    /// Number of argument slots when the call is made: positionals take one
    /// slot, named arguments two (name plus value).
    arg_count: u16,

    /// Number of leading positional arguments.
    num_pos: u16,

    /// Names of the named arguments, in flag order, when statically known.
    arg_names: Option<Box<[Symbol]>>,

    /// Whether any argument is a flattening one. Flattening shapes are never
    /// interned; their true shape only exists at call time.
    has_flattening: bool,

    /// Set once when the descriptor is installed in an interning store.
    interned: AtomicBool,

    /// Companion shape with a prepended invocant slot, when one has been
    /// derived. The chain is finite and acyclic.
    with_invocant: Option<Box<Callsite>>,
}

impl Callsite {
    /// Build a callsite from per-argument flags.
    ///
    /// `names`, when present, must hold one symbol per named argument
    /// (`flags.len() - num_pos`).
    pub fn new(flags: Vec<ArgFlag>, num_pos: u16, names: Option<Vec<Symbol>>) -> Callsite {
        let flag_count = flags.len() as u16;
        debug_assert!(num_pos <= flag_count);
        if let Some(names) = &names {
            debug_assert_eq!(names.len() as u16, flag_count - num_pos);
        }

        let has_flattening = flags.iter().any(|flag| flag.is_flattening());
        let num_nameds = flag_count - num_pos;
        Callsite {
            arg_flags: flags.into_boxed_slice(),
            arg_count: num_pos + 2 * num_nameds,
            num_pos,
            arg_names: names.map(Vec::into_boxed_slice),
            has_flattening,
            interned: AtomicBool::new(false),
            with_invocant: None,
        }
    }

    /// Build an all-positional callsite.
    pub fn positional(flags: &[ArgFlag]) -> Callsite {
        Callsite::new(flags.to_vec(), flags.len() as u16, None)
    }

    /// Attach a companion shape carrying a prepended invocant slot.
    pub fn with_invocant_variant(mut self, companion: Callsite) -> Callsite {
        self.with_invocant = Some(Box::new(companion));
        self
    }

    /// Number of argument flags.
    #[inline]
    pub fn flag_count(&self) -> u16 {
        self.arg_flags.len() as u16
    }

    /// Number of argument slots at call time.
    #[inline]
    pub fn arg_count(&self) -> u16 {
        self.arg_count
    }

    /// Number of leading positional arguments.
    #[inline]
    pub fn num_pos(&self) -> u16 {
        self.num_pos
    }

    /// Number of named arguments.
    #[inline]
    pub fn num_nameds(&self) -> u16 {
        self.flag_count() - self.num_pos
    }

    /// The per-argument tags.
    #[inline]
    pub fn arg_flags(&self) -> &[ArgFlag] {
        &self.arg_flags
    }

    /// Names of the named arguments, when statically known.
    #[inline]
    pub fn arg_names(&self) -> Option<&[Symbol]> {
        self.arg_names.as_deref()
    }

    /// Whether any argument flattens a collection into the call.
    #[inline]
    pub fn has_flattening(&self) -> bool {
        self.has_flattening
    }

    /// Whether this descriptor resides in an interning store.
    #[inline]
    pub fn is_interned(&self) -> bool {
        self.interned.load(Ordering::Acquire)
    }

    /// Companion shape with a prepended invocant slot, if derived.
    #[inline]
    pub fn with_invocant(&self) -> Option<&Callsite> {
        self.with_invocant.as_deref()
    }

    /// Deep-clone this callsite, including the with-invocant companion.
    /// The clone is not interned.
    pub fn copy(&self) -> Callsite {
        Callsite {
            arg_flags: self.arg_flags.clone(),
            arg_count: self.arg_count,
            num_pos: self.num_pos,
            arg_names: self.arg_names.clone(),
            has_flattening: self.has_flattening,
            interned: AtomicBool::new(false),
            with_invocant: self
                .with_invocant
                .as_ref()
                .map(|companion| Box::new(companion.copy())),
        }
    }
}

/// Structural shape equality: identical flag sequences and pairwise equal
/// argument names. Names are interned symbols, so symbol equality is string
/// equality. Interning state and invocant companions do not participate.
impl PartialEq for Callsite {
    fn eq(&self, other: &Callsite) -> bool {
        self.num_pos == other.num_pos
            && self.arg_flags == other.arg_flags
            && self.arg_names == other.arg_names
    }
}

impl Eq for Callsite {}

/// Identifiers of the nine statically known call shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CommonCallsite {
    /// No arguments.
    ZeroArity = 0,
    /// One object.
    Obj = 1,
    /// Two objects.
    ObjObj = 2,
    /// Object and integer.
    ObjInt = 3,
    /// Object and float.
    ObjNum = 4,
    /// Object and string.
    ObjStr = 5,
    /// Two integers.
    IntInt = 6,
    /// Two objects and a string.
    ObjObjStr = 7,
    /// Three objects.
    ObjObjObj = 8,
}

/// Number of statically known call shapes.
pub const NUM_COMMON_CALLSITES: usize = 9;

static COMMON_CALLSITES: Lazy<[Arc<Callsite>; NUM_COMMON_CALLSITES]> = Lazy::new(|| {
    [
        Arc::new(Callsite::positional(&[])),
        Arc::new(Callsite::positional(&[ArgFlag::OBJ])),
        Arc::new(Callsite::positional(&[ArgFlag::OBJ, ArgFlag::OBJ])),
        Arc::new(Callsite::positional(&[ArgFlag::OBJ, ArgFlag::INT])),
        Arc::new(Callsite::positional(&[ArgFlag::OBJ, ArgFlag::NUM])),
        Arc::new(Callsite::positional(&[ArgFlag::OBJ, ArgFlag::STR])),
        Arc::new(Callsite::positional(&[ArgFlag::INT, ArgFlag::INT])),
        Arc::new(Callsite::positional(&[
            ArgFlag::OBJ,
            ArgFlag::OBJ,
            ArgFlag::STR,
        ])),
        Arc::new(Callsite::positional(&[
            ArgFlag::OBJ,
            ArgFlag::OBJ,
            ArgFlag::OBJ,
        ])),
    ]
});

/// Look up one of the nine statically known shapes by id.
pub fn get_common(id: u32) -> Result<Arc<Callsite>, CallsiteError> {
    COMMON_CALLSITES
        .get(id as usize)
        .cloned()
        .ok_or(CallsiteError::UnknownCommon(id))
}

/// Identity test against the nine statically known shapes.
pub fn is_common(cs: &Arc<Callsite>) -> bool {
    COMMON_CALLSITES
        .iter()
        .any(|common| Arc::ptr_eq(common, cs))
}

/// Errors from callsite lookup and derivation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallsiteError {
    /// Unrecognized common callsite id.
    #[error("Unknown common callsite id: {0}")]
    UnknownCommon(u32),

    /// Positional index outside the valid range for a derivation.
    #[error("Positional index {index} out of range ({num_pos} positionals)")]
    OutOfRange {
        /// The index the caller passed.
        index: u16,
        /// The callsite's positional count.
        num_pos: u16,
    },

    /// Derivation attempted on a callsite with flattening arguments.
    #[error("Cannot derive a new callsite from one with flattening args")]
    HasFlattening,
}

/// Process-wide deduplication store for callsite descriptors.
///
/// Shapes are partitioned by arity: most calls have few arguments, so each
/// bucket stays small and a linear scan over it is cache-resident.
pub struct CallsiteStore {
    /// Interned shapes, bucketed by `flag_count`.
    interns: Mutex<Vec<Vec<Arc<Callsite>>>>,
}

impl CallsiteStore {
    /// Create an empty store. Call [`CallsiteStore::initialize_common`] at VM
    /// startup to install the nine static shapes.
    pub fn new() -> CallsiteStore {
        CallsiteStore {
            interns: Mutex::new((0..ARITY_LIMIT).map(|_| Vec::new()).collect()),
        }
    }

    /// Install the nine statically known shapes, marking them interned.
    pub fn initialize_common(&self) {
        let mut interns = self.interns.lock();
        for common in COMMON_CALLSITES.iter() {
            let bucket = &mut interns[common.flag_count() as usize];
            if !bucket.iter().any(|existing| Arc::ptr_eq(existing, common)) {
                common.interned.store(true, Ordering::Release);
                bucket.push(Arc::clone(common));
            }
        }
    }

    /// Intern `cs`, either replacing it with an existing structurally equal
    /// descriptor (the original drops) or installing it into the store.
    ///
    /// Shapes that cannot be interned are left untouched and the caller keeps
    /// its own copy: flattening shapes, shapes at or above [`ARITY_LIMIT`],
    /// and shapes with named arguments but no name list.
    pub fn try_intern(&self, cs: &mut Arc<Callsite>) {
        if cs.has_flattening {
            return;
        }
        let flag_count = cs.flag_count() as usize;
        if flag_count >= ARITY_LIMIT {
            return;
        }
        if cs.num_nameds() > 0 && cs.arg_names.is_none() {
            return;
        }

        let mut interns = self.interns.lock();
        let bucket = &mut interns[flag_count];
        for existing in bucket.iter() {
            if **existing == **cs {
                *cs = Arc::clone(existing);
                return;
            }
        }
        cs.interned.store(true, Ordering::Release);
        bucket.push(Arc::clone(cs));
    }

    /// Derive a shape with the positional at `idx` removed, and intern it.
    /// Named arguments are carried over verbatim.
    pub fn drop_positional(
        &self,
        cs: &Arc<Callsite>,
        idx: u16,
    ) -> Result<Arc<Callsite>, CallsiteError> {
        if cs.has_flattening {
            return Err(CallsiteError::HasFlattening);
        }
        if idx >= cs.num_pos {
            return Err(CallsiteError::OutOfRange {
                index: idx,
                num_pos: cs.num_pos,
            });
        }

        let mut flags = cs.arg_flags.to_vec();
        flags.remove(idx as usize);
        let names = cs.arg_names.as_ref().map(|names| names.to_vec());
        let mut derived = Arc::new(Callsite::new(flags, cs.num_pos - 1, names));
        self.try_intern(&mut derived);
        Ok(derived)
    }

    /// Derive a shape with `flag` inserted as a new positional at `idx`
    /// (`idx` may equal `num_pos` to append), and intern it.
    pub fn insert_positional(
        &self,
        cs: &Arc<Callsite>,
        idx: u16,
        flag: ArgFlag,
    ) -> Result<Arc<Callsite>, CallsiteError> {
        if cs.has_flattening {
            return Err(CallsiteError::HasFlattening);
        }
        if idx > cs.num_pos {
            return Err(CallsiteError::OutOfRange {
                index: idx,
                num_pos: cs.num_pos,
            });
        }
        assert!(
            flag.is_positional_kind(),
            "inserted flag must be a positional kind"
        );

        let mut flags = cs.arg_flags.to_vec();
        flags.insert(idx as usize, flag);
        let names = cs.arg_names.as_ref().map(|names| names.to_vec());
        let mut derived = Arc::new(Callsite::new(flags, cs.num_pos + 1, names));
        self.try_intern(&mut derived);
        Ok(derived)
    }

    /// Total number of interned descriptors across all arity buckets.
    pub fn interned_count(&self) -> usize {
        self.interns.lock().iter().map(Vec::len).sum()
    }
}

impl Default for CallsiteStore {
    fn default() -> CallsiteStore {
        CallsiteStore::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::interner::Interner;

    fn interned_store() -> CallsiteStore {
        let store = CallsiteStore::new();
        store.initialize_common();
        store
    }

    #[test]
    fn test_arg_flag_predicates() {
        assert!(ArgFlag::OBJ.is_positional_kind());
        assert!((ArgFlag::INT | ArgFlag::LITERAL).is_positional_kind());
        assert!(!(ArgFlag::OBJ | ArgFlag::NAMED).is_positional_kind());
        assert!((ArgFlag::STR | ArgFlag::NAMED).is_named());
        assert!((ArgFlag::OBJ | ArgFlag::FLAT).is_flattening());
        assert!(ArgFlag::FLAT_NAMED.is_flattening());
        assert_eq!((ArgFlag::INT | ArgFlag::LITERAL).kind(), ArgFlag::INT);
    }

    #[test]
    fn test_arg_count_includes_names() {
        let mut interner = Interner::new();
        let name = interner.intern("mode");

        let cs = Callsite::new(
            vec![ArgFlag::OBJ, ArgFlag::STR | ArgFlag::NAMED],
            1,
            Some(vec![name]),
        );

        assert_eq!(cs.flag_count(), 2);
        assert_eq!(cs.num_pos(), 1);
        assert_eq!(cs.num_nameds(), 1);
        // Named args take a name slot and a value slot.
        assert_eq!(cs.arg_count(), 3);
    }

    #[test]
    fn test_structural_equality_ignores_interned_flag() {
        let a = Callsite::positional(&[ArgFlag::OBJ, ArgFlag::INT]);
        let b = Callsite::positional(&[ArgFlag::OBJ, ArgFlag::INT]);
        b.interned.store(true, Ordering::Release);

        assert_eq!(a, b);
        assert_ne!(a, Callsite::positional(&[ArgFlag::INT, ArgFlag::OBJ]));
    }

    #[test]
    fn test_copy_is_deep_and_not_interned() {
        let companion = Callsite::positional(&[ArgFlag::OBJ, ArgFlag::STR]);
        let original = Callsite::positional(&[ArgFlag::STR]).with_invocant_variant(companion);
        original.interned.store(true, Ordering::Release);

        let copied = original.copy();

        assert!(!copied.is_interned());
        assert_eq!(copied, original);
        let copied_companion = copied.with_invocant().unwrap();
        assert_eq!(copied_companion, original.with_invocant().unwrap());
        assert!(!copied_companion.is_interned());
    }

    #[test]
    fn test_get_common_shapes() {
        let cs = get_common(CommonCallsite::ObjObj as u32).unwrap();
        assert_eq!(cs.flag_count(), 2);
        assert_eq!(cs.num_pos(), 2);
        assert!(cs.arg_names().is_none());
        assert!(!cs.has_flattening());

        assert_eq!(
            get_common(NUM_COMMON_CALLSITES as u32),
            Err(CallsiteError::UnknownCommon(9))
        );
    }

    #[test]
    fn test_common_shapes_interned_after_startup() {
        let _store = interned_store();
        for id in 0..NUM_COMMON_CALLSITES as u32 {
            let cs = get_common(id).unwrap();
            assert!(is_common(&cs));
            assert!(cs.is_interned());
        }
    }

    #[test]
    fn test_intern_returns_existing_pointer() {
        let store = interned_store();

        let mut a = Arc::new(Callsite::positional(&[ArgFlag::STR, ArgFlag::INT]));
        let mut b = Arc::new(Callsite::positional(&[ArgFlag::STR, ArgFlag::INT]));
        store.try_intern(&mut a);
        store.try_intern(&mut b);

        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.is_interned());
    }

    #[test]
    fn test_intern_matches_common_shape() {
        let store = interned_store();

        let mut cs = Arc::new(Callsite::positional(&[ArgFlag::OBJ, ArgFlag::INT]));
        store.try_intern(&mut cs);

        assert!(is_common(&cs));
    }

    #[test]
    fn test_intern_distinguishes_names() {
        let store = interned_store();
        let mut interner = Interner::new();
        let first = interner.intern("first");
        let second = interner.intern("second");

        let mut a = Arc::new(Callsite::new(
            vec![ArgFlag::OBJ, ArgFlag::OBJ | ArgFlag::NAMED],
            1,
            Some(vec![first]),
        ));
        let mut b = Arc::new(Callsite::new(
            vec![ArgFlag::OBJ, ArgFlag::OBJ | ArgFlag::NAMED],
            1,
            Some(vec![second]),
        ));
        let mut c = Arc::new(Callsite::new(
            vec![ArgFlag::OBJ, ArgFlag::OBJ | ArgFlag::NAMED],
            1,
            Some(vec![first]),
        ));
        store.try_intern(&mut a);
        store.try_intern(&mut b);
        store.try_intern(&mut c);

        assert!(!Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_flattening_shape_is_not_interned() {
        let store = interned_store();

        let mut cs = Arc::new(Callsite::positional(&[ArgFlag::OBJ | ArgFlag::FLAT]));
        let before = store.interned_count();
        store.try_intern(&mut cs);

        assert!(!cs.is_interned());
        assert_eq!(store.interned_count(), before);
    }

    #[test]
    fn test_wide_shape_is_not_interned() {
        let store = interned_store();

        let mut cs = Arc::new(Callsite::positional(&[ArgFlag::INT; ARITY_LIMIT]));
        store.try_intern(&mut cs);

        assert!(!cs.is_interned());
    }

    #[test]
    fn test_nameds_without_name_list_are_not_interned() {
        let store = interned_store();

        let mut cs = Arc::new(Callsite::new(
            vec![ArgFlag::OBJ, ArgFlag::INT | ArgFlag::NAMED],
            1,
            None,
        ));
        store.try_intern(&mut cs);

        assert!(!cs.is_interned());
    }

    #[test]
    fn test_drop_positional() {
        let store = interned_store();

        let cs = Arc::new(Callsite::positional(&[
            ArgFlag::OBJ,
            ArgFlag::INT,
            ArgFlag::STR,
        ]));
        let derived = store.drop_positional(&cs, 1).unwrap();

        assert_eq!(derived.arg_flags(), &[ArgFlag::OBJ, ArgFlag::STR]);
        assert_eq!(derived.num_pos(), 2);
        assert!(derived.is_interned());

        // A second structurally equal derivation shares the descriptor.
        let again = store.drop_positional(&cs, 1).unwrap();
        assert!(Arc::ptr_eq(&derived, &again));
    }

    #[test]
    fn test_insert_positional_restores_dropped_shape() {
        let store = interned_store();

        let mut cs = Arc::new(Callsite::positional(&[
            ArgFlag::STR,
            ArgFlag::INT,
            ArgFlag::NUM,
        ]));
        store.try_intern(&mut cs);

        for idx in 0..cs.num_pos() {
            let dropped = store.drop_positional(&cs, idx).unwrap();
            let restored = store
                .insert_positional(&dropped, idx, cs.arg_flags()[idx as usize])
                .unwrap();
            assert!(Arc::ptr_eq(&restored, &cs));
        }
    }

    #[test]
    fn test_derivation_errors() {
        let store = interned_store();

        let cs = Arc::new(Callsite::positional(&[ArgFlag::OBJ]));
        assert_eq!(
            store.drop_positional(&cs, 1),
            Err(CallsiteError::OutOfRange {
                index: 1,
                num_pos: 1
            })
        );
        assert_eq!(
            store.insert_positional(&cs, 2, ArgFlag::INT),
            Err(CallsiteError::OutOfRange {
                index: 2,
                num_pos: 1
            })
        );

        let flat = Arc::new(Callsite::positional(&[ArgFlag::OBJ | ArgFlag::FLAT]));
        assert_eq!(
            store.drop_positional(&flat, 0),
            Err(CallsiteError::HasFlattening)
        );
        assert_eq!(
            store.insert_positional(&flat, 0, ArgFlag::OBJ),
            Err(CallsiteError::HasFlattening)
        );
    }

    #[test]
    fn test_drop_positional_keeps_names() {
        let store = interned_store();
        let mut interner = Interner::new();
        let name = interner.intern("opt");

        let cs = Arc::new(Callsite::new(
            vec![ArgFlag::OBJ, ArgFlag::INT, ArgFlag::STR | ArgFlag::NAMED],
            2,
            Some(vec![name]),
        ));
        let derived = store.drop_positional(&cs, 0).unwrap();

        assert_eq!(derived.num_pos(), 1);
        assert_eq!(derived.arg_names(), Some(&[name][..]));
    }
}
