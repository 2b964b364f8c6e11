// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Per-transaction scratch buffer for packed keys and payloads.
//!
//! Everything a transaction remembers about an item (its key, its read
//! stamp, its pending write) is stored as an opaque [`Packed`] handle.
//! Small primitives encode their value directly in the handle and never
//! allocate; anything else becomes a buffer-owned allocation that stays
//! alive (at a stable identity) until [`TxnBuffer::clear`].
//!
//! Handles compare cheaply: inline handles by value, allocations by
//! identity. That comparison is what the item-set lookups, the canonical
//! commit ordering, and piece-footprint overlap detection all run on.

use std::any::Any;
use std::sync::Arc;

/// Object-safe bound for buffer-owned allocations.
pub trait PackedObject: Any + Send + Sync {
    /// Upcast for typed access.
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync> PackedObject for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Opaque handle to a packed value.
///
/// `Word` carries a primitive encoded in place; `Boxed` shares a
/// buffer-owned allocation. Equality is value equality for words and
/// allocation identity for boxes: two separately packed but equal boxed
/// values are *not* equal, which is exactly the contract overlap detection
/// relies on (`pack_unique` makes boxed keys canonical within a buffer).
#[derive(Clone)]
pub enum Packed {
    /// Inline-encoded primitive.
    Word(u64),
    /// Shared buffer-owned allocation.
    Boxed(Arc<dyn PackedObject>),
}

impl Packed {
    fn order_key(&self) -> (u8, u64) {
        match self {
            Packed::Word(w) => (0, *w),
            Packed::Boxed(arc) => (1, Arc::as_ptr(arc) as *const () as usize as u64),
        }
    }

    /// Returns the inline value, if this handle is a `Word`.
    #[inline]
    pub fn as_word(&self) -> Option<u64> {
        match self {
            Packed::Word(w) => Some(*w),
            Packed::Boxed(_) => None,
        }
    }

    /// Typed view of a boxed allocation.
    #[inline]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Packed::Word(_) => None,
            Packed::Boxed(arc) => arc.as_any().downcast_ref::<T>(),
        }
    }
}

impl PartialEq for Packed {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Packed::Word(a), Packed::Word(b)) => a == b,
            (Packed::Boxed(a), Packed::Boxed(b)) => {
                std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
            }
            _ => false,
        }
    }
}

impl Eq for Packed {}

impl PartialOrd for Packed {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Packed {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.order_key().cmp(&other.order_key())
    }
}

impl std::hash::Hash for Packed {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.order_key().hash(state);
    }
}

impl std::fmt::Debug for Packed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Packed::Word(w) => write!(f, "Word({w})"),
            Packed::Boxed(arc) => write!(f, "Boxed({:p})", Arc::as_ptr(arc)),
        }
    }
}

/// Types a transaction can pack into its buffer.
///
/// Primitives encode inline; owned containers allocate. `unpack` is the
/// typed read-back used by item handles and shared-object implementations.
pub trait Packable: Clone + Send + Sync + 'static {
    /// Packs the value, always producing a fresh handle for boxed types.
    fn pack(self, buf: &mut TxnBuffer) -> Packed;

    /// Packs the value, reusing an equal already-packed handle if one
    /// exists in `buf`. Inline handles are canonical by construction.
    fn pack_unique(self, buf: &mut TxnBuffer) -> Packed {
        self.pack(buf)
    }

    /// Reads the value back out of a handle.
    fn unpack(packed: &Packed) -> Option<Self>;
}

macro_rules! word_packable {
    ($($ty:ty),* $(,)?) => {
        $(impl Packable for $ty {
            fn pack(self, _buf: &mut TxnBuffer) -> Packed {
                Packed::Word(self as u64)
            }

            fn unpack(packed: &Packed) -> Option<Self> {
                packed.as_word().map(|w| w as $ty)
            }
        })*
    };
}

word_packable!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

impl Packable for bool {
    fn pack(self, _buf: &mut TxnBuffer) -> Packed {
        Packed::Word(self as u64)
    }

    fn unpack(packed: &Packed) -> Option<Self> {
        packed.as_word().map(|w| w != 0)
    }
}

impl Packable for char {
    fn pack(self, _buf: &mut TxnBuffer) -> Packed {
        Packed::Word(self as u64)
    }

    fn unpack(packed: &Packed) -> Option<Self> {
        packed.as_word().and_then(|w| char::from_u32(w as u32))
    }
}

macro_rules! boxed_packable {
    ($($ty:ty),* $(,)?) => {
        $(impl Packable for $ty {
            fn pack(self, buf: &mut TxnBuffer) -> Packed {
                buf.alloc(self)
            }

            fn pack_unique(self, buf: &mut TxnBuffer) -> Packed {
                match buf.find_equal(&self) {
                    Some(existing) => existing,
                    None => buf.alloc(self),
                }
            }

            fn unpack(packed: &Packed) -> Option<Self> {
                packed.downcast_ref::<$ty>().cloned()
            }
        })*
    };
}

boxed_packable!(String, Vec<u8>);

/// Per-transaction scratch allocator.
///
/// Holds every boxed allocation packed since the last [`clear`](Self::clear)
/// so handles stay valid for the whole transaction. A handle that escaped
/// into a published piece footprint keeps its allocation alive past
/// `clear`; the allocation is then dropped with the piece, during deferred
/// reclamation.
#[derive(Default)]
pub struct TxnBuffer {
    allocs: Vec<Packed>,
}

impl TxnBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Packs `value`, yielding a stable opaque handle.
    pub fn pack<T: Packable>(&mut self, value: T) -> Packed {
        value.pack(self)
    }

    /// Packs `value`, deduplicating against equal values already packed
    /// in this buffer.
    pub fn pack_unique<T: Packable>(&mut self, value: T) -> Packed {
        value.pack_unique(self)
    }

    /// Drops the buffer's hold on every allocation.
    pub fn clear(&mut self) {
        self.allocs.clear();
    }

    /// Number of boxed allocations currently held.
    pub fn len(&self) -> usize {
        self.allocs.len()
    }

    /// Returns true if no boxed allocations are held.
    pub fn is_empty(&self) -> bool {
        self.allocs.is_empty()
    }

    fn alloc<T: Any + Send + Sync>(&mut self, value: T) -> Packed {
        let packed = Packed::Boxed(Arc::new(value));
        self.allocs.push(packed.clone());
        packed
    }

    fn find_equal<T: Any + Send + Sync + PartialEq>(&self, value: &T) -> Option<Packed> {
        self.allocs
            .iter()
            .find(|packed| packed.downcast_ref::<T>() == Some(value))
            .cloned()
    }
}

impl std::fmt::Debug for TxnBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxnBuffer").field("allocs", &self.allocs.len()).finish()
    }
}
