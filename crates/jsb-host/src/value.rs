//! Raw host values and handles

use std::fmt;
use std::num::NonZeroUsize;

/// Opaque handle naming one object in a host heap
///
/// Handles carry a generation so a handle that outlived its object is
/// detected instead of aliasing whatever reused the slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    index: u32,
    generation: u32,
}

impl ObjectRef {
    /// Build a handle from its slot index and generation
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index inside the host heap
    pub fn index(self) -> u32 {
        self.index
    }

    /// Generation of the slot when the handle was issued
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}@{}", self.index, self.generation)
    }
}

/// A value as the host runtime sees it
///
/// Strings are copied out of the host; objects stay behind an [`ObjectRef`].
#[derive(Clone, Debug, Default, PartialEq)]
pub enum RawValue {
    #[default]
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Object(ObjectRef),
}

impl RawValue {
    /// Check if the value is the `undefined` singleton
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Object handle, if this is an object
    pub fn as_object(&self) -> Option<ObjectRef> {
        match self {
            Self::Object(obj) => Some(*obj),
            _ => None,
        }
    }

    /// Number payload, if this is a number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// String payload, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<ObjectRef> for RawValue {
    fn from(obj: ObjectRef) -> Self {
        Self::Object(obj)
    }
}

/// Runtime type tag of a host value
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    Undefined,
    Null,
    Boolean,
    Number,
    String,
    Object,
    Function,
    Array,
    ArrayBuffer,
    TypedArray,
}

impl ValueType {
    /// Check if values of this type are heap objects
    pub fn is_object_kind(self) -> bool {
        matches!(
            self,
            Self::Object | Self::Function | Self::Array | Self::ArrayBuffer | Self::TypedArray
        )
    }

    /// Lower-case name used in diagnostics
    pub fn name(self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Number => "number",
            Self::String => "string",
            Self::Object => "object",
            Self::Function => "function",
            Self::Array => "array",
            Self::ArrayBuffer => "arraybuffer",
            Self::TypedArray => "typedarray",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Address of a native object bound into a host object's private slot
///
/// Only the address is stored; the host never dereferences it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativePtr(NonZeroUsize);

impl NativePtr {
    /// Address of a live native value
    pub fn of<T: ?Sized>(native: &T) -> Self {
        let addr = native as *const T as *const () as usize;
        // References are never null
        Self(NonZeroUsize::new(addr).unwrap_or(NonZeroUsize::MIN))
    }

    /// Wrap a raw pointer, `None` for null
    pub fn from_ptr<T>(ptr: *const T) -> Option<Self> {
        NonZeroUsize::new(ptr as usize).map(Self)
    }

    /// Wrap a raw address, `None` for zero
    pub fn from_addr(addr: usize) -> Option<Self> {
        NonZeroUsize::new(addr).map(Self)
    }

    /// Numeric address
    pub fn addr(self) -> usize {
        self.0.get()
    }

    /// Reinterpret as a typed pointer
    pub fn cast<T>(self) -> *mut T {
        self.0.get() as *mut T
    }
}

impl fmt::Display for NativePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0.get())
    }
}
