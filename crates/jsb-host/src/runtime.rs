//! The capability set a host script runtime offers to the bridge

use std::fmt;
use std::rc::Rc;

use crate::error::HostResult;
use crate::value::{NativePtr, ObjectRef, RawValue, ValueType};

/// Native function callable from script
///
/// Receives the host, the `this` value and the arguments. `Err` carries the
/// thrown value.
pub type NativeFn = Rc<dyn Fn(&dyn HostRuntime, &RawValue, &[RawValue]) -> Result<RawValue, RawValue>>;

/// Called by the host when an object carrying private data is collected
pub type FinalizeCallback = Rc<dyn Fn(NativePtr)>;

/// Receives collection begin/end notifications
pub type CollectionObserver = Box<dyn Fn(CollectionEvent)>;

/// Wrap a closure as a [`NativeFn`]
pub fn native_fn<F>(f: F) -> NativeFn
where
    F: Fn(&dyn HostRuntime, &RawValue, &[RawValue]) -> Result<RawValue, RawValue> + 'static,
{
    Rc::new(f)
}

/// Collection pass notification
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectionEvent {
    /// Marking is about to start
    Begin,
    /// Sweep and finalizers are done
    End,
}

/// A get/set accessor pair installed on an object
#[derive(Clone, Default)]
pub struct Accessor {
    pub getter: Option<NativeFn>,
    pub setter: Option<NativeFn>,
    pub configurable: bool,
    pub enumerable: bool,
}

impl Accessor {
    /// Accessor that is both configurable and enumerable
    pub fn new(getter: Option<NativeFn>, setter: Option<NativeFn>) -> Self {
        Self {
            getter,
            setter,
            configurable: true,
            enumerable: true,
        }
    }
}

impl fmt::Debug for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accessor")
            .field("getter", &self.getter.is_some())
            .field("setter", &self.setter.is_some())
            .field("configurable", &self.configurable)
            .field("enumerable", &self.enumerable)
            .finish()
    }
}

/// Capabilities consumed from a garbage-collected script runtime
///
/// All methods take `&self`: a native callback invoked through
/// [`HostRuntime::call_function`] receives the same host and may call back
/// into it. Implementations must not hold internal borrows across callbacks.
pub trait HostRuntime {
    /// Whether the runtime can still service calls
    fn is_valid(&self) -> bool;

    /// The global object
    fn global_object(&self) -> HostResult<ObjectRef>;

    // Allocation

    fn create_object(&self) -> HostResult<ObjectRef>;

    /// Create an instance of a registered native class
    fn create_object_with_class(&self, class_name: &str) -> HostResult<ObjectRef>;

    fn create_array(&self, length: u32) -> HostResult<ObjectRef>;

    /// Zero-filled `ArrayBuffer` of `byte_length` bytes
    fn create_array_buffer(&self, byte_length: usize) -> HostResult<ObjectRef>;

    /// Zero-filled `Uint8Array` of `byte_length` bytes
    fn create_uint8_array(&self, byte_length: usize) -> HostResult<ObjectRef>;

    fn create_function(&self, name: &str, callback: NativeFn) -> HostResult<ObjectRef>;

    // Backing stores. The memory belongs to the host and lives as long as the object.

    fn array_buffer_storage(&self, object: ObjectRef) -> HostResult<(*mut u8, usize)>;

    fn typed_array_storage(&self, object: ObjectRef) -> HostResult<(*mut u8, usize)>;

    // Properties

    fn has_property(&self, object: ObjectRef, name: &str) -> HostResult<bool>;

    fn get_property(&self, object: ObjectRef, name: &str) -> HostResult<RawValue>;

    /// Write a property, overwriting any existing data property
    fn set_property(&self, object: ObjectRef, name: &str, value: RawValue) -> HostResult<()>;

    fn define_accessor(&self, object: ObjectRef, name: &str, accessor: Accessor)
    -> HostResult<()>;

    fn get_index(&self, object: ObjectRef, index: u32) -> HostResult<RawValue>;

    fn set_index(&self, object: ObjectRef, index: u32, value: RawValue) -> HostResult<()>;

    /// Own property names as a host array of strings
    fn own_property_names(&self, object: ObjectRef) -> HostResult<ObjectRef>;

    // Values

    fn type_of(&self, value: &RawValue) -> HostResult<ValueType>;

    fn strict_equals(&self, a: &RawValue, b: &RawValue) -> HostResult<bool>;

    /// Script-level string conversion (`String(value)`)
    fn to_display_string(&self, value: &RawValue) -> HostResult<String>;

    // Invocation

    /// Call `function` with `this` and `args`
    ///
    /// A throw leaves the thrown value pending and returns
    /// [`HostError::Exception`](crate::HostError::Exception).
    fn call_function(
        &self,
        function: ObjectRef,
        this: &RawValue,
        args: &[RawValue],
    ) -> HostResult<RawValue>;

    fn has_exception(&self) -> bool;

    /// Clear the pending exception and return it
    fn clear_exception(&self) -> Option<RawValue>;

    // Protection from collection

    /// Add one protection; returns the new protect count
    fn add_ref(&self, object: ObjectRef) -> HostResult<u32>;

    /// Remove one protection; returns the new protect count
    fn release(&self, object: ObjectRef) -> HostResult<u32>;

    // Private slot

    fn get_private(&self, object: ObjectRef) -> HostResult<Option<NativePtr>>;

    fn set_private(
        &self,
        object: ObjectRef,
        data: NativePtr,
        finalize: Option<FinalizeCallback>,
    ) -> HostResult<()>;

    fn clear_private(&self, object: ObjectRef) -> HostResult<()>;

    // Lifecycle

    fn collect_garbage(&self);

    fn set_collection_observer(&self, observer: Option<CollectionObserver>);

    /// Tear the runtime down; every later call fails
    fn dispose(&self);
}
