//! Native-pointer registry
//!
//! Maps a native object's address to the one wrapper bound to it. The table
//! holds a strong reference per entry: that is the binding's own reference,
//! released when the host finalizes the object, when the wrapper detaches its
//! private data, or by the teardown sweep.
//!
//! The tables are thread-local, matching the engine: every operation runs on
//! the thread that owns the script runtime.
//!
//! While [`sweep`] runs, the table is in sweep mode and every mutation from
//! another path is refused. Wrappers released by the sweep are marked cleaned
//! up first, so their own cleanup never reaches back into the table.

use std::cell::{Cell, RefCell};

use jsb_host::{NativePtr, ObjectRef};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{trace, warn};

use crate::error::{JsbError, JsbResult};
use crate::object::Object;

thread_local! {
    static NATIVE_PTR_MAP: RefCell<FxHashMap<NativePtr, Object>> = RefCell::new(FxHashMap::default());
    /// Native objects created by a class constructor without explicit reference management
    static CREATED_BY_CTOR: RefCell<FxHashSet<NativePtr>> = RefCell::new(FxHashSet::default());
    static SWEEPING: Cell<bool> = const { Cell::new(false) };
}

/// Check if the teardown sweep is in progress
pub fn is_sweeping() -> bool {
    SWEEPING.try_with(Cell::get).unwrap_or(true)
}

/// Number of bound native pointers
pub fn len() -> usize {
    NATIVE_PTR_MAP
        .try_with(|map| map.borrow().len())
        .unwrap_or(0)
}

/// Check if no native pointer is bound
pub fn is_empty() -> bool {
    len() == 0
}

/// Check if `ptr` is bound to a live wrapper
pub fn contains(ptr: NativePtr) -> bool {
    NATIVE_PTR_MAP
        .try_with(|map| map.borrow().contains_key(&ptr))
        .unwrap_or(false)
}

/// Wrapper bound to `ptr`, as a new co-owning handle
pub fn lookup(ptr: NativePtr) -> Option<Object> {
    NATIVE_PTR_MAP
        .try_with(|map| map.borrow().get(&ptr).cloned())
        .ok()
        .flatten()
}

/// Bind `ptr` to `object`
pub(crate) fn register(ptr: NativePtr, object: Object) -> JsbResult<()> {
    if is_sweeping() {
        warn!("refusing to register {} while the registry is swept", ptr);
        return Err(JsbError::internal("native pointer registry is being swept"));
    }

    NATIVE_PTR_MAP
        .try_with(|map| {
            let mut map = map.borrow_mut();
            if map.contains_key(&ptr) {
                return Err(JsbError::NativePtrAlreadyBound(ptr));
            }
            trace!("registry bind {} -> {}", ptr, object.handle());
            map.insert(ptr, object);
            Ok(())
        })
        .map_err(|_| JsbError::internal("native pointer registry is gone"))?
}

/// Unbind `ptr` if it is bound to the wrapper at `owner`
///
/// The removed handle is returned so the caller drops it after the table is
/// no longer borrowed.
pub(crate) fn unregister(ptr: NativePtr, owner: *const ()) -> Option<Object> {
    if is_sweeping() {
        warn!("refusing to unbind {} while the registry is swept", ptr);
        return None;
    }

    NATIVE_PTR_MAP
        .try_with(|map| {
            let mut map = map.borrow_mut();
            match map.get(&ptr) {
                Some(existing) if existing.identity() == owner => {
                    trace!("registry unbind {}", ptr);
                    map.remove(&ptr)
                }
                _ => None,
            }
        })
        .ok()
        .flatten()
}

/// Unbind `ptr` if its wrapper stands for the host object `handle`
///
/// A finalizer left behind by an earlier binding of the same address must not
/// reach the wrapper bound to it now.
pub(crate) fn take_bound_to(ptr: NativePtr, handle: ObjectRef) -> Option<Object> {
    if is_sweeping() {
        warn!("refusing to take {} while the registry is swept", ptr);
        return None;
    }

    NATIVE_PTR_MAP
        .try_with(|map| {
            let mut map = map.borrow_mut();
            match map.get(&ptr) {
                Some(existing) if existing.handle() == handle => map.remove(&ptr),
                Some(existing) => {
                    trace!(
                        "{} is bound to {}, not to finalized {}",
                        ptr,
                        existing.handle(),
                        handle
                    );
                    None
                }
                None => None,
            }
        })
        .ok()
        .flatten()
}

/// Record that `ptr` was created by a class constructor
pub fn mark_created_by_ctor(ptr: NativePtr) {
    let _ = CREATED_BY_CTOR.try_with(|set| set.borrow_mut().insert(ptr));
}

/// Check if `ptr` was created by a class constructor and is still alive
pub fn is_created_by_ctor(ptr: NativePtr) -> bool {
    CREATED_BY_CTOR
        .try_with(|set| set.borrow().contains(&ptr))
        .unwrap_or(false)
}

/// Forget a constructor-created pointer; returns whether it was recorded
pub(crate) fn forget_created_by_ctor(ptr: NativePtr) -> bool {
    CREATED_BY_CTOR
        .try_with(|set| set.borrow_mut().remove(&ptr))
        .unwrap_or(false)
}

/// Number of constructor-created pointers still recorded
pub fn created_by_ctor_len() -> usize {
    CREATED_BY_CTOR
        .try_with(|set| set.borrow().len())
        .unwrap_or(0)
}

/// Release every bound wrapper and clear both tables
///
/// Returns how many wrappers were released.
pub(crate) fn sweep() -> usize {
    let Ok(already) = SWEEPING.try_with(|flag| flag.replace(true)) else {
        return 0;
    };
    if already {
        return 0;
    }

    let entries = NATIVE_PTR_MAP
        .try_with(|map| std::mem::take(&mut *map.borrow_mut()))
        .unwrap_or_default();

    let mut released = 0;
    for (ptr, object) in entries {
        // Cleaned up first: the drop below must not run the unbinding path
        object.mark_cleaned_up();
        trace!("sweep released {}", ptr);
        drop(object);
        released += 1;
    }

    let _ = CREATED_BY_CTOR.try_with(|set| set.borrow_mut().clear());
    let _ = SWEEPING.try_with(|flag| flag.set(false));
    released
}
