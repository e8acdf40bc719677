//! In-process host runtime with a mark/sweep collector
//!
//! `SandboxRuntime` implements every [`HostRuntime`] capability the bridge
//! consumes. Roots are the global object, objects with a protect count above
//! zero, the pending exception and the frames of native calls in flight.
//! Collected objects whose private slot carries a finalizer are finalized
//! after the sweep, while the collection observer still reports a pass in
//! progress.

mod heap;
mod json;

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::error::{HostError, HostResult};
use crate::runtime::{
    Accessor, CollectionEvent, CollectionObserver, FinalizeCallback, HostRuntime, NativeFn,
};
use crate::value::{NativePtr, ObjectRef, RawValue, ValueType};
use heap::{CellKind, Elements, FunctionCell, Heap, MAX_ARRAY_INDEX, PrivateSlot, Property};

/// Arrays longer than this are not stringified element by element
pub(crate) const MAX_DISPLAY_ELEMENTS: u32 = 1 << 20;

/// Sandbox configuration
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Maximum number of live objects (default: unlimited)
    pub heap_limit: Option<usize>,
    /// Allocations between automatic collections (default: 4096)
    pub gc_threshold: Option<usize>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            heap_limit: None,
            gc_threshold: Some(4096),
        }
    }
}

impl SandboxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the number of live objects
    pub fn heap_limit(mut self, limit: usize) -> Self {
        self.heap_limit = Some(limit);
        self
    }

    /// Set the automatic collection threshold
    pub fn gc_threshold(mut self, allocations: usize) -> Self {
        self.gc_threshold = Some(allocations);
        self
    }

    /// Only collect when asked to
    pub fn manual_gc(mut self) -> Self {
        self.gc_threshold = None;
        self
    }
}

/// Counters exposed for observing the collector and protection traffic
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SandboxStats {
    pub add_ref_calls: u64,
    pub release_calls: u64,
    pub collections: u64,
    pub finalized: u64,
    pub live_objects: usize,
}

/// An in-process script host
///
/// # Thread Safety
///
/// This type is `!Send` and `!Sync`; like a real engine it belongs to the
/// thread that created it.
pub struct SandboxRuntime {
    heap: RefCell<Heap>,
    heap_limit: Cell<Option<usize>>,
    gc_threshold: Option<usize>,
    global: Cell<Option<ObjectRef>>,
    pending_exception: RefCell<Option<RawValue>>,
    /// Values reachable from native call frames in flight
    frame_roots: RefCell<Vec<RawValue>>,
    call_depth: Cell<usize>,
    observer: RefCell<Option<Rc<dyn Fn(CollectionEvent)>>>,
    collecting: Cell<bool>,
    disposed: Cell<bool>,
    stats: Cell<SandboxStats>,
    /// Marker to make this type !Send + !Sync
    _not_send: PhantomData<*mut ()>,
}

impl SandboxRuntime {
    /// Create a sandbox with default configuration
    pub fn new() -> Rc<Self> {
        Self::with_config(SandboxConfig::default())
    }

    /// Create a sandbox with custom configuration
    ///
    /// The global object and the builtin `JSON` namespace are installed before
    /// the heap limit takes effect.
    pub fn with_config(config: SandboxConfig) -> Rc<Self> {
        let runtime = Self {
            heap: RefCell::new(Heap::default()),
            heap_limit: Cell::new(None),
            gc_threshold: config.gc_threshold,
            global: Cell::new(None),
            pending_exception: RefCell::new(None),
            frame_roots: RefCell::new(Vec::new()),
            call_depth: Cell::new(0),
            observer: RefCell::new(None),
            collecting: Cell::new(false),
            disposed: Cell::new(false),
            stats: Cell::new(SandboxStats::default()),
            _not_send: PhantomData,
        };

        let global = runtime
            .heap
            .borrow_mut()
            .alloc(CellKind::Plain { class_name: None });
        runtime.global.set(Some(global));
        if let Err(err) = json::install(&runtime, global) {
            warn!("failed to install JSON builtins: {}", err);
        }
        runtime.heap_limit.set(config.heap_limit);
        Rc::new(runtime)
    }

    /// Change the live object cap
    pub fn set_heap_limit(&self, limit: Option<usize>) {
        self.heap_limit.set(limit);
    }

    /// Number of objects currently in the heap
    pub fn live_objects(&self) -> usize {
        self.heap.borrow().live_count()
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> SandboxStats {
        let mut stats = self.stats.get();
        stats.live_objects = self.live_objects();
        stats
    }

    /// Check whether a handle still names a live object
    pub fn is_alive(&self, object: ObjectRef) -> bool {
        self.heap.borrow().contains(object)
    }

    /// Current protect count of an object
    pub fn protect_count(&self, object: ObjectRef) -> HostResult<u32> {
        Ok(self.heap.borrow().get(object)?.protect_count)
    }

    /// Create a function that carries script source text
    ///
    /// Stringifying it yields `source` instead of the native-code marker.
    pub fn create_script_function(
        &self,
        name: &str,
        source: &str,
        callback: NativeFn,
    ) -> HostResult<ObjectRef> {
        self.allocate(CellKind::Function(FunctionCell {
            name: name.to_string(),
            callback,
            source: Some(source.to_string()),
        }))
    }

    /// Make `value` the pending exception, as a script `throw` would
    pub fn throw(&self, value: RawValue) {
        *self.pending_exception.borrow_mut() = Some(value);
    }

    fn ensure_valid(&self) -> HostResult<()> {
        if self.disposed.get() {
            Err(HostError::Disposed)
        } else {
            Ok(())
        }
    }

    fn bump_stats(&self, f: impl FnOnce(&mut SandboxStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    fn allocate(&self, kind: CellKind) -> HostResult<ObjectRef> {
        self.ensure_valid()?;

        // Collections only happen at the outermost level: objects allocated by
        // a native callback are not reachable from anything until it returns.
        let at_safepoint = self.call_depth.get() == 0;
        if let Some(threshold) = self.gc_threshold {
            if at_safepoint && self.heap.borrow().allocated_since_gc() >= threshold {
                self.collect_garbage();
            }
        }

        if let Some(limit) = self.heap_limit.get() {
            if self.live_objects() >= limit && at_safepoint {
                self.collect_garbage();
            }
            if self.live_objects() >= limit {
                debug!("allocation refused, heap limit {} reached", limit);
                return Err(HostError::OutOfMemory { limit });
            }
        }

        Ok(self.heap.borrow_mut().alloc(kind))
    }

    fn value_type_of(&self, object: ObjectRef) -> HostResult<ValueType> {
        Ok(self.heap.borrow().get(object)?.value_type())
    }

    /// Invoke a native callback as if called from script
    fn invoke(&self, callback: &NativeFn, this: &RawValue, args: &[RawValue]) -> HostResult<RawValue> {
        let frame_base = {
            let mut frames = self.frame_roots.borrow_mut();
            let base = frames.len();
            frames.push(this.clone());
            frames.extend(args.iter().cloned());
            base
        };
        self.call_depth.set(self.call_depth.get() + 1);

        let outcome = callback(self, this, args);

        self.call_depth.set(self.call_depth.get() - 1);
        self.frame_roots.borrow_mut().truncate(frame_base);

        match outcome {
            Ok(value) => Ok(value),
            Err(thrown) => {
                let message = self.describe_exception(&thrown);
                trace!("native callback threw: {}", message);
                *self.pending_exception.borrow_mut() = Some(thrown);
                Err(HostError::Exception(message))
            }
        }
    }

    fn describe_exception(&self, thrown: &RawValue) -> String {
        if let RawValue::Object(obj) = thrown {
            let heap = self.heap.borrow();
            if let Ok(cell) = heap.get(*obj) {
                let text = |name: &str| match cell.property(name) {
                    Some(Property::Data(RawValue::String(s))) => Some(s.clone()),
                    _ => None,
                };
                if let Some(message) = text("message") {
                    let name = text("name").unwrap_or_else(|| "Error".to_string());
                    return format!("{}: {}", name, message);
                }
            }
        }
        self.to_display_string(thrown)
            .unwrap_or_else(|_| "<unprintable exception>".to_string())
    }

    fn notify(&self, event: CollectionEvent) {
        let observer = self.observer.borrow().clone();
        if let Some(observer) = observer {
            observer(event);
        }
    }

    fn display_object(&self, object: ObjectRef, depth: usize) -> HostResult<String> {
        let elements = {
            let heap = self.heap.borrow();
            let cell = heap.get(object)?;
            match &cell.kind {
                CellKind::Function(func) => {
                    return Ok(match &func.source {
                        Some(source) => source.clone(),
                        None => format!("function {}() {{\n    [native code]\n}}", func.name),
                    });
                }
                CellKind::Uint8Array(bytes) => {
                    return Ok(bytes
                        .iter()
                        .map(u8::to_string)
                        .collect::<Vec<_>>()
                        .join(","));
                }
                CellKind::ArrayBuffer(_) => return Ok("[object ArrayBuffer]".to_string()),
                CellKind::Plain { .. } => return Ok("[object Object]".to_string()),
                CellKind::Array(_) if depth > 8 => return Ok(String::new()),
                CellKind::Array(elements) if elements.len() > MAX_DISPLAY_ELEMENTS => {
                    return Err(HostError::InvalidArgument(format!(
                        "array of length {} is too long to display",
                        elements.len()
                    )));
                }
                CellKind::Array(elements) => {
                    (0..elements.len()).map(|index| elements.get(index)).collect::<Vec<_>>()
                }
            }
        };

        let mut parts = Vec::with_capacity(elements.len());
        for element in &elements {
            parts.push(match element {
                RawValue::Undefined | RawValue::Null => String::new(),
                RawValue::Object(inner) => self.display_object(*inner, depth + 1)?,
                other => self.to_display_string(other)?,
            });
        }
        Ok(parts.join(","))
    }
}

/// Canonical array index named by a property key
fn array_index(name: &str) -> Option<u32> {
    let index = name.parse::<u32>().ok()?;
    // "01" and "+1" name ordinary properties
    (index <= MAX_ARRAY_INDEX && index.to_string() == name).then_some(index)
}

/// Validate a value written to an array's `length`
fn array_length(value: &RawValue) -> HostResult<u32> {
    let length = value.as_number().unwrap_or(f64::NAN);
    if length.fract() != 0.0 || !(0.0..=f64::from(u32::MAX)).contains(&length) {
        return Err(HostError::InvalidArgument(format!(
            "invalid array length {}",
            number_to_string(length)
        )));
    }
    Ok(length as u32)
}

/// Format a number the way script `String(n)` does for common values
pub(crate) fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{:.0}", n)
    } else {
        format!("{}", n)
    }
}

fn to_uint8(value: &RawValue) -> u8 {
    match value {
        RawValue::Number(n) if n.is_finite() => (n.trunc() as i64).rem_euclid(256) as u8,
        RawValue::Boolean(true) => 1,
        _ => 0,
    }
}

impl HostRuntime for SandboxRuntime {
    fn is_valid(&self) -> bool {
        !self.disposed.get()
    }

    fn global_object(&self) -> HostResult<ObjectRef> {
        self.ensure_valid()?;
        self.global.get().ok_or(HostError::Disposed)
    }

    fn create_object(&self) -> HostResult<ObjectRef> {
        self.allocate(CellKind::Plain { class_name: None })
    }

    fn create_object_with_class(&self, class_name: &str) -> HostResult<ObjectRef> {
        self.allocate(CellKind::Plain {
            class_name: Some(class_name.to_string()),
        })
    }

    fn create_array(&self, length: u32) -> HostResult<ObjectRef> {
        self.allocate(CellKind::Array(Elements::with_length(length)))
    }

    fn create_array_buffer(&self, byte_length: usize) -> HostResult<ObjectRef> {
        self.allocate(CellKind::ArrayBuffer(vec![0u8; byte_length].into_boxed_slice()))
    }

    fn create_uint8_array(&self, byte_length: usize) -> HostResult<ObjectRef> {
        self.allocate(CellKind::Uint8Array(vec![0u8; byte_length].into_boxed_slice()))
    }

    fn create_function(&self, name: &str, callback: NativeFn) -> HostResult<ObjectRef> {
        self.allocate(CellKind::Function(FunctionCell {
            name: name.to_string(),
            callback,
            source: None,
        }))
    }

    fn array_buffer_storage(&self, object: ObjectRef) -> HostResult<(*mut u8, usize)> {
        self.ensure_valid()?;
        let mut heap = self.heap.borrow_mut();
        let cell = heap.get_mut(object)?;
        let actual = cell.value_type();
        match &mut cell.kind {
            CellKind::ArrayBuffer(bytes) => Ok((bytes.as_mut_ptr(), bytes.len())),
            _ => Err(HostError::type_mismatch("arraybuffer", actual)),
        }
    }

    fn typed_array_storage(&self, object: ObjectRef) -> HostResult<(*mut u8, usize)> {
        self.ensure_valid()?;
        let mut heap = self.heap.borrow_mut();
        let cell = heap.get_mut(object)?;
        let actual = cell.value_type();
        match &mut cell.kind {
            CellKind::Uint8Array(bytes) => Ok((bytes.as_mut_ptr(), bytes.len())),
            _ => Err(HostError::type_mismatch("typedarray", actual)),
        }
    }

    fn has_property(&self, object: ObjectRef, name: &str) -> HostResult<bool> {
        self.ensure_valid()?;
        let heap = self.heap.borrow();
        let cell = heap.get(object)?;
        let intrinsic = match &cell.kind {
            CellKind::Array(elements) => {
                name == "length" || array_index(name).is_some_and(|index| elements.contains(index))
            }
            CellKind::Uint8Array(bytes) => {
                name == "length"
                    || name == "byteLength"
                    || name.parse::<usize>().is_ok_and(|index| index < bytes.len())
            }
            CellKind::ArrayBuffer(_) => name == "byteLength",
            CellKind::Function(_) => name == "name",
            CellKind::Plain { .. } => false,
        };
        Ok(intrinsic || cell.property(name).is_some())
    }

    fn get_property(&self, object: ObjectRef, name: &str) -> HostResult<RawValue> {
        self.ensure_valid()?;
        let getter = {
            let heap = self.heap.borrow();
            let cell = heap.get(object)?;
            match (&cell.kind, name) {
                (CellKind::Array(elements), "length") => {
                    return Ok(RawValue::Number(f64::from(elements.len())));
                }
                (CellKind::Uint8Array(bytes), "length" | "byteLength")
                | (CellKind::ArrayBuffer(bytes), "byteLength") => {
                    return Ok(RawValue::Number(bytes.len() as f64));
                }
                (CellKind::Function(func), "name") => {
                    return Ok(RawValue::String(func.name.clone()));
                }
                (CellKind::Array(elements), _) => {
                    if let Some(index) = array_index(name) {
                        return Ok(elements.get(index));
                    }
                }
                (CellKind::Uint8Array(bytes), _) => {
                    if let Ok(index) = name.parse::<usize>() {
                        return Ok(bytes
                            .get(index)
                            .map(|b| RawValue::Number(f64::from(*b)))
                            .unwrap_or_default());
                    }
                }
                _ => {}
            }
            match cell.property(name) {
                Some(Property::Data(value)) => return Ok(value.clone()),
                Some(Property::Accessor(accessor)) => accessor.getter.clone(),
                None => return Ok(RawValue::Undefined),
            }
        };

        match getter {
            Some(getter) => self.invoke(&getter, &RawValue::Object(object), &[]),
            None => Ok(RawValue::Undefined),
        }
    }

    fn set_property(&self, object: ObjectRef, name: &str, value: RawValue) -> HostResult<()> {
        self.ensure_valid()?;
        let setter = {
            let mut heap = self.heap.borrow_mut();
            let cell = heap.get_mut(object)?;
            if let CellKind::Array(elements) = &mut cell.kind {
                if name == "length" {
                    elements.set_len(array_length(&value)?);
                    return Ok(());
                }
                if let Some(index) = array_index(name) {
                    elements.set(index, value);
                    return Ok(());
                }
            }
            match cell.property(name) {
                Some(Property::Accessor(accessor)) => accessor.setter.clone(),
                _ => {
                    cell.put_property(name, Property::Data(value));
                    return Ok(());
                }
            }
        };

        // An accessor without a setter swallows the write
        if let Some(setter) = setter {
            self.invoke(&setter, &RawValue::Object(object), &[value])?;
        }
        Ok(())
    }

    fn define_accessor(
        &self,
        object: ObjectRef,
        name: &str,
        accessor: Accessor,
    ) -> HostResult<()> {
        self.ensure_valid()?;
        let mut heap = self.heap.borrow_mut();
        heap.get_mut(object)?
            .put_property(name, Property::Accessor(accessor));
        Ok(())
    }

    fn get_index(&self, object: ObjectRef, index: u32) -> HostResult<RawValue> {
        self.ensure_valid()?;
        {
            let heap = self.heap.borrow();
            let cell = heap.get(object)?;
            match &cell.kind {
                CellKind::Array(elements) if index <= MAX_ARRAY_INDEX => {
                    return Ok(elements.get(index));
                }
                CellKind::Uint8Array(bytes) => {
                    return Ok(bytes
                        .get(index as usize)
                        .map(|b| RawValue::Number(f64::from(*b)))
                        .unwrap_or_default());
                }
                _ => {}
            }
        }
        self.get_property(object, &index.to_string())
    }

    fn set_index(&self, object: ObjectRef, index: u32, value: RawValue) -> HostResult<()> {
        self.ensure_valid()?;
        {
            let mut heap = self.heap.borrow_mut();
            let cell = heap.get_mut(object)?;
            match &mut cell.kind {
                CellKind::Array(elements) if index <= MAX_ARRAY_INDEX => {
                    elements.set(index, value);
                    return Ok(());
                }
                CellKind::Uint8Array(bytes) => {
                    // Out-of-range writes to typed arrays are dropped
                    if let Some(slot) = bytes.get_mut(index as usize) {
                        *slot = to_uint8(&value);
                    }
                    return Ok(());
                }
                _ => {}
            }
        }
        self.set_property(object, &index.to_string(), value)
    }

    fn own_property_names(&self, object: ObjectRef) -> HostResult<ObjectRef> {
        self.ensure_valid()?;
        let names: Vec<RawValue> = {
            let heap = self.heap.borrow();
            let cell = heap.get(object)?;
            let mut names = Vec::new();
            match &cell.kind {
                CellKind::Array(elements) => {
                    names.extend(elements.indices().map(|i| i.to_string()));
                    names.push("length".to_string());
                }
                CellKind::Uint8Array(bytes) => {
                    names.extend((0..bytes.len()).map(|i| i.to_string()));
                }
                _ => {}
            }
            names.extend(cell.properties.iter().map(|(key, _)| key.clone()));
            names.into_iter().map(RawValue::String).collect()
        };

        self.allocate(CellKind::Array(Elements::from_values(names)))
    }

    fn type_of(&self, value: &RawValue) -> HostResult<ValueType> {
        Ok(match value {
            RawValue::Undefined => ValueType::Undefined,
            RawValue::Null => ValueType::Null,
            RawValue::Boolean(_) => ValueType::Boolean,
            RawValue::Number(_) => ValueType::Number,
            RawValue::String(_) => ValueType::String,
            RawValue::Object(obj) => {
                self.ensure_valid()?;
                self.value_type_of(*obj)?
            }
        })
    }

    fn strict_equals(&self, a: &RawValue, b: &RawValue) -> HostResult<bool> {
        self.ensure_valid()?;
        Ok(match (a, b) {
            (RawValue::Undefined, RawValue::Undefined) | (RawValue::Null, RawValue::Null) => true,
            (RawValue::Boolean(x), RawValue::Boolean(y)) => x == y,
            (RawValue::Number(x), RawValue::Number(y)) => x == y,
            (RawValue::String(x), RawValue::String(y)) => x == y,
            (RawValue::Object(x), RawValue::Object(y)) => x == y,
            _ => false,
        })
    }

    fn to_display_string(&self, value: &RawValue) -> HostResult<String> {
        Ok(match value {
            RawValue::Undefined => "undefined".to_string(),
            RawValue::Null => "null".to_string(),
            RawValue::Boolean(b) => b.to_string(),
            RawValue::Number(n) => number_to_string(*n),
            RawValue::String(s) => s.clone(),
            RawValue::Object(obj) => {
                self.ensure_valid()?;
                self.display_object(*obj, 0)?
            }
        })
    }

    fn call_function(
        &self,
        function: ObjectRef,
        this: &RawValue,
        args: &[RawValue],
    ) -> HostResult<RawValue> {
        self.ensure_valid()?;
        let callback = {
            let heap = self.heap.borrow();
            let cell = heap.get(function)?;
            match &cell.kind {
                CellKind::Function(func) => func.callback.clone(),
                _ => return Err(HostError::type_mismatch("function", cell.value_type())),
            }
        };

        // The callee itself is part of the frame
        self.frame_roots
            .borrow_mut()
            .push(RawValue::Object(function));
        let result = self.invoke(&callback, this, args);
        self.frame_roots.borrow_mut().pop();
        result
    }

    fn has_exception(&self) -> bool {
        self.pending_exception.borrow().is_some()
    }

    fn clear_exception(&self) -> Option<RawValue> {
        self.pending_exception.borrow_mut().take()
    }

    fn add_ref(&self, object: ObjectRef) -> HostResult<u32> {
        self.ensure_valid()?;
        let count = {
            let mut heap = self.heap.borrow_mut();
            let cell = heap.get_mut(object)?;
            cell.protect_count = cell.protect_count.saturating_add(1);
            cell.protect_count
        };
        self.bump_stats(|stats| stats.add_ref_calls += 1);
        trace!("protect {} -> {}", object, count);
        Ok(count)
    }

    fn release(&self, object: ObjectRef) -> HostResult<u32> {
        self.ensure_valid()?;
        let count = {
            let mut heap = self.heap.borrow_mut();
            let cell = heap.get_mut(object)?;
            if cell.protect_count == 0 {
                return Err(HostError::InvalidArgument(format!(
                    "release of unprotected object {}",
                    object
                )));
            }
            cell.protect_count -= 1;
            cell.protect_count
        };
        self.bump_stats(|stats| stats.release_calls += 1);
        trace!("unprotect {} -> {}", object, count);
        Ok(count)
    }

    fn get_private(&self, object: ObjectRef) -> HostResult<Option<NativePtr>> {
        self.ensure_valid()?;
        let heap = self.heap.borrow();
        Ok(heap.get(object)?.private.as_ref().map(|private| private.data))
    }

    fn set_private(
        &self,
        object: ObjectRef,
        data: NativePtr,
        finalize: Option<FinalizeCallback>,
    ) -> HostResult<()> {
        self.ensure_valid()?;
        let previous = {
            let mut heap = self.heap.borrow_mut();
            heap.get_mut(object)?
                .private
                .replace(PrivateSlot { data, finalize })
        };
        drop(previous);
        Ok(())
    }

    fn clear_private(&self, object: ObjectRef) -> HostResult<()> {
        self.ensure_valid()?;
        let previous = {
            let mut heap = self.heap.borrow_mut();
            heap.get_mut(object)?.private.take()
        };
        drop(previous);
        Ok(())
    }

    fn collect_garbage(&self) {
        if self.disposed.get() || self.collecting.get() {
            return;
        }
        self.collecting.set(true);
        self.notify(CollectionEvent::Begin);

        let mut roots: Vec<ObjectRef> = self.global.get().into_iter().collect();
        if let Some(RawValue::Object(obj)) = self.pending_exception.borrow().as_ref() {
            roots.push(*obj);
        }
        roots.extend(
            self.frame_roots
                .borrow()
                .iter()
                .filter_map(RawValue::as_object),
        );

        let mut swept = {
            let mut heap = self.heap.borrow_mut();
            heap.mark(roots);
            heap.sweep()
        };
        let finalizers = swept.take_finalizers();
        debug!(
            "collection freed {} objects, {} finalizers pending",
            swept.freed(),
            finalizers.len()
        );

        for private in &finalizers {
            if let Some(finalize) = &private.finalize {
                finalize(private.data);
            }
        }

        let freed = swept.freed();
        drop(swept);
        self.bump_stats(|stats| {
            stats.collections += 1;
            stats.finalized += finalizers.len() as u64;
        });
        trace!("{} objects reclaimed", freed);

        self.notify(CollectionEvent::End);
        self.collecting.set(false);
    }

    fn set_collection_observer(&self, observer: Option<CollectionObserver>) {
        let previous = std::mem::replace(&mut *self.observer.borrow_mut(), observer.map(Rc::from));
        drop(previous);
    }

    fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        debug!("disposing sandbox runtime");
        self.global.set(None);
        let cells = self.heap.borrow_mut().drain();
        let exception = self.pending_exception.borrow_mut().take();
        let observer = self.observer.borrow_mut().take();
        self.frame_roots.borrow_mut().clear();
        // Dropping cells runs captured native state; no borrow may be held here
        drop(cells);
        drop(exception);
        drop(observer);
    }
}

impl Drop for SandboxRuntime {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for SandboxRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxRuntime")
            .field("live_objects", &self.live_objects())
            .field("disposed", &self.disposed.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::native_fn;

    #[test]
    fn test_number_formatting() {
        assert_eq!(number_to_string(1.0), "1");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(2.5), "2.5");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_to_uint8_wraps() {
        assert_eq!(to_uint8(&RawValue::Number(256.0)), 0);
        assert_eq!(to_uint8(&RawValue::Number(-1.0)), 255);
        assert_eq!(to_uint8(&RawValue::Number(3.7)), 3);
        assert_eq!(to_uint8(&RawValue::Null), 0);
    }

    #[test]
    fn test_array_length_and_elements() {
        let host = SandboxRuntime::new();
        let arr = host.create_array(2).unwrap();
        host.set_index(arr, 3, RawValue::Number(7.0)).unwrap();

        assert_eq!(host.get_property(arr, "length").unwrap(), RawValue::Number(4.0));
        assert_eq!(host.get_index(arr, 3).unwrap(), RawValue::Number(7.0));
        assert_eq!(host.get_index(arr, 0).unwrap(), RawValue::Undefined);
        assert_eq!(host.type_of(&RawValue::Object(arr)).unwrap(), ValueType::Array);
    }

    #[test]
    fn test_far_array_writes_stay_bounded() {
        let host = SandboxRuntime::new();
        let arr = host.create_array(0).unwrap();

        host.set_index(arr, MAX_ARRAY_INDEX, RawValue::Number(1.0)).unwrap();
        assert_eq!(
            host.get_property(arr, "length").unwrap(),
            RawValue::Number(f64::from(u32::MAX))
        );
        assert_eq!(host.get_index(arr, MAX_ARRAY_INDEX).unwrap(), RawValue::Number(1.0));
        assert!(!host.has_property(arr, "7").unwrap());

        // One past the last index is an ordinary property
        host.set_index(arr, u32::MAX, RawValue::Boolean(true)).unwrap();
        assert!(host.has_property(arr, "4294967295").unwrap());

        host.set_property(arr, "length", RawValue::Number(1.0e9)).unwrap();
        assert_eq!(host.get_property(arr, "length").unwrap(), RawValue::Number(1.0e9));
        assert!(host.to_display_string(&RawValue::Object(arr)).is_err());
    }

    #[test]
    fn test_invalid_array_length_rejected() {
        let host = SandboxRuntime::new();
        let arr = host.create_array(3).unwrap();

        for bad in [1.0e12, -1.0, 1.5, f64::NAN] {
            assert!(matches!(
                host.set_property(arr, "length", RawValue::Number(bad)),
                Err(HostError::InvalidArgument(_))
            ));
        }
        assert_eq!(host.get_property(arr, "length").unwrap(), RawValue::Number(3.0));
    }

    #[test]
    fn test_accessor_dispatch() {
        let host = SandboxRuntime::new();
        let obj = host.create_object().unwrap();
        let getter = native_fn(|_, _, _| Ok(RawValue::Number(5.0)));
        host.define_accessor(obj, "five", Accessor::new(Some(getter), None))
            .unwrap();

        assert_eq!(host.get_property(obj, "five").unwrap(), RawValue::Number(5.0));
        // No setter: the write is swallowed
        host.set_property(obj, "five", RawValue::Number(1.0)).unwrap();
        assert_eq!(host.get_property(obj, "five").unwrap(), RawValue::Number(5.0));
    }

    #[test]
    fn test_native_function_display() {
        let host = SandboxRuntime::new();
        let f = host
            .create_function("tick", native_fn(|_, _, _| Ok(RawValue::Undefined)))
            .unwrap();
        let s = host
            .create_script_function(
                "tock",
                "function tock() { return 1; }",
                native_fn(|_, _, _| Ok(RawValue::Number(1.0))),
            )
            .unwrap();

        assert!(host
            .to_display_string(&RawValue::Object(f))
            .unwrap()
            .contains("[native code]"));
        assert_eq!(
            host.to_display_string(&RawValue::Object(s)).unwrap(),
            "function tock() { return 1; }"
        );
    }

    #[test]
    fn test_release_unprotected_is_rejected() {
        let host = SandboxRuntime::new();
        let obj = host.create_object().unwrap();
        assert!(host.release(obj).is_err());
        assert_eq!(host.add_ref(obj).unwrap(), 1);
        assert_eq!(host.release(obj).unwrap(), 0);
    }

    #[test]
    fn test_disposed_runtime_rejects_calls() {
        let host = SandboxRuntime::new();
        host.dispose();
        assert!(!host.is_valid());
        assert_eq!(host.create_object().err(), Some(HostError::Disposed));
        assert_eq!(host.live_objects(), 0);
    }
}
