//! Slot heap with stop-the-world mark/sweep
//!
//! Objects live in a slot vector. Freed slots bump their generation so stale
//! [`ObjectRef`]s are rejected instead of aliasing the next occupant.

use std::collections::BTreeMap;

use rustc_hash::FxHashSet;

use crate::error::{HostError, HostResult};
use crate::runtime::{Accessor, FinalizeCallback, NativeFn};
use crate::value::{NativePtr, ObjectRef, RawValue, ValueType};

/// Payload of a heap object
pub(crate) enum CellKind {
    Plain { class_name: Option<String> },
    Array(Elements),
    ArrayBuffer(Box<[u8]>),
    Uint8Array(Box<[u8]>),
    Function(FunctionCell),
}

/// Largest gap a write may open past the dense prefix before it goes sparse
const DENSE_GAP: usize = 1024;

/// Largest array index; `u32::MAX` is only reachable as a length
pub(crate) const MAX_ARRAY_INDEX: u32 = u32::MAX - 1;

/// Array storage: a dense prefix plus sparse entries beyond it
///
/// Neither a far write nor a `length` increase allocates storage for the
/// holes in between.
#[derive(Default)]
pub(crate) struct Elements {
    dense: Vec<RawValue>,
    sparse: BTreeMap<u32, RawValue>,
    length: u32,
}

impl Elements {
    /// An array of `length` holes; a short prefix is materialized as `undefined`
    pub fn with_length(length: u32) -> Self {
        let dense = (length as usize).min(DENSE_GAP);
        Self {
            dense: vec![RawValue::Undefined; dense],
            sparse: BTreeMap::new(),
            length,
        }
    }

    pub fn from_values(values: Vec<RawValue>) -> Self {
        let length = u32::try_from(values.len()).unwrap_or(u32::MAX);
        Self {
            dense: values,
            sparse: BTreeMap::new(),
            length,
        }
    }

    pub fn len(&self) -> u32 {
        self.length
    }

    /// Whether `index` holds an element rather than a hole
    pub fn contains(&self, index: u32) -> bool {
        (index as usize) < self.dense.len() || self.sparse.contains_key(&index)
    }

    pub fn get(&self, index: u32) -> RawValue {
        self.dense
            .get(index as usize)
            .or_else(|| self.sparse.get(&index))
            .cloned()
            .unwrap_or_default()
    }

    pub fn set(&mut self, index: u32, value: RawValue) {
        let slot = index as usize;
        if slot < self.dense.len() {
            self.dense[slot] = value;
        } else if slot - self.dense.len() <= DENSE_GAP {
            self.dense.resize(slot, RawValue::Undefined);
            self.dense.push(value);
            while let Some(entry) = self.sparse.first_entry() {
                let key = *entry.key() as usize;
                if key >= self.dense.len() {
                    break;
                }
                self.dense[key] = entry.remove();
            }
        } else {
            self.sparse.insert(index, value);
        }
        self.length = self.length.max(index.saturating_add(1));
    }

    /// Shrink or grow; growth only moves the length
    pub fn set_len(&mut self, length: u32) {
        self.dense.truncate(length as usize);
        drop(self.sparse.split_off(&length));
        self.length = length;
    }

    /// Indices that hold an element, ascending
    pub fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.dense.len() as u32).chain(self.sparse.keys().copied())
    }

    pub fn values(&self) -> impl Iterator<Item = &RawValue> {
        self.dense.iter().chain(self.sparse.values())
    }
}

pub(crate) struct FunctionCell {
    pub name: String,
    pub callback: NativeFn,
    /// Script source text; `None` for engine-installed natives
    pub source: Option<String>,
}

pub(crate) enum Property {
    Data(RawValue),
    Accessor(Accessor),
}

/// Native pointer bound into an object, with its finalizer
pub(crate) struct PrivateSlot {
    pub data: NativePtr,
    pub finalize: Option<FinalizeCallback>,
}

pub(crate) struct HeapCell {
    pub kind: CellKind,
    /// Own properties in insertion order
    pub properties: Vec<(String, Property)>,
    pub private: Option<PrivateSlot>,
    pub protect_count: u32,
    marked: bool,
}

impl HeapCell {
    fn new(kind: CellKind) -> Self {
        Self {
            kind,
            properties: Vec::new(),
            private: None,
            protect_count: 0,
            marked: false,
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self.kind {
            CellKind::Plain { .. } => ValueType::Object,
            CellKind::Array(_) => ValueType::Array,
            CellKind::ArrayBuffer(_) => ValueType::ArrayBuffer,
            CellKind::Uint8Array(_) => ValueType::TypedArray,
            CellKind::Function(_) => ValueType::Function,
        }
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, prop)| prop)
    }

    /// Insert or overwrite in place, keeping the original insertion position
    pub fn put_property(&mut self, name: &str, prop: Property) {
        match self.properties.iter_mut().find(|(key, _)| key == name) {
            Some((_, existing)) => *existing = prop,
            None => self.properties.push((name.to_string(), prop)),
        }
    }

    fn trace(&self, worklist: &mut Vec<ObjectRef>) {
        for (_, prop) in &self.properties {
            if let Property::Data(RawValue::Object(obj)) = prop {
                worklist.push(*obj);
            }
        }
        if let CellKind::Array(elements) = &self.kind {
            worklist.extend(elements.values().filter_map(RawValue::as_object));
        }
    }
}

struct Slot {
    generation: u32,
    cell: Option<HeapCell>,
}

/// Outcome of one sweep
///
/// Dead cells are handed back instead of dropped in place: dropping them can
/// run arbitrary native code (captured closures), which must not happen while
/// the heap is borrowed.
pub(crate) struct SweepResult {
    pub dead: Vec<HeapCell>,
}

impl SweepResult {
    pub fn freed(&self) -> usize {
        self.dead.len()
    }

    /// Take the private slots that carry a finalizer
    pub fn take_finalizers(&mut self) -> Vec<PrivateSlot> {
        self.dead
            .iter_mut()
            .filter_map(|cell| cell.private.take())
            .filter(|private| private.finalize.is_some())
            .collect()
    }
}

#[derive(Default)]
pub(crate) struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    allocated_since_gc: usize,
}

impl Heap {
    pub fn alloc(&mut self, kind: CellKind) -> ObjectRef {
        let cell = HeapCell::new(kind);
        self.live += 1;
        self.allocated_since_gc += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.cell = Some(cell);
            return ObjectRef::new(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            cell: Some(cell),
        });
        ObjectRef::new(index, 0)
    }

    pub fn get(&self, obj: ObjectRef) -> HostResult<&HeapCell> {
        self.slots
            .get(obj.index() as usize)
            .filter(|slot| slot.generation == obj.generation())
            .and_then(|slot| slot.cell.as_ref())
            .ok_or(HostError::InvalidHandle(obj))
    }

    pub fn get_mut(&mut self, obj: ObjectRef) -> HostResult<&mut HeapCell> {
        self.slots
            .get_mut(obj.index() as usize)
            .filter(|slot| slot.generation == obj.generation())
            .and_then(|slot| slot.cell.as_mut())
            .ok_or(HostError::InvalidHandle(obj))
    }

    pub fn contains(&self, obj: ObjectRef) -> bool {
        self.get(obj).is_ok()
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    pub fn allocated_since_gc(&self) -> usize {
        self.allocated_since_gc
    }

    /// Mark everything reachable from `roots` and from protected objects
    pub fn mark(&mut self, roots: impl IntoIterator<Item = ObjectRef>) {
        let mut worklist: Vec<ObjectRef> = roots.into_iter().collect();
        for (index, slot) in self.slots.iter().enumerate() {
            if let Some(cell) = &slot.cell {
                if cell.protect_count > 0 {
                    worklist.push(ObjectRef::new(index as u32, slot.generation));
                }
            }
        }

        let mut visited: FxHashSet<ObjectRef> = FxHashSet::default();
        while let Some(obj) = worklist.pop() {
            if !visited.insert(obj) {
                continue;
            }
            // Stale roots are skipped, never traced
            if let Ok(cell) = self.get_mut(obj) {
                cell.marked = true;
            }
            if let Ok(cell) = self.get(obj) {
                cell.trace(&mut worklist);
            }
        }
    }

    /// Unlink every unmarked object and clear marks on survivors
    pub fn sweep(&mut self) -> SweepResult {
        let mut dead = Vec::new();

        for (index, slot) in self.slots.iter_mut().enumerate() {
            let Some(cell) = slot.cell.as_mut() else {
                continue;
            };
            if cell.marked {
                cell.marked = false;
                continue;
            }

            dead.extend(slot.cell.take());
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(index as u32);
        }

        self.live -= dead.len();
        self.allocated_since_gc = 0;
        SweepResult { dead }
    }

    /// Unlink every object regardless of reachability
    pub fn drain(&mut self) -> Vec<HeapCell> {
        self.free.clear();
        self.live = 0;
        self.allocated_since_gc = 0;
        std::mem::take(&mut self.slots)
            .into_iter()
            .filter_map(|slot| slot.cell)
            .collect()
    }
}
