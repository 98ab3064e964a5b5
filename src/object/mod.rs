use tracing::debug;

use crate::bytecode::OutOfMemory;
use crate::value::ObjectLookup;

/// Handle to a heap object. Indices are global across a bytecode container's
/// literal heap and a VM's runtime heap: the runtime heap starts numbering
/// where the literal heap ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef(u32);

impl ObjRef {
    pub fn new(index: u32) -> Self {
        ObjRef(index)
    }

    pub fn index(self) -> u32 {
        self.0
    }
}

/// Heap-resident values. Strings are the only kind so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    Str(String),
}

impl Object {
    pub fn kind(&self) -> &'static str {
        match self {
            Object::Str(_) => "string",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Object::Str(s) => Some(s),
        }
    }
}

/// Arena of objects. Everything is released at once when the heap drops.
#[derive(Debug, Clone, Default)]
pub struct Heap {
    objects: Vec<Object>,
    base: u32,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// A heap whose first allocation gets index `base`.
    pub fn with_base(base: u32) -> Self {
        Heap { objects: Vec::new(), base }
    }

    pub fn allocate(&mut self, obj: Object) -> Result<ObjRef, OutOfMemory> {
        let index = u32::try_from(self.objects.len())
            .ok()
            .and_then(|n| n.checked_add(self.base))
            .ok_or(OutOfMemory { what: "object heap" })?;
        self.objects
            .try_reserve(1)
            .map_err(|_| OutOfMemory { what: "object heap" })?;
        self.objects.push(obj);
        Ok(ObjRef(index))
    }

    pub fn alloc_str(&mut self, s: impl Into<String>) -> Result<ObjRef, OutOfMemory> {
        self.allocate(Object::Str(s.into()))
    }

    pub fn get(&self, r: ObjRef) -> Option<&Object> {
        let local = r.0.checked_sub(self.base)?;
        self.objects.get(local as usize)
    }

    pub fn contains(&self, r: ObjRef) -> bool {
        self.get(r).is_some()
    }

    /// Index the next allocation would receive.
    pub fn end(&self) -> u32 {
        self.base.saturating_add(self.objects.len() as u32)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjRef, &Object)> {
        self.objects
            .iter()
            .enumerate()
            .map(|(i, o)| (ObjRef(self.base + i as u32), o))
    }
}

impl ObjectLookup for Heap {
    fn object(&self, r: ObjRef) -> Option<&Object> {
        self.get(r)
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        if !self.objects.is_empty() {
            debug!(freed = self.objects.len(), base = self.base, "heap released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_indices_start_at_base() {
        let mut heap = Heap::with_base(3);
        let a = heap.alloc_str("a").unwrap();
        let b = heap.alloc_str("b").unwrap();
        assert_eq!(a.index(), 3);
        assert_eq!(b.index(), 4);
        assert_eq!(heap.end(), 5);
        assert_eq!(heap.get(b).and_then(Object::as_str), Some("b"));
    }

    #[test]
    fn lookup_outside_range_is_none() {
        let mut heap = Heap::with_base(2);
        heap.alloc_str("x").unwrap();
        assert!(heap.get(ObjRef::new(0)).is_none());
        assert!(heap.get(ObjRef::new(1)).is_none());
        assert!(heap.contains(ObjRef::new(2)));
        assert!(!heap.contains(ObjRef::new(3)));
    }

    #[test]
    fn iter_yields_global_refs() {
        let mut heap = Heap::new();
        heap.alloc_str("p").unwrap();
        heap.alloc_str("q").unwrap();
        let refs: Vec<u32> = heap.iter().map(|(r, _)| r.index()).collect();
        assert_eq!(refs, vec![0, 1]);
        assert_eq!(heap.len(), 2);
        assert!(!heap.is_empty());
    }

    #[test]
    fn object_kind() {
        let o = Object::Str("hi".into());
        assert_eq!(o.kind(), "string");
        assert_eq!(o.as_str(), Some("hi"));
    }
}
