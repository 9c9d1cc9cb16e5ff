//! Host feature ownership and the null-terminated feature table.
//!
//! An LV2 plugin is instantiated against a `const LV2_Feature* const*`
//! table. Every pointer in that table, and everything those pointers reach,
//! must stay valid for the whole life of the instance. [`Feature`] owns all
//! of that memory behind stable heap addresses; [`FeatureArray`] owns the
//! features plus the table itself and is in turn owned by the same struct
//! that owns the native handle (dropped after it — see `module.rs`).

use lutra_lv2_sys::LV2_Feature;
use std::any::Any;
use std::ffi::{c_void, CStr, CString};
use std::ptr;

/// One capability descriptor offered to plugins at instantiation time.
///
/// Owns the URI string, the raw `LV2_Feature`, and an opaque payload (the
/// feature's data struct plus whatever keep-alives it needs). All three
/// live behind their own allocations, so the raw pointers handed to the
/// plugin survive moves of the `Feature` value itself.
pub struct Feature {
    uri: CString,
    raw: Box<LV2_Feature>,
    _payload: Option<Box<dyn Any + Send + Sync>>,
}

// Safety: the raw pointers inside point at heap memory owned by this
// Feature; the payload is required to be Send + Sync.
unsafe impl Send for Feature {}
unsafe impl Sync for Feature {}

impl Feature {
    /// Build a feature whose data pointer reaches into `payload`.
    ///
    /// `data` must point into `payload` (or be null); the payload keeps it
    /// alive for as long as the feature exists.
    pub fn new(uri: &str, data: *mut c_void, payload: Box<dyn Any + Send + Sync>) -> Self {
        Self::build(uri, data, Some(payload))
    }

    /// A feature with no data, identified by URI alone.
    pub fn empty(uri: &str) -> Self {
        Self::build(uri, ptr::null_mut(), None)
    }

    fn build(uri: &str, data: *mut c_void, payload: Option<Box<dyn Any + Send + Sync>>) -> Self {
        let uri = CString::new(uri).unwrap_or_default();
        let raw = Box::new(LV2_Feature {
            URI: uri.as_ptr(),
            data,
        });
        Self {
            uri,
            raw,
            _payload: payload,
        }
    }

    pub fn uri(&self) -> &CStr {
        &self.uri
    }

    pub fn data(&self) -> *mut c_void {
        self.raw.data
    }

    /// Pointer to the raw descriptor, stable for the feature's lifetime.
    pub fn as_raw(&self) -> *const LV2_Feature {
        &*self.raw
    }
}

/// Ordered, URI-deduplicated feature collection plus its lazily rebuilt
/// null-terminated pointer table.
#[derive(Default)]
pub struct FeatureArray {
    features: Vec<Feature>,
    table: Vec<*const LV2_Feature>,
    dirty: bool,
}

// Safety: the table only points at the owned features.
unsafe impl Send for FeatureArray {}
unsafe impl Sync for FeatureArray {}

impl FeatureArray {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `feature`. Returns false (dropping the rejected
    /// instance) when a feature with the same URI is already present.
    pub fn add(&mut self, feature: Feature) -> bool {
        if self.contains_c(feature.uri()) {
            tracing::debug!(uri = ?feature.uri(), "duplicate feature rejected");
            return false;
        }
        self.features.push(feature);
        self.dirty = true;
        true
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.find(uri).is_some()
    }

    fn contains_c(&self, uri: &CStr) -> bool {
        self.features.iter().any(|f| f.uri() == uri)
    }

    /// Most-recently-added feature with this URI, if any.
    pub fn find(&self, uri: &str) -> Option<&Feature> {
        self.features
            .iter()
            .rev()
            .find(|f| f.uri().to_bytes() == uri.as_bytes())
    }

    /// Data pointer of the most-recently-added feature with this URI.
    pub fn data(&self, uri: &str) -> Option<*mut c_void> {
        self.find(uri).map(Feature::data)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// The null-terminated pointer table, rebuilt only when features were
    /// added since the last call. The returned pointer stays valid until
    /// the next `add` — an instantiated module never mutates its array, so
    /// for plugins the table is stable for the instance's whole life.
    pub fn as_ptr(&mut self) -> *const *const LV2_Feature {
        if self.dirty || self.table.is_empty() {
            self.table.clear();
            self.table.extend(self.features.iter().map(Feature::as_raw));
            self.table.push(ptr::null());
            self.dirty = false;
        }
        self.table.as_ptr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_uri_keeps_first() {
        let mut array = FeatureArray::new();
        let first = Feature::new(
            "urn:test:feat",
            0x1 as *mut c_void,
            Box::new(()) as Box<dyn Any + Send + Sync>,
        );
        let second = Feature::new(
            "urn:test:feat",
            0x2 as *mut c_void,
            Box::new(()) as Box<dyn Any + Send + Sync>,
        );
        assert!(array.add(first));
        assert!(!array.add(second));
        assert_eq!(array.len(), 1);
        assert_eq!(array.data("urn:test:feat"), Some(0x1 as *mut c_void));
    }

    #[test]
    fn test_table_is_null_terminated() {
        let mut array = FeatureArray::new();
        array.add(Feature::empty("urn:test:a"));
        array.add(Feature::empty("urn:test:b"));
        array.add(Feature::empty("urn:test:c"));

        let table = array.as_ptr();
        // N accepted features produce exactly N+1 entries, last one null.
        let expected: [&[u8]; 3] = [b"urn:test:a", b"urn:test:b", b"urn:test:c"];
        for (i, want) in expected.iter().enumerate() {
            let entry = unsafe { *table.add(i) };
            assert!(!entry.is_null());
            let uri = unsafe { CStr::from_ptr((*entry).URI) };
            assert_eq!(uri.to_bytes(), *want);
        }
        let last = unsafe { *table.add(3) };
        assert!(last.is_null());
    }

    #[test]
    fn test_find_prefers_most_recent() {
        let mut array = FeatureArray::new();
        array.add(Feature::empty("urn:test:a"));
        array.add(Feature::empty("urn:test:b"));
        let found = array.find("urn:test:b").unwrap();
        assert_eq!(found.uri().to_bytes(), b"urn:test:b");
    }

    #[test]
    fn test_table_stable_between_calls() {
        let mut array = FeatureArray::new();
        array.add(Feature::empty("urn:test:a"));
        let first = array.as_ptr();
        let second = array.as_ptr();
        assert_eq!(first, second);
    }
}
