//! URI interning shared by every module a world creates.

use crate::features::Feature;
use lutra_lv2_sys::{
    LV2_URID, LV2_URID_Map, LV2_URID_Map_Handle, LV2_URID_Unmap, LV2_URID_Unmap_Handle,
    LV2_URID__map, LV2_URID__unmap,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::{c_char, c_void, CStr, CString};
use std::sync::Arc;

#[derive(Default)]
struct Inner {
    forward: HashMap<String, LV2_URID>,
    // Reverse entries are CStrings so the unmap callback can hand out
    // stable null-terminated pointers. CString's buffer does not move when
    // the Vec grows, so those pointers survive later map() calls.
    reverse: Vec<CString>,
}

/// Bidirectional URI-to-id registry. Ids are dense and start at 0; a given
/// map keeps every assignment for its whole life, so an id handed out once
/// stays valid as long as the map does.
#[derive(Default)]
pub struct SymbolMap {
    inner: Mutex<Inner>,
}

impl SymbolMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `uri`, returning its id. Repeated calls with equal strings
    /// return equal ids; distinct strings get distinct ids.
    pub fn map(&self, uri: &str) -> LV2_URID {
        let mut inner = self.inner.lock();
        if let Some(&id) = inner.forward.get(uri) {
            return id;
        }
        let id = inner.reverse.len() as LV2_URID;
        inner.forward.insert(uri.to_owned(), id);
        inner
            .reverse
            .push(CString::new(uri).unwrap_or_default());
        id
    }

    /// The URI previously assigned to `urid`, or the empty string when the
    /// id was never handed out.
    pub fn unmap(&self, urid: LV2_URID) -> String {
        let inner = self.inner.lock();
        inner
            .reverse
            .get(urid as usize)
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.inner.lock().forward.contains_key(uri)
    }

    /// Whether `urid` was ever handed out by this map.
    pub fn contains_id(&self, urid: LV2_URID) -> bool {
        (urid as usize) < self.inner.lock().reverse.len()
    }

    /// Forget every assignment; the next `map` starts from id 0 again.
    ///
    /// Shutdown only: pointers previously handed to plugins through the
    /// unmap feature dangle afterwards, so no plugin may still be
    /// instantiated against this map.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.forward.clear();
        inner.reverse.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().reverse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().reverse.is_empty()
    }

    fn unmap_ptr(&self, urid: LV2_URID) -> *const c_char {
        static EMPTY: &[u8] = b"\0";
        let inner = self.inner.lock();
        match inner.reverse.get(urid as usize) {
            Some(s) => s.as_ptr(),
            None => EMPTY.as_ptr().cast(),
        }
    }
}

struct MapPayload {
    data: LV2_URID_Map,
    _keep: Arc<SymbolMap>,
}

struct UnmapPayload {
    data: LV2_URID_Unmap,
    _keep: Arc<SymbolMap>,
}

// Safety: the handle pointers target the Arc-kept SymbolMap, whose
// interior is guarded by its own lock.
unsafe impl Send for MapPayload {}
unsafe impl Sync for MapPayload {}
unsafe impl Send for UnmapPayload {}
unsafe impl Sync for UnmapPayload {}

unsafe extern "C" fn map_trampoline(handle: LV2_URID_Map_Handle, uri: *const c_char) -> LV2_URID {
    if handle.is_null() || uri.is_null() {
        return 0;
    }
    let symbols = &*(handle as *const SymbolMap);
    let uri = CStr::from_ptr(uri).to_string_lossy();
    symbols.map(&uri)
}

unsafe extern "C" fn unmap_trampoline(
    handle: LV2_URID_Unmap_Handle,
    urid: LV2_URID,
) -> *const c_char {
    if handle.is_null() {
        static EMPTY: &[u8] = b"\0";
        return EMPTY.as_ptr().cast();
    }
    let symbols = &*(handle as *const SymbolMap);
    symbols.unmap_ptr(urid)
}

/// Build the urid:map feature backed by `symbols`. The feature keeps the
/// map alive through its payload.
pub fn map_feature(symbols: &Arc<SymbolMap>) -> Feature {
    let mut payload = Box::new(MapPayload {
        data: LV2_URID_Map {
            handle: Arc::as_ptr(symbols) as *mut c_void,
            map: Some(map_trampoline),
        },
        _keep: Arc::clone(symbols),
    });
    let data = &mut payload.data as *mut LV2_URID_Map as *mut c_void;
    Feature::new(LV2_URID__map, data, payload)
}

/// Build the urid:unmap feature backed by `symbols`.
pub fn unmap_feature(symbols: &Arc<SymbolMap>) -> Feature {
    let mut payload = Box::new(UnmapPayload {
        data: LV2_URID_Unmap {
            handle: Arc::as_ptr(symbols) as *mut c_void,
            unmap: Some(unmap_trampoline),
        },
        _keep: Arc::clone(symbols),
    });
    let data = &mut payload.data as *mut LV2_URID_Unmap as *mut c_void;
    Feature::new(LV2_URID__unmap, data, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_is_idempotent() {
        let symbols = SymbolMap::new();
        let a = symbols.map("urn:test:alpha");
        let b = symbols.map("urn:test:alpha");
        assert_eq!(a, b);
        assert_eq!(symbols.len(), 1);
    }

    #[test]
    fn test_distinct_uris_get_distinct_ids() {
        let symbols = SymbolMap::new();
        let a = symbols.map("urn:test:alpha");
        let b = symbols.map("urn:test:beta");
        assert_ne!(a, b);
    }

    #[test]
    fn test_unmap_round_trip() {
        let symbols = SymbolMap::new();
        let id = symbols.map("urn:test:alpha");
        assert_eq!(symbols.unmap(id), "urn:test:alpha");
    }

    #[test]
    fn test_unmap_unknown_id_is_empty() {
        let symbols = SymbolMap::new();
        assert_eq!(symbols.unmap(42), "");
    }

    #[test]
    fn test_contains_id_tracks_assignments() {
        let symbols = SymbolMap::new();
        assert!(!symbols.contains_id(0));
        let id = symbols.map("urn:test:alpha");
        assert!(symbols.contains_id(id));
        assert!(!symbols.contains_id(id + 1));
    }

    #[test]
    fn test_clear_resets_assignments() {
        let symbols = SymbolMap::new();
        symbols.map("urn:test:alpha");
        symbols.map("urn:test:beta");
        symbols.clear();
        assert!(symbols.is_empty());
        assert!(!symbols.contains("urn:test:alpha"));
        assert!(!symbols.contains_id(0));
        assert_eq!(symbols.unmap(0), "");
        assert_eq!(symbols.map("urn:test:gamma"), 0);
    }

    #[test]
    fn test_ids_start_at_zero() {
        let symbols = SymbolMap::new();
        assert_eq!(symbols.map("urn:test:first"), 0);
        assert_eq!(symbols.map("urn:test:second"), 1);
    }

    #[test]
    fn test_features_route_through_shared_map() {
        let symbols = Arc::new(SymbolMap::new());
        let map = map_feature(&symbols);
        let unmap = unmap_feature(&symbols);

        let raw_map = unsafe { &*(map.data() as *const LV2_URID_Map) };
        let uri = CString::new("urn:test:feature").unwrap();
        let id = unsafe { (raw_map.map.unwrap())(raw_map.handle, uri.as_ptr()) };
        assert_eq!(id, symbols.map("urn:test:feature"));

        let raw_unmap = unsafe { &*(unmap.data() as *const LV2_URID_Unmap) };
        let back = unsafe { (raw_unmap.unmap.unwrap())(raw_unmap.handle, id) };
        let back = unsafe { CStr::from_ptr(back) };
        assert_eq!(back.to_bytes(), b"urn:test:feature");

        let missing = unsafe { (raw_unmap.unmap.unwrap())(raw_unmap.handle, 999) };
        let missing = unsafe { CStr::from_ptr(missing) };
        assert!(missing.to_bytes().is_empty());
    }
}
