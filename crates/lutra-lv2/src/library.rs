//! Dynamic loading of plugin binaries.

use crate::error::{Error, Result};
use crate::metadata::{DescriptorSource, RawDescriptor};
use libloading::Library;
use lutra_lv2_sys::{LV2_Descriptor_Function, LV2_DESCRIPTOR_SYMBOL};
use std::ffi::CStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An open plugin shared object. Descriptors resolved from it keep the
/// mapping alive, so the library may be dropped before its plugins.
pub struct PluginLibrary {
    path: PathBuf,
    library: Arc<Library>,
    entry: LV2_Descriptor_Function,
}

impl PluginLibrary {
    /// Open the binary at `path` and resolve its descriptor entry point.
    pub fn open(path: &Path) -> Result<Self> {
        let library = unsafe { Library::new(path) }?;
        let entry = unsafe {
            *library.get::<LV2_Descriptor_Function>(LV2_DESCRIPTOR_SYMBOL.as_bytes())?
        };
        tracing::debug!(path = %path.display(), "opened plugin library");
        Ok(Self {
            path: path.to_path_buf(),
            library: Arc::new(library),
            entry,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every descriptor URI the binary exports, in index order.
    pub fn plugin_uris(&self) -> Vec<String> {
        let mut uris = Vec::new();
        for index in 0.. {
            let descriptor = unsafe { (self.entry)(index) };
            if descriptor.is_null() {
                break;
            }
            let uri = unsafe { CStr::from_ptr((*descriptor).URI) };
            uris.push(uri.to_string_lossy().into_owned());
        }
        uris
    }

    fn find(&self, uri: &str) -> Option<*const lutra_lv2_sys::LV2_Descriptor> {
        for index in 0.. {
            let descriptor = unsafe { (self.entry)(index) };
            if descriptor.is_null() {
                return None;
            }
            let found = unsafe { CStr::from_ptr((*descriptor).URI) };
            if found.to_bytes() == uri.as_bytes() {
                return Some(descriptor);
            }
        }
        None
    }
}

impl DescriptorSource for PluginLibrary {
    fn resolve(&self, uri: &str) -> Result<RawDescriptor> {
        let descriptor = self
            .find(uri)
            .ok_or_else(|| Error::MissingDescriptor(uri.to_owned()))?;
        Ok(unsafe { RawDescriptor::from_raw(descriptor, Some(Arc::clone(&self.library))) })
    }
}
