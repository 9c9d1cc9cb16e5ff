//! Static plugin metadata: ports, descriptors, and the source hook that
//! resolves a registered plugin to its raw entry point.

use crate::error::Result;
use lutra_lv2_sys::{self as sys, LV2_Descriptor};
use std::fmt;
use std::sync::Arc;

/// Buffer contract of a single port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortType {
    /// One f32 per frame.
    Audio,
    /// One f32 per block.
    Control,
    Cv,
    Atom,
    Event,
    Unknown,
}

impl PortType {
    pub fn from_uri(uri: &str) -> Self {
        match uri {
            sys::LV2_CORE__AudioPort => Self::Audio,
            sys::LV2_CORE__ControlPort => Self::Control,
            sys::LV2_CORE__CVPort => Self::Cv,
            sys::LV2_ATOM__AtomPort => Self::Atom,
            sys::LV2_EVENT__EventPort => Self::Event,
            _ => Self::Unknown,
        }
    }

    /// Whether the host knows how to drive a port of this type.
    pub fn is_hosted(&self) -> bool {
        matches!(self, Self::Audio | Self::Control)
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Audio => "audio",
            Self::Control => "control",
            Self::Cv => "CV",
            Self::Atom => "atom",
            Self::Event => "event",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

/// Everything the host knows about one port before instantiation.
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub index: u32,
    pub symbol: String,
    pub name: String,
    pub ty: PortType,
    pub direction: PortDirection,
}

/// Resolves a plugin URI to its raw descriptor. Implemented by the dynamic
/// library loader and, in tests, by in-process plugin tables.
pub trait DescriptorSource: Send + Sync {
    fn resolve(&self, uri: &str) -> Result<RawDescriptor>;
}

/// A raw plugin entry point plus whatever owns the code it points into.
pub struct RawDescriptor {
    ptr: *const LV2_Descriptor,
    // Keeps the shared object mapped while the pointer is live.
    _library: Option<Arc<libloading::Library>>,
}

// Safety: the descriptor is immutable static data inside the library (or
// the test binary); the Arc keeps the mapping alive.
unsafe impl Send for RawDescriptor {}
unsafe impl Sync for RawDescriptor {}

impl RawDescriptor {
    /// # Safety
    ///
    /// `ptr` must point at a valid descriptor that outlives the returned
    /// value. Pass the owning library when one exists so the mapping
    /// cannot be unloaded underneath the pointer.
    pub unsafe fn from_raw(
        ptr: *const LV2_Descriptor,
        library: Option<Arc<libloading::Library>>,
    ) -> Self {
        Self {
            ptr,
            _library: library,
        }
    }

    pub fn as_ptr(&self) -> *const LV2_Descriptor {
        self.ptr
    }

    pub fn descriptor(&self) -> &LV2_Descriptor {
        unsafe { &*self.ptr }
    }
}

/// Catalog entry for one registered plugin.
#[derive(Clone)]
pub struct PluginDescriptor {
    pub uri: String,
    pub name: String,
    pub bundle_path: String,
    /// Feature URIs the plugin refuses to instantiate without.
    pub required_features: Vec<String>,
    /// Extension URIs the plugin exposes through `extension_data`.
    pub provided_extensions: Vec<String>,
    pub ports: Vec<PortInfo>,
    pub source: Arc<dyn DescriptorSource>,
}

impl PluginDescriptor {
    pub fn requires_feature(&self, uri: &str) -> bool {
        self.required_features.iter().any(|f| f == uri)
    }

    pub fn provides_extension(&self, uri: &str) -> bool {
        self.provided_extensions.iter().any(|e| e == uri)
    }

    pub fn port(&self, index: u32) -> Option<&PortInfo> {
        self.ports.iter().find(|p| p.index == index)
    }

    pub fn port_count(&self) -> u32 {
        self.ports.len() as u32
    }
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("uri", &self.uri)
            .field("name", &self.name)
            .field("ports", &self.ports.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_type_from_uri() {
        assert_eq!(PortType::from_uri(sys::LV2_CORE__AudioPort), PortType::Audio);
        assert_eq!(PortType::from_uri(sys::LV2_CORE__CVPort), PortType::Cv);
        assert_eq!(PortType::from_uri("urn:test:bogus"), PortType::Unknown);
    }

    #[test]
    fn test_only_audio_and_control_are_hosted() {
        assert!(PortType::Audio.is_hosted());
        assert!(PortType::Control.is_hosted());
        assert!(!PortType::Cv.is_hosted());
        assert!(!PortType::Atom.is_hosted());
        assert!(!PortType::Event.is_hosted());
        assert!(!PortType::Unknown.is_hosted());
    }
}
