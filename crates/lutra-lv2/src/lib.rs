//! LV2 plugin hosting core.
//!
//! A [`World`] catalogs plugins and answers hosting verdicts; a [`Module`]
//! is one hosted instance with its feature table, port connections, and
//! run cycle. Deferred work rides the bridge in `lutra-rt`: the plugin
//! schedules from the real-time thread, a shared queue thread does the
//! work, and responses come back on the module's private channel.

pub mod error;
pub mod features;
pub mod library;
pub mod metadata;
pub mod module;
pub mod urid;
pub mod world;

pub use error::{Error, Result, Unsupported};
pub use features::{Feature, FeatureArray};
pub use library::PluginLibrary;
pub use metadata::{
    DescriptorSource, PluginDescriptor, PortDirection, PortInfo, PortType, RawDescriptor,
};
pub use module::{Module, ModuleState, WorkStatus};
pub use urid::SymbolMap;
pub use world::{DrainPolicy, FeatureRegistry, World, WorldConfig};
