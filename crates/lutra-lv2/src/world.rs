//! The plugin catalog and module factory.

use crate::error::{Error, Result, Unsupported};
use crate::metadata::PluginDescriptor;
use crate::module::Module;
use crate::urid::SymbolMap;
use lutra_lv2_sys::{LV2_URID__map, LV2_URID__unmap, LV2_WORKER__schedule};
use lutra_rt::WorkQueue;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// How many response frames `Module::run` consumes per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainPolicy {
    /// At most one frame per cycle. Responses queue up under load but each
    /// cycle's response cost stays bounded.
    #[default]
    Single,
    /// Every pending frame, every cycle.
    All,
}

/// The set of host feature URIs offered to plugins. A plugin whose
/// required features are all in this set can be hosted; anything else is
/// rejected up front.
#[derive(Debug, Clone)]
pub struct FeatureRegistry {
    uris: Vec<String>,
}

impl Default for FeatureRegistry {
    fn default() -> Self {
        Self {
            uris: vec![
                LV2_URID__map.to_owned(),
                LV2_URID__unmap.to_owned(),
                LV2_WORKER__schedule.to_owned(),
            ],
        }
    }
}

impl FeatureRegistry {
    pub fn supports(&self, uri: &str) -> bool {
        self.uris.iter().any(|u| u == uri)
    }

    pub fn add(&mut self, uri: &str) {
        if !self.supports(uri) {
            self.uris.push(uri.to_owned());
        }
    }

    pub fn uris(&self) -> &[String] {
        &self.uris
    }
}

#[derive(Debug, Clone)]
pub struct WorldConfig {
    /// Upper bound on background work threads; queues are shared by
    /// modules round-robin once this many exist.
    pub work_threads: usize,
    /// Byte capacity of each shared request channel.
    pub request_capacity: usize,
    /// Byte capacity of each module's private response channel.
    pub response_capacity: usize,
    pub drain: DrainPolicy,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            work_threads: 2,
            request_capacity: 2048,
            response_capacity: 2048,
            drain: DrainPolicy::default(),
        }
    }
}

/// Owns the plugin catalog, the shared symbol map, and the pool of work
/// queues modules schedule onto.
pub struct World {
    config: WorldConfig,
    symbols: Arc<SymbolMap>,
    registry: FeatureRegistry,
    plugins: Mutex<HashMap<String, Arc<PluginDescriptor>>>,
    queues: Mutex<Vec<Arc<WorkQueue>>>,
    next_queue: AtomicUsize,
}

impl Default for World {
    fn default() -> Self {
        Self::new(WorldConfig::default())
    }
}

impl World {
    pub fn new(config: WorldConfig) -> Self {
        Self::with_features(config, FeatureRegistry::default())
    }

    pub fn with_features(config: WorldConfig, registry: FeatureRegistry) -> Self {
        Self {
            config,
            symbols: Arc::new(SymbolMap::new()),
            registry,
            plugins: Mutex::new(HashMap::new()),
            queues: Mutex::new(Vec::new()),
            next_queue: AtomicUsize::new(0),
        }
    }

    pub fn symbols(&self) -> &Arc<SymbolMap> {
        &self.symbols
    }

    pub fn features(&self) -> &FeatureRegistry {
        &self.registry
    }

    /// Add `descriptor` to the catalog, replacing any previous entry with
    /// the same URI.
    pub fn register(&self, descriptor: PluginDescriptor) {
        let uri = descriptor.uri.clone();
        tracing::debug!(%uri, "registered plugin");
        self.plugins.lock().insert(uri, Arc::new(descriptor));
    }

    pub fn plugin(&self, uri: &str) -> Option<Arc<PluginDescriptor>> {
        self.plugins.lock().get(uri).cloned()
    }

    pub fn plugin_uris(&self) -> Vec<String> {
        self.plugins.lock().keys().cloned().collect()
    }

    pub fn is_plugin_available(&self, uri: &str) -> bool {
        self.plugins.lock().contains_key(uri)
    }

    pub fn is_feature_supported(&self, uri: &str) -> bool {
        self.registry.supports(uri)
    }

    /// Full hosting verdict: available, required features all offered,
    /// and every port of a type the host can drive.
    pub fn supported_verdict(&self, uri: &str) -> std::result::Result<(), Unsupported> {
        let plugin = match self.plugin(uri) {
            Some(p) => p,
            None => return Err(Unsupported::NotAvailable(uri.to_owned())),
        };
        for feature in &plugin.required_features {
            if !self.registry.supports(feature) {
                return Err(Unsupported::MissingFeature(feature.clone()));
            }
        }
        for port in &plugin.ports {
            if !port.ty.is_hosted() {
                return Err(Unsupported::PortType {
                    index: port.index,
                    ty: port.ty,
                });
            }
        }
        Ok(())
    }

    pub fn is_plugin_supported(&self, uri: &str) -> bool {
        match self.supported_verdict(uri) {
            Ok(()) => true,
            Err(reason) => {
                tracing::debug!(%uri, %reason, "plugin rejected");
                false
            }
        }
    }

    /// Instantiable handle for `uri`. The module starts uninstantiated;
    /// call [`Module::instantiate`] with a sample rate to bring it up.
    pub fn create_module(&self, uri: &str) -> Result<Module> {
        let plugin = self
            .plugin(uri)
            .ok_or_else(|| Error::NotFound(uri.to_owned()))?;
        self.supported_verdict(uri)?;
        let queue = self.next_work_queue();
        Ok(Module::new(
            plugin,
            Arc::clone(&self.symbols),
            queue,
            self.config.response_capacity,
            self.config.drain,
        ))
    }

    /// Round-robin over the queue pool, creating queues lazily up to the
    /// configured thread count.
    fn next_work_queue(&self) -> Arc<WorkQueue> {
        let mut queues = self.queues.lock();
        let limit = self.config.work_threads.max(1);
        if queues.len() < limit {
            let name = format!("lv2-worker-{}", queues.len() + 1);
            let queue = Arc::new(WorkQueue::with_capacity(
                &name,
                self.config.request_capacity,
            ));
            queues.push(Arc::clone(&queue));
            return queue;
        }
        let index = self.next_queue.fetch_add(1, Ordering::Relaxed) % queues.len();
        Arc::clone(&queues[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::metadata::{
        DescriptorSource, PortDirection, PortInfo, PortType, RawDescriptor,
    };

    struct NullSource;

    impl DescriptorSource for NullSource {
        fn resolve(&self, uri: &str) -> Result<RawDescriptor> {
            Err(Error::MissingDescriptor(uri.to_owned()))
        }
    }

    fn audio_port(index: u32) -> PortInfo {
        PortInfo {
            index,
            symbol: format!("port_{index}"),
            name: format!("Port {index}"),
            ty: PortType::Audio,
            direction: if index % 2 == 0 {
                PortDirection::Input
            } else {
                PortDirection::Output
            },
        }
    }

    fn descriptor(uri: &str) -> PluginDescriptor {
        PluginDescriptor {
            uri: uri.to_owned(),
            name: "Test Plugin".to_owned(),
            bundle_path: "/tmp/test.lv2".to_owned(),
            required_features: Vec::new(),
            provided_extensions: Vec::new(),
            ports: vec![audio_port(0), audio_port(1)],
            source: Arc::new(NullSource),
        }
    }

    #[test]
    fn test_unknown_plugin_is_not_available() {
        let world = World::default();
        assert!(!world.is_plugin_available("urn:test:absent"));
        assert_eq!(
            world.supported_verdict("urn:test:absent"),
            Err(Unsupported::NotAvailable("urn:test:absent".into()))
        );
    }

    #[test]
    fn test_registered_plugin_is_supported() {
        let world = World::default();
        world.register(descriptor("urn:test:plain"));
        assert!(world.is_plugin_available("urn:test:plain"));
        assert!(world.is_plugin_supported("urn:test:plain"));
    }

    #[test]
    fn test_missing_required_feature_rejects() {
        let world = World::default();
        let mut plugin = descriptor("urn:test:needy");
        plugin
            .required_features
            .push("urn:test:unavailable-feature".to_owned());
        world.register(plugin);
        assert_eq!(
            world.supported_verdict("urn:test:needy"),
            Err(Unsupported::MissingFeature(
                "urn:test:unavailable-feature".into()
            ))
        );
    }

    #[test]
    fn test_supported_required_features_pass() {
        let world = World::default();
        let mut plugin = descriptor("urn:test:worker-user");
        plugin
            .required_features
            .push(LV2_WORKER__schedule.to_owned());
        world.register(plugin);
        assert!(world.is_plugin_supported("urn:test:worker-user"));
    }

    #[test]
    fn test_unhosted_port_type_rejects() {
        let world = World::default();
        for (uri, ty) in [
            ("urn:test:cv", PortType::Cv),
            ("urn:test:atom", PortType::Atom),
            ("urn:test:event", PortType::Event),
        ] {
            let mut plugin = descriptor(uri);
            plugin.ports.push(PortInfo {
                index: 2,
                symbol: "extra".to_owned(),
                name: "Extra".to_owned(),
                ty,
                direction: PortDirection::Input,
            });
            world.register(plugin);
            assert_eq!(
                world.supported_verdict(uri),
                Err(Unsupported::PortType { index: 2, ty })
            );
            assert!(!world.is_plugin_supported(uri));
        }
    }

    #[test]
    fn test_create_module_for_unknown_uri_fails() {
        let world = World::default();
        assert!(matches!(
            world.create_module("urn:test:absent"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_feature_registry_defaults() {
        let registry = FeatureRegistry::default();
        assert!(registry.supports(LV2_URID__map));
        assert!(registry.supports(LV2_URID__unmap));
        assert!(registry.supports(LV2_WORKER__schedule));
        assert!(!registry.supports("urn:test:other"));
    }
}
