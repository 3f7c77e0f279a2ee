use std::{error, sync::Arc};

use once_cell::race::OnceBool;
use tracing::{debug, error, info};

use crate::{
    context::PlatformContext,
    error::BootstrapError,
    heap::{
        HeapDescriptor, HeapProvisioner, HeapStrategy, DEFAULT_CLASSIC_COMMIT,
        DEFAULT_CLASSIC_RESERVE,
    },
    services::PlatformServices,
    sys::NativeServices,
    system::SystemBasicInfo,
    topology::ProcessorTopology,
    version::{VersionTag, WindowsVersion},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootstrapConfig {
    pub application_name: String,
    pub heap_strategy: HeapStrategy,
    /// Oldest release the segment heap is attempted on.
    pub segment_heap_min_tier: VersionTag,
    pub classic_heap_reserve: usize,
    pub classic_heap_commit: usize,
    pub utf8_console: bool,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        BootstrapConfig {
            application_name: env!("CARGO_PKG_NAME").to_owned(),
            heap_strategy: HeapStrategy::Auto,
            segment_heap_min_tier: VersionTag::Win8,
            classic_heap_reserve: DEFAULT_CLASSIC_RESERVE,
            classic_heap_commit: DEFAULT_CLASSIC_COMMIT,
            utf8_console: false,
        }
    }
}

pub type InitResult = Result<(), Box<dyn error::Error + Send + Sync>>;

type Initializer = Box<dyn FnOnce(&HeapDescriptor) -> InitResult>;

/// Runs the startup sequence and yields the [`PlatformContext`].
///
/// Order: runtime hints, version, basic information, heap, subsystem
/// initializers, processor topology. The heap and every initializer are
/// fatal; the first failure stops the sequence and nothing after it runs.
/// Steps already taken are not undone.
pub struct Bootstrapper {
    services: Arc<dyn PlatformServices>,
    config: BootstrapConfig,
    initializers: Vec<(&'static str, Initializer)>,
}

impl Bootstrapper {
    pub fn new(services: Arc<dyn PlatformServices>) -> Self {
        Bootstrapper {
            services,
            config: BootstrapConfig::default(),
            initializers: Vec::new(),
        }
    }

    /// Bootstrap against the host OS.
    pub fn native() -> Self {
        Self::new(Arc::new(NativeServices::new()))
    }

    pub fn config(mut self, config: BootstrapConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a subsystem initializer. They run in registration order,
    /// once the heap exists.
    pub fn with_initializer<F>(mut self, name: &'static str, init: F) -> Self
    where
        F: FnOnce(&HeapDescriptor) -> InitResult + 'static,
    {
        self.initializers.push((name, Box::new(init)));
        self
    }

    pub fn run(self) -> Result<PlatformContext, BootstrapError> {
        let Bootstrapper {
            services,
            config,
            initializers,
        } = self;
        let services_ref: &dyn PlatformServices = &*services;

        info!("{} initializing", config.application_name);

        if let Err(err) = services_ref.apply_runtime_hints(config.utf8_console) {
            debug!("runtime hints not applied: {}", err);
        }

        let version = WindowsVersion::query(services_ref);
        debug!("{} ({})", version.name, version.string);

        let basic = SystemBasicInfo::query(services_ref);

        let heap = HeapProvisioner::new(services_ref)
            .strategy(config.heap_strategy)
            .segment_min_tier(config.segment_heap_min_tier)
            .classic_sizes(config.classic_heap_reserve, config.classic_heap_commit)
            .provision(&version)?;
        debug!("{} heap at {:?}", heap.kind, heap.handle);

        for (name, init) in initializers {
            if let Err(source) = init(&heap) {
                error!("{} initialization failed: {}", name, source);
                return Err(BootstrapError::Subsystem { name, source });
            }
        }

        let topology = ProcessorTopology::discover(services_ref, &basic);
        debug!(
            "{} processor(s) in {} group(s)",
            topology.processor_count(),
            topology.group_count()
        );

        Ok(PlatformContext {
            services,
            application_name: config.application_name,
            version,
            basic,
            heap,
            topology,
            wow64: OnceBool::new(),
        })
    }
}
