use std::{fmt, sync::Arc};

use once_cell::race::OnceBool;
use tracing::{debug, info};

use crate::{
    heap::HeapDescriptor, services::PlatformServices, system::SystemBasicInfo,
    topology::ProcessorTopology, version::WindowsVersion,
};

/// Platform facts gathered once at startup and read-only afterwards.
pub struct PlatformContext {
    pub(crate) services: Arc<dyn PlatformServices>,
    pub(crate) application_name: String,
    pub(crate) version: WindowsVersion,
    pub(crate) basic: SystemBasicInfo,
    pub(crate) heap: HeapDescriptor,
    pub(crate) topology: ProcessorTopology,
    pub(crate) wow64: OnceBool,
}

impl PlatformContext {
    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    pub fn version(&self) -> &WindowsVersion {
        &self.version
    }

    pub fn basic_info(&self) -> &SystemBasicInfo {
        &self.basic
    }

    pub fn heap(&self) -> &HeapDescriptor {
        &self.heap
    }

    pub fn topology(&self) -> &ProcessorTopology {
        &self.topology
    }

    /// Whether this is a 32-bit process on a 64-bit OS.
    ///
    /// Queried on first use. Threads racing here may each run the query;
    /// they all publish the same answer. A failed query counts as `false`.
    pub fn is_wow64(&self) -> bool {
        self.wow64.get_or_init(|| match self.services.query_is_wow64() {
            Ok(is_wow64) => is_wow64,
            Err(err) => {
                debug!("WOW64 query failed ({}), assuming native", err);
                false
            }
        })
    }

    /// Log the exit and flush a console-attached stdout.
    pub fn prepare_exit(&self, status: i32) {
        info!("{} exiting: {:#010x}", self.application_name, status);
        match self.services.flush_console_output() {
            Ok(flushed) => debug!("console flush: {}", flushed),
            Err(err) => debug!("console flush failed: {}", err),
        }
    }

    pub fn exit(&self, status: i32) -> ! {
        self.prepare_exit(status);
        self.services.terminate(status)
    }
}

impl fmt::Debug for PlatformContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformContext")
            .field("application_name", &self.application_name)
            .field("version", &self.version)
            .field("basic", &self.basic)
            .field("heap", &self.heap)
            .field("topology", &self.topology)
            .finish()
    }
}
