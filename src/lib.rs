//! Process-wide platform facts, gathered once at startup.
//!
//! [`Bootstrapper`] classifies the OS release, reads the basic system
//! information, creates the process heap and maps the processor groups.
//! Only the heap (and any registered subsystem initializer) can fail the
//! bootstrap; every query degrades to a safe default instead.
//!
//! ```no_run
//! let context = platboot::Bootstrapper::native().run()?;
//! println!("{} processors", context.topology().processor_count());
//! # Ok::<(), platboot::BootstrapError>(())
//! ```

#[macro_use]
pub mod error;
pub mod bootstrap;
pub mod context;
pub mod global;
pub mod heap;
pub mod services;
pub mod sys;
pub mod system;
pub mod topology;
#[cfg(windows)]
mod utils;
pub mod version;

pub use bootstrap::{BootstrapConfig, Bootstrapper, InitResult};
pub use context::PlatformContext;
pub use error::{BootstrapError, WindowsApiError, STATUS_UNSUCCESSFUL};
pub use heap::{HeapDescriptor, HeapHandle, HeapKind, HeapStrategy};
pub use services::PlatformServices;
pub use system::SystemBasicInfo;
pub use topology::{KAffinity, ProcessorTopology};
pub use version::{OsVersionInfo, VersionTag, WindowsVersion};

/// Bootstrap against the host OS with `config` and install the result
/// as the process context.
pub fn initialize(config: BootstrapConfig) -> Result<&'static PlatformContext, BootstrapError> {
    global::install(Bootstrapper::native().config(config).run()?)
}
