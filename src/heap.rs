use std::{ffi::c_void, fmt, ptr::NonNull};

use strum_macros::{Display, EnumString};
use tracing::{debug, error, warn};

use crate::{
    error::BootstrapError,
    services::PlatformServices,
    version::{VersionTag, WindowsVersion},
};

pub const HEAP_GROWABLE: u32 = 0x0000_0002;
pub const HEAP_CREATE_SEGMENT_HEAP: u32 = 0x0000_0100;
pub const HEAP_CLASS_1: u32 = 0x0000_1000;

pub const DEFAULT_CLASSIC_RESERVE: usize = 2 * 1024 * 1024;
pub const DEFAULT_CLASSIC_COMMIT: usize = 1024 * 1024;

/// Opaque process heap handle. Never null.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct HeapHandle {
    h: NonNull<c_void>,
}

// The handle is an address the OS heap manager owns; it is never
// dereferenced here and the heap serializes its own access.
unsafe impl Send for HeapHandle {}
unsafe impl Sync for HeapHandle {}

impl HeapHandle {
    pub fn new(h: *mut c_void) -> Option<Self> {
        NonNull::new(h).map(|h| HeapHandle { h })
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.h.as_ptr()
    }
}

impl fmt::Debug for HeapHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HeapHandle({:p})", self.h)
    }
}

/// Arguments for the heap-creation primitive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapRequest {
    pub flags: u32,
    pub reserve: usize,
    pub commit: usize,
}

impl HeapRequest {
    pub fn segment() -> Self {
        HeapRequest {
            flags: HEAP_GROWABLE | HEAP_CREATE_SEGMENT_HEAP | HEAP_CLASS_1,
            reserve: 0,
            commit: 0,
        }
    }

    pub fn classic(reserve: usize, commit: usize) -> Self {
        HeapRequest {
            flags: HEAP_GROWABLE | HEAP_CLASS_1,
            reserve,
            commit,
        }
    }

    pub fn is_segment(&self) -> bool {
        self.flags & HEAP_CREATE_SEGMENT_HEAP != 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum HeapCompatibility {
    LowFragmentation = 2,
}

/// How the process heap is chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum HeapStrategy {
    /// Segment heap when the OS supports it, classic heap otherwise.
    Auto,
    ClassicOnly,
    /// Adopt the process default heap instead of creating one.
    ProcessDefault,
}

impl Default for HeapStrategy {
    fn default() -> Self {
        HeapStrategy::Auto
    }
}

/// Which backend ended up serving the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum HeapKind {
    #[strum(serialize = "segment")]
    Segment,
    #[strum(serialize = "classic")]
    Classic,
    #[strum(serialize = "process default")]
    ProcessDefault,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapDescriptor {
    pub handle: HeapHandle,
    pub kind: HeapKind,
    /// `Some` only for a classic heap whose tuning was applied.
    pub compatibility: Option<HeapCompatibility>,
}

pub struct HeapProvisioner<'a> {
    services: &'a dyn PlatformServices,
    strategy: HeapStrategy,
    segment_min_tier: VersionTag,
    classic_reserve: usize,
    classic_commit: usize,
}

impl<'a> HeapProvisioner<'a> {
    pub fn new(services: &'a dyn PlatformServices) -> Self {
        HeapProvisioner {
            services,
            strategy: HeapStrategy::Auto,
            segment_min_tier: VersionTag::Win8,
            classic_reserve: DEFAULT_CLASSIC_RESERVE,
            classic_commit: DEFAULT_CLASSIC_COMMIT,
        }
    }

    pub fn strategy(mut self, strategy: HeapStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn segment_min_tier(mut self, tier: VersionTag) -> Self {
        self.segment_min_tier = tier;
        self
    }

    pub fn classic_sizes(mut self, reserve: usize, commit: usize) -> Self {
        self.classic_reserve = reserve;
        self.classic_commit = commit;
        self
    }

    /// Create the process heap. Both backends failing is fatal.
    pub fn provision(&self, version: &WindowsVersion) -> Result<HeapDescriptor, BootstrapError> {
        if self.strategy == HeapStrategy::ProcessDefault {
            return self
                .services
                .process_heap()
                .map(|handle| HeapDescriptor {
                    handle,
                    kind: HeapKind::ProcessDefault,
                    compatibility: None,
                })
                .ok_or_else(|| {
                    error!("process default heap unavailable");
                    BootstrapError::HeapUnavailable
                });
        }

        if self.strategy == HeapStrategy::Auto && version.at_least(self.segment_min_tier) {
            if let Some(handle) = self.services.create_heap(&HeapRequest::segment()) {
                return Ok(HeapDescriptor {
                    handle,
                    kind: HeapKind::Segment,
                    compatibility: None,
                });
            }
            debug!("segment heap creation failed, falling back to the classic heap");
        }

        let request = HeapRequest::classic(self.classic_reserve, self.classic_commit);
        let handle = match self.services.create_heap(&request) {
            Some(handle) => handle,
            None => {
                error!("classic heap creation failed");
                return Err(BootstrapError::HeapUnavailable);
            }
        };

        let compatibility = match self
            .services
            .set_heap_compatibility(handle, HeapCompatibility::LowFragmentation)
        {
            Ok(()) => Some(HeapCompatibility::LowFragmentation),
            Err(err) => {
                warn!("low-fragmentation mode not applied: {}", err);
                None
            }
        };

        Ok(HeapDescriptor {
            handle,
            kind: HeapKind::Classic,
            compatibility,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{sys::fake::FakeServices, version::OsVersionInfo};

    fn win(build: u32) -> WindowsVersion {
        WindowsVersion::from_info(OsVersionInfo {
            major: 10,
            minor: 0,
            build,
        })
    }

    #[test]
    fn segment_heap_first() {
        let services = FakeServices::single_group(4);
        let heap = HeapProvisioner::new(&services).provision(&win(19045)).unwrap();
        assert_eq!(heap.kind, HeapKind::Segment);
        assert_eq!(heap.compatibility, None);
        assert_eq!(services.heap_requests(), vec![HeapRequest::segment()]);
    }

    #[test]
    fn segment_failure_falls_back_to_tuned_classic() {
        let services = FakeServices::single_group(4);
        services.fail_segment_heap();
        let heap = HeapProvisioner::new(&services).provision(&win(19045)).unwrap();
        assert_eq!(heap.kind, HeapKind::Classic);
        assert_eq!(heap.compatibility, Some(HeapCompatibility::LowFragmentation));
        assert_eq!(
            services.heap_requests(),
            vec![
                HeapRequest::segment(),
                HeapRequest::classic(DEFAULT_CLASSIC_RESERVE, DEFAULT_CLASSIC_COMMIT),
            ]
        );
        assert_eq!(
            services.compatibility_calls(),
            vec![(heap.handle, HeapCompatibility::LowFragmentation)]
        );
    }

    #[test]
    fn old_release_skips_segment_attempt() {
        let services = FakeServices::single_group(4);
        let heap = HeapProvisioner::new(&services)
            .provision(&WindowsVersion::unknown())
            .unwrap();
        assert_eq!(heap.kind, HeapKind::Classic);
        assert_eq!(services.heap_requests().len(), 1);
        assert!(!services.heap_requests()[0].is_segment());
    }

    #[test]
    fn tuning_failure_is_not_fatal() {
        let services = FakeServices::single_group(4);
        services.fail_segment_heap();
        services.fail_heap_tuning();
        let heap = HeapProvisioner::new(&services).provision(&win(22631)).unwrap();
        assert_eq!(heap.kind, HeapKind::Classic);
        assert_eq!(heap.compatibility, None);
    }

    #[test]
    fn both_failing_is_fatal() {
        let services = FakeServices::single_group(4);
        services.fail_segment_heap();
        services.fail_classic_heap();
        let err = HeapProvisioner::new(&services).provision(&win(22631)).unwrap_err();
        assert!(matches!(err, BootstrapError::HeapUnavailable));
        assert!(services.compatibility_calls().is_empty());
    }

    #[test]
    fn classic_only_and_custom_sizes() {
        let services = FakeServices::single_group(4);
        HeapProvisioner::new(&services)
            .strategy(HeapStrategy::ClassicOnly)
            .classic_sizes(4096, 4096)
            .provision(&win(26100))
            .unwrap();
        assert_eq!(services.heap_requests(), vec![HeapRequest::classic(4096, 4096)]);
    }

    #[test]
    fn process_default_creates_nothing() {
        let services = FakeServices::single_group(4);
        let heap = HeapProvisioner::new(&services)
            .strategy(HeapStrategy::ProcessDefault)
            .provision(&win(26100))
            .unwrap();
        assert_eq!(heap.kind, HeapKind::ProcessDefault);
        assert!(services.heap_requests().is_empty());
    }

    #[test]
    fn strategy_parses_from_flags() {
        assert_eq!("classic-only".parse::<HeapStrategy>(), Ok(HeapStrategy::ClassicOnly));
        assert_eq!(HeapStrategy::ProcessDefault.to_string(), "process-default");
    }
}
