//! Hosts without the Windows primitives.
//!
//! There is no version to classify and no segment heap. Processors are
//! counted with `num_cpus` and laid out the way Windows would group them.

use std::{
    ffi::c_void,
    io::{self, IsTerminal, Write},
};

use crate::{
    error::{ApiResult, WindowsApiError},
    heap::{HeapCompatibility, HeapHandle, HeapRequest},
    services::PlatformServices,
    system::SystemBasicInfo,
    topology::{GroupRelation, KAffinity, ProcessorGroupInfo, SharedCounters, MAXIMUM_PROC_PER_GROUP},
    version::OsVersionInfo,
};

// Stands in for the process allocator, which has no handle of its own.
static SYSTEM_ALLOCATOR: u8 = 0;

fn system_allocator() -> Option<HeapHandle> {
    HeapHandle::new(&SYSTEM_ALLOCATOR as *const u8 as *mut c_void)
}

fn mask_of(count: u32) -> KAffinity {
    if count >= MAXIMUM_PROC_PER_GROUP {
        KAffinity::MAX
    } else {
        (1 << count) - 1
    }
}

#[derive(Default)]
pub struct PortableServices;

impl PortableServices {
    pub fn new() -> Self {
        PortableServices
    }

    fn processors(&self) -> u32 {
        num_cpus::get().max(1) as u32
    }
}

struct EvenGroups {
    processors: u32,
}

impl GroupRelation for EvenGroups {
    fn active_group_count(&self) -> u16 {
        ((self.processors + MAXIMUM_PROC_PER_GROUP - 1) / MAXIMUM_PROC_PER_GROUP) as u16
    }

    fn group(&self, index: u16) -> Option<ProcessorGroupInfo> {
        let first = index as u32 * MAXIMUM_PROC_PER_GROUP;
        if first >= self.processors {
            return None;
        }
        let count = (self.processors - first).min(MAXIMUM_PROC_PER_GROUP);
        Some(ProcessorGroupInfo {
            maximum_processor_count: MAXIMUM_PROC_PER_GROUP as u8,
            active_processor_count: count as u8,
            active_processor_mask: mask_of(count),
        })
    }
}

impl PlatformServices for PortableServices {
    fn apply_runtime_hints(&self, _utf8_console: bool) -> ApiResult<()> {
        Ok(())
    }

    fn query_version(&self) -> ApiResult<OsVersionInfo> {
        Err(WindowsApiError::unsupported())
    }

    fn query_basic_info(&self, info: &mut SystemBasicInfo) -> ApiResult<()> {
        let processors = self.processors().min(MAXIMUM_PROC_PER_GROUP);
        info.number_of_processors = processors as u16;
        info.active_processors_affinity_mask = mask_of(processors);
        Ok(())
    }

    fn shared_counters(&self) -> SharedCounters {
        let processors = self.processors();
        SharedCounters {
            active_group_count: EvenGroups { processors }.active_group_count(),
            active_processor_count: processors,
        }
    }

    fn query_group_relation(&self) -> ApiResult<Box<dyn GroupRelation>> {
        Ok(Box::new(EvenGroups {
            processors: self.processors(),
        }))
    }

    fn create_heap(&self, request: &HeapRequest) -> Option<HeapHandle> {
        if request.is_segment() {
            None
        } else {
            system_allocator()
        }
    }

    fn process_heap(&self) -> Option<HeapHandle> {
        system_allocator()
    }

    fn set_heap_compatibility(&self, _heap: HeapHandle, _mode: HeapCompatibility) -> ApiResult<()> {
        Err(WindowsApiError::unsupported())
    }

    fn query_is_wow64(&self) -> ApiResult<bool> {
        Ok(false)
    }

    fn flush_console_output(&self) -> ApiResult<bool> {
        let stdout = io::stdout();
        if !stdout.is_terminal() {
            return Ok(false);
        }
        stdout.lock().flush()?;
        Ok(true)
    }

    fn terminate(&self, status: i32) -> ! {
        std::process::exit(status)
    }
}
