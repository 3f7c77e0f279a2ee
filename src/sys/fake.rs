//! Scripted services for unit tests.

use std::{
    ffi::c_void,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use crate::{
    error::{ApiResult, WindowsApiError},
    heap::{HeapCompatibility, HeapHandle, HeapRequest},
    services::PlatformServices,
    system::SystemBasicInfo,
    topology::{GroupRelation, KAffinity, ProcessorGroupInfo, SharedCounters},
    version::OsVersionInfo,
};

const SEGMENT_HEAP: usize = 0x1000;
const CLASSIC_HEAP: usize = 0x2000;
const PROCESS_HEAP: usize = 0x3000;

struct State {
    version: Option<OsVersionInfo>,
    basic: Option<SystemBasicInfo>,
    counters: SharedCounters,
    groups: Option<Vec<ProcessorGroupInfo>>,
    readable_groups: Option<usize>,
    fail_segment: bool,
    fail_classic: bool,
    fail_tuning: bool,
    wow64: Option<bool>,
    heap_requests: Vec<HeapRequest>,
    compatibility_calls: Vec<(HeapHandle, HeapCompatibility)>,
    hints: Vec<bool>,
    flushes: usize,
    group_queries: usize,
}

pub(crate) struct FakeServices {
    state: Mutex<State>,
    live_buffers: Arc<AtomicUsize>,
    wow64_queries: AtomicUsize,
}

struct FakeRelation {
    claimed: u16,
    groups: Vec<ProcessorGroupInfo>,
    live: Arc<AtomicUsize>,
}

impl GroupRelation for FakeRelation {
    fn active_group_count(&self) -> u16 {
        self.claimed
    }

    fn group(&self, index: u16) -> Option<ProcessorGroupInfo> {
        self.groups.get(index as usize).copied()
    }
}

impl Drop for FakeRelation {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

fn mask_of(count: u32) -> KAffinity {
    if count as usize >= std::mem::size_of::<KAffinity>() * 8 {
        KAffinity::MAX
    } else {
        (1 << count) - 1
    }
}

fn handle(addr: usize) -> HeapHandle {
    HeapHandle::new(addr as *mut c_void).unwrap()
}

impl FakeServices {
    fn with_groups(groups: Vec<ProcessorGroupInfo>) -> Self {
        let first = groups[0];
        let basic = SystemBasicInfo {
            number_of_processors: first.active_processor_count as u16,
            active_processors_affinity_mask: first.active_processor_mask,
            ..SystemBasicInfo::default()
        };
        let counters = SharedCounters {
            active_group_count: groups.len() as u16,
            active_processor_count: groups.iter().map(|g| g.active_processor_count as u32).sum(),
        };

        FakeServices {
            state: Mutex::new(State {
                version: Some(OsVersionInfo {
                    major: 10,
                    minor: 0,
                    build: 19045,
                }),
                basic: Some(basic),
                counters,
                groups: Some(groups),
                readable_groups: None,
                fail_segment: false,
                fail_classic: false,
                fail_tuning: false,
                wow64: Some(false),
                heap_requests: Vec::new(),
                compatibility_calls: Vec::new(),
                hints: Vec::new(),
                flushes: 0,
                group_queries: 0,
            }),
            live_buffers: Arc::new(AtomicUsize::new(0)),
            wow64_queries: AtomicUsize::new(0),
        }
    }

    pub fn single_group(processors: u8) -> Self {
        Self::with_groups(vec![ProcessorGroupInfo {
            maximum_processor_count: processors,
            active_processor_count: processors,
            active_processor_mask: mask_of(processors as u32),
        }])
    }

    pub fn multi_group(groups: &[(u8, KAffinity)]) -> Self {
        Self::with_groups(
            groups
                .iter()
                .map(|&(count, mask)| ProcessorGroupInfo {
                    maximum_processor_count: count,
                    active_processor_count: count,
                    active_processor_mask: mask,
                })
                .collect(),
        )
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn set_version(&self, major: u32, minor: u32, build: u32) {
        self.state().version = Some(OsVersionInfo {
            major,
            minor,
            build,
        });
    }

    pub fn fail_version(&self) {
        self.state().version = None;
    }

    pub fn fail_basic_info(&self) {
        self.state().basic = None;
    }

    pub fn set_counters(&self, groups: u16, processors: u32) {
        self.state().counters = SharedCounters {
            active_group_count: groups,
            active_processor_count: processors,
        };
    }

    pub fn fail_group_query(&self) {
        self.state().groups = None;
    }

    /// Keep the claimed group count but answer only the first `readable` groups.
    pub fn truncate_group_relation(&self, readable: usize) {
        self.state().readable_groups = Some(readable);
    }

    pub fn fail_segment_heap(&self) {
        self.state().fail_segment = true;
    }

    pub fn fail_classic_heap(&self) {
        self.state().fail_classic = true;
    }

    pub fn fail_heap_tuning(&self) {
        self.state().fail_tuning = true;
    }

    pub fn set_wow64(&self, answer: Option<bool>) {
        self.state().wow64 = answer;
    }

    pub fn heap_requests(&self) -> Vec<HeapRequest> {
        self.state().heap_requests.clone()
    }

    pub fn compatibility_calls(&self) -> Vec<(HeapHandle, HeapCompatibility)> {
        self.state().compatibility_calls.clone()
    }

    pub fn hints(&self) -> Vec<bool> {
        self.state().hints.clone()
    }

    pub fn flushes(&self) -> usize {
        self.state().flushes
    }

    pub fn group_queries(&self) -> usize {
        self.state().group_queries
    }

    pub fn live_buffers(&self) -> usize {
        self.live_buffers.load(Ordering::SeqCst)
    }

    pub fn wow64_queries(&self) -> usize {
        self.wow64_queries.load(Ordering::SeqCst)
    }
}

impl PlatformServices for FakeServices {
    fn apply_runtime_hints(&self, utf8_console: bool) -> ApiResult<()> {
        self.state().hints.push(utf8_console);
        Ok(())
    }

    fn query_version(&self) -> ApiResult<OsVersionInfo> {
        self.state().version.ok_or_else(|| WindowsApiError::from_code(0xC000_0001))
    }

    fn query_basic_info(&self, info: &mut SystemBasicInfo) -> ApiResult<()> {
        match self.state().basic {
            Some(basic) => {
                *info = basic;
                Ok(())
            }
            None => Err(WindowsApiError::from_code(0xC000_0001)),
        }
    }

    fn shared_counters(&self) -> SharedCounters {
        self.state().counters
    }

    fn query_group_relation(&self) -> ApiResult<Box<dyn GroupRelation>> {
        let mut state = self.state();
        state.group_queries += 1;
        match &state.groups {
            Some(groups) => {
                self.live_buffers.fetch_add(1, Ordering::SeqCst);
                let readable = state.readable_groups.unwrap_or(groups.len()).min(groups.len());
                Ok(Box::new(FakeRelation {
                    claimed: groups.len() as u16,
                    groups: groups[..readable].to_vec(),
                    live: self.live_buffers.clone(),
                }))
            }
            None => Err(WindowsApiError::from_code(122)),
        }
    }

    fn create_heap(&self, request: &HeapRequest) -> Option<HeapHandle> {
        let mut state = self.state();
        state.heap_requests.push(*request);
        if request.is_segment() {
            if state.fail_segment {
                None
            } else {
                Some(handle(SEGMENT_HEAP))
            }
        } else if state.fail_classic {
            None
        } else {
            Some(handle(CLASSIC_HEAP))
        }
    }

    fn process_heap(&self) -> Option<HeapHandle> {
        Some(handle(PROCESS_HEAP))
    }

    fn set_heap_compatibility(&self, heap: HeapHandle, mode: HeapCompatibility) -> ApiResult<()> {
        let mut state = self.state();
        state.compatibility_calls.push((heap, mode));
        if state.fail_tuning {
            Err(WindowsApiError::from_code(87))
        } else {
            Ok(())
        }
    }

    fn query_is_wow64(&self) -> ApiResult<bool> {
        self.wow64_queries.fetch_add(1, Ordering::SeqCst);
        self.state().wow64.ok_or_else(|| WindowsApiError::from_code(5))
    }

    fn flush_console_output(&self) -> ApiResult<bool> {
        self.state().flushes += 1;
        Ok(true)
    }

    fn terminate(&self, status: i32) -> ! {
        panic!("terminated with status {:#x}", status)
    }
}
