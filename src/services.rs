//! The OS primitives the bootstrap consumes.
//!
//! Each query is attempted exactly once per bootstrap. Implementations
//! return the raw answer and leave every fallback decision to the caller.

use crate::{
    error::ApiResult,
    heap::{HeapCompatibility, HeapHandle, HeapRequest},
    system::SystemBasicInfo,
    topology::{GroupRelation, SharedCounters},
    version::OsVersionInfo,
};

pub trait PlatformServices: Send + Sync {
    /// Non-fatal runtime hints applied before anything else.
    fn apply_runtime_hints(&self, utf8_console: bool) -> ApiResult<()>;

    fn query_version(&self) -> ApiResult<OsVersionInfo>;

    /// Overwrite `info` with the OS answer. On failure `info` is left alone.
    fn query_basic_info(&self, info: &mut SystemBasicInfo) -> ApiResult<()>;

    /// Cheap pre-populated counters, read before any enumeration.
    fn shared_counters(&self) -> SharedCounters;

    /// Enumerate processor groups. The returned buffer is released when dropped.
    fn query_group_relation(&self) -> ApiResult<Box<dyn GroupRelation>>;

    /// `None` when the heap could not be created.
    fn create_heap(&self, request: &HeapRequest) -> Option<HeapHandle>;

    fn process_heap(&self) -> Option<HeapHandle>;

    fn set_heap_compatibility(&self, heap: HeapHandle, mode: HeapCompatibility) -> ApiResult<()>;

    fn query_is_wow64(&self) -> ApiResult<bool>;

    /// Flush standard output if it is attached to a console device.
    /// Returns whether a flush happened.
    fn flush_console_output(&self) -> ApiResult<bool>;

    fn terminate(&self, status: i32) -> !;
}
