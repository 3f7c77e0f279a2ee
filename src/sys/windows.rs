use std::{
    ffi::c_void,
    io::{self, Write},
    mem::{self, MaybeUninit},
    ptr,
};

use winapi::{
    shared::{
        basetsd::SIZE_T,
        minwindef::{BOOL, DWORD, FALSE, FARPROC, TRUE},
        ntdef::{NTSTATUS, PVOID, ULONG},
        winerror::ERROR_INSUFFICIENT_BUFFER,
    },
    um::{
        errhandlingapi::GetLastError,
        fileapi::{FlushFileBuffers, GetFileType},
        handleapi::INVALID_HANDLE_VALUE,
        heapapi::{GetProcessHeap, HeapSetInformation},
        libloaderapi::{GetModuleHandleW, GetProcAddress},
        processenv::GetStdHandle,
        processthreadsapi::{GetCurrentProcess, TerminateProcess},
        sysinfoapi::{
            GetLogicalProcessorInformationEx, GetSystemInfo, GetSystemTimeAdjustment,
            GlobalMemoryStatusEx, MEMORYSTATUSEX,
        },
        winbase::{
            GetActiveProcessorCount, GetActiveProcessorGroupCount, FILE_TYPE_CHAR,
            STD_OUTPUT_HANDLE,
        },
        wincon::SetConsoleOutputCP,
        winnls::CP_UTF8,
        winnt::{
            HeapCompatibilityInformation, RelationGroup, ALL_PROCESSOR_GROUPS, GROUP_RELATIONSHIP,
            OSVERSIONINFOEXW, PROCESSOR_GROUP_INFO, SYSTEM_LOGICAL_PROCESSOR_INFORMATION_EX,
        },
        wow64apiset::IsWow64Process,
    },
};

use crate::{
    error::{ApiResult, WindowsApiError},
    heap::{HeapCompatibility, HeapHandle, HeapRequest},
    services::PlatformServices,
    system::SystemBasicInfo,
    topology::{GroupRelation, ProcessorGroupInfo, SharedCounters},
    utils,
    version::OsVersionInfo,
};

type RtlGetVersionFn = unsafe extern "system" fn(*mut OSVERSIONINFOEXW) -> NTSTATUS;
type RtlCreateHeapFn =
    unsafe extern "system" fn(ULONG, PVOID, SIZE_T, SIZE_T, PVOID, PVOID) -> PVOID;

fn ntdll_export(name: &[u8]) -> ApiResult<FARPROC> {
    debug_assert_eq!(name.last(), Some(&0));

    let ntdll = utils::wide_from_str("ntdll.dll");
    let module = unsafe { GetModuleHandleW(ntdll.as_ptr()) };
    if module.is_null() {
        return last_error!();
    }

    let proc = unsafe { GetProcAddress(module, name.as_ptr() as _) };
    if proc.is_null() {
        return last_error!();
    }

    Ok(proc)
}

/// Buffer filled by `GetLogicalProcessorInformationEx(RelationGroup)`.
struct GroupRelationBuffer {
    // u64 keeps the records aligned
    buf: Vec<u64>,
    len: usize,
}

impl GroupRelationBuffer {
    fn query() -> ApiResult<Self> {
        let mut len: DWORD = 0;
        let ok = unsafe {
            GetLogicalProcessorInformationEx(RelationGroup, ptr::null_mut(), &mut len)
        };
        if ok == TRUE || unsafe { GetLastError() } != ERROR_INSUFFICIENT_BUFFER {
            return last_error!();
        }

        let mut buf = vec![0u64; (len as usize + 7) / 8];
        if unsafe {
            GetLogicalProcessorInformationEx(RelationGroup, buf.as_mut_ptr() as _, &mut len)
        } != TRUE
        {
            return last_error!();
        }

        let relation = GroupRelationBuffer {
            buf,
            len: len as usize,
        };
        if relation.len < mem::size_of::<SYSTEM_LOGICAL_PROCESSOR_INFORMATION_EX>()
            || relation.info().Relationship != RelationGroup
        {
            return Err(WindowsApiError::from_code(ERROR_INSUFFICIENT_BUFFER));
        }

        Ok(relation)
    }

    fn info(&self) -> &SYSTEM_LOGICAL_PROCESSOR_INFORMATION_EX {
        unsafe { &*(self.buf.as_ptr() as *const SYSTEM_LOGICAL_PROCESSOR_INFORMATION_EX) }
    }

    fn groups(&self) -> &GROUP_RELATIONSHIP {
        unsafe { self.info().u.Group() }
    }
}

impl GroupRelation for GroupRelationBuffer {
    fn active_group_count(&self) -> u16 {
        self.groups().ActiveGroupCount
    }

    fn group(&self, index: u16) -> Option<ProcessorGroupInfo> {
        if index >= self.active_group_count() {
            return None;
        }

        let entry = unsafe { self.groups().GroupInfo.as_ptr().add(index as usize) };
        let end = entry as usize + mem::size_of::<PROCESSOR_GROUP_INFO>();
        if end > self.buf.as_ptr() as usize + self.len {
            return None;
        }

        let entry = unsafe { ptr::read_unaligned(entry) };
        Some(ProcessorGroupInfo {
            maximum_processor_count: entry.MaximumProcessorCount,
            active_processor_count: entry.ActiveProcessorCount,
            active_processor_mask: entry.ActiveProcessorMask as _,
        })
    }
}

#[derive(Default)]
pub struct WindowsServices;

impl WindowsServices {
    pub fn new() -> Self {
        WindowsServices
    }
}

impl PlatformServices for WindowsServices {
    fn apply_runtime_hints(&self, utf8_console: bool) -> ApiResult<()> {
        if utf8_console && unsafe { SetConsoleOutputCP(CP_UTF8) } == FALSE {
            return last_error!();
        }
        Ok(())
    }

    fn query_version(&self) -> ApiResult<OsVersionInfo> {
        let rtl_get_version: RtlGetVersionFn =
            unsafe { mem::transmute(ntdll_export(b"RtlGetVersion\0")?) };

        let mut version_info: OSVERSIONINFOEXW = unsafe { mem::zeroed() };
        version_info.dwOSVersionInfoSize = mem::size_of::<OSVERSIONINFOEXW>() as _;

        let status = unsafe { rtl_get_version(&mut version_info) };
        if status < 0 {
            return Err(WindowsApiError::from_code(status as u32));
        }

        Ok(OsVersionInfo {
            major: version_info.dwMajorVersion,
            minor: version_info.dwMinorVersion,
            build: version_info.dwBuildNumber,
        })
    }

    fn query_basic_info(&self, info: &mut SystemBasicInfo) -> ApiResult<()> {
        let sys_info = {
            let mut sys_info = MaybeUninit::uninit();
            unsafe {
                GetSystemInfo(sys_info.as_mut_ptr());
                sys_info.assume_init()
            }
        };

        let mut mem_status: MEMORYSTATUSEX = unsafe { mem::zeroed() };
        mem_status.dwLength = mem::size_of::<MEMORYSTATUSEX>() as _;
        if unsafe { GlobalMemoryStatusEx(&mut mem_status) } == FALSE {
            return last_error!();
        }

        let mut adjustment: DWORD = 0;
        let mut increment: DWORD = 0;
        let mut disabled: BOOL = FALSE;
        if unsafe { GetSystemTimeAdjustment(&mut adjustment, &mut increment, &mut disabled) }
            == FALSE
        {
            return last_error!();
        }

        let page_size = sys_info.dwPageSize.max(1);
        *info = SystemBasicInfo {
            page_size,
            number_of_processors: sys_info.dwNumberOfProcessors as u16,
            number_of_physical_pages: (mem_status.ullTotalPhys / page_size as u64)
                .min(u32::MAX as u64) as u32,
            allocation_granularity: sys_info.dwAllocationGranularity,
            maximum_timer_resolution: increment,
            maximum_user_mode_address: sys_info.lpMaximumApplicationAddress as usize,
            active_processors_affinity_mask: sys_info.dwActiveProcessorMask as _,
        };
        Ok(())
    }

    fn shared_counters(&self) -> SharedCounters {
        unsafe {
            SharedCounters {
                active_group_count: GetActiveProcessorGroupCount(),
                active_processor_count: GetActiveProcessorCount(ALL_PROCESSOR_GROUPS),
            }
        }
    }

    fn query_group_relation(&self) -> ApiResult<Box<dyn GroupRelation>> {
        Ok(Box::new(GroupRelationBuffer::query()?))
    }

    fn create_heap(&self, request: &HeapRequest) -> Option<HeapHandle> {
        let rtl_create_heap: RtlCreateHeapFn =
            unsafe { mem::transmute(ntdll_export(b"RtlCreateHeap\0").ok()?) };

        HeapHandle::new(unsafe {
            rtl_create_heap(
                request.flags,
                ptr::null_mut(),
                request.reserve,
                request.commit,
                ptr::null_mut(),
                ptr::null_mut(),
            )
        })
    }

    fn process_heap(&self) -> Option<HeapHandle> {
        HeapHandle::new(unsafe { GetProcessHeap() } as *mut c_void)
    }

    fn set_heap_compatibility(&self, heap: HeapHandle, mode: HeapCompatibility) -> ApiResult<()> {
        let mode = mode as ULONG;
        if unsafe {
            HeapSetInformation(
                heap.as_ptr() as _,
                HeapCompatibilityInformation,
                &mode as *const ULONG as _,
                mem::size_of::<ULONG>(),
            )
        } == FALSE
        {
            return last_error!();
        }
        Ok(())
    }

    fn query_is_wow64(&self) -> ApiResult<bool> {
        if cfg!(target_pointer_width = "64") {
            return Ok(false);
        }

        let mut is_wow64: BOOL = FALSE;
        if unsafe { IsWow64Process(GetCurrentProcess(), &mut is_wow64) } == FALSE {
            return last_error!();
        }
        Ok(is_wow64 != FALSE)
    }

    fn flush_console_output(&self) -> ApiResult<bool> {
        io::stdout().flush()?;

        let stdout = unsafe { GetStdHandle(STD_OUTPUT_HANDLE) };
        if stdout.is_null() || stdout == INVALID_HANDLE_VALUE {
            return Ok(false);
        }

        // the handle belongs to the process, it is not ours to close
        if unsafe { GetFileType(stdout) } != FILE_TYPE_CHAR {
            return Ok(false);
        }

        if unsafe { FlushFileBuffers(stdout) } == FALSE {
            return last_error!();
        }
        Ok(true)
    }

    fn terminate(&self, status: i32) -> ! {
        unsafe { TerminateProcess(GetCurrentProcess(), status as u32) };
        std::process::exit(status)
    }
}
