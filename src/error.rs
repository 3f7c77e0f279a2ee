use std::{convert, error, fmt, io};

#[cfg(windows)]
use std::{mem::MaybeUninit, ptr};

#[cfg(windows)]
use winapi::um::{
    errhandlingapi,
    winbase::{FormatMessageW, FORMAT_MESSAGE_FROM_SYSTEM, FORMAT_MESSAGE_IGNORE_INSERTS},
    winnt::LANG_SYSTEM_DEFAULT,
};

/// `STATUS_UNSUCCESSFUL`, reported for every fatal bootstrap failure.
pub const STATUS_UNSUCCESSFUL: i32 = 0xC000_0001_u32 as i32;

/// A failed OS query, carrying the raw Win32 error code when there is one.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct WindowsApiError {
    code: Option<u32>,
}

pub type ApiResult<T> = std::result::Result<T, WindowsApiError>;

impl WindowsApiError {
    #[cfg(windows)]
    pub fn last() -> Self {
        WindowsApiError {
            code: Some(unsafe { errhandlingapi::GetLastError() }),
        }
    }

    #[cfg(not(windows))]
    pub fn last() -> Self {
        WindowsApiError {
            code: io::Error::last_os_error().raw_os_error().map(|c| c as u32),
        }
    }

    pub fn from_code(code: u32) -> Self {
        WindowsApiError { code: Some(code) }
    }

    /// The query is not available on this host.
    pub fn unsupported() -> Self {
        WindowsApiError { code: None }
    }

    pub fn code(&self) -> Option<u32> {
        self.code
    }
}

#[cfg(windows)]
fn system_message(code: u32) -> Option<String> {
    let mut err_msg = MaybeUninit::<[u16; 512]>::uninit();
    let err_msg_len = unsafe {
        FormatMessageW(
            FORMAT_MESSAGE_FROM_SYSTEM | FORMAT_MESSAGE_IGNORE_INSERTS,
            ptr::null_mut(),
            code,
            LANG_SYSTEM_DEFAULT as _,
            err_msg.as_mut_ptr() as _,
            512,
            ptr::null_mut(),
        )
    };

    if err_msg_len == 0 {
        None
    } else {
        let err_msg = unsafe { err_msg.assume_init() };
        Some(crate::utils::string_from_wide(&err_msg[0..err_msg_len as _]).trim_end().to_owned())
    }
}

#[cfg(not(windows))]
fn system_message(_code: u32) -> Option<String> {
    None
}

impl fmt::Display for WindowsApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => match system_message(code) {
                Some(msg) => write!(f, "{} (error {:#010x})", msg, code),
                None => write!(f, "error {:#010x}", code),
            },
            None => write!(f, "not supported on this platform"),
        }
    }
}

impl fmt::Debug for WindowsApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl error::Error for WindowsApiError {}

impl convert::From<io::Error> for WindowsApiError {
    fn from(err: io::Error) -> Self {
        WindowsApiError {
            code: err.raw_os_error().map(|c| c as u32),
        }
    }
}

/// Fatal bootstrap failures. Everything else degrades to a safe default.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("neither the segment heap nor the classic heap could be created")]
    HeapUnavailable,

    #[error("{name} initialization failed: {source}")]
    Subsystem {
        name: &'static str,
        #[source]
        source: Box<dyn error::Error + Send + Sync>,
    },

    #[error("a platform context is already installed")]
    AlreadyInstalled,
}

impl BootstrapError {
    /// Process status handed back to the caller of the bootstrap.
    pub fn status(&self) -> i32 {
        STATUS_UNSUCCESSFUL
    }
}

#[macro_export]
macro_rules! last_error {
    () => {
        Err($crate::error::WindowsApiError::last())
    };
}
