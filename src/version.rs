use std::fmt::{self, Write};

use num_derive::{FromPrimitive, ToPrimitive};
use strum_macros::{EnumIter, EnumString, IntoStaticStr};
use tracing::debug;

use crate::services::PlatformServices;

/// Raw version triple as reported by the OS.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OsVersionInfo {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
}

/// Release tier, ordered oldest to newest. The discriminants are stable and
/// may be compared numerically by callers holding a raw tier value.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    FromPrimitive,
    ToPrimitive,
    EnumIter,
    EnumString,
    IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[repr(u32)]
pub enum VersionTag {
    Ancient = 0,
    Win7 = 61,
    Win8 = 62,
    Win81 = 63,
    Win10 = 100,
    Win10Th2 = 101,
    Win10Rs1 = 102,
    Win10Rs2 = 103,
    Win10Rs3 = 104,
    Win10Rs4 = 105,
    Win10Rs5 = 106,
    Win10_19H1 = 107,
    Win10_19H2 = 108,
    Win10_20H1 = 109,
    Win10_20H2 = 110,
    Win10_21H1 = 111,
    Win10_21H2 = 112,
    Win10_22H2 = 113,
    Win11 = 114,
    Win11_22H2 = 115,
    Win11_23H2 = 116,
    Win11_24H2 = 117,
    New = u32::MAX,
}

struct Release {
    major: u32,
    minor: u32,
    min_build: u32,
    tag: VersionTag,
    name: &'static str,
}

const fn release(
    major: u32,
    minor: u32,
    min_build: u32,
    tag: VersionTag,
    name: &'static str,
) -> Release {
    Release {
        major,
        minor,
        min_build,
        tag,
        name,
    }
}

/// Newest first. Within a major.minor bracket the first entry whose
/// `min_build` does not exceed the observed build wins.
static RELEASES: &[Release] = &[
    release(10, 0, 26101, VersionTag::New, "Windows Insider Preview"),
    release(10, 0, 26100, VersionTag::Win11_24H2, "Windows 11 24H2"),
    release(10, 0, 22631, VersionTag::Win11_23H2, "Windows 11 23H2"),
    release(10, 0, 22621, VersionTag::Win11_22H2, "Windows 11 22H2"),
    release(10, 0, 22000, VersionTag::Win11, "Windows 11"),
    release(10, 0, 19045, VersionTag::Win10_22H2, "Windows 10 22H2"),
    release(10, 0, 19044, VersionTag::Win10_21H2, "Windows 10 21H2"),
    release(10, 0, 19043, VersionTag::Win10_21H1, "Windows 10 21H1"),
    release(10, 0, 19042, VersionTag::Win10_20H2, "Windows 10 20H2"),
    release(10, 0, 19041, VersionTag::Win10_20H1, "Windows 10 20H1"),
    release(10, 0, 18363, VersionTag::Win10_19H2, "Windows 10 19H2"),
    release(10, 0, 18362, VersionTag::Win10_19H1, "Windows 10 19H1"),
    release(10, 0, 17763, VersionTag::Win10Rs5, "Windows 10 RS5"),
    release(10, 0, 17134, VersionTag::Win10Rs4, "Windows 10 RS4"),
    release(10, 0, 16299, VersionTag::Win10Rs3, "Windows 10 RS3"),
    release(10, 0, 15063, VersionTag::Win10Rs2, "Windows 10 RS2"),
    release(10, 0, 14393, VersionTag::Win10Rs1, "Windows 10 RS1"),
    release(10, 0, 10586, VersionTag::Win10Th2, "Windows 10 TH2"),
    release(10, 0, 10240, VersionTag::Win10, "Windows 10 RTM"),
    release(10, 0, 0, VersionTag::Win10, "Windows 10"),
    release(6, 3, 0, VersionTag::Win81, "Windows 8.1"),
    release(6, 2, 0, VersionTag::Win8, "Windows 8"),
    release(6, 1, 0, VersionTag::Win7, "Windows 7"),
];

const GENERIC_NAME: &str = "Windows";

/// Classify a version triple into its tier and display name.
pub fn classify(info: &OsVersionInfo) -> (VersionTag, &'static str) {
    if let Some(r) = RELEASES
        .iter()
        .find(|r| r.major == info.major && r.minor == info.minor && info.build >= r.min_build)
    {
        return (r.tag, r.name);
    }

    // Anything older than 6.1 predates the table; any bracket the table does
    // not know above that is newer than every entry.
    if (info.major, info.minor) < (6, 1) {
        (VersionTag::Ancient, GENERIC_NAME)
    } else {
        (VersionTag::New, GENERIC_NAME)
    }
}

/// Capacity of the rendered version string in UTF-16 units, terminator included.
pub const VERSION_STRING_CAPACITY: usize = 40;

/// "major.minor.build" in a fixed buffer. Writes past the end are dropped.
#[derive(Clone, Copy)]
pub struct VersionString {
    buf: [u8; VERSION_STRING_CAPACITY - 1],
    len: usize,
}

impl VersionString {
    pub fn new() -> Self {
        VersionString {
            buf: [0; VERSION_STRING_CAPACITY - 1],
            len: 0,
        }
    }

    pub fn render(info: &OsVersionInfo) -> Self {
        let mut s = Self::new();
        // truncation is silent, so the result carries no information
        let _ = write!(s, "{}.{}.{}", info.major, info.minor, info.build);
        s
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.buf[..self.len]).unwrap_or_default()
    }
}

impl Default for VersionString {
    fn default() -> Self {
        let mut s = Self::new();
        let _ = s.write_str("0.0.0");
        s
    }
}

impl Write for VersionString {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            let n = c.len_utf8();
            if self.len + n > self.buf.len() {
                break;
            }
            c.encode_utf8(&mut self.buf[self.len..self.len + n]);
            self.len += n;
        }
        Ok(())
    }
}

impl fmt::Display for VersionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for VersionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

/// The classified OS release.
#[derive(Clone, Debug)]
pub struct WindowsVersion {
    pub tag: VersionTag,
    pub name: &'static str,
    pub string: VersionString,
    /// `None` when the version query failed.
    pub raw: Option<OsVersionInfo>,
}

impl WindowsVersion {
    pub fn from_info(info: OsVersionInfo) -> Self {
        let (tag, name) = classify(&info);
        WindowsVersion {
            tag,
            name,
            string: VersionString::render(&info),
            raw: Some(info),
        }
    }

    /// What is known when the version query fails.
    pub fn unknown() -> Self {
        WindowsVersion {
            tag: VersionTag::Ancient,
            name: GENERIC_NAME,
            string: VersionString::default(),
            raw: None,
        }
    }

    pub fn query(services: &dyn PlatformServices) -> Self {
        match services.query_version() {
            Ok(info) => Self::from_info(info),
            Err(err) => {
                debug!("version query failed ({}), assuming an ancient release", err);
                Self::unknown()
            }
        }
    }

    pub fn at_least(&self, tag: VersionTag) -> bool {
        self.tag >= tag
    }
}
