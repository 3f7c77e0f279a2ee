use std::{
    ffi::{OsStr, OsString},
    os::windows::ffi::{OsStrExt, OsStringExt},
};

pub fn string_from_wide(s: &[u16]) -> String {
    OsString::from_wide(s).to_string_lossy().into_owned()
}

/// NUL-terminated UTF-16 copy of `s`, for `W` entry points.
pub fn wide_from_str(s: &str) -> Vec<u16> {
    OsStr::new(s).encode_wide().chain(Some(0)).collect()
}
