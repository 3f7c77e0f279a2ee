//! OS backends for [`PlatformServices`](crate::services::PlatformServices).

#[cfg(test)]
pub(crate) mod fake;
#[cfg(not(windows))]
mod portable;
#[cfg(windows)]
mod windows;

#[cfg(not(windows))]
pub use self::portable::PortableServices as NativeServices;
#[cfg(windows)]
pub use self::windows::WindowsServices as NativeServices;
