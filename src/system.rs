use tracing::debug;

use crate::{services::PlatformServices, topology::KAffinity};

pub const DEFAULT_PAGE_SIZE: u32 = 0x1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SystemBasicInfo {
    pub page_size: u32,
    pub number_of_processors: u16,
    pub number_of_physical_pages: u32,
    pub allocation_granularity: u32,
    /// In 100ns units.
    pub maximum_timer_resolution: u32,
    pub maximum_user_mode_address: usize,
    pub active_processors_affinity_mask: KAffinity,
}

impl Default for SystemBasicInfo {
    /// Conservative non-zero values used until the query answers.
    fn default() -> Self {
        SystemBasicInfo {
            page_size: DEFAULT_PAGE_SIZE,
            number_of_processors: 1,
            number_of_physical_pages: u32::MAX,
            allocation_granularity: 0x10000,
            maximum_timer_resolution: 0x2625A,
            maximum_user_mode_address: 0x10000,
            active_processors_affinity_mask: u16::MAX as KAffinity,
        }
    }
}

impl SystemBasicInfo {
    pub fn query(services: &dyn PlatformServices) -> Self {
        let mut info = SystemBasicInfo::default();
        if let Err(err) = services.query_basic_info(&mut info) {
            debug!("basic information query failed ({}), keeping defaults", err);
        }
        info
    }
}
