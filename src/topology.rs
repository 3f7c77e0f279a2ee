//! Processor group and affinity layout.
//!
//! Machines with more than `MAXIMUM_PROC_PER_GROUP` logical processors split
//! them into groups, each with its own affinity mask. Most machines have a
//! single group, which the shared counters reveal without an enumeration.

use tracing::debug;

use crate::{
    error::{ApiResult, WindowsApiError},
    services::PlatformServices,
    system::SystemBasicInfo,
};

/// `ERROR_INVALID_DATA`, for an answer shorter than the group count it claims.
const ERROR_INVALID_DATA: u32 = 13;

/// Processors a thread may run on within one group.
pub type KAffinity = usize;

pub const MAXIMUM_PROC_PER_GROUP: u32 = (std::mem::size_of::<KAffinity>() * 8) as u32;

/// Counters the OS keeps up to date in memory shared with every process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SharedCounters {
    pub active_group_count: u16,
    pub active_processor_count: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessorGroupInfo {
    pub maximum_processor_count: u8,
    pub active_processor_count: u8,
    pub active_processor_mask: KAffinity,
}

/// Answer of the processor-group relation query.
pub trait GroupRelation {
    fn active_group_count(&self) -> u16;

    /// `None` past the end of the answer.
    fn group(&self, index: u16) -> Option<ProcessorGroupInfo>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessorTopology {
    single_group: bool,
    processor_count: u32,
    group_count: u16,
    group_processor_counts: Option<Box<[u32]>>,
    group_affinity_masks: Box<[KAffinity]>,
}

impl ProcessorTopology {
    /// The shape of a one-group machine, taken from the basic information.
    fn single(basic: &SystemBasicInfo) -> Self {
        ProcessorTopology {
            single_group: true,
            processor_count: basic.number_of_processors as u32,
            group_count: 1,
            group_processor_counts: None,
            group_affinity_masks: Box::new([basic.active_processors_affinity_mask]),
        }
    }

    pub fn discover(services: &dyn PlatformServices, basic: &SystemBasicInfo) -> Self {
        let counters = services.shared_counters();
        if counters.active_group_count == 1
            && counters.active_processor_count > 0
            && counters.active_processor_count <= MAXIMUM_PROC_PER_GROUP
        {
            return Self::single(basic);
        }

        Self::enumerate(services, basic, &counters)
    }

    fn enumerate(
        services: &dyn PlatformServices,
        basic: &SystemBasicInfo,
        counters: &SharedCounters,
    ) -> Self {
        let groups = match read_groups(services) {
            Ok(groups) => groups,
            Err(err) => {
                debug!("processor group query failed ({}), assuming one group", err);
                return Self::single(basic);
            }
        };

        let processor_count: u32 = groups
            .iter()
            .map(|g| g.active_processor_count as u32)
            .sum();

        if groups.len() != counters.active_group_count as usize
            || processor_count != counters.active_processor_count
        {
            debug!(
                "enumerated {} group(s) / {} processor(s), shared counters say {} / {}",
                groups.len(),
                processor_count,
                counters.active_group_count,
                counters.active_processor_count
            );
        }

        if groups.len() <= 1 || processor_count == 0 {
            debug!(
                "{} processor group(s) with {} processor(s) enumerated, assuming one group",
                groups.len(),
                processor_count
            );
            return Self::single(basic);
        }

        ProcessorTopology {
            single_group: false,
            processor_count,
            group_count: groups.len() as u16,
            group_processor_counts: Some(
                groups
                    .iter()
                    .map(|g| g.active_processor_count as u32)
                    .collect(),
            ),
            group_affinity_masks: groups.iter().map(|g| g.active_processor_mask).collect(),
        }
    }

    pub fn is_single_group(&self) -> bool {
        self.single_group
    }

    pub fn processor_count(&self) -> u32 {
        self.processor_count
    }

    pub fn group_count(&self) -> u16 {
        self.group_count
    }

    /// Present only when there is more than one group.
    pub fn group_processor_counts(&self) -> Option<&[u32]> {
        self.group_processor_counts.as_deref()
    }

    /// One mask per group, never empty.
    pub fn affinity_masks(&self) -> &[KAffinity] {
        &self.group_affinity_masks
    }

    pub fn affinity_mask(&self, group: u16) -> Option<KAffinity> {
        self.group_affinity_masks.get(group as usize).copied()
    }
}

// The relation buffer is dropped before this returns, on every path.
// Either every claimed group is read or the whole answer is rejected.
fn read_groups(services: &dyn PlatformServices) -> ApiResult<Vec<ProcessorGroupInfo>> {
    let relation = services.query_group_relation()?;
    let count = relation.active_group_count();
    (0..count)
        .map(|i| relation.group(i))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| WindowsApiError::from_code(ERROR_INVALID_DATA))
}
