use std::io::{self, Write};

use num_traits::ToPrimitive;
use paw;
use structopt;
use tabwriter::TabWriter;
use tracing::error;
use tracing_subscriber::EnvFilter;

use platboot::{BootstrapConfig, HeapStrategy, PlatformContext, VersionTag};

#[derive(structopt::StructOpt)]
struct Args {
    #[structopt(short = "n", long = "name", help = "application name used in logs")]
    name: Option<String>,

    #[structopt(long = "classic-heap", help = "never attempt the segment heap")]
    classic_heap: bool,

    #[structopt(
        long = "process-heap",
        help = "use the process default heap instead of creating one"
    )]
    process_heap: bool,

    #[structopt(
        long = "segment-heap-min",
        help = "oldest release to attempt the segment heap on (e.g. win8, win10)"
    )]
    segment_heap_min: Option<VersionTag>,

    #[structopt(long = "utf8-console", help = "switch the console output code page to UTF-8")]
    utf8_console: bool,

    #[structopt(short = "v", long = "verbose", help = "log every degraded query")]
    verbose: bool,
}

impl Args {
    fn config(&self) -> BootstrapConfig {
        let mut config = BootstrapConfig::default();
        if let Some(name) = &self.name {
            config.application_name = name.clone();
        }
        config.heap_strategy = if self.process_heap {
            HeapStrategy::ProcessDefault
        } else if self.classic_heap {
            HeapStrategy::ClassicOnly
        } else {
            HeapStrategy::Auto
        };
        if let Some(tier) = self.segment_heap_min {
            config.segment_heap_min_tier = tier;
        }
        config.utf8_console = self.utf8_console;
        config
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn report(context: &PlatformContext) -> io::Result<()> {
    let version = context.version();
    let basic = context.basic_info();
    let heap = context.heap();
    let topology = context.topology();

    let mut tw = TabWriter::new(io::stdout());
    let tag: &'static str = version.tag.into();
    writeln!(
        tw,
        "version\t{} ({}, {} tier {})",
        version.name,
        version.string,
        tag,
        version.tag.to_u32().unwrap_or_default()
    )?;
    writeln!(tw, "wow64\t{}", context.is_wow64())?;
    writeln!(tw, "page size\t{:#x}", basic.page_size)?;
    writeln!(tw, "allocation granularity\t{:#x}", basic.allocation_granularity)?;
    writeln!(tw, "physical pages\t{}", basic.number_of_physical_pages)?;
    writeln!(tw, "timer resolution\t{} x 100ns", basic.maximum_timer_resolution)?;
    writeln!(tw, "max user address\t{:#x}", basic.maximum_user_mode_address)?;
    match heap.compatibility {
        Some(mode) => writeln!(tw, "heap\t{} ({:?})", heap.kind, mode)?,
        None => writeln!(tw, "heap\t{}", heap.kind)?,
    }
    writeln!(tw, "processors\t{}", topology.processor_count())?;
    writeln!(
        tw,
        "processor groups\t{}{}",
        topology.group_count(),
        if topology.is_single_group() { " (single)" } else { "" }
    )?;
    for (group, mask) in topology.affinity_masks().iter().enumerate() {
        let count = topology
            .group_processor_counts()
            .and_then(|counts| counts.get(group).copied())
            .unwrap_or_else(|| mask.count_ones());
        writeln!(tw, "  group {}\t{} processors\t{:#018x}", group, count, mask)?;
    }
    tw.flush()
}

#[paw::main]
fn main(args: Args) {
    init_logging(args.verbose);

    let context = match platboot::initialize(args.config()) {
        Ok(context) => context,
        Err(err) => {
            error!("{}", err);
            std::process::exit(err.status());
        }
    };

    let status = match report(context) {
        Ok(()) => 0,
        Err(err) => {
            error!("cannot write report: {}", err);
            1
        }
    };

    context.exit(status)
}
