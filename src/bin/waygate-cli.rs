use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use waygate::frame::detect_frame;
use waygate::persistence::{self, DirectorySaveHook, LoadReport, SaveHook};
use waygate::session::{load_config, SessionConfig};
use waygate::{BlockPos, DimensionKey, PortalRecord, PortalRegistry, PortalState};

#[derive(Parser)]
#[command(
    name = "waygate-cli",
    about = "Inspect, validate and maintain waygate portal stores"
)]
struct Cli {
    /// Session config JSON (routes and store key); defaults apply when absent
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Summarise the portal store of a world directory
    Inspect {
        /// World directory holding the portal store
        #[arg(long, short)]
        world: PathBuf,
        /// Store key (default: from config)
        #[arg(long)]
        key: Option<String>,
        /// Only list portals in this dimension near --near
        #[arg(long, requires = "near")]
        dimension: Option<String>,
        /// Centre of a proximity query (X Y Z)
        #[arg(
            long,
            num_args = 3,
            value_names = ["X", "Y", "Z"],
            allow_hyphen_values = true,
            requires = "dimension"
        )]
        near: Option<Vec<i32>>,
        /// Radius of the proximity query in blocks
        #[arg(long, default_value_t = 16)]
        radius: u32,
    },
    /// Run frame detection against a JSON block layout
    CheckFrame {
        /// Layout file: {"frame": [[x,y,z],..], "solid": [[x,y,z],..], "start": [x,y,z]}
        #[arg(long, short)]
        layout: PathBuf,
    },
    /// Rewrite a store in the current format, repairing what the loader repairs
    Migrate {
        /// World directory holding the portal store
        #[arg(long, short)]
        world: PathBuf,
        /// Store key (default: from config)
        #[arg(long)]
        key: Option<String>,
        /// Import this legacy or framed blob instead of the world's current store
        #[arg(long, short)]
        input: Option<PathBuf>,
        /// Report the result without writing
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Remove every portal from a world's store
    Reset {
        /// World directory holding the portal store
        #[arg(long, short)]
        world: PathBuf,
        /// Store key (default: from config)
        #[arg(long)]
        key: Option<String>,
        /// Required confirmation
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

#[derive(Deserialize)]
struct FrameLayout {
    #[serde(default)]
    frame: Vec<[i32; 3]>,
    #[serde(default)]
    solid: Vec<[i32; 3]>,
    start: [i32; 3],
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let config = cli
        .config
        .as_deref()
        .and_then(load_config)
        .map(SessionConfig::from_persisted)
        .unwrap_or_else(SessionConfig::with_defaults);

    let result = match cli.command {
        Command::Inspect {
            world,
            key,
            dimension,
            near,
            radius,
        } => run_inspect(&config, &world, key, dimension, near, radius),
        Command::CheckFrame { layout } => run_check_frame(&layout),
        Command::Migrate {
            world,
            key,
            input,
            dry_run,
        } => run_migrate(&config, &world, key, input, dry_run),
        Command::Reset { world, key, yes } => run_reset(&config, &world, key, yes),
    };

    if let Err(err) = result {
        exit_with_error(err);
    }
}

fn exit_with_error(err: io::Error) -> ! {
    eprintln!("Error: {}", err);
    std::process::exit(1);
}

fn store_key(config: &SessionConfig, key: Option<String>) -> String {
    key.unwrap_or_else(|| config.store_key.clone())
}

fn load_world(
    config: &SessionConfig,
    world: &Path,
    key: &str,
) -> io::Result<(PortalRegistry, LoadReport)> {
    let registry = PortalRegistry::new(config.routes.clone());
    let mut hook = DirectorySaveHook::new(world);
    let report = persistence::load_registry(&registry, &mut hook, key);
    if let Some(error) = report.error.as_ref() {
        return Err(io::Error::new(io::ErrorKind::InvalidData, error.to_string()));
    }
    Ok((registry, report))
}

fn print_report(report: &LoadReport) {
    println!("schema:          {}", report.schema);
    println!("portals loaded:  {}", report.loaded);
    for skipped in &report.skipped {
        println!("skipped record #{}: {}", skipped.index, skipped.reason);
    }
    if !report.repairs.is_empty() {
        println!(
            "repairs:         {} duplicates dropped, {} links cleared, {} pairs demoted",
            report.repairs.dropped_duplicates.len(),
            report.repairs.cleared_links,
            report.repairs.demoted
        );
    }
}

fn print_portal(record: &PortalRecord) {
    let link = record
        .linked_portal_id()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "  {} {:<12} {:<11} {} {:?} {}x{} tick={} link={}{}",
        record.id(),
        record.dimension(),
        record.state(),
        record.origin(),
        record.axis(),
        record.frame().width,
        record.frame().height,
        record.last_modified_tick(),
        link,
        if record.unknown_fields().is_empty() {
            String::new()
        } else {
            format!(" (+{} unknown fields)", record.unknown_fields().len())
        }
    );
}

fn run_inspect(
    config: &SessionConfig,
    world: &Path,
    key: Option<String>,
    dimension: Option<String>,
    near: Option<Vec<i32>>,
    radius: u32,
) -> io::Result<()> {
    let key = store_key(config, key);
    let (registry, report) = load_world(config, world, &key)?;
    println!("store:           {}", DirectorySaveHook::new(world).store_path(&key)?.display());
    print_report(&report);

    let mut by_state: BTreeMap<&str, usize> = BTreeMap::new();
    let records = registry.snapshot();
    for record in &records {
        *by_state.entry(record.state().name()).or_default() += 1;
    }
    for state in PortalState::ALL {
        println!("  {:<12} {}", state.name(), by_state.get(state.name()).copied().unwrap_or(0));
    }
    let traversable = records.iter().filter(|record| record.state().is_traversable()).count();
    println!("traversable:     {}", traversable);

    let listed = match (dimension, near) {
        (Some(dimension), Some(near)) => {
            let centre = BlockPos::new(near[0], near[1], near[2]);
            println!("within {} of {} in {}:", radius, centre, dimension);
            registry.find_near(&DimensionKey::new(dimension), centre, radius)
        }
        _ => records,
    };
    for record in &listed {
        print_portal(record);
    }
    Ok(())
}

fn run_check_frame(layout_path: &Path) -> io::Result<()> {
    let raw = std::fs::read(layout_path)?;
    let layout: FrameLayout = serde_json::from_slice(&raw)
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))?;
    let to_pos = |[x, y, z]: [i32; 3]| BlockPos::new(x, y, z);
    let frame: HashSet<BlockPos> = layout.frame.iter().copied().map(to_pos).collect();
    let solid: HashSet<BlockPos> = layout.solid.iter().copied().map(to_pos).collect();
    let start = to_pos(layout.start);

    let (region, area) = detect_frame(
        start,
        |pos| frame.contains(&pos),
        |pos| !frame.contains(&pos) && !solid.contains(&pos),
    )
    .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))?;
    let arrival = area.arrival_point();
    println!("frame origin:    {}", region.origin);
    println!("axis:            {:?}", region.axis);
    println!("size:            {}x{}", region.bounds.width, region.bounds.height);
    println!("interior:        {}x{} from {}", area.width, area.height, area.min);
    println!("arrival point:   ({:.1}, {:.1}, {:.1})", arrival.x, arrival.y, arrival.z);
    Ok(())
}

fn run_migrate(
    config: &SessionConfig,
    world: &Path,
    key: Option<String>,
    input: Option<PathBuf>,
    dry_run: bool,
) -> io::Result<()> {
    let key = store_key(config, key);
    let (registry, report) = match input {
        Some(input) => {
            let bytes = std::fs::read(&input)?;
            let registry = PortalRegistry::new(config.routes.clone());
            let report = persistence::load_blob(&registry, &bytes);
            if let Some(error) = report.error.as_ref() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{}: {}", input.display(), error),
                ));
            }
            (registry, report)
        }
        None => load_world(config, world, &key)?,
    };
    print_report(&report);
    if dry_run {
        println!("dry run: nothing written");
        return Ok(());
    }
    let mut hook = DirectorySaveHook::new(world);
    let summary = persistence::save_registry(&registry, &mut hook, &key)
        .map_err(|error| io::Error::new(io::ErrorKind::Other, error))?;
    println!(
        "wrote {} portals ({} bytes) to {}",
        summary.portals,
        summary.bytes,
        hook.store_path(&key)?.display()
    );
    Ok(())
}

fn run_reset(
    config: &SessionConfig,
    world: &Path,
    key: Option<String>,
    yes: bool,
) -> io::Result<()> {
    if !yes {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "reset drops every portal; pass --yes to confirm",
        ));
    }
    let key = store_key(config, key);
    let mut hook = DirectorySaveHook::new(world);
    let registry = PortalRegistry::new(config.routes.clone());
    // A damaged store is still reset; the load error only matters for reporting.
    let report = persistence::load_registry(&registry, &mut hook, &key);
    if let Some(error) = report.error {
        eprintln!("warning: existing store unreadable: {}", error);
    }
    let dropped = registry.reset();
    let blob = persistence::encode(&registry.snapshot())
        .map_err(|error| io::Error::new(io::ErrorKind::Other, error))?;
    hook.write_store(&key, &blob)?;
    println!("dropped {} portals from {}", dropped, hook.store_path(&key)?.display());
    Ok(())
}
