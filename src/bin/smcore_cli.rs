use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use smcore::engine::RunMetrics;
use smcore::geo::{bbox_from_center, parse_center_arg};
use smcore::id_alloc::IdAllocator;
use smcore::loader::LoadFilter;
use smcore::serializer::{write_osm_with_options, SerializeOptions};
use smcore::signals::SignalFlags;
use smcore::{run, Config, InputMode};

fn main() {
    let config = match parse_args() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    tracing_subscriber::fmt::init();

    for flag in &config.inert_flags {
        tracing::info!(flag = %flag, "drawing-backend flag accepted and ignored: rendering is out of scope for this build");
    }

    match run_cli(&config) {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}

struct CliConfig {
    input: PathBuf,
    rules: PathBuf,
    osm_output: Option<PathBuf>,
    mmap: bool,
    use_load_filter: bool,
    center: Option<(f64, f64, smcore::geo::ScaleSpec)>,
    inert_flags: Vec<String>,
}

fn parse_args() -> Result<CliConfig, String> {
    let mut input: Option<PathBuf> = None;
    let mut rules: Option<PathBuf> = None;
    let mut osm_output: Option<PathBuf> = None;
    let mut mmap = true;
    let mut use_load_filter = false;
    let mut center_arg: Option<String> = None;
    let mut inert_flags = Vec::new();

    let mut args = std::env::args().skip(1).peekable();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-V" | "--version" => {
                println!("smcore-cli {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "-i" => input = Some(PathBuf::from(expect_value(&mut args, "-i")?)),
            "-r" => rules = Some(PathBuf::from(expect_value(&mut args, "-r")?)),
            "-w" => osm_output = Some(PathBuf::from(expect_value(&mut args, "-w")?)),
            "-M" => mmap = true,
            "-m" => mmap = false,
            "-f" => use_load_filter = true,
            "-o" => {
                expect_value(&mut args, "-o")?;
                inert_flags.push("-o".to_string());
            }
            "-P" => {
                expect_value(&mut args, "-P")?;
                inert_flags.push("-P".to_string());
            }
            "-d" => {
                expect_value(&mut args, "-d")?;
                inert_flags.push("-d".to_string());
            }
            "-g" => {
                expect_value(&mut args, "-g")?;
                inert_flags.push("-g".to_string());
            }
            "-b" => {
                expect_value(&mut args, "-b")?;
                inert_flags.push("-b".to_string());
            }
            "-G" => inert_flags.push("-G".to_string()),
            "-l" => inert_flags.push("-l".to_string()),
            _ if arg.starts_with('-') => {
                return Err(format!("error: unknown option '{arg}'"));
            }
            _ => {
                if center_arg.is_some() {
                    return Err(format!("error: unexpected positional argument '{arg}'"));
                }
                center_arg = Some(arg);
            }
        }
    }

    let input = input.ok_or_else(|| format!("error: -i <input.osm> is required\n\n{}", help_text()))?;
    let rules = rules.ok_or_else(|| format!("error: -r <rules.osm> is required\n\n{}", help_text()))?;

    let center = match center_arg {
        Some(raw) => Some(parse_center_arg(&raw).map_err(|e| format!("error: invalid center argument: {e}"))?),
        None => None,
    };

    Ok(CliConfig { input, rules, osm_output, mmap, use_load_filter, center, inert_flags })
}

fn expect_value(args: &mut std::iter::Peekable<impl Iterator<Item = String>>, flag: &str) -> Result<String, String> {
    args.next().ok_or_else(|| format!("error: {flag} expects a value"))
}

fn run_cli(config: &CliConfig) -> Result<(), String> {
    let engine_config = Config::load(Path::new("smcore.toml")).map_err(|e| e.to_string())?;

    let bbox = match config.center {
        Some((lat, lon, scale)) => {
            let bbox = bbox_from_center(lat, lon, scale);
            if bbox.is_none() {
                tracing::warn!("plain scale argument needs paper size/DPI to resolve a bounding box; loading unrestricted");
            }
            bbox
        }
        None => None,
    };

    let filter = if config.use_load_filter { LoadFilter { bbox } } else { LoadFilter::unrestricted() };
    let mode = if config.mmap { InputMode::Mmap } else { InputMode::Buffered };

    let signals = SignalFlags::install().map_err(|e| format!("failed to install signal handlers: {e}"))?;

    let outcome = run(
        &config.input,
        &config.rules,
        mode,
        &engine_config,
        filter,
        Arc::clone(&signals.interrupted),
        Arc::new(IdAllocator::new()),
        Some(signals.progress_requested.as_ref()),
    )
    .map_err(|e| e.to_string())?;

    print_report(&outcome.load_stats, &outcome.metrics);

    if let Some(out_path) = &config.osm_output {
        let mut objects = Vec::new();
        outcome.store.traverse(|_id, _otype, obj| objects.push(obj));

        let file = File::create(out_path).map_err(|e| format!("failed to create '{}': {e}", out_path.display()))?;
        let options = SerializeOptions { bounds: bbox, comment: Some("generated by smcore-cli".to_string()), rewrite_synthetic_ids: true };
        let bytes = write_osm_with_options(BufWriter::new(file), objects, &options).map_err(|e| e.to_string())?;
        tracing::info!(path = %out_path.display(), bytes, "wrote OSM/XML output");
    }

    Ok(())
}

fn print_report(load_stats: &smcore::stats::LoadStats, metrics: &RunMetrics) {
    println!(
        "loaded {} nodes, {} ways, {} relations ({} duplicates overwritten, {} skipped out of bbox)",
        load_stats.nodes(),
        load_stats.ways(),
        load_stats.relations(),
        load_stats.duplicates_overwritten,
        load_stats.skipped_out_of_bbox,
    );
    println!(
        "compiled {} rules ({} skipped), applied {} times across {} passes{}",
        metrics.rules_compiled,
        metrics.rules_skipped,
        metrics.total_applied(),
        metrics.passes.len(),
        if metrics.cancelled { " (cancelled)" } else { "" },
    );
}

fn print_help() {
    println!("{}", help_text());
}

fn help_text() -> String {
    format!(
        "smcore-cli {version}

Rule-driven OSM/XML object loader, indexer, and rule executor.

Usage:
  smcore-cli -i <input.osm> -r <rules.osm> [OPTIONS] [<lat>:<lon>:<scale|sizeM|sizeD>]

Options:
  -i <input.osm>     Input OSM/XML file (required).
  -r <rules.osm>     Rules OSM/XML file (required).
  -w <osm-output>    Write the filtered/rule-mutated object set as OSM/XML.
  -M / -m            Read input via mmap (default) / into an owned buffer.
  -f                 Restrict the loader itself to the positional bounding box
                     (otherwise the box only gates rule dispatch at render time).
  -o <image>         Accepted, inert: drawing backend is out of scope here.
  -P <paper>         Accepted, inert.
  -d <dpi>           Accepted, inert.
  -g <grid spec>     Accepted, inert.
  -G                 Accepted, inert.
  -l                 Accepted, inert (landscape orientation).
  -b <bgcolor>       Accepted, inert.
  -h, --help         Show this help message.
  -V, --version      Print version information.

Signals:
  SIGINT             Cancel the in-progress rule pass; the run finishes gracefully.
  SIGUSR1            Request a progress log line from the loader.

Exit codes:
  0  Success.
  1  Runtime error (I/O, malformed rules file with no usable rules, allocation failure).
  2  Invalid arguments.
",
        version = env!("CARGO_PKG_VERSION"),
    )
}

