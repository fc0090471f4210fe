use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use gis_change_detector::error::Error;
use gis_change_detector::pipeline::{today, ChangeOutcome, JoinOutcome};
use gis_change_detector::{Crs, Pipeline, PipelineConfig};

fn cli() -> Command {
    Command::new("GIS Change Detector")
        .version("0.1")
        .author("Jesper Fjellin")
        .about("Detects features added and deleted between the newest and previous snapshot of a dataset")
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .default_value("info")
                .help("Log filter used when RUST_LOG is not set"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("detect")
                .about("Compare the newest delivery against the latest report")
                .arg(Arg::new("config").short('c').long("config").help("INI file with pipeline settings"))
                .arg(Arg::new("newest").long("newest").help("Directory with one folder per delivery"))
                .arg(Arg::new("previous").long("previous").help("Directory with previous reports"))
                .arg(Arg::new("output").short('o').long("output").help("Directory for the change reports"))
                .arg(Arg::new("crs").long("crs").help("Target CRS of the newest data, e.g. EPSG:3044"))
                .arg(Arg::new("extension").long("extension").help("Extension of dataset files"))
                .arg(
                    Arg::new("skip-deleted")
                        .long("skip-deleted")
                        .action(ArgAction::SetTrue)
                        .help("Only write the added features"),
                ),
        )
        .subcommand(
            Command::new("info")
                .about("Print the CRS and attribute schema of a dataset")
                .arg(Arg::new("file").required(true)),
        )
        .subcommand(
            Command::new("fix")
                .about("Repair the geometries of a dataset")
                .arg(Arg::new("input").required(true))
                .arg(Arg::new("output").required(true)),
        )
        .subcommand(
            Command::new("reproject")
                .about("Reproject a dataset")
                .arg(Arg::new("input").required(true))
                .arg(Arg::new("output").required(true))
                .arg(Arg::new("crs").long("crs").default_value("EPSG:3044")),
        )
        .subcommand(
            Command::new("join")
                .about("Join the attributes of the nearest line onto every point")
                .arg(Arg::new("points").required(true))
                .arg(Arg::new("lines").required(true))
                .arg(Arg::new("output").short('o').long("output").default_value("output"))
                .arg(Arg::new("label").long("label").default_value("gfc")),
        )
        .subcommand(Command::new("algorithms").about("List the registered processing algorithms"))
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn path_arg(matches: &ArgMatches, name: &str) -> Option<PathBuf> {
    matches.get_one::<String>(name).map(PathBuf::from)
}

fn detect_config(matches: &ArgMatches) -> Result<PipelineConfig, Error> {
    let mut config = match path_arg(matches, "config") {
        Some(path) => PipelineConfig::load(&path)?,
        None => {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            PipelineConfig::rooted_at(&cwd)
        }
    };
    if let Some(dir) = path_arg(matches, "newest") {
        config.newest_dir = dir;
    }
    if let Some(dir) = path_arg(matches, "previous") {
        config.previous_dir = dir;
    }
    if let Some(dir) = path_arg(matches, "output") {
        config.output_dir = dir;
    }
    if let Some(crs) = matches.get_one::<String>("crs") {
        config.target_crs = crs.parse()?;
    }
    if let Some(extension) = matches.get_one::<String>("extension") {
        config.dataset_extension = extension.trim_start_matches('.').to_string();
    }
    if matches.get_flag("skip-deleted") {
        config.write_deleted = false;
    }
    Ok(config)
}

/// Returns whether the run produced its result.
fn run(matches: &ArgMatches) -> Result<bool, Error> {
    let pipeline = Pipeline::new();
    match matches.subcommand() {
        Some(("detect", sub)) => {
            let config = detect_config(sub)?;
            match pipeline.run_change_detection(&config, today())? {
                ChangeOutcome::Detected(summary) => {
                    println!(
                        "{} added, {} deleted, {} unchanged",
                        summary.added, summary.deleted, summary.unchanged
                    );
                    println!("Added features written to {}", summary.added_path.display());
                    if let Some(path) = summary.deleted_path {
                        println!("Deleted features written to {}", path.display());
                    }
                    Ok(true)
                }
                ChangeOutcome::CrsMismatch { previous, newest } => {
                    eprintln!("CRS does not match: previous {} vs newest {}", previous, newest);
                    Ok(false)
                }
            }
        }
        Some(("info", sub)) => {
            let file = path_arg(sub, "file").unwrap_or_default();
            let layer = pipeline.read_layer(&file)?;
            println!("{} ({} features, {})", layer.name, layer.feature_count(), layer.crs);
            for field in layer.fields() {
                println!("{} {}", field.name, field.field_type.type_name());
            }
            Ok(true)
        }
        Some(("fix", sub)) => {
            let layer = pipeline.read_layer(&path_arg(sub, "input").unwrap_or_default())?;
            let fixed = pipeline.fix_geometries(layer)?;
            fixed.write(&path_arg(sub, "output").unwrap_or_default())?;
            Ok(true)
        }
        Some(("reproject", sub)) => {
            let target: Crs = sub
                .get_one::<String>("crs")
                .map(String::as_str)
                .unwrap_or("EPSG:3044")
                .parse()?;
            let layer = pipeline.read_layer(&path_arg(sub, "input").unwrap_or_default())?;
            let projected = pipeline.reproject_layer(layer, &target)?;
            projected.write(&path_arg(sub, "output").unwrap_or_default())?;
            Ok(true)
        }
        Some(("join", sub)) => {
            let points = pipeline.read_layer(&path_arg(sub, "points").unwrap_or_default())?;
            let lines = pipeline.read_layer(&path_arg(sub, "lines").unwrap_or_default())?;
            let output = path_arg(sub, "output").unwrap_or_else(|| PathBuf::from("output"));
            let label = sub.get_one::<String>("label").map(String::as_str).unwrap_or("gfc");
            match pipeline.join_attributes_by_nearest(points, lines, &output, label, today())? {
                JoinOutcome::Joined { path, joined, unjoinable } => {
                    println!("{} joined, {} without a neighbour", joined, unjoinable);
                    println!("Output written to {}", path.display());
                    Ok(true)
                }
                JoinOutcome::CrsMismatch { points, lines } => {
                    eprintln!("CRS does not match: points {} vs lines {}", points, lines);
                    Ok(false)
                }
            }
        }
        Some(("algorithms", _)) => {
            for (id, name) in pipeline.processing().algorithms() {
                println!("{} -> {}", id, name);
            }
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn main() {
    let matches = cli().get_matches();
    let level = matches
        .get_one::<String>("log-level")
        .map(String::as_str)
        .unwrap_or("info");
    init_logging(level);

    match run(&matches) {
        Ok(true) => println!("Processing completed successfully"),
        Ok(false) => {
            eprintln!("Please ensure all input files use the same coordinate reference system.");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error processing files: {}", e);
            if e.is_crs_mismatch() {
                eprintln!("Please ensure all input files use the same coordinate reference system.");
            }
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn detect_flags_override_config() {
        let matches = cli()
            .try_get_matches_from([
                "gis-change-detector",
                "detect",
                "--newest",
                "/data/tab",
                "--crs",
                "EPSG:25832",
                "--extension",
                ".json",
                "--skip-deleted",
            ])
            .unwrap();
        let (_, sub) = matches.subcommand().unwrap();
        let config = detect_config(sub).unwrap();
        assert_eq!(config.newest_dir, PathBuf::from("/data/tab"));
        assert_eq!(config.target_crs, Crs::epsg(25832));
        assert_eq!(config.dataset_extension, "json");
        assert!(!config.write_deleted);
    }
}
