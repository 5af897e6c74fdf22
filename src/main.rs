use std::{
    path::{Path, PathBuf},
    process,
};

use anyhow::Context;
use clap::Parser;
use log::LevelFilter;
use vrm2pmx::{
    CancelToken, ConversionStatus, init_logging, run_conversion,
    convert::{ConvertOptions, analyze_vrm_with_tables, taxonomy::TuningTables},
    settings::{load_tuning_tables, save_tuning_tables},
};

const EXIT_FAILURE: i32 = 1;
const EXIT_CANCELLED: i32 = 3;
const LONG_PATH_CHARS: usize = 255;

#[derive(Parser, Debug, PartialEq)]
#[command(name = "vrm2pmx", version)]
#[command(about = "Convert a VRM avatar into a PMX model", long_about = None)]
struct CliArgs {
    /// Source `.vrm` file
    #[arg(required_unless_present = "dump_tables")]
    input: Option<PathBuf>,

    /// Output `.pmx` path; defaults to a timestamped folder beside the input
    output: Option<PathBuf>,

    /// Tuning tables JSON to use instead of the built-in defaults
    #[arg(long, value_name = "PATH")]
    tables: Option<PathBuf>,

    /// Write the active tuning tables to this path
    #[arg(long, value_name = "PATH")]
    dump_tables: Option<PathBuf>,

    /// Print the bone analysis as JSON instead of converting
    #[arg(long)]
    analyze: bool,

    /// Cap the texture worker pool at five threads
    #[arg(long)]
    save_immediately: bool,

    /// Log debug messages
    #[arg(short, long)]
    verbose: bool,
}

/// `<input dir>/<stem>_<YYYYMMDD_HHMMSS>/<stem>.pmx`
fn default_output_path(input: &Path, timestamp: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "model".to_string());
    input
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(format!("{stem}_{timestamp}"))
        .join(format!("{stem}.pmx"))
}

fn main() {
    let cli = CliArgs::parse();

    init_logging(if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });

    match run(cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            process::exit(EXIT_FAILURE);
        }
    }
}

fn run(cli: CliArgs) -> anyhow::Result<i32> {
    let tables = match &cli.tables {
        Some(path) => load_tuning_tables(path)?,
        None => TuningTables::default(),
    };

    if let Some(path) = &cli.dump_tables {
        save_tuning_tables(path, &tables)?;
        println!("Tables written: {}", path.display());
    }
    let Some(input) = cli.input else {
        return Ok(0);
    };

    if cli.analyze {
        let report = analyze_vrm_with_tables(&input, &tables.taxonomy)
            .with_context(|| format!("failed to analyze {}", input.display()))?;
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to serialize analysis report")?
        );
        return Ok(0);
    }

    let output = cli.output.unwrap_or_else(|| {
        let timestamp = jiff::Zoned::now().strftime("%Y%m%d_%H%M%S").to_string();
        default_output_path(&input, &timestamp)
    });
    if output.as_os_str().len() >= LONG_PATH_CHARS {
        log::warn!(
            "output path is {} characters long: {}",
            output.as_os_str().len(),
            output.display()
        );
    }

    let options = ConvertOptions {
        save_immediately: cli.save_immediately,
        ..ConvertOptions::default()
    };
    let outcome = run_conversion(
        &input,
        &output,
        &options,
        &tables,
        &CancelToken::new(),
        &mut |stage| log::debug!("stage finished: {stage}"),
    );

    match outcome.status {
        ConversionStatus::Succeeded => {
            if let Some(report) = &outcome.report {
                println!("Model: {}", report.model_name);
                println!("Output: {}", report.output_path.display());
                println!(
                    "Bones: {}, Vertices: {}, Faces: {}, Materials: {}",
                    report.bone_count, report.vertex_count, report.face_count, report.material_count
                );
                println!(
                    "Morphs: {}, Rigid bodies: {}, Joints: {}",
                    report.morph_count, report.rigid_body_count, report.joint_count
                );
                println!("Issues: {}", report.issues.len());
            }
            Ok(0)
        }
        ConversionStatus::Cancelled => Ok(EXIT_CANCELLED),
        ConversionStatus::Failed => {
            eprintln!(
                "{}",
                outcome.failure.as_deref().unwrap_or("conversion failed")
            );
            Ok(EXIT_FAILURE)
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::error::ErrorKind;

    use super::*;

    fn parse(values: &[&str]) -> Result<CliArgs, clap::Error> {
        CliArgs::try_parse_from(std::iter::once("vrm2pmx").chain(values.iter().copied()))
    }

    #[test]
    fn given_input_and_flags_when_parsing_then_fields_are_set() {
        let cli = parse(&[
            "avatar.vrm",
            "out.pmx",
            "--tables",
            "tables.json",
            "--save-immediately",
            "--verbose",
        ])
        .expect("parse");

        assert_eq!(cli.input, Some(PathBuf::from("avatar.vrm")));
        assert_eq!(cli.output, Some(PathBuf::from("out.pmx")));
        assert_eq!(cli.tables, Some(PathBuf::from("tables.json")));
        assert!(cli.save_immediately && cli.verbose && !cli.analyze);
    }

    #[test]
    fn given_bad_arguments_when_parsing_then_usage_error_is_returned() {
        let kind = |values: &[&str]| parse(values).expect_err("usage error").kind();

        assert_eq!(kind(&[]), ErrorKind::MissingRequiredArgument);
        assert_eq!(kind(&["a.vrm", "--bogus"]), ErrorKind::UnknownArgument);
        assert!(parse(&["a.vrm", "--tables"]).is_err());
        assert!(parse(&["a.vrm", "b.pmx", "c.pmx"]).is_err());
    }

    #[test]
    fn given_only_dump_tables_when_parsing_then_input_is_optional() {
        let cli = parse(&["--dump-tables", "tables.json"]).expect("parse");

        assert_eq!(cli.input, None);
        assert_eq!(cli.dump_tables, Some(PathBuf::from("tables.json")));
    }

    #[test]
    fn given_derived_parser_when_checked_then_definition_is_consistent() {
        use clap::CommandFactory;

        CliArgs::command().debug_assert();
    }

    #[test]
    fn given_input_when_defaulting_output_then_timestamped_folder_holds_stem_pmx() {
        let output = default_output_path(Path::new("models/alicia.vrm"), "20260101_120000");

        assert_eq!(
            output,
            Path::new("models/alicia_20260101_120000/alicia.pmx")
        );
    }
}
