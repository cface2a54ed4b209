use clap::{ArgAction, Parser, Subcommand};
use log::LevelFilter;
use std::path::{Path, PathBuf};

use mqtext_core::{
    CodecError, DialogDatabase, ExportFormat, LayoutConfig, Result, RomLayout, SaveMode,
    TableSource,
};

#[derive(Debug, Parser)]
#[command(name = "mqtext", version, about = "Dialog text codec for the Mystic Quest ROM")]
struct Args {
    /// Character table to use instead of the built-in one.
    #[arg(long, global = true, value_name = "TBL")]
    table: Option<PathBuf>,

    /// Layout simulator settings (JSON).
    #[arg(long, global = true, value_name = "JSON")]
    config: Option<PathBuf>,

    /// More log output; repeat for debug and trace.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Decode every dialog and write them to a JSON file.
    Extract { rom: PathBuf, json: PathBuf },

    /// Re-encode edited dialogs and write a new ROM.
    Import {
        rom_in: PathBuf,
        json: PathBuf,
        rom_out: PathBuf,
        /// Rebuild the whole dialog region instead of writing in place.
        #[arg(long)]
        repack: bool,
        /// Input format; guessed from the extension when omitted.
        #[arg(long, value_parser = parse_format)]
        format: Option<ExportFormat>,
    },

    /// Check that every dialog re-encodes to its original bytes.
    Verify { rom: PathBuf },

    /// Report dialogs that overflow the text box.
    Layout { rom: PathBuf },

    /// Print the expanded dictionary.
    Dict { rom: PathBuf },

    /// Print dialog and region statistics.
    Stats { rom: PathBuf },

    /// List empty, duplicated and partly undecoded dialogs.
    Check { rom: PathBuf },

    /// Find dialogs whose text contains a string.
    Search { rom: PathBuf, query: String },

    /// Export every dialog in any supported format.
    Export {
        rom: PathBuf,
        path: PathBuf,
        #[arg(long, value_parser = parse_format)]
        format: Option<ExportFormat>,
    },
}

fn parse_format(s: &str) -> std::result::Result<ExportFormat, String> {
    s.parse().map_err(|e: CodecError| e.to_string())
}

/// How a command finished when nothing fatal happened.
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Clean,
    DialogFailures,
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    let result = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply();
    if let Err(err) = result {
        eprintln!("Failed to set up logging: {err}");
    }
}

fn open(args: &Args, rom: &Path) -> Result<DialogDatabase> {
    let source = match &args.table {
        Some(path) => TableSource::File(path.clone()),
        None => TableSource::Reference,
    };
    DialogDatabase::open(rom, RomLayout::reference(), source.load()?)
}

fn format_for(explicit: Option<ExportFormat>, path: &Path) -> ExportFormat {
    explicit
        .or_else(|| ExportFormat::from_path(path))
        .unwrap_or(ExportFormat::Json)
}

fn run(args: &Args) -> Result<Outcome> {
    match &args.command {
        Command::Extract { rom, json } => {
            let db = open(args, rom)?;
            db.export(ExportFormat::Json, json)?;
            println!("Extracted {} dialogs to {}", db.len(), json.display());
            Ok(Outcome::Clean)
        }

        Command::Import {
            rom_in,
            json,
            rom_out,
            repack,
            format,
        } => {
            let mut db = open(args, rom_in)?;
            let report = db.import(format_for(*format, json), json)?;
            for failure in &report.failures {
                eprintln!("dialog 0x{:04X}: {}", failure.id, failure.error);
            }

            let config = layout_config(args)?;
            for id in &report.applied {
                let layout = db.layout_report(*id, &config)?;
                for warning in &layout.warnings {
                    log::warn!("dialog 0x{:04X}: {}", id, warning);
                }
            }

            let mode = if *repack {
                SaveMode::Repack
            } else {
                SaveMode::InPlace
            };
            let summary = db.save(rom_out, mode)?;
            println!(
                "Wrote {} dialogs to {} ({} of {} bytes used, {} free)",
                report.applied.len(),
                summary.path.display(),
                summary.bytes_used,
                summary.budget,
                summary.free()
            );
            if report.is_clean() {
                Ok(Outcome::Clean)
            } else {
                eprintln!("{} dialog(s) were not imported", report.failures.len());
                Ok(Outcome::DialogFailures)
            }
        }

        Command::Verify { rom } => {
            let db = open(args, rom)?;
            let mismatches = db.verify();
            for m in &mismatches {
                match (&m.error, m.first_difference) {
                    (Some(err), _) => eprintln!("dialog 0x{:04X}: {}", m.id, err),
                    (None, Some(at)) => eprintln!(
                        "dialog 0x{:04X}: differs at byte {} ({} bytes vs {} re-encoded)",
                        m.id,
                        at,
                        m.original.len(),
                        m.reencoded.len()
                    ),
                    (None, None) => eprintln!("dialog 0x{:04X}: mismatch", m.id),
                }
            }
            println!(
                "{} of {} dialogs round-trip",
                db.len() - mismatches.len(),
                db.len()
            );
            Ok(if mismatches.is_empty() {
                Outcome::Clean
            } else {
                Outcome::DialogFailures
            })
        }

        Command::Layout { rom } => {
            let config = layout_config(args)?;
            let db = open(args, rom)?;
            let flagged = db.check_layout(&config);
            for (id, report) in &flagged {
                for warning in &report.warnings {
                    eprintln!("dialog 0x{:04X}: {}", id, warning);
                }
            }
            println!("{} of {} dialogs overflow", flagged.len(), db.len());
            Ok(if flagged.is_empty() {
                Outcome::Clean
            } else {
                Outcome::DialogFailures
            })
        }

        Command::Dict { rom } => {
            let db = open(args, rom)?;
            let usage = db.dictionary_usage();
            for (line, entry) in db.dictionary().to_table_lines().iter().zip(db.dictionary().entries()) {
                let uses = usage.get(&entry.index).copied().unwrap_or(0);
                println!("{}  ({} uses)", line, uses);
            }
            Ok(Outcome::Clean)
        }

        Command::Stats { rom } => {
            let db = open(args, rom)?;
            let stats = db.statistics();
            println!("Dialogs:            {}", stats.dialog_count);
            println!("Total bytes:        {}", stats.total_bytes);
            println!("Average length:     {:.1}", stats.average_length);
            println!("Modified:           {}", stats.modified);
            println!("Tagged:             {}", stats.tagged);
            println!(
                "Dictionary entries: {} of {} used",
                stats.dictionary_entries_used,
                db.dictionary().len()
            );
            println!(
                "Region:             0x{:06X}, {} of {} bytes used, {} free",
                stats.region_start,
                stats.region_used,
                stats.region_budget,
                stats.region_free()
            );
            println!("Tokens:");
            for (token, count) in &stats.control_usage {
                println!("  {:<18} {}", token, count);
            }
            Ok(Outcome::Clean)
        }

        Command::Check { rom } => {
            let db = open(args, rom)?;
            let issues = db.check();
            for (id, issue) in &issues {
                println!("0x{:04X}  {}", id, issue);
            }
            println!("{} issue(s)", issues.len());
            Ok(Outcome::Clean)
        }

        Command::Search { rom, query } => {
            let db = open(args, rom)?;
            let hits = db.search(query);
            for record in &hits {
                println!("0x{:04X}  {}", record.id, record.text);
            }
            println!("{} match(es)", hits.len());
            Ok(Outcome::Clean)
        }

        Command::Export { rom, path, format } => {
            let db = open(args, rom)?;
            let format = format_for(*format, path);
            db.export(format, path)?;
            println!("Exported {} dialogs as {} to {}", db.len(), format, path.display());
            Ok(Outcome::Clean)
        }
    }
}

fn layout_config(args: &Args) -> Result<LayoutConfig> {
    match &args.config {
        Some(path) => LayoutConfig::load(path),
        None => Ok(LayoutConfig::default()),
    }
}

/// 0 when clean, 1 for per-dialog or per-save failures, 2 when the session
/// could not start.
fn exit_code(result: &Result<Outcome>) -> i32 {
    match result {
        Ok(Outcome::Clean) => 0,
        Ok(Outcome::DialogFailures) => 1,
        Err(err) if err.is_fatal() => 2,
        Err(_) => 1,
    }
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let result = run(&args);
    if let Err(err) = &result {
        eprintln!("Error: {err}");
    }
    let code = exit_code(&result);
    if code != 0 {
        std::process::exit(code);
    }
}
