use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::cli::{CommonArgs, CommonCommands, utils};
use common::config::Configuration;
use eraser::log::{FileReader, FileSummary, LnEntry, LogFileManager, is_erased_at};
use eraser::scheduler::format_time;
use eraser::state::CYCLE_STATE_KEY;
use eraser::{FileMetadataStore, Lsn, PersistentCycleState};
use serde_json::json;
use tracing::debug;

#[derive(Parser)]
#[command(name = "eraserdb")]
#[command(about = "EraserDB - inspect log files and data eraser state")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize entries per type in one or all log files
    Scan {
        #[arg(long, help = "Log directory (defaults to the configured one)")]
        dir: Option<PathBuf>,

        #[arg(help = "File number in hex, e.g. 1f")]
        file: Option<String>,

        #[arg(long, help = "List every entry instead of a summary")]
        entries: bool,

        #[arg(long, help = "Print JSON")]
        json: bool,
    },
    /// Tell whether the entry at an LSN has been erased
    IsErased {
        #[arg(long, help = "Log directory (defaults to the configured one)")]
        dir: Option<PathBuf>,

        #[arg(help = "Position as 0x<file>/0x<offset>")]
        lsn: Lsn,
    },
    /// Decode the persisted erasure cycle state
    State {
        #[arg(help = "State record (defaults to the one in the configured state directory)")]
        path: Option<PathBuf>,

        #[arg(long, help = "Print JSON")]
        json: bool,
    },
    #[command(flatten)]
    Common(CommonCommands),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    utils::init_logging(&cli.common);
    let config = utils::load_config(cli.common.config.as_ref())?;

    match cli.command {
        Commands::Scan {
            dir,
            file,
            entries,
            json,
        } => {
            let log = LogFileManager::new(dir.unwrap_or_else(|| config.log.dir.clone()));
            debug!(dir = %log.dir().display(), "Scanning log files");
            let files = match file {
                Some(file) => vec![
                    u32::from_str_radix(file.trim_start_matches("0x"), 16)
                        .with_context(|| format!("Invalid file number '{file}'"))?,
                ],
                None => log.list_file_numbers().context("Failed to list log files")?,
            };
            if entries {
                list_entries(&log, &files, json)
            } else {
                summarize(&log, &files, json)
            }
        }
        Commands::IsErased { dir, lsn } => {
            let log = LogFileManager::new(dir.unwrap_or_else(|| config.log.dir.clone()));
            let erased = is_erased_at(&log.file_path(lsn.file_number()), lsn)
                .with_context(|| format!("Failed to probe {lsn}"))?;
            println!("{lsn}: {}", if erased { "erased" } else { "not erased" });
            Ok(())
        }
        Commands::State { path, json } => show_state(&config, path.as_deref(), json),
        Commands::Common(command) => utils::handle_common_command(&command, &config),
    }
}

fn summarize(log: &LogFileManager, files: &[u32], json: bool) -> Result<()> {
    let mut summaries = Vec::with_capacity(files.len());
    for &file in files {
        let summary = FileSummary::scan(&log.file_path(file), file)
            .with_context(|| format!("Failed to scan {}", LogFileManager::file_name(file)))?;
        summaries.push(summary);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }
    for summary in &summaries {
        println!(
            "{}: {} entries, {} bytes, {} erased ({} not zeroed)",
            LogFileManager::file_name(summary.file_number),
            summary.total_entries,
            summary.total_bytes,
            summary.erased_entries,
            summary.erased_not_zeroed
        );
        for (name, tally) in &summary.by_type {
            println!("  {name:<12} {:>8} entries {:>12} bytes", tally.count, tally.bytes);
        }
    }
    Ok(())
}

fn list_entries(log: &LogFileManager, files: &[u32], json: bool) -> Result<()> {
    for &file in files {
        let path = log.file_path(file);
        let mut reader = FileReader::open(&path, file)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        while let Some(item) = reader.next_entry()? {
            let entry_type = item.entry_type();
            let key = if entry_type.is_leaf_record() {
                LnEntry::decode(item.payload.clone(), item.lsn)
                    .ok()
                    .map(|ln| hex::encode(&ln.key))
            } else {
                None
            };
            if json {
                let line = json!({
                    "lsn": item.lsn.to_string(),
                    "type": entry_type.name(),
                    "size": item.total_size(),
                    "vlsn": item.header.vlsn.map(|v| v.0),
                    "key": key,
                });
                println!("{line}");
            } else {
                println!(
                    "{} {:<12} {:>8} {}",
                    item.lsn,
                    entry_type.name(),
                    item.total_size(),
                    key.unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}

fn show_state(config: &Configuration, path: Option<&Path>, json: bool) -> Result<()> {
    let bytes = match path {
        Some(path) => FileMetadataStore::read_path(path)?,
        None => FileMetadataStore::read_path(&FileMetadataStore::record_path(
            &config.state.dir,
            CYCLE_STATE_KEY,
        ))?,
    };
    let state = PersistentCycleState::decode(&bytes).context("Failed to decode cycle state")?;
    let boundary = (!state.oldest_allowed_obsolete_lsn.is_null())
        .then(|| state.oldest_allowed_obsolete_lsn.to_string());

    if json {
        let value = json!({
            "start": format_time(state.start_time_ms),
            "end": format_time(state.end_time_ms),
            "total_work": state.total_work,
            "completed": state.completed,
            "remaining": state.remaining,
            "oldest_allowed_obsolete_lsn": boundary,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }
    println!("Cycle: {} .. {}", format_time(state.start_time_ms), format_time(state.end_time_ms));
    println!("Estimated work: {}", state.total_work);
    println!("Completed files: {}", format_files(&state.completed));
    println!("Remaining files: {}", format_files(&state.remaining));
    println!("Aging boundary: {}", boundary.as_deref().unwrap_or("none"));
    Ok(())
}

fn format_files(files: &eraser::state::FileSet) -> String {
    if files.is_empty() {
        return "none".to_string();
    }
    files
        .iter()
        .map(|file| format!("{file:#x}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use eraser::collaborators::MetadataStore;
    use eraser::log::{LogEntryType, LogWriter};
    use eraser::state::FileSet;
    use tempfile::TempDir;

    #[test]
    fn test_parses_lsn_argument() {
        let cli = Cli::try_parse_from(["eraserdb", "is-erased", "0x1f/0x2a0"]).unwrap();
        match cli.command {
            Commands::IsErased { dir, lsn } => {
                assert!(dir.is_none());
                assert_eq!(lsn, Lsn::new(0x1f, 0x2a0));
            }
            _ => panic!("expected is-erased"),
        }
        assert!(Cli::try_parse_from(["eraserdb", "is-erased", "nonsense"]).is_err());
    }

    #[test]
    fn test_scan_real_file() {
        let dir = TempDir::new().unwrap();
        let mut writer = LogWriter::create(dir.path(), 1, 0).unwrap();
        writer
            .append_ln(LogEntryType::InsLn, &LnEntry::new(1, &b"key"[..], &b"value"[..]), None)
            .unwrap();
        writer.finish().unwrap();

        let log = LogFileManager::new(dir.path());
        summarize(&log, &[1], true).unwrap();
        list_entries(&log, &[1], false).unwrap();
        assert!(summarize(&log, &[2], false).is_err());
    }

    #[test]
    fn test_show_state_from_configured_dir() {
        let dir = TempDir::new().unwrap();
        let mut config = Configuration::default();
        config.state.dir = dir.path().to_path_buf();

        assert!(show_state(&config, None, false).is_err());

        let state = PersistentCycleState {
            start_time_ms: 1_000,
            end_time_ms: 2_000,
            total_work: 30,
            completed: FileSet::from([1]),
            remaining: FileSet::from([2, 3]),
            oldest_allowed_obsolete_lsn: Lsn::NULL,
        };
        let store = FileMetadataStore::new(dir.path()).unwrap();
        store.put(CYCLE_STATE_KEY, &state.encode()).unwrap();
        show_state(&config, None, false).unwrap();
        show_state(&config, Some(&store.path_for(CYCLE_STATE_KEY)), true).unwrap();
    }

    #[test]
    fn test_show_state_leaves_missing_dir_alone() {
        let dir = TempDir::new().unwrap();
        let mut config = Configuration::default();
        config.state.dir = dir.path().join("never-created");

        assert!(show_state(&config, None, true).is_err());
        assert!(!config.state.dir.exists());
    }

    #[test]
    fn test_format_files() {
        assert_eq!(format_files(&FileSet::new()), "none");
        assert_eq!(format_files(&FileSet::from([1, 31])), "0x1, 0x1f");
    }
}
