use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::Level;

use cephdig_core::{
	list_entries, locate, DumpCluster, ExtractConfig, FilterRules, InodeId, LooseFiles, OutputSink,
	Resolution, SizeRule, SkipLog, SkipLogFormat, SkipReason, StartPoint, TarGzArchive, TreeWalker,
};

#[derive(Parser, Debug)]
#[command(name = "cephdig", version, about = "cephdig - CephFS tree recovery from RADOS objects")]
struct Cli {
	/// Object dump directory (contains pools.json)
	#[arg(long, global = true, default_value = ".")]
	store: PathBuf,
	/// Pool holding directory fragments
	#[arg(short = 'p', long, global = true, default_value = "metadata")]
	metadata_pool: String,
	/// Probe timeout in seconds
	#[arg(short = 't', long, global = true, default_value = "1")]
	timeout: u64,
	/// Verbose logging
	#[arg(short = 'd', long, global = true)]
	debug: bool,
	#[command(subcommand)]
	command: Commands,
}

#[derive(Args, Debug)]
#[group(required = false, multiple = false)]
struct Start {
	/// Start from this path (default: the root)
	#[arg(long)]
	path: Option<PathBuf>,
	/// Start from this inode, in hex
	#[arg(short = 'i', long)]
	inode: Option<InodeId>,
}

impl Start {
	fn into_start_point(self) -> StartPoint {
		match (self.inode, self.path) {
			(Some(id), _) => StartPoint::Inode(id),
			(None, Some(path)) => StartPoint::Path(path),
			(None, None) => StartPoint::Path(PathBuf::from("/")),
		}
	}
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// List the entries of a directory
	Ls {
		#[command(flatten)]
		start: Start,
	},
	/// Resolve a path to its inode
	Resolve {
		path: PathBuf,
	},
	/// Extract a directory tree
	Extract {
		#[command(flatten)]
		start: Start,
		/// Only extract files whose name matches this regex (anchored at the start)
		#[arg(short = 'r', long)]
		regex: Option<String>,
		/// Size filter: +N (larger than N) or -N (at most N), with K/M/G/T suffixes
		#[arg(short = 's', long, allow_hyphen_values = true)]
		size: Option<SizeRule>,
		/// Write a .tar.gz archive instead of loose files
		#[arg(short = 'f', long)]
		file: Option<PathBuf>,
		/// Output directory for loose files
		#[arg(short = 'o', long, default_value = ".")]
		out: PathBuf,
		/// Append skipped entries to this file
		#[arg(short = 'l', long)]
		log_file: Option<PathBuf>,
		/// Skip log format
		#[arg(long, value_parser = ["csv", "jsonl"], default_value = "csv")]
		log_format: String,
		/// Write a JSON report of the run
		#[arg(long)]
		report: Option<PathBuf>,
	},
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	let level = if cli.debug { Level::DEBUG } else { Level::INFO };
	tracing_subscriber::fmt()
		.with_max_level(level)
		.with_writer(std::io::stderr)
		.init();

	let cluster = DumpCluster::open(&cli.store)
		.with_context(|| format!("opening object dump at {}", cli.store.display()))?;
	let config = ExtractConfig::default()
		.with_metadata_pool(cli.metadata_pool.clone())
		.with_probe_timeout(Duration::from_secs(cli.timeout));

	match cli.command {
		Commands::Ls { start } => {
			let id = match locate(&cluster, &config, &start.into_start_point())? {
				Resolution::Resolved(id) => id,
				Resolution::Unresolved(bad) => {
					println!("{}", bad);
					return Ok(());
				}
			};

			for listed in list_entries(&cluster, &config, id)? {
				match &listed.entry {
					Ok(entry) if entry.is_directory() => {
						println!("📁 {:<40} {:>16}", format!("{}/", entry.name), entry.child_id);
					}
					Ok(entry) => {
						println!(
							"📄 {:<40} {:>16}  pool {:<4} {} bytes",
							entry.name, entry.child_id, entry.pool_id, entry.size
						);
					}
					Err(e) => println!("❌ {:<40} {}", listed.name(), e),
				}
			}
		}
		Commands::Resolve { path } => match locate(&cluster, &config, &StartPoint::Path(path.clone()))? {
			Resolution::Resolved(id) => println!("{} -> {}", path.display(), id),
			Resolution::Unresolved(bad) => println!("{}", bad),
		},
		Commands::Extract { start, regex, size, file, out, log_file, log_format, report } => {
			let mut filter = FilterRules::default();
			if let Some(pattern) = regex {
				filter = filter.with_pattern(&pattern)?;
			}
			if let Some(rule) = size {
				filter = filter.with_size_rule(rule);
			}
			let config = config.with_filter(filter);

			let root = match locate(&cluster, &config, &start.into_start_point())? {
				Resolution::Resolved(id) => id,
				Resolution::Unresolved(bad) => {
					println!("{}", bad);
					bail!("cannot extract from an unreachable directory");
				}
			};

			let mut sink: Box<dyn OutputSink> = match &file {
				Some(archive) => Box::new(
					TarGzArchive::create(archive)
						.with_context(|| format!("creating {}", archive.display()))?,
				),
				None => Box::new(
					LooseFiles::new(&out).with_context(|| format!("creating {}", out.display()))?,
				),
			};

			let format = match log_format.as_str() {
				"jsonl" => SkipLogFormat::JsonLines,
				_ => SkipLogFormat::Csv,
			};

			let spinner = ProgressBar::new_spinner();
			spinner.set_style(
				ProgressStyle::with_template("{spinner} {msg}")
					.unwrap_or_else(|_| ProgressStyle::default_spinner()),
			);
			spinner.enable_steady_tick(Duration::from_millis(120));

			let mut walker = TreeWalker::new(&cluster, &config);
			if let Some(path) = &log_file {
				let log = SkipLog::open(path, format)
					.with_context(|| format!("opening skip log {}", path.display()))?;
				walker = walker.with_skip_log(log);
			}
			walker.set_progress_callback(|p| {
				spinner.set_message(format!(
					"{} dirs, {} files ({} MB), {} skipped: {}",
					p.directories_visited,
					p.files_extracted,
					p.bytes_written / (1024 * 1024),
					p.skipped,
					p.current_path.display()
				));
			});

			let result = walker.run(root, sink.as_mut());
			spinner.finish_and_clear();
			let run = result?;
			sink.finish().context("finishing output")?;

			for skipped in run.skipped.iter().filter(|s| s.reason == SkipReason::Timeout) {
				println!("Unable to extract {} as {} (timeout)", skipped.identifier, skipped.path.display());
			}
			for failure in &run.failures {
				eprintln!("❌ {}: {}", failure.path.display(), failure.error);
			}

			println!("✅ Extraction completed!");
			println!("📊 Run ID: {}", run.run_id);
			println!("📁 Directories: {}", run.directories);
			println!("📄 Files: {} ({} MB)", run.files.len(), run.total_bytes / (1024 * 1024));
			println!("⏭️  Skipped: {}", run.skipped.len());
			println!("🎯 Recovered: {:.1}%", run.recovered_ratio() * 100.0);
			if !run.failures.is_empty() {
				println!("⚠️  Failed entries: {}", run.failures.len());
			}

			if let Some(path) = report {
				let writer = BufWriter::new(
					File::create(&path).with_context(|| format!("creating {}", path.display()))?,
				);
				serde_json::to_writer_pretty(writer, &run)?;
				println!("📝 Report written to {}", path.display());
			}
		}
	}
	Ok(())
}
