use clap::{Arg, ArgAction, ArgMatches, Command};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use cloudmirror::config::Config;
use cloudmirror::conflict::{ConflictStatus, Resolution, ResolutionKind, ResolveOutcome};
use cloudmirror::connector::fs::{FsConnector, LOCAL_ROOT, REMOTE_ROOT};
use cloudmirror::logging::{self, *};
use cloudmirror::store::Store;
use cloudmirror::sync::{CycleReport, Orchestrator};
use cloudmirror::types::{SyncMode, SyncSource};
use cloudmirror::utils::{setup_signal_handlers, CancelToken};
use cloudmirror::validation::Validator;
use cloudmirror::SyncError;

///////////////////////
// Utility functions //
///////////////////////

/// Config file, then environment, then command line flags
fn load_config(matches: &ArgMatches) -> Result<Config, Box<dyn Error>> {
	let path = matches.get_one::<String>("config").map(PathBuf::from);
	let mut config = Config::load(path.as_deref())?;

	if let Some(dir) = matches.get_one::<String>("data-dir") {
		config.data_dir = PathBuf::from(dir);
	}
	if let Some(level) = matches.get_one::<String>("log-level") {
		config.log_level = level.clone();
	}
	if let Some(n) = matches.get_one::<usize>("parallel") {
		config.max_parallel_files = *n;
	}

	config.validate()?;
	Ok(config)
}

/// Open the store and attach a connector to every source it knows
fn open_orchestrator(config: &Config) -> Result<Orchestrator, Box<dyn Error>> {
	let store = Arc::new(Store::open(&config.database_path())?);
	let orchestrator = Orchestrator::new(store).with_max_parallel_files(config.max_parallel_files);

	for source in orchestrator.list_sources()? {
		if source.connector != "fs" {
			warn!("Source {} uses connector {:?}, which this binary cannot attach", source.name, source.connector);
			continue;
		}
		match FsConnector::from_source(&source) {
			Ok(connector) => orchestrator.attach(source.id, Arc::new(connector))?,
			Err(e) => warn!("Cannot attach source {}: {}", source.name, e),
		}
	}
	Ok(orchestrator)
}

fn find_source(orchestrator: &Orchestrator, key: &str) -> Result<SyncSource, Box<dyn Error>> {
	match orchestrator.store().find_source(key)? {
		Some(source) => Ok(source),
		None => Err(SyncError::SourceNotFound { id: key.to_string() }.into()),
	}
}

fn print_report(name: &str, report: &CycleReport) {
	println!(
		"{}: scanned {}, {} remote changes, {} pushed, {} pulled, {} converged, {} ignored, {} new conflicts, {} superseded",
		name,
		report.scanned,
		report.remote_changes,
		report.pushed,
		report.pulled,
		report.converged,
		report.ignored,
		report.conflicts_created,
		report.conflicts_superseded,
	);
	for skip in &report.skipped {
		println!("  skipped {}: {}", skip.path, skip.reason);
	}
	for failure in &report.failures {
		println!("  failed {}: {}", failure.path, failure.error);
	}
	if report.cancelled {
		println!("  cancelled; bases and cursor left unchanged");
	} else if !report.committed {
		println!("  cursor not committed; the next cycle retries");
	}
}

//////////////
// Commands //
//////////////

fn cmd_register(orchestrator: &Orchestrator, config: &Config, matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
	let name = matches.get_one::<String>("name").ok_or("register: name required")?;
	let local = matches.get_one::<String>("local").ok_or("register: --local required")?;
	let remote = matches.get_one::<String>("remote").ok_or("register: --remote required")?;
	let mode = match matches.get_one::<String>("mode") {
		Some(mode) => mode.parse::<SyncMode>()?,
		None => config.default_mode,
	};

	let mut source = SyncSource::new(name, mode, "fs")
		.with_setting(LOCAL_ROOT, local)
		.with_setting(REMOTE_ROOT, remote);
	if let Some(patterns) = matches.get_many::<String>("exclude") {
		for pattern in patterns {
			source = source.with_exclude(pattern);
		}
	}

	let connector = Arc::new(FsConnector::new(local, remote));
	let source = orchestrator.register_source(source, connector)?;
	println!("{}", source.id);
	Ok(())
}

fn cmd_sources(orchestrator: &Orchestrator) -> Result<(), Box<dyn Error>> {
	for source in orchestrator.list_sources()? {
		let open = orchestrator.list_conflicts(source.id, Some(ConflictStatus::Open))?.len();
		let status = match &source.pause_reason {
			Some(reason) => format!("{} ({})", source.status, reason),
			None => source.status.to_string(),
		};
		println!(
			"{}  {:<16} {:<15} {:<10} cursor={} open_conflicts={}",
			source.id, source.name, source.mode, status, source.cursor, open
		);
	}
	Ok(())
}

async fn cmd_sync(orchestrator: &Orchestrator, matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
	let cancel = CancelToken::new();
	setup_signal_handlers(cancel.clone());

	match matches.get_one::<String>("source") {
		Some(key) => {
			let source = find_source(orchestrator, key)?;
			let report = orchestrator.run_cycle(source.id, &cancel).await?;
			print_report(&source.name, &report);
		}
		None => {
			let mut failed = 0;
			for (source, result) in orchestrator.run_all(&cancel).await? {
				match result {
					Ok(report) => print_report(&source.name, &report),
					Err(e) => {
						error!("Cycle for {} failed: {}", source.name, e);
						println!("{}: failed: {}", source.name, e);
						failed += 1;
					}
				}
			}
			if failed > 0 {
				return Err(format!("{} source(s) failed", failed).into());
			}
		}
	}
	Ok(())
}

fn cmd_conflicts(orchestrator: &Orchestrator, matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
	let key = matches.get_one::<String>("source").ok_or("conflicts: source required")?;
	let source = find_source(orchestrator, key)?;
	let status = if matches.get_flag("all") { None } else { Some(ConflictStatus::Open) };

	for conflict in orchestrator.list_conflicts(source.id, status)? {
		let resolution = conflict.resolution.map(|r| format!(" ({})", r)).unwrap_or_default();
		println!("{:>6}  {:<9}{}  {}", conflict.id, conflict.status, resolution, conflict.relative_path);
	}
	Ok(())
}

fn cmd_preview(orchestrator: &Orchestrator, config: &Config, matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
	let id = *matches.get_one::<u64>("id").ok_or("preview: conflict id required")?;
	let conflict = orchestrator.conflict(id)?;
	let preview = conflict.preview();

	println!(
		"{} ({}): {} local lines, {} remote lines, {} differ",
		conflict.relative_path,
		conflict.status,
		preview.summary.local_lines,
		preview.summary.remote_lines,
		preview.summary.different_lines
	);

	let limit = if config.preview_max_rows == 0 { usize::MAX } else { config.preview_max_rows };
	for line in preview.lines.iter().take(limit) {
		println!("{:>5} - {}", line.line_number, line.local.as_deref().unwrap_or("<none>"));
		println!("{:>5} + {}", "", line.remote.as_deref().unwrap_or("<none>"));
	}
	if preview.lines.len() > limit {
		println!("... {} more", preview.lines.len() - limit);
	}
	Ok(())
}

async fn cmd_resolve(orchestrator: &Orchestrator, matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
	let id = *matches.get_one::<u64>("id").ok_or("resolve: conflict id required")?;
	let kind = matches
		.get_one::<String>("resolution")
		.ok_or("resolve: --resolution required")?
		.parse::<ResolutionKind>()?;
	let content = match matches.get_one::<String>("content-file") {
		Some(path) => Some(std::fs::read(path)?),
		None => None,
	};

	let resolution = Resolution::from_parts(kind, content)?;
	match orchestrator.resolve_conflict(id, resolution).await? {
		ResolveOutcome::Resolved(record) => println!("Conflict {} resolved on {}", id, record.relative_path),
		ResolveOutcome::AlreadyResolved(_) => println!("Conflict {} was already resolved", id),
	}
	Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	let matches = Command::new("cloudmirror")
		.version(env!("CARGO_PKG_VERSION"))
		.author("Szilard Hajba <szilu@symbion.hu>")
		.about("Local/cloud three-way sync")
		.subcommand_required(true)
		.arg(Arg::new("config").short('c').long("config").value_name("FILE").global(true).help("Config file"))
		.arg(Arg::new("data-dir").long("data-dir").value_name("DIR").global(true).help("State directory"))
		.arg(Arg::new("log-level").long("log-level").value_name("LEVEL").global(true).help("Default log level"))
		.arg(
			Arg::new("parallel")
				.long("parallel")
				.value_name("N")
				.global(true)
				.value_parser(clap::value_parser!(usize))
				.help("Concurrent file units per cycle"),
		)
		.subcommand(
			Command::new("register")
				.about("Register a local directory against a remote directory")
				.arg(Arg::new("name").required(true))
				.arg(Arg::new("local").long("local").value_name("DIR").required(true))
				.arg(Arg::new("remote").long("remote").value_name("DIR").required(true))
				.arg(Arg::new("mode").long("mode").value_name("MODE").help("import_only, local_to_cloud or bidirectional"))
				.arg(Arg::new("exclude").long("exclude").value_name("GLOB").action(ArgAction::Append)),
		)
		.subcommand(Command::new("sources").about("List registered sources"))
		.subcommand(
			Command::new("pause")
				.about("Pause a source")
				.arg(Arg::new("source").required(true))
				.arg(Arg::new("reason").long("reason").value_name("TEXT")),
		)
		.subcommand(Command::new("resume").about("Resume a paused source").arg(Arg::new("source").required(true)))
		.subcommand(
			Command::new("sync")
				.about("Run a cycle for one source, or for every active source")
				.arg(Arg::new("source")),
		)
		.subcommand(
			Command::new("conflicts")
				.about("List conflicts of a source")
				.arg(Arg::new("source").required(true))
				.arg(Arg::new("all").long("all").action(ArgAction::SetTrue).help("Include resolved conflicts")),
		)
		.subcommand(
			Command::new("preview")
				.about("Show a line diff of a conflict")
				.arg(Arg::new("id").required(true).value_parser(clap::value_parser!(u64))),
		)
		.subcommand(
			Command::new("resolve")
				.about("Resolve a conflict")
				.arg(Arg::new("id").required(true).value_parser(clap::value_parser!(u64)))
				.arg(
					Arg::new("resolution")
						.long("resolution")
						.value_name("KIND")
						.required(true)
						.help("keep_local, keep_remote or manual_merge"),
				)
				.arg(
					Arg::new("content-file")
						.long("content-file")
						.value_name("PATH")
						.help("Resolved content for manual_merge"),
				),
		)
		.get_matches();

	let config = load_config(&matches)?;
	logging::init_tracing(&config.log_level);
	let orchestrator = open_orchestrator(&config)?;

	match matches.subcommand() {
		Some(("register", sub)) => cmd_register(&orchestrator, &config, sub)?,
		Some(("sources", _)) => cmd_sources(&orchestrator)?,
		Some(("pause", sub)) => {
			let key = sub.get_one::<String>("source").ok_or("pause: source required")?;
			let source = find_source(&orchestrator, key)?;
			orchestrator.pause_source(source.id, sub.get_one::<String>("reason").cloned())?;
		}
		Some(("resume", sub)) => {
			let key = sub.get_one::<String>("source").ok_or("resume: source required")?;
			let source = find_source(&orchestrator, key)?;
			orchestrator.resume_source(source.id)?;
		}
		Some(("sync", sub)) => cmd_sync(&orchestrator, sub).await?,
		Some(("conflicts", sub)) => cmd_conflicts(&orchestrator, sub)?,
		Some(("preview", sub)) => cmd_preview(&orchestrator, &config, sub)?,
		Some(("resolve", sub)) => cmd_resolve(&orchestrator, sub).await?,
		_ => unreachable!("subcommand_required"),
	}

	Ok(())
}

// vim: ts=4
