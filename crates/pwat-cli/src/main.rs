//! pwat: attachment container CLI
//!
//! Commands:
//!   info                        - show the container header
//!   list                        - list attachments, optionally filtered
//!   add <entry> <file>...       - attach files to an entry
//!   extract <uuid> <dest>       - write one attachment to a new file
//!   remove <uuid>...            - delete attachments from the container
//!   purge <entry>               - delete every attachment of an entry
//!   verify                      - decompress and check every attachment
//!   duplicate <old> <new>       - copy an entry's attachments to another entry
//!   recover                     - restore a lost container from its backup
//!   config show                 - display current configuration
//!
//! Every command except `config show` works on the container next to the
//! database given by `--db`. The passphrase is read from PWAT_PASSPHRASE or
//! prompted for.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use pwat_container::{AttachmentFileManager, AttachmentFilter, ReadSummary, WriteOutcome};
use pwat_core::{AttachmentRecord, Progress, ProgressEvent, ProgressFunction, ProgressReply, PwatConfig};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "pwat",
    version,
    about = "Encrypted attachment containers for password databases",
    long_about = "pwat: list, add, extract, verify and recover the attachments stored next to a password database"
)]
struct Cli {
    /// Path to pwat.toml configuration file
    #[arg(long, short = 'c', env = "PWAT_CONFIG", default_value = "pwat.toml")]
    config: PathBuf,

    /// Password database the attachments belong to
    #[arg(long, env = "PWAT_DB", global = true)]
    db: Option<PathBuf>,

    /// UUID of the password database (recorded in the container header)
    #[arg(long, env = "PWAT_DB_UUID", global = true)]
    db_uuid: Option<Uuid>,

    /// Log level (trace, debug, info, warn, error); overrides the config
    #[arg(long, env = "PWAT_LOG")]
    log: Option<String>,

    /// Log format (json, text); overrides the config
    #[arg(long, env = "PWAT_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the container header without reading the attachments
    Info,

    /// List attachments
    List {
        /// Only attachments of this entry
        #[arg(long)]
        entry: Option<Uuid>,
        /// Substring of the file name
        #[arg(long)]
        name: Option<String>,
        /// Substring of the source directory
        #[arg(long)]
        path: Option<String>,
        /// Substring of the description
        #[arg(long)]
        description: Option<String>,
        /// Match substrings case-sensitively
        #[arg(long)]
        case_sensitive: bool,
        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Attach files to an entry
    Add {
        /// Entry UUID
        entry: Uuid,
        /// Files to attach
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Description stored with every added file
        #[arg(long, short = 'd')]
        description: Option<String>,
    },

    /// Write one attachment to a new file
    Extract {
        /// Attachment UUID
        uuid: Uuid,
        /// Destination file, or a directory to extract under the stored name
        dest: PathBuf,
    },

    /// Delete attachments and rewrite the container without them
    Remove {
        #[arg(required = true)]
        uuids: Vec<Uuid>,
    },

    /// Delete every attachment of an entry
    Purge {
        /// Entry UUID
        entry: Uuid,
    },

    /// Decompress every attachment and check its sizes, CRC and digests
    Verify,

    /// Give another entry a copy of every attachment of an entry
    Duplicate {
        /// Entry to copy from
        old: Uuid,
        /// Entry to copy to
        new: Uuid,
    },

    /// Restore the newest backup if the container is missing and list
    /// files left behind by interrupted writes
    Recover {
        /// Delete the leftover files
        #[arg(long)]
        clean: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = PwatConfig::from_file(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.logging.level.clone());
    let format = cli.log_format.clone().unwrap_or(match config.logging.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);

    match &cli.command {
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
        Commands::Recover { clean } => cmd_recover(&open_manager(&cli, &config)?, *clean),
        Commands::Info => cmd_info(&mut open_manager(&cli, &config)?, &passphrase()?),
        Commands::List {
            entry,
            name,
            path,
            description,
            case_sensitive,
            json,
        } => {
            let filter = AttachmentFilter {
                entry_uuid: *entry,
                filename: name.clone(),
                path: path.clone(),
                description: description.clone(),
                case_sensitive: *case_sensitive,
            };
            cmd_list(&mut open_manager(&cli, &config)?, &passphrase()?, &filter, *json)
        }
        Commands::Add {
            entry,
            files,
            description,
        } => cmd_add(
            &mut open_manager(&cli, &config)?,
            &passphrase()?,
            *entry,
            files,
            description.as_deref(),
        ),
        Commands::Extract { uuid, dest } => {
            cmd_extract(&mut open_manager(&cli, &config)?, &passphrase()?, uuid, dest)
        }
        Commands::Remove { uuids } => cmd_remove(&mut open_manager(&cli, &config)?, &passphrase()?, uuids),
        Commands::Purge { entry } => cmd_purge(&mut open_manager(&cli, &config)?, &passphrase()?, entry),
        Commands::Verify => cmd_verify(&mut open_manager(&cli, &config)?, &passphrase()?),
        Commands::Duplicate { old, new } => {
            cmd_duplicate(&mut open_manager(&cli, &config)?, &passphrase()?, *old, *new)
        }
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Manager and passphrase ────────────────────────────────────────────────────

fn open_manager(cli: &Cli, config: &PwatConfig) -> Result<AttachmentFileManager> {
    let db = cli
        .db
        .as_deref()
        .context("no database given\nPass --db <path> or set PWAT_DB.")?;
    let db_uuid = cli
        .db_uuid
        .context("no database UUID given\nPass --db-uuid <uuid> or set PWAT_DB_UUID.")?;
    Ok(AttachmentFileManager::new(db, db_uuid, config))
}

fn passphrase() -> Result<SecretString> {
    if let Ok(p) = std::env::var("PWAT_PASSPHRASE") {
        return Ok(SecretString::from(p));
    }
    let p = rpassword::prompt_password("Passphrase: ").context("reading passphrase")?;
    Ok(SecretString::from(p))
}

// ── Progress bar ──────────────────────────────────────────────────────────────

/// Shows the per-file percentage the manager reports. Never cancels.
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new(prefix: &str) -> Result<Self> {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos:>3}% {msg}")?
                .progress_chars("=>-"),
        );
        bar.set_prefix(prefix.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        Ok(Self { bar })
    }
}

impl Progress for BarProgress {
    fn report(&mut self, event: &ProgressEvent<'_>) -> ProgressReply {
        match event.function {
            ProgressFunction::Start => self.bar.set_position(0),
            ProgressFunction::End => self.bar.finish_and_clear(),
            ProgressFunction::Error => {
                if let Some(message) = event.message {
                    self.bar.println(format!("error: {message}"));
                }
            }
            _ => {
                if let Some(record) = event.record {
                    self.bar.set_message(record.filename.clone());
                }
                if let Some(pct) = event.percent {
                    self.bar.set_position(u64::from(pct));
                }
            }
        }
        ProgressReply::Continue
    }
}

impl Drop for BarProgress {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

fn load(mgr: &mut AttachmentFileManager, pass: &SecretString, verify: bool) -> Result<ReadSummary> {
    let mut progress = BarProgress::new(if verify { "verify" } else { "read" })?;
    mgr.read(pass, verify, &mut progress)
        .with_context(|| format!("reading {}", mgr.container_path().display()))
}

fn save(mgr: &mut AttachmentFileManager, pass: &SecretString, cleanup: bool) -> Result<()> {
    let mut progress = BarProgress::new("write")?;
    let outcome = mgr
        .write(pass, cleanup, &mut progress)
        .with_context(|| format!("writing {}", mgr.container_path().display()))?;
    match outcome {
        WriteOutcome::Unchanged => println!("Container unchanged."),
        WriteOutcome::Installed { records, backup } => {
            println!("Container written: {} ({records} attachments)", mgr.container_path().display());
            if let Some(b) = backup {
                println!("  backup: {}", b.display());
            }
        }
        WriteOutcome::Removed { backup } => {
            println!("No attachments left; container removed.");
            if let Some(b) = backup {
                println!("  backup: {}", b.display());
            }
        }
    }
    Ok(())
}

// ── `pwat info` ───────────────────────────────────────────────────────────────

fn cmd_info(mgr: &mut AttachmentFileManager, pass: &SecretString) -> Result<()> {
    let live = mgr.container_path();
    let Some(header) = mgr
        .read_header_only(pass)
        .with_context(|| format!("reading {}", live.display()))?
    else {
        println!("No attachment container at {}", live.display());
        return Ok(());
    };

    println!("Container: {}", live.display());
    println!("  version:     {}.{}", header.version.major, header.version.minor);
    println!("  file uuid:   {}", header.file_uuid);
    println!("  database:    {}", header.db_uuid);
    if header.db_uuid != mgr.db_uuid() {
        println!("  WARNING: container belongs to another database (expected {})", mgr.db_uuid());
    }
    println!("  last saved:  {}", fmt_time(header.last_saved));
    println!("  saved by:    {} on {}", header.last_saved_by, header.last_saved_on);
    println!("  application: {}", header.last_saved_app);
    println!("  iterations:  {}", header.iterations);
    let backups = mgr.paths().backups()?;
    println!("  backups:     {}", backups.len());
    Ok(())
}

// ── `pwat list` ───────────────────────────────────────────────────────────────

fn cmd_list(
    mgr: &mut AttachmentFileManager,
    pass: &SecretString,
    filter: &AttachmentFilter,
    json: bool,
) -> Result<()> {
    load(mgr, pass, false)?;
    let records = mgr.store().filter(filter);

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("No attachments.");
        return Ok(());
    }
    for record in &records {
        print_record(record);
    }
    println!();
    println!("{} attachments", records.len());
    Ok(())
}

fn print_record(record: &AttachmentRecord) {
    println!();
    println!("{}", record.filename);
    println!("  uuid:        {}", record.attmt_uuid);
    println!("  entry:       {}", record.entry_uuid);
    println!(
        "  size:        {} ({} stored)",
        fmt_bytes(record.uncsize.into()),
        fmt_bytes(record.cmpsize.into())
    );
    println!("  modified:    {}", fmt_time(record.mtime));
    println!("  added:       {}", fmt_time(record.dtime));
    if !record.path.is_empty() {
        println!("  from:        {}", record.path);
    }
    if !record.description.is_empty() {
        println!("  description: {}", record.description);
    }
}

// ── `pwat add` ────────────────────────────────────────────────────────────────

fn cmd_add(
    mgr: &mut AttachmentFileManager,
    pass: &SecretString,
    entry: Uuid,
    files: &[PathBuf],
    description: Option<&str>,
) -> Result<()> {
    load(mgr, pass, false)?;

    let mut added = Vec::new();
    for file in files {
        let full = std::fs::canonicalize(file).with_context(|| format!("resolving {}", file.display()))?;
        if !full.is_file() {
            bail!("{} is not a regular file", full.display());
        }
        let dir = full.parent().map(Path::to_path_buf).unwrap_or_default();
        let name = full
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name", full.display()))?;

        let mut record = AttachmentRecord::new(entry, dir.to_string_lossy(), name);
        if let Some(d) = description {
            record.description = d.to_string();
        }
        added.push((record.attmt_uuid, full));
        mgr.store_mut().add_attachment(record);
    }

    save(mgr, pass, false)?;
    for (uuid, file) in &added {
        println!("  added {uuid}  {}", file.display());
    }
    Ok(())
}

// ── `pwat extract` ────────────────────────────────────────────────────────────

fn cmd_extract(mgr: &mut AttachmentFileManager, pass: &SecretString, uuid: &Uuid, dest: &Path) -> Result<()> {
    load(mgr, pass, false)?;
    let record = mgr
        .store()
        .find(uuid)
        .with_context(|| format!("no attachment {uuid}"))?
        .clone();

    let target = if dest.is_dir() {
        dest.join(&record.filename)
    } else {
        dest.to_path_buf()
    };
    let mut progress = BarProgress::new("extract")?;
    let extracted = mgr
        .extract_to_file(pass, uuid, &target, &mut progress)
        .with_context(|| format!("extracting {} to {}", record.filename, target.display()))?;

    println!("Extracted {} → {}", extracted.filename, target.display());
    println!("  bytes: {}", fmt_bytes(extracted.uncsize.into()));
    Ok(())
}

// ── `pwat remove` / `pwat purge` ──────────────────────────────────────────────

fn cmd_remove(mgr: &mut AttachmentFileManager, pass: &SecretString, uuids: &[Uuid]) -> Result<()> {
    load(mgr, pass, false)?;
    for uuid in uuids {
        if !mgr.store_mut().mark_for_deletion(uuid) {
            bail!("no attachment {uuid}");
        }
    }
    save(mgr, pass, true)
}

fn cmd_purge(mgr: &mut AttachmentFileManager, pass: &SecretString, entry: &Uuid) -> Result<()> {
    load(mgr, pass, false)?;
    let marked = mgr.store_mut().mark_all_for_deletion(entry);
    if marked == 0 {
        println!("Entry {entry} has no attachments.");
        return Ok(());
    }
    println!("Removing {marked} attachments of entry {entry}");
    save(mgr, pass, true)
}

// ── `pwat verify` ─────────────────────────────────────────────────────────────

fn cmd_verify(mgr: &mut AttachmentFileManager, pass: &SecretString) -> Result<()> {
    let summary = load(mgr, pass, true)?;
    println!("Verified {}", mgr.container_path().display());
    println!("  attachments: {}", summary.records);
    if summary.duplicates > 0 {
        println!("  duplicates:  {} (ignored)", summary.duplicates);
    }
    println!("  status:      ok");
    Ok(())
}

// ── `pwat duplicate` ──────────────────────────────────────────────────────────

fn cmd_duplicate(mgr: &mut AttachmentFileManager, pass: &SecretString, old: Uuid, new: Uuid) -> Result<()> {
    load(mgr, pass, false)?;
    let mut progress = BarProgress::new("duplicate")?;
    let copies = mgr
        .duplicate(pass, old, new, &mut progress)
        .with_context(|| format!("duplicating attachments of {old}"))?;
    drop(progress);
    if copies.is_empty() {
        println!("Entry {old} has no attachments.");
        return Ok(());
    }
    save(mgr, pass, false)?;
    for uuid in &copies {
        println!("  copied as {uuid}");
    }
    Ok(())
}

// ── `pwat recover` ────────────────────────────────────────────────────────────

fn cmd_recover(mgr: &AttachmentFileManager, clean: bool) -> Result<()> {
    match mgr.recover().context("restoring backup")? {
        Some(backup) => println!("Restored {} from {}", mgr.container_path().display(), backup.display()),
        None => println!("Container present or no backup to restore."),
    }

    let stray = mgr.stray_files()?;
    if stray.is_empty() {
        return Ok(());
    }
    println!("Files left by interrupted writes:");
    for path in &stray {
        if clean {
            std::fs::remove_file(path).with_context(|| format!("removing {}", path.display()))?;
            println!("  removed {}", path.display());
        } else {
            println!("  {}", path.display());
        }
    }
    if !clean {
        println!("Run with --clean to delete them.");
    }
    Ok(())
}

// ── `pwat config show` ────────────────────────────────────────────────────────

fn cmd_config_show(config: &PwatConfig, config_path: &Path) -> Result<()> {
    let toml = toml::to_string_pretty(config).context("serializing config")?;
    println!("{toml}");
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    Ok(())
}

fn fmt_time(secs: i64) -> String {
    if secs == 0 {
        return "-".into();
    }
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| secs.to_string())
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
