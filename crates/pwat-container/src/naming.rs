//! Container file names and the backup/rename install protocol
//!
//! For a database `dir/name.ext` the live container is
//! `dir/name<attachment_suffix>`. Temporary, backup, duplicates and import
//! containers sit next to it as `dir/name<YYYYMMDD_HHMMSS>[_N]<suffix>`.

use pwat_core::config::ContainerConfig;
use pwat_core::{PwatError, PwatResult};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ContainerPaths {
    dir: PathBuf,
    stem: String,
    attachment_suffix: String,
    backup_suffix: String,
    duplicate_suffix: String,
    import_suffix: String,
}

/// Local time as used in container file names
pub fn timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

impl ContainerPaths {
    pub fn new(db_path: &Path, config: &ContainerConfig) -> Self {
        let dir = db_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let stem = db_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            dir,
            stem,
            attachment_suffix: config.attachment_suffix.clone(),
            backup_suffix: config.backup_suffix.clone(),
            duplicate_suffix: config.duplicate_suffix.clone(),
            import_suffix: config.import_suffix.clone(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn live(&self) -> PathBuf {
        self.dir.join(format!("{}{}", self.stem, self.attachment_suffix))
    }

    /// A fresh name for a container being written
    pub fn temp(&self) -> PathBuf {
        self.unique(&self.attachment_suffix)
    }

    pub fn backup(&self) -> PathBuf {
        self.unique(&self.backup_suffix)
    }

    pub fn duplicate(&self) -> PathBuf {
        self.unique(&self.duplicate_suffix)
    }

    pub fn import(&self) -> PathBuf {
        self.unique(&self.import_suffix)
    }

    fn unique(&self, suffix: &str) -> PathBuf {
        let ts = timestamp();
        let first = self.dir.join(format!("{}{ts}{suffix}", self.stem));
        if !first.exists() {
            return first;
        }
        (1u32..)
            .map(|n| self.dir.join(format!("{}{ts}_{n}{suffix}", self.stem)))
            .find(|p| !p.exists())
            .unwrap_or(first)
    }

    /// Timestamped files carrying `suffix`, oldest first.
    fn timestamped(&self, suffix: &str) -> PwatResult<Vec<PathBuf>> {
        let mut found = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(key) = self.stamp_of(name, suffix) {
                found.push((key, entry.path()));
            }
        }
        found.sort();
        Ok(found.into_iter().map(|(_, path)| path).collect())
    }

    /// Sort key of `name` if it is `<stem><timestamp>[_N]<suffix>`.
    fn stamp_of(&self, name: &str, suffix: &str) -> Option<(String, u32)> {
        let middle = name.strip_prefix(&self.stem)?.strip_suffix(suffix)?;
        let (ts, counter) = match middle.get(15..) {
            Some("") => (middle, 0),
            Some(rest) => (&middle[..15], rest.strip_prefix('_')?.parse().ok()?),
            None => return None,
        };
        chrono::NaiveDateTime::parse_from_str(ts, "%Y%m%d_%H%M%S").ok()?;
        Some((ts.to_string(), counter))
    }

    pub fn backups(&self) -> PwatResult<Vec<PathBuf>> {
        self.timestamped(&self.backup_suffix)
    }

    /// Leftovers of interrupted writes: temporary, duplicates and import
    /// containers.
    pub fn stray_files(&self) -> PwatResult<Vec<PathBuf>> {
        let mut stray = self.timestamped(&self.attachment_suffix)?;
        stray.extend(self.timestamped(&self.duplicate_suffix)?);
        stray.extend(self.timestamped(&self.import_suffix)?);
        Ok(stray)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The new container is live
    Installed { backup: Option<PathBuf> },
    /// No attachments are left, so no container is live
    Removed { backup: Option<PathBuf> },
}

/// Make `temp` the live container.
///
/// The current live container is renamed to a timestamped backup first.
/// When `store_empty` is set the temporary container is deleted instead of
/// installed. If the final rename fails the backup is renamed back. Unless
/// `keep_backups` is set, the backup is deleted once the new container is
/// in place.
pub fn install(
    paths: &ContainerPaths,
    temp: &Path,
    store_empty: bool,
    keep_backups: bool,
) -> PwatResult<InstallOutcome> {
    let live = paths.live();
    let mut backup = None;

    if live.exists() {
        let target = paths.backup();
        if let Err(e) = fs::rename(&live, &target) {
            warn!(error = %e, live = %live.display(), "could not back up live container");
            remove_quietly(temp);
            return Err(PwatError::Io(e));
        }
        debug!(backup = %target.display(), "live container backed up");
        backup = Some(target);
    }

    if store_empty {
        remove_quietly(temp);
        info!(container = %live.display(), "no attachments left, container removed");
        return Ok(InstallOutcome::Removed { backup });
    }

    if let Err(e) = fs::rename(temp, &live) {
        warn!(error = %e, temp = %temp.display(), "could not install new container");
        if let Some(b) = &backup {
            if let Err(restore) = fs::rename(b, &live) {
                warn!(error = %restore, backup = %b.display(), "could not restore backup");
            }
        }
        return Err(PwatError::Io(e));
    }

    if !keep_backups {
        if let Some(b) = backup.take() {
            if let Err(e) = fs::remove_file(&b) {
                warn!(error = %e, backup = %b.display(), "could not remove backup");
                backup = Some(b);
            }
        }
    }
    info!(container = %live.display(), "container installed");
    Ok(InstallOutcome::Installed { backup })
}

/// If the live container is missing, restore the newest backup. Returns the
/// backup that was restored.
pub fn recover(paths: &ContainerPaths) -> PwatResult<Option<PathBuf>> {
    let live = paths.live();
    if live.exists() {
        return Ok(None);
    }
    let Some(newest) = paths.backups()?.pop() else {
        return Ok(None);
    };
    fs::rename(&newest, &live)?;
    info!(backup = %newest.display(), container = %live.display(), "restored container from backup");
    Ok(Some(newest))
}

pub(crate) fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(error = %e, path = %path.display(), "could not remove file");
        }
    }
}
