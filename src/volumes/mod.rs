//! Volume Browser and Backup engine
//!
//! Both operate through a short-lived helper container rather than the host's
//! own view of a volume's files: `DockerGateway::create_helper` mounts the
//! volume into a throwaway Alpine container, and every inspection or archive
//! operation runs as an `exec` inside it, the same "run a command inside a
//! container and collect the result" shape `DockerGateway::exec` already
//! provides for the teacher's scheduled per-server commands.

pub mod path;

use std::sync::Arc;

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::database::{Database, VolumeBackup};
use crate::dispatch::Dispatcher;
use crate::events::{Event, Log};

const ARCHIVE_VOLUME: &str = "arcane-backups";

#[derive(Debug, thiserror::Error)]
pub enum VolumesError {
    #[error("database error: {0}")]
    Database(#[from] crate::database::DatabaseError),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] crate::dispatch::DispatchError),

    #[error("invalid path: {0}")]
    Path(#[from] path::PathError),

    #[error("backup not found: {0}")]
    NotFound(String),

    #[error("backup {0} is locked by a concurrent operation")]
    Locked(String),

    #[error("volume {0} is in use by a running container")]
    VolumeInUse(String),

    #[error("archive command failed with exit code {0}: {1}")]
    CommandFailed(i64, String),

    #[error("restore failed (volume may be partially wiped): {0}")]
    PartialRestore(String),
}

/// Read-only helper containers are reused per volume instead of spun up on
/// every browse call. Guarded by its own lock per the concurrency model;
/// mutations here are copy-on-read so a concurrent teardown never observes a
/// half-updated map.
#[derive(Default)]
struct HelperPool {
    helpers: Mutex<HashMap<String, String>>,
}

impl HelperPool {
    fn get(&self, volume_name: &str) -> Option<String> {
        self.helpers.lock().get(volume_name).cloned()
    }

    fn insert(&self, volume_name: &str, helper_id: &str) {
        self.helpers.lock().insert(volume_name.to_string(), helper_id.to_string());
    }

    fn evict(&self, volume_name: &str) -> Option<String> {
        self.helpers.lock().remove(volume_name)
    }

    fn drain(&self) -> Vec<String> {
        self.helpers.lock().drain().map(|(_, id)| id).collect()
    }
}

pub type VolumesResult<T> = Result<T, VolumesError>;

/// A single entry returned by the Volume Browser for one directory listing.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VolumeEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    pub mode: String,
    pub modified: i64,
    /// `Some(target)` for a symlink whose target resolves outside the
    /// volume; such targets are reported, never followed.
    pub external_symlink: Option<String>,
}

pub struct VolumeBrowser {
    dispatcher: Arc<Dispatcher>,
    pool: HelperPool,
}

impl VolumeBrowser {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher, pool: HelperPool::default() }
    }

    /// Get (or start) the pooled read-only helper for `volume_name`. An
    /// inspect that reveals the helper isn't running anymore evicts it and
    /// starts a fresh one rather than erroring.
    async fn helper_for(&self, environment_id: &str, volume_name: &str) -> VolumesResult<String> {
        if let Some(helper_id) = self.pool.get(volume_name) {
            match self.dispatcher.inspect(environment_id, &helper_id).await {
                Ok(inspect) if inspect.state.as_ref().and_then(|s| s.running).unwrap_or(false) => return Ok(helper_id),
                _ => {
                    self.pool.evict(volume_name);
                }
            }
        }
        let helper_id = self.dispatcher.create_helper(environment_id, volume_name, true).await?;
        self.pool.insert(volume_name, &helper_id);
        Ok(helper_id)
    }

    /// Evict and force-remove the pooled helper for a volume, e.g. when the
    /// volume itself is deleted out from under the pool.
    pub async fn evict(&self, environment_id: &str, volume_name: &str) {
        if let Some(helper_id) = self.pool.evict(volume_name) {
            if let Err(e) = self.dispatcher.remove(environment_id, &helper_id, true, true).await {
                warn!("failed to remove evicted volume browser helper {}: {}", helper_id, e);
            }
        }
    }

    /// Force-remove every pooled helper. Called once on process shutdown.
    pub async fn shutdown(&self, environment_id: &str) {
        for helper_id in self.pool.drain() {
            if let Err(e) = self.dispatcher.remove(environment_id, &helper_id, true, true).await {
                warn!("failed to remove pooled volume browser helper {} on shutdown: {}", helper_id, e);
            }
        }
    }

    /// List the immediate children of `requested` within `volume_name`.
    pub async fn list(&self, environment_id: &str, volume_name: &str, requested: &str) -> VolumesResult<Vec<VolumeEntry>> {
        let target = path::sanitize(requested)?;
        let helper_id = self.helper_for(environment_id, volume_name).await?;
        self.list_inner(environment_id, &helper_id, &target).await
    }

    /// Read up to `max_bytes` of a file for preview, with the MIME type
    /// detected from the bytes actually read rather than the file extension.
    pub async fn preview(&self, environment_id: &str, volume_name: &str, requested: &str, max_bytes: u64) -> VolumesResult<(Vec<u8>, String)> {
        let target = path::sanitize(requested)?;
        let helper_id = self.helper_for(environment_id, volume_name).await?;
        let (exit, output) = self
            .dispatcher
            .exec(environment_id, &helper_id, vec!["head".to_string(), "-c".to_string(), max_bytes.to_string(), target.to_string_lossy().to_string()])
            .await?;
        if exit != 0 {
            return Err(VolumesError::CommandFailed(exit, String::from_utf8_lossy(&output).to_string()));
        }
        let mime = infer::get(&output)
            .map(|kind| kind.mime_type().to_string())
            .unwrap_or_else(|| mime_guess::from_path(requested).first_or_octet_stream().to_string());
        Ok((output, mime))
    }

    /// Fetch a file (or directory, as a `.tar` stream) for download. Runs
    /// `tar` inside the helper rather than Docker's `CopyFromContainer` API
    /// directly, so the same `exec`-and-collect path used everywhere else in
    /// the browser handles the transfer.
    pub async fn download(&self, environment_id: &str, volume_name: &str, requested: &str) -> VolumesResult<Vec<u8>> {
        let target = path::sanitize(requested)?;
        let parent = target.parent().unwrap_or(&target).to_string_lossy().to_string();
        let name = target.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| ".".to_string());
        let helper_id = self.helper_for(environment_id, volume_name).await?;
        let (exit, output) = self
            .dispatcher
            .exec(environment_id, &helper_id, vec!["tar".to_string(), "-cf".to_string(), "-".to_string(), "-C".to_string(), parent, name])
            .await?;
        if exit != 0 {
            return Err(VolumesError::CommandFailed(exit, String::from_utf8_lossy(&output).to_string()));
        }
        Ok(output)
    }

    async fn list_inner(&self, environment_id: &str, helper_id: &str, target: &std::path::Path) -> VolumesResult<Vec<VolumeEntry>> {
        let target = target.to_string_lossy().to_string();
        let (exit, output) = self
            .dispatcher
            .exec(
                environment_id,
                helper_id,
                vec![
                    "find".to_string(),
                    target,
                    "-mindepth".to_string(),
                    "1".to_string(),
                    "-maxdepth".to_string(),
                    "1".to_string(),
                    "-printf".to_string(),
                    "%f\\t%y\\t%s\\t%m\\t%T@\\t%l\\n".to_string(),
                ],
            )
            .await?;

        if exit != 0 {
            return Err(VolumesError::CommandFailed(exit, String::from_utf8_lossy(&output).to_string()));
        }

        let text = String::from_utf8_lossy(&output);
        let mut entries = Vec::new();
        for line in text.lines() {
            let fields: Vec<&str> = line.splitn(6, '\t').collect();
            let [name, kind, size, mode, mtime, link_target] = fields.as_slice() else { continue };

            let is_dir = *kind == "d";
            let external_symlink = (*kind == "l" && !link_target.is_empty())
                .then(|| path::symlink_target_is_external(link_target).then(|| link_target.to_string()))
                .flatten();

            entries.push(VolumeEntry {
                name: name.to_string(),
                path: name.to_string(),
                is_dir,
                size: size.parse().unwrap_or(0),
                mode: mode.to_string(),
                modified: mtime.split('.').next().unwrap_or("0").parse().unwrap_or(0),
                external_symlink,
            });
        }
        Ok(entries)
    }
}

/// Creates and restores `.tar.gz` archives of a Docker volume's contents,
/// stored in a dedicated `arcane_backups` Docker volume rather than on the
/// manager's own disk — so backups survive the manager container being
/// recreated and work the same way against a remote agent once the wire
/// protocol supports it.
pub struct BackupEngine {
    db: Arc<Database>,
    dispatcher: Arc<Dispatcher>,
    log: Arc<Log>,
}

impl BackupEngine {
    pub fn new(db: Arc<Database>, dispatcher: Arc<Dispatcher>, log: Arc<Log>) -> Self {
        Self { db, dispatcher, log }
    }

    pub async fn create(&self, environment_id: &str, volume_name: &str, name: &str) -> VolumesResult<VolumeBackup> {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let id = format!(
            "{volume_name}-{}-{}",
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            &suffix[..8]
        );
        let archive_path = format!("/backups/{id}.tar.gz");

        self.log.record(Event::BackupStarted { backup_id: id.clone(), container_id: volume_name.to_string() }).await;

        let helper_id = self
            .dispatcher
            .create_helper_with_binds(
                environment_id,
                vec![format!("{volume_name}:/volume:ro"), format!("{ARCHIVE_VOLUME}:/backups:rw")],
            )
            .await?;

        let result = self.create_inner(environment_id, &helper_id, &archive_path).await;

        if let Err(e) = self.dispatcher.remove(environment_id, &helper_id, true, true).await {
            warn!("failed to clean up backup helper {}: {}", helper_id, e);
        }

        let outcome = match result {
            Ok((size, checksum)) => {
                let record = VolumeBackup {
                    id: id.clone(),
                    environment_id: environment_id.to_string(),
                    volume_name: volume_name.to_string(),
                    name: name.to_string(),
                    checksum: Some(checksum.clone()),
                    size,
                    adapter_type: "helper".to_string(),
                    is_locked: false,
                    created_at: chrono::Utc::now().timestamp(),
                };
                let conn = self.db.conn().await;
                self.db.volume_backups.insert(&conn, &record)?;
                drop(conn);
                info!("created backup {} of volume {} ({} bytes)", id, volume_name, size);
                Ok(record)
            }
            Err(e) => Err(e),
        };

        self.log
            .record(Event::BackupCompleted {
                backup_id: id.clone(),
                successful: outcome.is_ok(),
                checksum: outcome.as_ref().ok().and_then(|r| r.checksum.clone()),
                size: outcome.as_ref().map(|r| r.size).unwrap_or(0),
            })
            .await;

        outcome
    }

    async fn create_inner(&self, environment_id: &str, helper_id: &str, archive_path: &str) -> VolumesResult<(u64, String)> {
        let (exit, output) = self
            .dispatcher
            .exec(
                environment_id,
                helper_id,
                vec![
                    "tar".to_string(),
                    "-czf".to_string(),
                    archive_path.to_string(),
                    "-C".to_string(),
                    "/volume".to_string(),
                    ".".to_string(),
                ],
            )
            .await?;
        if exit != 0 {
            return Err(VolumesError::CommandFailed(exit, String::from_utf8_lossy(&output).to_string()));
        }

        let (exit, output) = self
            .dispatcher
            .exec(environment_id, helper_id, vec!["sh".to_string(), "-c".to_string(), format!("sha256sum {archive_path} | cut -d' ' -f1")])
            .await?;
        if exit != 0 {
            return Err(VolumesError::CommandFailed(exit, String::from_utf8_lossy(&output).to_string()));
        }
        let checksum = String::from_utf8_lossy(&output).trim().to_string();

        let (exit, output) = self
            .dispatcher
            .exec(environment_id, helper_id, vec!["sh".to_string(), "-c".to_string(), format!("stat -c %s {archive_path}")])
            .await?;
        if exit != 0 {
            return Err(VolumesError::CommandFailed(exit, String::from_utf8_lossy(&output).to_string()));
        }
        let size: u64 = String::from_utf8_lossy(&output).trim().parse().unwrap_or(0);

        Ok((size, checksum))
    }

    /// True if any running container on the environment has `volume_name`
    /// mounted. Checked before any restore to avoid racing a container's own
    /// writes.
    async fn is_volume_in_use(&self, environment_id: &str, volume_name: &str) -> VolumesResult<bool> {
        let containers = self.dispatcher.list_containers(environment_id, false).await?;
        Ok(containers.iter().any(|c| {
            c.mounts
                .as_ref()
                .map(|mounts| mounts.iter().any(|m| m.name.as_deref() == Some(volume_name)))
                .unwrap_or(false)
        }))
    }

    /// Full restore: reject if the target is mounted by a running container,
    /// take a pre-restore backup of whatever is there now, extract into a
    /// temporary directory inside the volume, wipe the volume root, and move
    /// the extracted entries into place. A non-zero tar exit after the wipe
    /// has already started leaves the volume partially wiped; that case is
    /// surfaced distinctly so callers don't treat it as a clean failure.
    pub async fn restore(&self, environment_id: &str, backup_id: &str, target_volume: &str) -> VolumesResult<()> {
        let backup = {
            let conn = self.db.conn().await;
            self.db.volume_backups.get(&conn, backup_id)?.ok_or_else(|| VolumesError::NotFound(backup_id.to_string()))?
        };
        if backup.is_locked {
            return Err(VolumesError::Locked(backup_id.to_string()));
        }
        if self.is_volume_in_use(environment_id, target_volume).await? {
            return Err(VolumesError::VolumeInUse(target_volume.to_string()));
        }

        self.create(environment_id, target_volume, &format!("pre-restore-{backup_id}")).await?;

        self.log.record(Event::RestoreStarted { backup_id: backup_id.to_string(), container_id: target_volume.to_string() }).await;

        let helper_id = self
            .dispatcher
            .create_helper_with_binds(
                environment_id,
                vec![format!("{target_volume}:/volume:rw"), format!("{ARCHIVE_VOLUME}:/backups:ro")],
            )
            .await?;

        let archive_path = format!("/backups/{backup_id}.tar.gz");
        let tmp_dir = format!("/volume/.restore_tmp_{}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default());

        let result = self.restore_inner(environment_id, &helper_id, &archive_path, &tmp_dir).await;

        if let Err(e) = self.dispatcher.remove(environment_id, &helper_id, true, true).await {
            warn!("failed to clean up restore helper {}: {}", helper_id, e);
        }

        let successful = result.is_ok();
        self.log.record(Event::RestoreCompleted { backup_id: backup_id.to_string(), successful }).await;
        result
    }

    async fn restore_inner(&self, environment_id: &str, helper_id: &str, archive_path: &str, tmp_dir: &str) -> VolumesResult<()> {
        let run = |cmd: Vec<String>| {
            let dispatcher = self.dispatcher.clone();
            let environment_id = environment_id.to_string();
            let helper_id = helper_id.to_string();
            async move { dispatcher.exec(&environment_id, &helper_id, cmd).await }
        };

        let (exit, output) = run(vec!["mkdir".to_string(), "-p".to_string(), tmp_dir.to_string()]).await?;
        if exit != 0 {
            return Err(VolumesError::CommandFailed(exit, String::from_utf8_lossy(&output).to_string()));
        }

        let (exit, output) = run(vec!["tar".to_string(), "-xzf".to_string(), archive_path.to_string(), "-C".to_string(), tmp_dir.to_string()]).await?;
        if exit != 0 {
            return Err(VolumesError::CommandFailed(exit, String::from_utf8_lossy(&output).to_string()));
        }

        // From here on a failure leaves the volume partially wiped: the old
        // contents are gone but the new ones may not be fully in place.
        let tmp_name = tmp_dir.rsplit('/').next().unwrap_or(tmp_dir);
        let wipe = format!("find /volume -mindepth 1 -maxdepth 1 ! -name {} -exec rm -rf {{}} +", shell_quote(tmp_name));
        let (exit, output) = run(vec!["sh".to_string(), "-c".to_string(), wipe]).await.map_err(|e| VolumesError::PartialRestore(e.to_string()))?;
        if exit != 0 {
            return Err(VolumesError::PartialRestore(String::from_utf8_lossy(&output).to_string()));
        }

        let move_cmd = format!("cp -a {}/. /volume/ && rm -rf {}", shell_quote(tmp_dir), shell_quote(tmp_dir));
        let (exit, output) = run(vec!["sh".to_string(), "-c".to_string(), move_cmd]).await.map_err(|e| VolumesError::PartialRestore(e.to_string()))?;
        if exit != 0 {
            return Err(VolumesError::PartialRestore(String::from_utf8_lossy(&output).to_string()));
        }

        Ok(())
    }

    /// Restore a subset of files from an archive rather than the whole
    /// volume. Each path still goes through the backup-path sanitiser and a
    /// pre-restore backup is always taken first.
    pub async fn restore_files(&self, environment_id: &str, backup_id: &str, target_volume: &str, paths: &[String]) -> VolumesResult<()> {
        let backup = {
            let conn = self.db.conn().await;
            self.db.volume_backups.get(&conn, backup_id)?.ok_or_else(|| VolumesError::NotFound(backup_id.to_string()))?
        };
        if backup.is_locked {
            return Err(VolumesError::Locked(backup_id.to_string()));
        }

        let sanitized: Vec<String> = paths
            .iter()
            .map(|p| path::sanitize_relative(p).map(|p| p.to_string_lossy().to_string()))
            .collect::<Result<_, _>>()?;

        self.create(environment_id, target_volume, &format!("pre-restore-{backup_id}")).await?;
        self.log.record(Event::RestoreStarted { backup_id: backup_id.to_string(), container_id: target_volume.to_string() }).await;

        let helper_id = self
            .dispatcher
            .create_helper_with_binds(
                environment_id,
                vec![format!("{target_volume}:/volume:rw"), format!("{ARCHIVE_VOLUME}:/backups:ro")],
            )
            .await?;

        let archive_path = format!("/backups/{backup_id}.tar.gz");
        let mut cmd = vec!["tar".to_string(), "-xzf".to_string(), archive_path, "-C".to_string(), "/volume".to_string()];
        cmd.extend(sanitized.into_iter().map(|p| format!("./{p}")));
        let result = self.dispatcher.exec(environment_id, &helper_id, cmd).await;

        if let Err(e) = self.dispatcher.remove(environment_id, &helper_id, true, true).await {
            warn!("failed to clean up selective restore helper {}: {}", helper_id, e);
        }

        let successful = matches!(&result, Ok((0, _)));
        self.log.record(Event::RestoreCompleted { backup_id: backup_id.to_string(), successful }).await;

        match result? {
            (0, _) => Ok(()),
            (code, output) => Err(VolumesError::CommandFailed(code, String::from_utf8_lossy(&output).to_string())),
        }
    }

    /// Delete the database row first, then best-effort delete the archive —
    /// see `database::backups::VolumeBackupStore::delete` for why a crash
    /// between the two leaves an orphan file rather than a dangling row.
    pub async fn delete(&self, environment_id: &str, backup_id: &str) -> VolumesResult<()> {
        let backup = {
            let conn = self.db.conn().await;
            self.db.volume_backups.get(&conn, backup_id)?.ok_or_else(|| VolumesError::NotFound(backup_id.to_string()))?
        };
        if backup.is_locked {
            return Err(VolumesError::Locked(backup_id.to_string()));
        }

        {
            let conn = self.db.conn().await;
            self.db.volume_backups.delete(&conn, backup_id)?;
        }

        let helper_id = self.dispatcher.create_helper_with_binds(environment_id, vec![format!("{ARCHIVE_VOLUME}:/backups:rw")]).await?;
        let archive_path = format!("/backups/{backup_id}.tar.gz");
        if let Err(e) = self.dispatcher.exec(environment_id, &helper_id, vec!["rm".to_string(), "-f".to_string(), archive_path]).await {
            warn!("orphaned backup archive for {}: failed to delete: {}", backup_id, e);
        }
        if let Err(e) = self.dispatcher.remove(environment_id, &helper_id, true, true).await {
            warn!("failed to clean up delete helper {}: {}", helper_id, e);
        }

        Ok(())
    }

    pub async fn list(&self, volume_name: &str) -> VolumesResult<Vec<VolumeBackup>> {
        let conn = self.db.conn().await;
        Ok(self.db.volume_backups.for_volume(&conn, volume_name)?)
    }
}

/// Wrap a path fragment in single quotes for a `sh -c` command string. Names
/// are already constrained to what `find`/`tar` themselves produced, but this
/// keeps the helper-container shell commands safe regardless.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}
