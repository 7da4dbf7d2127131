//! GitOps Sync
//!
//! Per configured target: clone-or-pull the repository, resolve its compose
//! manifest, and redeploy the project when the manifest's content hash has
//! moved since the last applied sync. Shaped like the teacher's
//! `InstallationProcess` (external-process phase runner, event published on
//! start/completion) but driving `git`/`docker compose` as host processes
//! instead of a one-shot installer container.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::database::{Database, GitOpsTarget};
use crate::events::{Event, EventBus};

#[derive(Debug, Error)]
pub enum GitOpsError {
    #[error("target {0} not found")]
    NotFound(String),

    #[error("git operation failed: {0}")]
    Git(String),

    #[error("compose file not found at {0}")]
    ComposeMissing(PathBuf),

    #[error("redeploy failed: {0}")]
    Redeploy(String),

    #[error("database error: {0}")]
    Database(#[from] crate::database::DatabaseError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type GitOpsResult<T> = Result<T, GitOpsError>;

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub target_id: String,
    pub changed: bool,
    pub applied_hash: Option<String>,
}

/// Clones/pulls GitOps targets into `<data_dir>/gitops/<target_id>` and
/// redeploys through `docker compose` when the manifest changed.
pub struct GitOpsSync {
    db: Arc<Database>,
    events: EventBus,
    checkout_root: PathBuf,
}

impl GitOpsSync {
    pub fn new(db: Arc<Database>, events: EventBus, checkout_root: PathBuf) -> Self {
        Self { db, events, checkout_root }
    }

    /// Sync every target with `auto_sync` set, skipping the rest (manual
    /// trigger still reaches them through [`sync_one`](Self::sync_one)).
    pub async fn sync_due(&self) -> GitOpsResult<Vec<SyncOutcome>> {
        let targets = {
            let conn = self.db.conn().await;
            self.db.gitops_targets.all(&conn)?
        };

        let mut outcomes = Vec::new();
        for target in targets {
            if !target.auto_sync {
                debug!("gitops target {} has auto_sync disabled, skipping tick", target.id);
                continue;
            }
            match self.sync_one(&target.id).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!("gitops sync failed for {}: {}", target.id, e),
            }
        }
        Ok(outcomes)
    }

    /// Sync a single target regardless of its `auto_sync` flag, the path a
    /// manual "sync now" action takes.
    pub async fn sync_one(&self, target_id: &str) -> GitOpsResult<SyncOutcome> {
        let target = {
            let conn = self.db.conn().await;
            self.db.gitops_targets.get(&conn, target_id)?.ok_or_else(|| GitOpsError::NotFound(target_id.to_string()))?
        };

        self.events.publish(Event::GitOpsSyncStarted { target_id: target.id.clone() });

        let result = self.run_sync(&target).await;

        let now = self.timestamp();
        {
            let conn = self.db.conn().await;
            match &result {
                Ok(outcome) => {
                    self.db.gitops_targets.record_sync(&conn, &target.id, outcome.applied_hash.as_deref(), now, None)?;
                }
                Err(e) => {
                    self.db.gitops_targets.record_sync(&conn, &target.id, None, now, Some(&e.to_string()))?;
                }
            }
        }

        self.events.publish(Event::GitOpsSyncCompleted {
            target_id: target.id.clone(),
            successful: result.is_ok(),
            applied_hash: result.as_ref().ok().and_then(|o| o.applied_hash.clone()),
        });

        result
    }

    async fn run_sync(&self, target: &GitOpsTarget) -> GitOpsResult<SyncOutcome> {
        let checkout_dir = self.checkout_root.join(&target.id);
        self.clone_or_pull(target, &checkout_dir).await?;

        let compose_path = checkout_dir.join(&target.compose_path);
        if !compose_path.exists() {
            return Err(GitOpsError::ComposeMissing(compose_path));
        }

        let manifest = tokio::fs::read(&compose_path).await?;
        let hash = format!("sha256:{:x}", Sha256::digest(&manifest));

        if target.last_applied_hash.as_deref() == Some(hash.as_str()) {
            debug!("gitops target {} unchanged (hash {})", target.id, hash);
            return Ok(SyncOutcome { target_id: target.id.clone(), changed: false, applied_hash: Some(hash) });
        }

        info!("gitops target {} manifest changed, redeploying {}", target.id, target.project_name);
        self.redeploy(target, &compose_path).await?;

        Ok(SyncOutcome { target_id: target.id.clone(), changed: true, applied_hash: Some(hash) })
    }

    async fn clone_or_pull(&self, target: &GitOpsTarget, checkout_dir: &PathBuf) -> GitOpsResult<()> {
        if checkout_dir.join(".git").exists() {
            self.run_git(checkout_dir, &["fetch", "origin", &target.branch]).await?;
            self.run_git(checkout_dir, &["reset", "--hard", &format!("origin/{}", target.branch)]).await?;
        } else {
            tokio::fs::create_dir_all(&self.checkout_root).await?;
            let parent = self.checkout_root.clone();
            self.run_git(
                &parent,
                &["clone", "--branch", &target.branch, "--single-branch", &target.repo_url, &target.id],
            )
            .await?;
        }
        Ok(())
    }

    async fn run_git(&self, cwd: &PathBuf, args: &[&str]) -> GitOpsResult<()> {
        let output = Command::new("git").current_dir(cwd).args(args).output().await?;
        if !output.status.success() {
            return Err(GitOpsError::Git(String::from_utf8_lossy(&output.stderr).trim().to_string()));
        }
        Ok(())
    }

    async fn redeploy(&self, target: &GitOpsTarget, compose_path: &PathBuf) -> GitOpsResult<()> {
        let output = Command::new("docker")
            .arg("compose")
            .arg("-p")
            .arg(&target.project_name)
            .arg("-f")
            .arg(compose_path)
            .arg("up")
            .arg("-d")
            .arg("--remove-orphans")
            .output()
            .await?;

        if !output.status.success() {
            return Err(GitOpsError::Redeploy(String::from_utf8_lossy(&output.stderr).trim().to_string()));
        }
        Ok(())
    }

    fn timestamp(&self) -> i64 {
        std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_outcome_unchanged_has_no_redeploy_side_effects() {
        let outcome = SyncOutcome { target_id: "t1".to_string(), changed: false, applied_hash: Some("sha256:abc".to_string()) };
        assert!(!outcome.changed);
    }
}
