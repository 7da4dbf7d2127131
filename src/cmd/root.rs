//! Control plane composition root - starts the manager/agent HTTP server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum_server::tls_rustls::RustlsConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use arcane::config::{BootMode, Configuration};
use arcane::cron::{Prerequisite, Scheduler};
use arcane::crypto::{self, Vault};
use arcane::database::{Database, LOCAL_ENVIRONMENT_ID};
use arcane::dispatch::Dispatcher;
use arcane::environment::Registry;
use arcane::events::{Event, Log};
use arcane::gitops::GitOpsSync;
use arcane::images::autoupdate::AutoUpdateOrchestrator;
use arcane::images::{ContainerUpdateExecutor, ImageUpdateEngine};
use arcane::notifications::NotificationDispatcher;
use arcane::router::{self, AppState};
use arcane::settings::SettingsStore;
use arcane::volumes::{BackupEngine, VolumeBrowser};

/// Default cron expressions per §4.5, overridable at runtime through the
/// Settings Store under the matching `scheduler.*_cron` key.
const DEFAULT_HEALTH_CRON: &str = "0 */2 * * * *";
const DEFAULT_EVENT_CLEANUP_CRON: &str = "0 0 */6 * * *";
const DEFAULT_ANALYTICS_CRON: &str = "0 0 0 * * *";
const DEFAULT_AUTO_UPDATE_CRON: &str = "0 0 0 * * *";
const DEFAULT_IMAGE_POLLING_CRON: &str = "0 */15 * * * *";
const DEFAULT_SCHEDULED_PRUNE_CRON: &str = "0 0 0 * * *";
const DEFAULT_GITOPS_SYNC_CRON: &str = "0 */5 * * * *";
const DEFAULT_VULNERABILITY_SCAN_CRON: &str = "0 0 0 * * *";

const EVENT_RETENTION_SECS: i64 = 60 * 60 * 24 * 30;

pub async fn run(config_path: &str) -> Result<()> {
    info!("loading configuration from: {}", config_path);
    let config = Arc::new(Configuration::load(config_path)?);
    let agent_mode = config.mode == BootMode::Agent;

    info!("  API: {}:{}", config.api.host, config.api.port);
    info!("  Data directory: {}", config.system.data_directory.display());
    info!("  Mode: {}", if agent_mode { "agent" } else { "manager" });

    let db = Arc::new(Database::open(config.system.database_path())?);

    let master_key = crypto::load_or_create_master_key(&config.system.data_directory)?;
    let vault = Arc::new(Vault::new(&master_key));

    let log = Arc::new(Log::new(db.clone()));
    let settings = Arc::new(SettingsStore::load(db.clone()).await?);

    let registry = Arc::new(Registry::new(db.clone()));
    registry.ensure_local().await?;

    let dispatcher = Arc::new(Dispatcher::new(registry.clone(), config.agent.clone(), agent_mode));

    let image_engine = Arc::new(ImageUpdateEngine::new(db.clone(), dispatcher.clone(), vault.clone(), log.clone()));
    let update_executor = Arc::new(ContainerUpdateExecutor::new(db.clone(), dispatcher.clone(), vault.clone(), log.clone()));
    let notifications = Arc::new(NotificationDispatcher::new(db.clone()));
    let auto_update = Arc::new(
        AutoUpdateOrchestrator::new(db.clone(), dispatcher.clone(), update_executor.clone(), settings.clone())
            .with_notifications(notifications.clone()),
    );

    let volume_browser = Arc::new(VolumeBrowser::new(dispatcher.clone()));
    let backup_engine = Arc::new(BackupEngine::new(db.clone(), dispatcher.clone(), log.clone()));

    let gitops_checkout_root = config.system.data_directory.join("gitops");
    let gitops = Arc::new(GitOpsSync::new(db.clone(), log.bus().clone(), gitops_checkout_root));

    let scheduler = Arc::new(Scheduler::new().await?);
    scheduler.start().await?;

    if !agent_mode {
        register_jobs(&scheduler, &settings, &registry, &log, &image_engine, &auto_update, &backup_engine, &gitops).await?;
        watch_settings_for_reschedule(scheduler.clone(), settings.clone());
    }

    let notify_log = log.clone();
    let notify_dispatcher = notifications.clone();
    tokio::spawn(async move {
        let mut rx = notify_log.bus().subscribe();
        loop {
            match rx.recv().await {
                Ok(event) => notify_dispatcher.dispatch(&event).await,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("notification listener lagged, dropped {} events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let state = AppState {
        config: config.clone(),
        db: db.clone(),
        vault: vault.clone(),
        registry: registry.clone(),
        dispatcher: dispatcher.clone(),
        settings: settings.clone(),
        scheduler: scheduler.clone(),
        log: log.clone(),
        notifications: notifications.clone(),
        image_engine: image_engine.clone(),
        update_executor: update_executor.clone(),
        auto_update: auto_update.clone(),
        volume_browser: volume_browser.clone(),
        backup_engine: backup_engine.clone(),
        gitops: gitops.clone(),
    };
    let app = router::build_router(state);

    let shutdown_token = CancellationToken::new();

    if !agent_mode {
        let heartbeat_registry = registry.clone();
        let heartbeat_log = log.clone();
        let heartbeat_token = shutdown_token.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = heartbeat_token.cancelled() => {
                        debug!("periodic environment heartbeat task stopped");
                        return;
                    }
                    _ = interval.tick() => {
                        run_heartbeat_sweep(&heartbeat_registry, &heartbeat_log).await;
                    }
                }
            }
        });
        info!("started periodic environment heartbeat (every 30s)");
    }

    let bind_addr: SocketAddr = format!("{}:{}", config.api.host, config.api.port).parse().expect("invalid bind address");

    let shutdown_token_clone = shutdown_token.clone();
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    let shutdown_scheduler = scheduler.clone();
    let shutdown_volume_browser = volume_browser.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl+c handler");
        warn!("received shutdown signal, stopping...");

        shutdown_token_clone.cancel();
        if let Err(e) = shutdown_scheduler.shutdown().await {
            warn!("scheduler shutdown error: {}", e);
        }
        shutdown_volume_browser.shutdown(LOCAL_ENVIRONMENT_ID).await;

        shutdown_handle.graceful_shutdown(Some(Duration::from_secs(10)));
    });

    if config.api.ssl.enabled {
        info!("starting HTTPS server on {} (SSL enabled)", bind_addr);
        let tls_config = RustlsConfig::from_pem_file(&config.api.ssl.cert, &config.api.ssl.key)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load TLS config: {}", e))?;

        axum_server::bind_rustls(bind_addr, tls_config)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;
    } else {
        info!("starting HTTP server on {} (SSL disabled)", bind_addr);
        axum_server::bind(bind_addr).handle(handle).serve(app.into_make_service()).await?;
    }

    info!("control plane stopped");
    Ok(())
}

/// Probe every registered environment and publish a status-change event on
/// any online/offline transition, mirroring the teacher's periodic
/// panel-status-sync task but driving the Environment Registry instead.
async fn run_heartbeat_sweep(registry: &Arc<Registry>, log: &Arc<Log>) {
    let environments = match registry.all().await {
        Ok(e) => e,
        Err(e) => {
            warn!("heartbeat sweep could not list environments: {}", e);
            return;
        }
    };

    for env in environments.into_iter().filter(|e| e.enabled) {
        match registry.test_connection(&env.id).await {
            Ok(online) => {
                log.record(Event::EnvironmentStatusChanged { environment_id: env.id.clone(), online }).await;
            }
            Err(e) => warn!("heartbeat failed for environment {}: {}", env.id, e),
        }
    }
}

/// Register every maintenance job against its default (or persisted
/// override) cron expression, wiring prerequisites where a job depends on
/// a feature toggle rather than always running on tick.
async fn register_jobs(
    scheduler: &Arc<Scheduler>,
    settings: &Arc<SettingsStore>,
    registry: &Arc<Registry>,
    log: &Arc<Log>,
    image_engine: &Arc<ImageUpdateEngine>,
    auto_update: &Arc<AutoUpdateOrchestrator>,
    backup_engine: &Arc<BackupEngine>,
    gitops: &Arc<GitOpsSync>,
) -> Result<()> {
    let health_cron = settings.get_or("scheduler.environment_health_cron", DEFAULT_HEALTH_CRON);
    {
        let registry = registry.clone();
        let log = log.clone();
        scheduler
            .schedule("environment_health", &health_cron, true, move || {
                let registry = registry.clone();
                let log = log.clone();
                async move { run_heartbeat_sweep(&registry, &log).await }
            })
            .await?;
    }

    let event_cleanup_cron = settings.get_or("scheduler.event_cleanup_cron", DEFAULT_EVENT_CLEANUP_CRON);
    {
        let log = log.clone();
        scheduler
            .schedule("event_cleanup", &event_cleanup_cron, true, move || {
                let log = log.clone();
                async move {
                    match log.cleanup(EVENT_RETENTION_SECS).await {
                        Ok(n) => info!("event cleanup removed {} expired events", n),
                        Err(e) => error!("event cleanup failed: {}", e),
                    }
                }
            })
            .await?;
    }

    let analytics_cron = settings.get_or("scheduler.analytics_heartbeat_cron", DEFAULT_ANALYTICS_CRON);
    scheduler
        .schedule("analytics_heartbeat", &analytics_cron, false, || async {
            debug!("analytics heartbeat tick");
        })
        .await?;

    let auto_update_cron = settings.get_or("scheduler.auto_update_cron", DEFAULT_AUTO_UPDATE_CRON);
    {
        let auto_update = auto_update.clone();
        scheduler
            .schedule("auto_update", &auto_update_cron, true, move || {
                let auto_update = auto_update.clone();
                async move {
                    match auto_update.run().await {
                        Ok(summary) => info!("auto-update pass: {} updated, {} failed", summary.updated, summary.failed),
                        Err(e) => error!("auto-update pass failed: {}", e),
                    }
                }
            })
            .await?;

        let settings_gate = settings.clone();
        scheduler
            .set_prerequisite(
                "auto_update",
                Prerequisite {
                    setting_key: "auto_update.enabled".to_string(),
                    check: Box::new(move || settings_gate.get_bool_or("auto_update.enabled", false)),
                },
            )
            .await?;
    }

    let image_polling_cron = settings.get_or("scheduler.image_polling_cron", DEFAULT_IMAGE_POLLING_CRON);
    {
        let image_engine = image_engine.clone();
        scheduler
            .schedule("image_polling", &image_polling_cron, true, move || {
                let image_engine = image_engine.clone();
                async move {
                    match image_engine.check_all().await {
                        Ok(n) => debug!("image polling checked {} containers", n),
                        Err(e) => error!("image polling failed: {}", e),
                    }
                }
            })
            .await?;
    }

    let prune_cron = settings.get_or("scheduler.scheduled_prune_cron", DEFAULT_SCHEDULED_PRUNE_CRON);
    scheduler
        .schedule("scheduled_prune", &prune_cron, true, || async {
            debug!("scheduled prune tick (no-op: no prune adapter configured)");
        })
        .await?;

    let gitops_cron = settings.get_or("scheduler.gitops_sync_cron", DEFAULT_GITOPS_SYNC_CRON);
    {
        let gitops = gitops.clone();
        scheduler
            .schedule("gitops_sync", &gitops_cron, true, move || {
                let gitops = gitops.clone();
                async move {
                    match gitops.sync_due().await {
                        Ok(outcomes) => debug!("gitops sync pass touched {} targets", outcomes.len()),
                        Err(e) => error!("gitops sync pass failed: {}", e),
                    }
                }
            })
            .await?;
    }

    let vulnerability_cron = settings.get_or("scheduler.vulnerability_scan_cron", DEFAULT_VULNERABILITY_SCAN_CRON);
    scheduler
        .schedule("vulnerability_scan", &vulnerability_cron, true, || async {
            debug!("vulnerability scan tick (no-op: no scanner adapter configured)");
        })
        .await?;

    let _ = backup_engine;

    info!("registered {} maintenance jobs", scheduler.list().await.len());
    Ok(())
}

/// Reschedule jobs in response to `SettingsStore` writes touching their
/// cron key (§4.5's "runtime-mutable cron" contract).
fn watch_settings_for_reschedule(scheduler: Arc<Scheduler>, settings: Arc<SettingsStore>) {
    tokio::spawn(async move {
        let mut rx = settings.subscribe();
        let mapping: &[(&str, &str)] = &[
            ("scheduler.environment_health_cron", "environment_health"),
            ("scheduler.event_cleanup_cron", "event_cleanup"),
            ("scheduler.analytics_heartbeat_cron", "analytics_heartbeat"),
            ("scheduler.auto_update_cron", "auto_update"),
            ("scheduler.image_polling_cron", "image_polling"),
            ("scheduler.scheduled_prune_cron", "scheduled_prune"),
            ("scheduler.gitops_sync_cron", "gitops_sync"),
            ("scheduler.vulnerability_scan_cron", "vulnerability_scan"),
        ];

        loop {
            match rx.recv().await {
                Ok(changed_keys) => {
                    for (setting_key, job_name) in mapping {
                        if changed_keys.iter().any(|k| k == setting_key) {
                            let new_cron = settings.get_or(setting_key, "");
                            if new_cron.is_empty() {
                                continue;
                            }
                            if let Err(e) = scheduler.reschedule(job_name, &new_cron).await {
                                error!("failed to reschedule {} to '{}': {}", job_name, new_cron, e);
                            } else {
                                info!("rescheduled {} to '{}'", job_name, new_cron);
                            }
                        }
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
