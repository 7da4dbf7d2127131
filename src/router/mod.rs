//! HTTP surface for the control plane
//!
//! Two families of routes live behind one `axum::Router`, the same "one
//! state, two route groups" shape the teacher's own router used to separate
//! panel-facing and server-facing concerns:
//!
//! - `/api/*` — the manager-facing surface (environments, containers,
//!   images, registries, volumes, notifications, gitops, settings,
//!   scheduler). Requests against a remote environment are forwarded by
//!   the Dispatcher; requests against the local one are served directly.
//! - `/agent/*` — the wire protocol a manager's `dispatch::AgentClient`
//!   speaks to a paired agent's own Docker Gateway. Only meaningfully
//!   reachable when this process is running in agent mode, but mounted
//!   unconditionally since `Dispatcher::agent_mode` already forces every
//!   local call through the same code path either way.

mod agent;
mod auth;
mod containers;
mod dto;
mod environments;
mod gitops;
mod health;
mod images;
mod notifications;
mod registries;
mod scheduler;
mod settings;
mod volumes;

use std::sync::Arc;
use std::time::Duration;

use axum::middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::Configuration;
use crate::cron::Scheduler;
use crate::crypto::Vault;
use crate::database::Database;
use crate::dispatch::Dispatcher;
use crate::environment::Registry;
use crate::events::Log;
use crate::gitops::GitOpsSync;
use crate::images::autoupdate::AutoUpdateOrchestrator;
use crate::images::{ContainerUpdateExecutor, ImageUpdateEngine};
use crate::notifications::NotificationDispatcher;
use crate::settings::SettingsStore;
use crate::volumes::{BackupEngine, VolumeBrowser};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Configuration>,
    pub db: Arc<Database>,
    pub vault: Arc<Vault>,
    pub registry: Arc<Registry>,
    pub dispatcher: Arc<Dispatcher>,
    pub settings: Arc<SettingsStore>,
    pub scheduler: Arc<Scheduler>,
    pub log: Arc<Log>,
    pub notifications: Arc<NotificationDispatcher>,
    pub image_engine: Arc<ImageUpdateEngine>,
    pub update_executor: Arc<ContainerUpdateExecutor>,
    pub auto_update: Arc<AutoUpdateOrchestrator>,
    pub volume_browser: Arc<VolumeBrowser>,
    pub backup_engine: Arc<BackupEngine>,
    pub gitops: Arc<GitOpsSync>,
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health::health))
        .route("/environments", get(environments::list).post(environments::register))
        .route("/environments/:id", get(environments::get).delete(environments::unregister))
        .route("/environments/:id/pair", post(environments::pair))
        .route("/environments/0/agent/pair", post(agent::accept_pairing))
        .route("/environments/:id/test-connection", post(environments::test_connection))
        .route("/environments/:id/containers", get(containers::list))
        .route("/environments/:id/containers/:cid", get(containers::inspect))
        .route("/environments/:id/containers/:cid/start", post(containers::start))
        .route("/environments/:id/containers/:cid/stop", post(containers::stop))
        .route("/environments/:id/containers/:cid/restart", post(containers::restart))
        .route("/environments/:id/containers/:cid/delete", post(containers::delete))
        .route("/environments/:id/containers/:cid/update", post(containers::update))
        .route("/environments/:id/images/pull", post(images::pull))
        .route("/environments/:id/images/updates", get(images::updates))
        .route("/container-registries", get(registries::list).post(registries::upsert))
        .route("/container-registries/sync", post(registries::sync))
        .route("/volumes/:environment_id/:volume_name", get(volumes::list_entries))
        .route("/volumes/:environment_id/:volume_name/preview", get(volumes::preview))
        .route("/volumes/:environment_id/:volume_name/download", get(volumes::download))
        .route("/volumes/:environment_id/:volume_name/backups", get(volumes::list_backups).post(volumes::create_backup))
        .route("/volumes/:environment_id/backups/:backup_id/restore", post(volumes::restore_backup))
        .route("/volumes/:environment_id/backups/:backup_id", delete(volumes::delete_backup))
        .route("/notifications/channels", get(notifications::list).post(notifications::upsert))
        .route("/notifications/channels/:id", delete(notifications::delete))
        .route("/gitops/targets", get(gitops::list).post(gitops::upsert))
        .route("/gitops/targets/:id/sync", post(gitops::sync_now))
        .route("/gitops/targets/:id", delete(gitops::delete))
        .route("/settings", get(settings::get_all).put(settings::set_batch))
        .route("/scheduler/jobs", get(scheduler::list))
        .route("/scheduler/jobs/:name/run", post(scheduler::run_now))
        .route("/scheduler/jobs/:name/enable", post(scheduler::enable))
        .route("/scheduler/jobs/:name/disable", post(scheduler::disable))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_agent_token));

    let agent_routes = Router::new()
        .route("/containers", get(agent::list_containers).post(agent::create_container))
        .route("/containers/:id", get(agent::inspect_container).delete(agent::remove_container))
        .route("/containers/:id/start", post(agent::start_container))
        .route("/containers/:id/stop", post(agent::stop_container))
        .route("/containers/:id/restart", post(agent::restart_container))
        .route("/containers/:id/rename", post(agent::rename_container))
        .route("/containers/:id/exec", post(agent::exec_container))
        .route("/images/pull", post(agent::pull_image))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_agent_token));

    Router::new()
        .nest("/api", api)
        .nest("/agent", agent_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(60)))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// silence unused-import warnings for route verbs not yet exercised by every handler group
#[allow(unused_imports)]
use {delete as _delete, put as _put};
