//! Fetch runtime: manifest, project directory, pool.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use rec_fetch_types::PoolSummary;

use crate::config::FetchConfig;
use crate::decode::SymphoniaDecoder;
use crate::manifest;
use crate::net::transport::WsConnector;
use crate::pipeline::TrackPipeline;
use crate::scheduler::run_pool;
use crate::status::Reporter;
use crate::storage::{FileProjectStore, remove_project_dir};

/// Download and decode every track of the configured recording.
///
/// Progress goes through `reporter`, whose board should have one slot per configured lane.
/// Per-track failures are part of the returned summary. Errors are reserved for failures before
/// any track starts (bad endpoint, project directory, manifest); the partially created project
/// is removed in that case.
pub fn run_fetch(
    config: &FetchConfig,
    reporter: &Reporter,
    install_ctrlc: bool,
) -> Result<PoolSummary> {
    let params = config.session_params();
    if !(params.url.starts_with("ws://") || params.url.starts_with("wss://")) {
        bail!("server {:?} must be an http(s) URL", config.server);
    }

    let store = FileProjectStore::create(&config.out_dir, &config.project, config.replace)?;
    tracing::info!(path = ?store.dir(), lanes = config.lanes, "project created");
    if install_ctrlc {
        install_ctrlc_cleanup(store.dir().to_path_buf());
    }

    let tracks = match manifest::fetch_manifest(&config.server, config.session_id) {
        Ok(tracks) => tracks,
        Err(e) => {
            if let Err(cleanup) = store.remove() {
                tracing::warn!("project cleanup warning: {cleanup:#}");
            }
            return Err(e).context("load recording manifest");
        }
    };

    let pipeline = TrackPipeline::new(
        Arc::new(WsConnector),
        params,
        Arc::new(SymphoniaDecoder::with_hint(config.format_hint.clone())),
        Arc::new(store),
        config.pipeline,
    );
    Ok(run_pool(&tracks, config.lanes, Arc::new(pipeline), reporter))
}

/// Delete the partial project and exit with 130 on Ctrl-C.
fn install_ctrlc_cleanup(project_dir: PathBuf) {
    if let Err(e) = ctrlc::set_handler(move || {
        if let Err(e) = remove_project_dir(&project_dir) {
            tracing::warn!("project cleanup warning: {e:#}");
        }
        std::process::exit(130);
    }) {
        tracing::warn!("ctrl-c handler not installed: {e}");
    }
}
