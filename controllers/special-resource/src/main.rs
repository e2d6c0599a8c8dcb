//! Special Resource Operator
//!
//! Renders SpecialResource charts onto every kernel variant of the cluster:
//! - SpecialResource: chart applied state by state, kernel-affine objects
//!   fanned out per kernel, dependencies reconciled first
//! - SpecialResourceModule: chart applied once per cluster version found in
//!   the update history, re-triggered by watched resources
//! - PreflightValidation: checks that driver containers survive an upgrade

mod annotations;
mod backoff;
mod callbacks;
mod chart;
mod config;
mod context;
mod controller;
mod crud;
mod decorator;
mod dependency;
mod dynamic_watch;
mod error;
mod finalizer;
mod hash;
mod manifest;
mod node_cache;
mod poller;
mod preflight;
mod recipes;
mod reconciler;
mod runtime_info;
mod stage;
mod status;
#[cfg(test)]
mod test_utils;
mod watcher;

use anyhow::Result;
use config::OperatorConfig;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // kube and reqwest both pull rustls; pick one provider for the process
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        eprintln!("rustls crypto provider already installed");
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Special Resource Operator");

    let config = OperatorConfig::from_env()?;

    info!("Configuration:");
    info!("  Operator namespace: {}", config.operator_namespace);
    info!("  Charts: {}", config.charts_dir.display());
    info!("  Recipes: {}", config.recipes_dir.display());
    info!("  Readiness poll: every {:?}, up to {:?}", config.poll_interval, config.poll_timeout);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
