use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use deathnode_cloud::{AwsCloudClient, CloudClientImplementation};
use deathnode_cluster::{ClusterClientImplementation, HttpClusterClient};
use deathnode_core::config::{Config, ConfigInput};
use snafu::Snafu;

use crate::args::Args;
use crate::clock::SystemClock;
use crate::watcher::Watcher;

mod args;
mod clock;
mod cluster_view;
mod group_monitor;
mod group_service_monitor;
mod instance_monitor;
mod notebook;
mod selection;
mod tracing_init;
mod watcher;

/// Top-level errors that can abort startup before the tick loop begins:
/// exits non-zero with a usage message if any required flag is missing or
/// an unknown constraint/recommender name is supplied.
/// Grounded on `trino-lb/src/main.rs`'s top-level `Error` enum shape;
/// `snafu::Report` replaces `main_error::MainError` since this binary has
/// no surrounding async-runtime-bootstrap concerns that warranted that
/// crate.
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("invalid configuration"), context(false))]
    Config { source: deathnode_core::config::Error },

    #[snafu(display("invalid constraint configuration"), context(false))]
    BuildConstraints {
        source: selection::BuildConstraintError,
    },
}

#[tokio::main]
async fn main() -> Result<(), snafu::Report<Error>> {
    run().await.map_err(snafu::Report::from)
}

async fn run() -> Result<(), Error> {
    let args = Args::parse();
    let debug = args.debug;

    let config_input: ConfigInput = args.into();
    let config = Config::try_from(config_input)?;

    tracing_init::init(debug || config.debug);
    tracing::info!(cluster_manager_url = %config.cluster_manager_url, "starting");

    let cloud = Arc::new(CloudClientImplementation::Aws(AwsCloudClient::new().await));
    let cluster = Arc::new(ClusterClientImplementation::Http(HttpClusterClient::new(
        config.cluster_manager_url.clone(),
        Duration::from_secs(30),
    )));

    let watcher = Watcher::new(&config, cloud, cluster)?;
    watcher.run(&SystemClock).await
}
