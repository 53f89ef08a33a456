use std::time::Duration;

use clap::Parser;
use tokio::signal::ctrl_c;
use tokio::time::Instant;
use tracing::info;

use ferret::backend::pool::{self, Cleanup, Pool};
use ferret::backend::Node;
use ferret::cli::{Cli, Commands};
use ferret::server::{Listener, Protocol};
use ferret_config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ferret::logger();

    let cli = Cli::parse();
    let mut config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        Config::default()
    };

    if let Some(data) = cli.data {
        config.general.database_root = data;
    }
    if let Some(node_name) = cli.node_name {
        config.general.node_name = node_name;
    }
    if let Some(Commands::Run {
        remote_port,
        replication_port,
    }) = cli.command
    {
        if let Some(port) = remote_port {
            config.general.remote_port = port;
        }
        if let Some(port) = replication_port {
            config.general.replication_port = port;
        }
    }

    ferret_config::set(config.clone());

    let mut local_node = Node::new(config.general.node_name.clone());
    local_node.host = config.general.host.clone();
    local_node.remote_port = config.general.remote_port;
    local_node.replication_port = config.general.replication_port;
    Node::set_local(local_node);

    std::fs::create_dir_all(&config.general.database_root)?;
    let pool = Pool::new(pool::Config {
        root: config.general.database_root.clone(),
        max_databases: config.pool.max_databases,
        max_database_readers: config.pool.max_database_readers,
        max_endpoint_age: config.pool.cleanup_interval(),
    });
    Cleanup::run(&pool, config.pool.cleanup_interval());

    let (_, remote_shutdown) = Listener::spawn(
        &config.general.remote_addr(),
        pool.clone(),
        Protocol::Remote,
    )
    .await?;
    let (_, replication_shutdown) = Listener::spawn(
        &config.general.replication_addr(),
        pool.clone(),
        Protocol::Replication,
    )
    .await?;

    info!("🐾 ferret is ready, node \"{}\"", config.general.node_name);

    ctrl_c().await?;
    info!("shutting down");

    remote_shutdown.notify_one();
    replication_shutdown.notify_one();
    pool.finish();
    pool.join(Instant::now() + Duration::from_secs(30)).await;
    pool.clear();

    Ok(())
}
