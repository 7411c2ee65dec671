use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use futures::future::join_all;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use torrent_cluster::config::CONFIG_ENV;
use torrent_cluster::logging::init_logging;
use torrent_cluster::{
    AffinityStore, Cluster, ClusterConfig, JobEvent, JobRelay, MemoryAffinityStore,
};

/// Route download jobs across a cluster of Transmission daemons.
#[derive(Debug, Parser)]
#[command(name = "torrent-cluster", version, about)]
struct Args {
    /// Cluster configuration file
    #[arg(short, long, env = CONFIG_ENV)]
    config: PathBuf,

    /// Keep finished and seedless jobs on their member
    #[arg(long)]
    keep: bool,

    /// Print per-member job counts and exit
    #[arg(long)]
    loads: bool,

    /// Magnet links or hash-bearing URLs to add
    sources: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = ClusterConfig::from_file(&args.config)?;
    let (logging, _guard) = init_logging(config.log_dir.as_deref())?;
    let shutdown = CancellationToken::new();
    logging.start_retention_cleanup(shutdown.clone());

    let store = open_store(&config).await?;
    let cluster = Arc::new(Cluster::from_config(&config, store)?);
    info!(members = cluster.members().len(), "Cluster ready");

    if args.loads {
        for (member, load) in cluster.loads().await {
            println!("{member}\t{load}");
        }
        return Ok(());
    }

    let mut jobs = Vec::new();
    for source in &args.sources {
        match cluster.add(source).await {
            Ok((relay, snapshot)) => {
                if let Some(snapshot) = snapshot {
                    info!(hash = %snapshot.hash, member = %snapshot.host, progress = %snapshot.percent_label(), "Tracking job");
                }
                jobs.push(relay);
            }
            Err(e) => error!(source = %source, error = %e, "Failed to add job"),
        }
    }

    if jobs.is_empty() {
        warn!("No jobs to track");
        return Ok(());
    }

    let watchers = join_all(
        jobs.iter()
            .map(|relay| follow(cluster.clone(), relay.clone(), !args.keep)),
    );

    tokio::select! {
        _ = watchers => info!("All jobs finished"),
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping monitors");
            jobs.iter().for_each(JobRelay::cancel);
        }
    }

    shutdown.cancel();
    Ok(())
}

#[cfg(feature = "redis")]
async fn open_store(config: &ClusterConfig) -> anyhow::Result<Arc<dyn AffinityStore>> {
    if let Some(redis) = &config.redis {
        let store =
            torrent_cluster::RedisAffinityStore::connect(&redis.url, redis.key_prefix.clone())
                .await?;
        return Ok(Arc::new(store));
    }
    Ok(Arc::new(MemoryAffinityStore::new()))
}

#[cfg(not(feature = "redis"))]
async fn open_store(config: &ClusterConfig) -> anyhow::Result<Arc<dyn AffinityStore>> {
    if config.redis.is_some() {
        warn!("Redis store configured but the `redis` feature is disabled; using memory store");
    }
    Ok(Arc::new(MemoryAffinityStore::new()))
}

/// Print a job's events until it ends, removing it when it completes or
/// runs out of seeds.
async fn follow(cluster: Arc<Cluster>, relay: JobRelay, remove_finished: bool) {
    let mut events = relay.subscribe();
    let hash = relay.hash().to_string();

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(hash = %hash, skipped, "Event stream lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match &event {
            JobEvent::Poll { .. } => continue,
            JobEvent::Download(s) => {
                info!(hash = %hash, progress = %s.percent_label(), status = %s.status_label(), "Downloading")
            }
            JobEvent::Complete(_) => info!(hash = %hash, "Complete"),
            JobEvent::NoSeeds(_) => warn!(hash = %hash, "No seeds"),
            JobEvent::Error(failure) => error!(hash = %hash, error = %failure, "Job failed"),
            JobEvent::Timeout(payload) => warn!(hash = %hash, payload = ?payload, "Job timed out"),
        }

        if !event.kind().is_terminal() {
            continue;
        }

        if remove_finished
            && matches!(event, JobEvent::Complete(_) | JobEvent::NoSeeds(_))
            && let Err(e) = cluster.remove(&hash).await
        {
            warn!(hash = %hash, error = %e, "Failed to remove job");
        }
        break;
    }
}
