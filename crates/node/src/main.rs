//! Keel node
//!
//! Runs the finality pipeline with an in-process validator set and in-memory shard
//! custodians. Transactions come from the demo load generator; finalized batches are
//! logged as they are emitted.

use anyhow::{bail, Result};
use clap::Parser;
use keel_consensus::{spawn_local_voters, Ed25519Signer, VoteSigner, VoterBehavior};
use keel_da::InMemoryCustodian;
use keel_pipeline::PipelineCoordinator;
use keel_registry::Registry;
use keel_types::{short, unix_millis, Address, Transaction};
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::KeelConfig;

/// Keel transaction finality node
#[derive(Parser, Debug)]
#[command(name = "keel")]
#[command(about = "BFT finality pipeline with erasure-coded data availability", long_about = None)]
struct Args {
    /// JSON config file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of local validators
    #[arg(long)]
    validators: Option<usize>,

    /// How many local validators stay silent
    #[arg(long)]
    silent: Option<usize>,

    /// Number of in-memory shard custodians
    #[arg(long)]
    custodians: Option<usize>,

    /// Interval between rounds in milliseconds
    #[arg(long)]
    round_interval_ms: Option<u64>,

    /// Stop after this many non-idle rounds (0 = until Ctrl+C)
    #[arg(long)]
    rounds: Option<u64>,

    /// Demo transactions generated per round interval
    #[arg(long)]
    demo_load: Option<usize>,

    /// Erasure coding data shards (k)
    #[arg(long)]
    data_shards: Option<usize>,

    /// Erasure coding parity shards (m)
    #[arg(long)]
    parity_shards: Option<usize>,

    /// Print the effective config as JSON and exit
    #[arg(long)]
    print_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn resolve(&self) -> Result<KeelConfig> {
        let mut config = match &self.config {
            Some(path) => KeelConfig::load(path)?,
            None => KeelConfig::default(),
        };

        if let Some(v) = self.validators {
            config.cluster.validators = v;
        }
        if let Some(v) = self.silent {
            config.cluster.silent_validators = v;
        }
        if let Some(v) = self.custodians {
            config.cluster.custodians = v;
        }
        if let Some(v) = self.demo_load {
            config.cluster.demo_load = v;
        }
        if let Some(v) = self.round_interval_ms {
            config.node.pipeline.round_interval_ms = v;
        }
        if let Some(v) = self.data_shards {
            config.node.da.data_shards = v;
        }
        if let Some(v) = self.parity_shards {
            config.node.da.parity_shards = v;
        }

        if config.cluster.validators == 0 {
            bail!("at least one validator is required");
        }
        if config.cluster.silent_validators > config.cluster.validators {
            bail!(
                "{} silent validators requested but only {} validators exist",
                config.cluster.silent_validators,
                config.cluster.validators
            );
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.resolve()?;
    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    run(config, args.rounds.filter(|r| *r > 0)).await
}

async fn run(config: KeelConfig, max_rounds: Option<u64>) -> Result<()> {
    let cluster = config.cluster.clone();
    tracing::info!("Starting keel node");
    tracing::info!(
        "  Validators: {} ({} silent), stake {} each",
        cluster.validators,
        cluster.silent_validators,
        cluster.stake
    );
    tracing::info!(
        "  DA: k={}, m={}, {} custodians",
        config.node.da.data_shards,
        config.node.da.parity_shards,
        cluster.custodians
    );
    tracing::info!("  Round interval: {}ms", config.node.pipeline.round_interval_ms);

    let registry = Arc::new(Registry::new(config.node.registry.clone()));
    let honest = cluster.validators - cluster.silent_validators;
    let mut voters: Vec<(Arc<dyn VoteSigner>, VoterBehavior)> = Vec::with_capacity(cluster.validators);
    for i in 0..cluster.validators {
        let signer = Arc::new(Ed25519Signer::from_label(&format!("validator-{}", i)));
        registry.register(signer.address(), cluster.stake)?;
        let behavior = if i < honest {
            VoterBehavior::Honest
        } else {
            VoterBehavior::Silent
        };
        voters.push((signer as Arc<dyn VoteSigner>, behavior));
    }

    let mut builder = PipelineCoordinator::builder(config.node.clone()).registry(registry);
    for i in 0..cluster.custodians {
        builder = builder.custodian(Arc::new(InMemoryCustodian::new(Address::from_label(&format!(
            "custodian-{}",
            i
        )))));
    }
    let coordinator = builder.build()?;

    let (shutdown_tx, shutdown) = watch::channel(false);
    let voter_handles = spawn_local_voters(voters, coordinator.gossip(), shutdown.clone());

    // Log finalized batches
    let mut finalized = coordinator.subscribe();
    let event_logger = tokio::spawn(async move {
        while let Ok(event) = finalized.recv().await {
            tracing::info!(
                "Finalized batch {}: {} txs, state {}, da {}{}",
                event.batch_id,
                event.tx_hashes.len(),
                short(&event.state_root),
                short(&event.da_commitment),
                event
                    .availability_confidence
                    .map(|c| format!(", sampled {:.0}%", c * 100.0))
                    .unwrap_or_default()
            );
        }
    });

    let load_generator = (cluster.demo_load > 0).then(|| {
        let sender = coordinator.transaction_sender();
        let per_tick = cluster.demo_load;
        let interval_ms = config.node.pipeline.round_interval_ms.max(1);
        let mut shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
            let mut nonce = 0u64;
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown.changed() => return,
                }
                for _ in 0..per_tick {
                    let tx = demo_transaction(nonce);
                    nonce += 1;
                    if let Err(e) = sender.send(tx) {
                        tracing::debug!("Demo load dropped a transaction: {}", e);
                    }
                }
            }
        })
    });

    let ctrl_c_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down...");
            let _ = ctrl_c_tx.send(true);
        }
    });

    tracing::info!("Node running. Press Ctrl+C to stop.");
    let stats = coordinator.run(shutdown, max_rounds).await;

    let _ = shutdown_tx.send(true);
    for handle in voter_handles {
        let _ = handle.await;
    }
    if let Some(handle) = load_generator {
        handle.abort();
    }
    event_logger.abort();

    tracing::info!("Final stats: {}", serde_json::to_string(&stats)?);
    tracing::info!("Node stopped");
    Ok(())
}

fn demo_transaction(nonce: u64) -> Transaction {
    let mut rng = rand::thread_rng();
    let sender = Address::from_label(&format!("account-{}", rng.gen_range(0..64)));
    let recipient = Address::from_label(&format!("account-{}", rng.gen_range(0..64)));
    Transaction::new(sender, recipient, rng.gen_range(1..2_000_000), nonce, unix_millis())
}
