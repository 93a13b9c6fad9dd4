//! reducer-replay: rebuild a reducer's state from its operation log.
//!
//! Usage: reducer-replay <config.json> <reducer_key>
//!
//! Prints the checkpoint block hash, the number of operations replayed and
//! the canonical hash of the rebuilt state. Log verbosity follows RUST_LOG.

use std::env;
use std::path::Path;
use std::process::ExitCode;

use reducer_kernel::empty_tree;
use reducer_runtime::error::RuntimeError;
use reducer_runtime::{replay, CheckpointStore, OperationLog, RunnerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn replay_key(config_path: &Path, reducer_key: &str) -> Result<(), RuntimeError> {
    let config = RunnerConfig::load(config_path)?;
    let log = OperationLog::open(&config.log_path(), config.sync_writes)?;

    let Some(checkpoint) = log.latest_checkpoint(reducer_key)? else {
        println!("reducer {}: no persisted operations", reducer_key);
        return Ok(());
    };
    let records = log.operations_through(reducer_key, &checkpoint.block_hash)?;
    let (_, hash) = replay::rebuild_state(empty_tree(), &records)?;

    println!("reducer:     {}", reducer_key);
    println!("checkpoint:  {}", checkpoint.block_hash);
    println!("operations:  {}", records.len());
    println!("state hash:  {}", hash);
    Ok(())
}

fn main() -> ExitCode {
    let filter = env::var("RUST_LOG")
        .unwrap_or_else(|_| "reducer_runtime=info,reducer_kernel=warn".into());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        eprintln!("usage: reducer-replay <config.json> <reducer_key>");
        return ExitCode::from(2);
    }

    match replay_key(Path::new(&args[1]), &args[2]) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}
