//! Add Worker - calls served by a pool of child processes.
//!
//! This example demonstrates:
//! - A worker that serves calls on stdin/stdout with `serve_stdio`
//! - Spawning a pool of those workers with `ProcessSpawner`
//! - Typed bindings generated by `remote_interface!`
//! - Error replies for missing methods and failing handlers
//!
//! The same binary is both sides: run without arguments it acts as the
//! controller and re-launches itself with `--worker` for each pool member.
//!
//! ```text
//! RUST_LOG=workwire=trace cargo run --example add
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use workwire::dispatch::{Dispatcher, HandlerError};
use workwire::proxy::{Invoke, ProxyConfig};
use workwire::worker::ProcessSpawner;
use workwire::{remote_interface, Pool};

/// Summary returned by the `stats` method.
#[derive(Serialize, Deserialize, Debug)]
struct Stats {
    count: usize,
    sum: i64,
    pid: u32,
}

remote_interface! {
    /// Methods the add worker serves.
    struct AddWorker {
        fn add(a: i64, b: i64) -> i64;
        fn stats(values: Vec<i64>) -> Stats;
    }
}

async fn worker() -> Result<(), Box<dyn std::error::Error>> {
    let dispatcher = Dispatcher::builder()
        .handle("add", |(a, b): (i64, i64), _ctx| async move {
            a.checked_add(b).ok_or_else(|| HandlerError::named("RangeError", "overflow"))
        })
        .handle("stats", |(values,): (Vec<i64>,), _ctx| async move {
            Ok::<_, HandlerError>(Stats {
                count: values.len(),
                sum: values.iter().sum(),
                pid: std::process::id(),
            })
        })
        .build()?;

    // Logs go to stderr; stdout carries frames.
    dispatcher.serve_stdio().await?;
    Ok(())
}

async fn controller() -> Result<(), Box<dyn std::error::Error>> {
    let exe = std::env::current_exe()?;
    let exe = exe.to_str().ok_or("executable path is not UTF-8")?;

    let spawner = ProcessSpawner::new().arg("--worker");
    let config = ProxyConfig::default().call_timeout(Duration::from_secs(5));
    let pool = Pool::spawn(&spawner, exe, 3, config)?;
    tracing::info!("Started {} workers", pool.size());

    let api = AddWorker::new(&pool);
    let sums: Vec<_> = (0..6).map(|i| api.add(i, i * 10)).collect();
    for (i, sum) in sums.into_iter().enumerate() {
        println!("add({}, {}) = {}", i, i * 10, sum.await?);
    }

    let stats: Vec<_> = (0..3).map(|_| api.stats(vec![1, 2, 3])).collect();
    for s in stats {
        println!("{:?}", s.await?);
    }

    match api.add(i64::MAX, 1).await {
        Ok(v) => println!("unexpected: {}", v),
        Err(e) => println!("add(MAX, 1) failed: {}", e),
    }
    match pool.invoke::<_, ()>("missing", &(1,)).await {
        Ok(()) => println!("unexpected success"),
        Err(e) => println!("missing(1) failed: {}", e),
    }

    pool.terminate_all()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if std::env::args().any(|a| a == "--worker") {
        worker().await
    } else {
        controller().await
    }
}
