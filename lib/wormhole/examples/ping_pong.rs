// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Ping-pong benchmark for Wormhole liveness probing.
//!
//! Measures round-trip time for ping/pong probes between two Wormhole endpoints
//! running in the same process on separate single-threaded tokio runtimes,
//! signaling through a shared directory the way two sandboxed processes would.

use anyhow::Result;
use clap::Parser;
use wormhole::Wormhole;

use std::sync::mpsc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// CLI arguments for ping-pong benchmark
#[derive(Parser, Debug)]
#[command(name = "ping_pong")]
#[command(about = "Benchmark Wormhole ping/pong RTT")]
struct Args {
    /// Number of ping-pong iterations
    #[arg(long, default_value = "100")]
    rounds: u32,

    /// Probe timeout in milliseconds
    #[arg(long, default_value = "2000")]
    timeout_ms: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    // Shared container standing in for the app group's storage area
    let container = tempfile::tempdir()?;
    let container_path = container.path().to_path_buf();

    // Create two separate single-threaded tokio runtimes
    let runtime_responder = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let runtime_prober = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    // Channel to signal the prober once the responder is ready
    let (ready_tx, ready_rx) = mpsc::channel();

    // Spawn responder thread
    let responder_container = container_path.clone();
    let responder_handle = std::thread::spawn(move || {
        runtime_responder.block_on(async {
            let endpoint = Wormhole::builder("group.demo.ping-pong")
                .container_root(responder_container)
                .build()
                .unwrap();

            endpoint.reply_to_pings("svc").unwrap();
            ready_tx.send(()).unwrap();

            println!("Responder ready");

            // Keep runtime alive to answer probes
            std::future::pending::<()>().await;
        });
    });

    // Wait for responder to come up
    ready_rx.recv().unwrap();

    // Spawn prober thread
    let prober_handle = std::thread::spawn(move || {
        runtime_prober.block_on(async move {
            let endpoint = Wormhole::builder("group.demo.ping-pong")
                .container_root(container_path)
                .build()
                .unwrap();

            // Give both directory buses a moment to take their poll baselines
            sleep(Duration::from_millis(200)).await;

            let timeout = Duration::from_millis(args.timeout_ms);

            println!("Performing warmup probe...");
            let (tx, rx) = tokio::sync::oneshot::channel();
            endpoint
                .ping_with_timeout("svc", timeout, move |alive| {
                    let _ = tx.send(alive);
                })
                .unwrap();
            match rx.await {
                Ok(true) => println!("Warmup complete"),
                Ok(false) => {
                    println!("Warmup probe timed out");
                    return Ok(());
                }
                Err(_) => {
                    println!("Warmup probe dropped");
                    return Ok(());
                }
            }

            println!("Starting ping-pong measurements for {} rounds...", args.rounds);

            let mut rtts = Vec::new();

            for i in 1..=args.rounds {
                let start = Instant::now();
                let (tx, rx) = tokio::sync::oneshot::channel();
                endpoint
                    .ping_with_timeout("svc", timeout, move |alive| {
                        let _ = tx.send(alive);
                    })
                    .unwrap();

                match rx.await {
                    Ok(true) => {
                        let rtt = start.elapsed();
                        rtts.push(rtt);

                        if i % 10 == 0 {
                            println!("Round {}: RTT = {:?}", i, rtt);
                        }
                    }
                    Ok(false) => tracing::warn!("Round {} timed out", i),
                    Err(_) => tracing::warn!("Round {} dropped", i),
                }
            }

            if !rtts.is_empty() {
                let total: Duration = rtts.iter().sum();
                let avg = total / rtts.len() as u32;
                let min = rtts.iter().min().unwrap();
                let max = rtts.iter().max().unwrap();

                println!("\n=== RTT Statistics ===");
                println!("Rounds completed: {}/{}", rtts.len(), args.rounds);
                println!("Average RTT: {:?}", avg);
                println!("Min RTT: {:?}", min);
                println!("Max RTT: {:?}", max);
            } else {
                println!("No successful ping-pong rounds completed");
            }

            Ok(())
        })
    });

    // Wait for prober to complete
    let prober_result: Result<()> = prober_handle.join().unwrap();
    prober_result?;

    // Responder runs indefinitely, but we can drop it here
    drop(responder_handle);

    Ok(())
}
