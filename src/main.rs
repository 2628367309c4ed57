// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use tutka_scanner::cli::Cli;
use tutka_scanner::engine::ScanEngine;
use tutka_scanner::input::InputProvider;
use tutka_scanner::output::StandardWriter;
use tutka_scanner::template;
use tutka_scanner::types::ScanStats;

fn main() -> ExitCode {
    // argument errors are configuration errors
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let is_help = matches!(
                e.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            );
            let _ = e.print();
            return if is_help {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            };
        }
    };

    // Initialize tracing
    let default_level = if cli.silent {
        tracing::Level::ERROR
    } else if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(default_level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if !cli.silent && !cli.no_color {
        print_banner();
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("tutka-worker")
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build runtime: {e}");
            return ExitCode::from(2);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Scan failed: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn print_banner() {
    print!("\x1b[96m");
    println!(" _         _    _         ");
    println!("| |_ _   _| |_ | | ____ _ ");
    println!("| __| | | | __|| |/ / _` |");
    println!("| |_| |_| | |_ |   < (_| |");
    print!("\x1b[94m");
    println!(" \\__|\\__,_|\\__||_|\\_\\__,_|");
    print!("\x1b[0m\x1b[1m");
    println!("      Template Scanner v{}", env!("CARGO_PKG_VERSION"));
    print!("\x1b[0m");
    println!("           (c) 2026 Bountyy Oy");
    println!();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let options = cli.to_options();
    if let Err(e) = options.validate() {
        // configuration errors surface before the scan begins
        error!("Invalid configuration: {e}");
        return Ok(ExitCode::from(1));
    }
    if cli.templates.is_empty() {
        error!("No templates given; use -t <path>");
        return Ok(ExitCode::from(1));
    }

    // Targets: flags, list file, structured file, then piped stdin
    let mut provider = InputProvider::new();
    for target in &cli.targets {
        provider.add(target);
    }
    if let Some(list) = &cli.list {
        provider.load_list(list)?;
    }
    if let Some(file) = &cli.targets_file {
        provider.load_structured(file)?;
    }
    provider.load_stdin();
    let targets = provider.finalize();
    if targets.is_empty() {
        error!("No targets given; use -u, -l or pipe stdin");
        return Ok(ExitCode::from(1));
    }

    let stats = Arc::new(ScanStats::default());
    let store = template::load_all(&cli.templates, &options, &stats);
    if store.templates.is_empty() && store.workflows.is_empty() {
        error!("No templates survived loading and filtering");
        return Ok(ExitCode::from(1));
    }
    info!(
        "Loaded {} template(s), {} workflow(s), {} target(s)",
        store.templates.len(),
        store.workflows.len(),
        targets.len()
    );

    let sink = Arc::new(StandardWriter::new(
        cli.jsonl,
        !cli.no_color,
        cli.silent,
        cli.output.as_deref(),
    )?);

    let engine = Arc::new(ScanEngine::new(options, sink, Arc::clone(&stats)).await?);

    // Ctrl-C propagates scan-wide cancellation
    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received; draining in-flight work");
            cancel.cancel();
        }
    });

    if cli.stats {
        let stats = Arc::clone(&stats);
        let cancel = engine.cancel_token();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(5));
            loop {
                tokio::select! {
                    _ = ticker.tick() => info!("Progress: {}", stats.summary()),
                    _ = cancel.cancelled() => break,
                }
            }
        });
    }

    engine
        .execute_scan(Arc::new(store), Arc::new(targets))
        .await?;
    engine.close().await;

    info!("Scan complete: {}", stats.summary());

    let matched = stats.matches.load(std::sync::atomic::Ordering::Relaxed);
    if cli.exit_on_match && matched > 0 {
        // matched findings change the exit code only on request
        return Ok(ExitCode::from(3));
    }
    Ok(ExitCode::SUCCESS)
}
