//! `cnid`: node daemon that installs the istio-cni plugin and keeps its
//! CNI configuration installed until shutdown.
//!
//! On SIGINT or SIGTERM the install loop is cancelled and the installation
//! is cleaned up before exit.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod args;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use cnid_install::{Installer, Readiness};

use crate::args::Args;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_config = args.log_config()?;
    if let Err(e) = cnid_telemetry::setup_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let config = args.install_config()?;
    info!(
        net_dir = %config.mounted_cni_net_dir.display(),
        chained = config.chained_cni_plugin,
        conf_name = config.cni_conf_name.as_deref().unwrap_or("<auto>"),
        "Starting istio-cni installer"
    );
    println!(
        "{}",
        format!(
            "cnid supervising {} ({} mode)",
            config.mounted_cni_net_dir.display(),
            if config.chained_cni_plugin {
                "chained"
            } else {
                "standalone"
            }
        )
        .cyan()
        .bold()
    );

    let readiness = Readiness::new();
    let cancel = CancellationToken::new();
    let mut installer = Installer::new(config, readiness);

    let mut task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let res = installer.run(&cancel).await;
            (installer, res)
        })
    };

    let joined = tokio::select! {
        joined = &mut task => joined,
        () = shutdown_signal() => {
            println!("\n{}", "Shutting down installer...".yellow());
            cancel.cancel();
            task.await
        },
    };
    let (installer, run_result) = joined.context("installer task panicked")?;

    let run_error = match run_result {
        Err(e) if !e.is_cancelled() => {
            error!(error = %e, "Installer failed");
            Some(e)
        },
        _ => None,
    };

    if let Err(e) = installer.cleanup() {
        error!(error = %e, "Cleanup failed");
        return Err(e).context("cleanup failed");
    }

    if let Some(e) = run_error {
        return Err(e).context("installer failed");
    }

    println!("{}", "cnid stopped".green().bold());
    Ok(())
}

/// Resolve on Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
