// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Logging bootstrap for hosts embedding the core.
//!
//! The core only emits `tracing` events and `metrics` samples; installing a
//! metrics exporter is left to the host.

use anyhow::{Context, Result};

/// Install a compact fmt subscriber. `RUST_LOG` wins over `level`.
/// Calling this when a global subscriber already exists is a no-op.
pub fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .try_init();

    if installed.is_err() {
        tracing::debug!("Global tracing subscriber already installed");
    }

    Ok(())
}
