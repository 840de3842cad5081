use std::io::{self, IsTerminal};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::orchestrator::{Orchestrator, EXIT_CONFIGURATION};
use crate::provision::ProgressSink;
use crate::RequestedColorMode;
use crate::die;

pub(crate) mod list;
pub(crate) mod manage;
pub(crate) mod provision;

#[derive(Clone, Copy, PartialEq, Eq, Debug, strum_macros::Display)]
pub(crate) enum ColorMode {
    On,
    Off,
}

impl ColorMode {
    /// Returns whether ANSI color should be used
    /// If the user has specified a preference, this is honored. This preference
    /// can be specified through the command line or the "NO_COLOR" environment
    /// variable. If the user hasn't stated a preference, color is enabled if
    /// stderr is a terminal, since that is where diagnostics go.
    pub(crate) fn resolve_auto(cm: RequestedColorMode) -> ColorMode {
        match cm {
            RequestedColorMode::Auto => {
                let disable_color =
                    std::env::var_os("NO_COLOR").is_some() || !io::stderr().is_terminal();

                if disable_color {
                    ColorMode::Off
                } else {
                    ColorMode::On
                }
            }
            RequestedColorMode::On => ColorMode::On,
            RequestedColorMode::Off => ColorMode::Off,
        }
    }
}

/// Prints pull output to stderr as it arrives.
pub(crate) struct ConsoleSink;

impl ProgressSink for ConsoleSink {
    fn line(&self, identifier: &str, line: &str) {
        eprintln!("{}", line);
        tracing::debug!(identifier, "{}", line);
    }
}

pub(crate) fn orchestrator_or_die(config: &Config) -> Orchestrator {
    match Orchestrator::from_config(config, Arc::new(ConsoleSink)) {
        Ok(orchestrator) => orchestrator,
        Err(err) => die!(code = EXIT_CONFIGURATION; "{}", err),
    }
}

/// A token cancelled by the first Ctrl-C.
pub(crate) fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();

    let token = cancel.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, stopping");
            token.cancel();
        }
    });

    cancel
}
