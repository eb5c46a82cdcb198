//! Repeating two-system capture sessions.
//!
//! Each cycle connects one reader per system, captures for a fixed time,
//! stops both readers, and aligns what they buffered. A cycle whose captures
//! cannot be aligned is skipped; any other error ends the session.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::align::{Aligner, TimeAligner};
use crate::config::SyncConfig;
use crate::connection::StreamReader;
use crate::types::{AlignedBlock, Capture};
use crate::{Result, TelemetryError};

/// Outcome counts of [`SyncSession::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub completed: usize,
    pub skipped: usize,
}

/// Capture-and-align loop over a reference and a sync system.
#[derive(Debug)]
pub struct SyncSession {
    config: SyncConfig,
    aligner: Aligner,
    cancel: CancellationToken,
}

impl SyncSession {
    pub fn new(config: SyncConfig) -> Result<Self> {
        config.validate_session()?;
        let aligner = Aligner::from_config(&config.alignment, config.sample_rate)?;
        Ok(Self { config, aligner, cancel: CancellationToken::new() })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn aligner(&self) -> &Aligner {
        &self.aligner
    }

    /// Token that ends [`run`](Self::run) between cycles.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Align two captures with the configured policy and optional pulse scope.
    pub fn align(&mut self, reference: &Capture, sync: &Capture) -> Result<AlignedBlock> {
        let block = self.aligner.aligned_block(reference, sync)?;
        match &self.config.alignment.scope {
            Some(scope) => block.scope_pulse(scope),
            None => Ok(block),
        }
    }

    /// Capture once from both systems and align the result.
    pub async fn run_cycle(&mut self) -> Result<AlignedBlock> {
        let session = &self.config.session;
        let reference_endpoint = session
            .reference_endpoint
            .clone()
            .ok_or_else(|| TelemetryError::config("session has no reference endpoint"))?;
        let sync_endpoint = session
            .sync_endpoint
            .clone()
            .ok_or_else(|| TelemetryError::config("session has no sync endpoint"))?;

        let reader_config = &self.config.reader;
        let (mut reference, mut sync) = tokio::try_join!(
            StreamReader::connect(reference_endpoint.as_str(), reader_config),
            StreamReader::connect(sync_endpoint.as_str(), reader_config),
        )?;

        debug!("Capturing for {:?}", session.capture());
        tokio::time::sleep(session.capture()).await;

        let (reference_stats, sync_stats) = tokio::try_join!(reference.stop(), sync.stop())?;
        info!(
            "Captured {} packets from {} and {} from {}",
            reference_stats.packets, reference_endpoint, sync_stats.packets, sync_endpoint
        );

        let (reference, sync) = (reference.drain()?, sync.drain()?);
        self.align(&reference, &sync)
    }

    /// Run `cycles` cycles, or until cancelled when `None`.
    ///
    /// Each aligned block is handed to `on_block` with its cycle index.
    /// Alignment failures skip the cycle; other errors are returned.
    pub async fn run<F>(
        &mut self,
        cycles: Option<usize>,
        mut on_block: F,
    ) -> Result<SessionSummary>
    where
        F: FnMut(usize, AlignedBlock),
    {
        let mut summary = SessionSummary::default();
        let interval = self.config.session.cycle_interval();

        for cycle in 0.. {
            if cycles.is_some_and(|limit| cycle >= limit) || self.cancel.is_cancelled() {
                break;
            }

            match self.run_cycle().await {
                Ok(block) => {
                    debug!("Cycle {} aligned {} samples", cycle, block.len());
                    summary.completed += 1;
                    on_block(cycle, block);
                }
                Err(e) if e.is_alignment_failure() => {
                    warn!("Skipping cycle {}: {}", cycle, e);
                    summary.skipped += 1;
                }
                Err(e) => return Err(e),
            }

            let last = cycles.is_some_and(|limit| cycle + 1 >= limit);
            if !last && !self.pause(interval).await {
                break;
            }
        }

        info!("Session finished: {} aligned, {} skipped", summary.completed, summary.skipped);
        Ok(summary)
    }

    /// Wait between cycles; false when cancelled meanwhile.
    async fn pause(&self, interval: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(interval) => true,
        }
    }
}
