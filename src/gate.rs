//! Readiness gate for multi-channel buffers.
//!
//! Channels on one device may start streaming a few blocks apart. Before the
//! first block is handed out, the gate sweeps the buffers for the earliest
//! timestamp that every subscribed channel holds, discarding the leading
//! blocks that only some channels captured. Once such a timestamp is found the
//! gate latches and afterwards only checks that every channel has data.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::{debug, trace};

use crate::types::AnalogPacket;

/// Anything the gate can order by device timestamp.
pub trait Timestamped {
    fn timestamp(&self) -> u64;
}

impl Timestamped for AnalogPacket {
    fn timestamp(&self) -> u64 {
        self.header.timestamp
    }
}

/// Latching readiness check.
#[derive(Debug, Default, Clone)]
pub struct AlignmentGate {
    aligned: bool,
}

impl AlignmentGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a common timestamp has been found.
    pub fn is_aligned(&self) -> bool {
        self.aligned
    }

    /// Report whether every subscribed channel can hand out aligned data.
    ///
    /// Before the latch this prunes non-common leading entries from the
    /// buffers. An empty subscription is never ready.
    pub fn is_data_ready<T: Timestamped>(
        &mut self,
        buffers: &mut BTreeMap<u16, VecDeque<T>>,
        subscribed: &BTreeSet<u16>,
    ) -> bool {
        if subscribed.is_empty() {
            return false;
        }

        let all_have_data = |buffers: &BTreeMap<u16, VecDeque<T>>| {
            subscribed.iter().all(|id| buffers.get(id).is_some_and(|b| !b.is_empty()))
        };

        if self.aligned {
            return all_have_data(buffers);
        }

        loop {
            if !all_have_data(buffers) {
                return false;
            }

            let smallest = subscribed
                .iter()
                .filter_map(|id| buffers.get(id)?.front().map(Timestamped::timestamp))
                .min();
            let Some(smallest) = smallest else {
                return false;
            };

            let common = subscribed.iter().all(|id| {
                buffers.get(id).is_some_and(|b| b.iter().any(|p| p.timestamp() == smallest))
            });

            if common {
                debug!("Channels aligned at timestamp {}", smallest);
                self.aligned = true;
                return true;
            }

            trace!("Timestamp {} not common to all channels, discarding", smallest);
            for id in subscribed {
                if let Some(buffer) = buffers.get_mut(id) {
                    buffer.retain(|p| p.timestamp() != smallest);
                }
            }
        }
    }
}
