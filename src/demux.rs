//! Channel demultiplexer and per-channel buffers.
//!
//! Decoded payloads are routed by type tag: analog blocks are kept only for
//! subscribed channel ids, GPS messages are kept for any channel id, and CAN FD
//! and tacho blocks are dropped after the codec has measured them.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::trace;

use crate::gate::AlignmentGate;
use crate::types::{AnalogPacket, Capture, ChannelPayload, GpsPacket};

/// What happened to one routed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Analog,
    Gps,
    /// Analog block for a channel outside the subscription.
    Filtered,
    /// Channel type the reader does not keep.
    Discarded,
}

/// Counts for a batch of routed payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteSummary {
    pub analog: usize,
    pub gps: usize,
    pub filtered: usize,
    pub discarded: usize,
}

impl RouteSummary {
    fn record(&mut self, routed: Routed) {
        match routed {
            Routed::Analog => self.analog += 1,
            Routed::Gps => self.gps += 1,
            Routed::Filtered => self.filtered += 1,
            Routed::Discarded => self.discarded += 1,
        }
    }
}

/// Buffers owned by one reader.
///
/// Not synchronized itself; the reader keeps it behind a single mutex so the
/// gate sees all channels at once.
#[derive(Debug, Default)]
pub struct ChannelBuffers {
    subscription: BTreeSet<u16>,
    analog: BTreeMap<u16, VecDeque<AnalogPacket>>,
    gps: BTreeMap<u16, VecDeque<GpsPacket>>,
    gate: AlignmentGate,
}

impl ChannelBuffers {
    pub fn new(channels: impl IntoIterator<Item = u16>) -> Self {
        let subscription: BTreeSet<u16> = channels.into_iter().collect();
        let analog = subscription.iter().map(|id| (*id, VecDeque::new())).collect();
        Self { subscription, analog, gps: BTreeMap::new(), gate: AlignmentGate::new() }
    }

    pub fn subscription(&self) -> &BTreeSet<u16> {
        &self.subscription
    }

    pub fn route(&mut self, payload: ChannelPayload) -> Routed {
        match payload {
            ChannelPayload::Analog(packet) => {
                if !self.subscription.contains(&packet.channel_id()) {
                    trace!("Filtered analog block for channel {}", packet.channel_id());
                    return Routed::Filtered;
                }
                self.analog.entry(packet.channel_id()).or_default().push_back(packet);
                Routed::Analog
            }
            ChannelPayload::Gps(packet) => {
                self.gps.entry(packet.channel_id()).or_default().push_back(packet);
                Routed::Gps
            }
            ChannelPayload::CanFd(_) | ChannelPayload::Tacho(_) => Routed::Discarded,
        }
    }

    pub fn route_all(
        &mut self,
        payloads: impl IntoIterator<Item = ChannelPayload>,
    ) -> RouteSummary {
        let mut summary = RouteSummary::default();
        for payload in payloads {
            summary.record(self.route(payload));
        }
        summary
    }

    /// Run the readiness gate over the subscribed analog channels.
    pub fn is_data_ready(&mut self) -> bool {
        self.gate.is_data_ready(&mut self.analog, &self.subscription)
    }

    pub fn is_aligned(&self) -> bool {
        self.gate.is_aligned()
    }

    pub fn buffered_analog(&self, channel: u16) -> usize {
        self.analog.get(&channel).map_or(0, VecDeque::len)
    }

    pub fn buffered_gps(&self, channel: u16) -> usize {
        self.gps.get(&channel).map_or(0, VecDeque::len)
    }

    pub fn drain_analog(&mut self, channel: u16) -> Vec<AnalogPacket> {
        self.analog.get_mut(&channel).map(|b| b.drain(..).collect()).unwrap_or_default()
    }

    pub fn drain_gps(&mut self, channel: u16) -> Vec<GpsPacket> {
        self.gps.get_mut(&channel).map(|b| b.drain(..).collect()).unwrap_or_default()
    }

    /// Take everything buffered, leaving channel entries in place.
    pub fn drain(&mut self) -> Capture {
        Capture {
            analog: self.analog.iter_mut().map(|(id, b)| (*id, b.drain(..).collect())).collect(),
            gps: self.gps.iter_mut().map(|(id, b)| (*id, b.drain(..).collect())).collect(),
        }
    }

    /// Copy of everything buffered.
    pub fn snapshot(&self) -> Capture {
        Capture {
            analog: self.analog.iter().map(|(id, b)| (*id, b.iter().cloned().collect())).collect(),
            gps: self.gps.iter().map(|(id, b)| (*id, b.iter().cloned().collect())).collect(),
        }
    }
}
