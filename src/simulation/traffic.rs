//! Constant-rate on/off traffic source.
//!
//! A source moves `Idle → Active → Stopped`. While active every Send event emits
//! one packet and yields the time of the next Send, `packet_size·8 / data_rate`
//! later. Sends up to and including the stop time go out; the first send that
//! would land after it is never scheduled and the source is stopped.

use super::clock::SimTime;
use super::error::{SimError, SimResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Idle,
    Active,
    Stopped,
}

/// One packet handed to the channel by [`OnOffSource::on_send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Emission {
    /// Zero-based packet sequence number within the flow.
    pub seq: u64,
    pub packet_size: u32,
    /// When the next Send event is due, if any.
    pub next_send: Option<SimTime>,
}

#[derive(Debug, Clone)]
pub struct OnOffSource {
    packet_size: u32,
    data_rate_bps: f64,
    interval: SimTime,
    stop_time: SimTime,
    state: SourceState,
    packets_sent: u64,
    bytes_sent: u64,
}

/// Time to put one packet on the wire at the given rate, rounded to the
/// nearest nanosecond.
pub fn packet_interval(packet_size: u32, data_rate_bps: f64) -> SimResult<SimTime> {
    if packet_size == 0 {
        return Err(SimError::config("packet size must be positive"));
    }
    if !(data_rate_bps.is_finite() && data_rate_bps > 0.0) {
        return Err(SimError::config(format!("data rate must be positive, got {data_rate_bps} bps")));
    }
    let interval = SimTime::from_secs(f64::from(packet_size) * 8.0 / data_rate_bps)?;
    if interval == SimTime::ZERO {
        return Err(SimError::config(format!(
            "data rate {data_rate_bps} bps is too high for {packet_size}-byte packets"
        )));
    }
    Ok(interval)
}

impl OnOffSource {
    /// Create an idle source. Packet size and rate are fixed for its lifetime.
    pub fn new(packet_size: u32, data_rate_bps: f64) -> SimResult<Self> {
        Ok(Self {
            packet_size,
            data_rate_bps,
            interval: packet_interval(packet_size, data_rate_bps)?,
            stop_time: SimTime::MAX,
            state: SourceState::Idle,
            packets_sent: 0,
            bytes_sent: 0,
        })
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    pub fn packet_size(&self) -> u32 {
        self.packet_size
    }

    pub fn data_rate_bps(&self) -> f64 {
        self.data_rate_bps
    }

    pub fn interval(&self) -> SimTime {
        self.interval
    }

    pub fn stop_time(&self) -> SimTime {
        self.stop_time
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Activate the source. Returns the time of the first Send, which is `now`
    /// unless the source's stop time has already passed.
    pub fn start(&mut self, now: SimTime) -> SimResult<Option<SimTime>> {
        if self.state != SourceState::Idle {
            return Err(SimError::config(format!("source cannot start from state {:?}", self.state)));
        }
        if now > self.stop_time {
            self.state = SourceState::Stopped;
            return Ok(None);
        }
        self.state = SourceState::Active;
        Ok(Some(now))
    }

    /// Set the time after which no further Send is emitted.
    pub fn stop(&mut self, at: SimTime) {
        self.stop_time = at;
    }

    /// Handle a Send event at `now`.
    ///
    /// Returns `None` (and emits nothing) when the source is not active or
    /// `now` is past its stop time.
    pub fn on_send(&mut self, now: SimTime) -> Option<Emission> {
        if self.state != SourceState::Active {
            return None;
        }
        if now > self.stop_time {
            self.state = SourceState::Stopped;
            return None;
        }
        let seq = self.packets_sent;
        self.packets_sent += 1;
        self.bytes_sent += u64::from(self.packet_size);

        let next = now.saturating_add(self.interval);
        let next_send = if next > self.stop_time {
            self.state = SourceState::Stopped;
            None
        } else {
            Some(next)
        };
        Some(Emission {
            seq,
            packet_size: self.packet_size,
            next_send,
        })
    }
}
