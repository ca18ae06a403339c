//! Reward pump channels.
//!
//! A [`PulseBus`] owns the pulse device and hands out [`ChannelLease`]s. A
//! channel can be held by at most one lease at a time; the lease releases its
//! channels when dropped.

use crate::error::HardwareError;
use crate::time::Duration;
use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u8);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hardware side of reward delivery.
///
/// `emit_pulse` starts one pulse of `duration` on `channel`. Once started a
/// pulse runs to completion; there is no way to stop it early.
pub trait PulseChannel: Send {
    fn emit_pulse(&mut self, channel: ChannelId, duration: Duration) -> Result<(), HardwareError>;
}

struct BusInner {
    device: Box<dyn PulseChannel>,
    held: HashSet<ChannelId>,
}

#[derive(Clone)]
pub struct PulseBus {
    inner: Arc<Mutex<BusInner>>,
}

impl fmt::Debug for PulseBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PulseBus").finish_non_exhaustive()
    }
}

impl PulseBus {
    pub fn new(device: impl PulseChannel + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                device: Box::new(device),
                held: HashSet::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusInner> {
        // A panic while holding the lock cannot leave `held` half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Exclusively acquire every channel in `channels`, or none of them.
    pub fn acquire(&self, channels: &[ChannelId]) -> Result<ChannelLease, HardwareError> {
        let mut inner = self.lock();
        if let Some(busy) = channels.iter().find(|c| inner.held.contains(*c)) {
            return Err(HardwareError::ChannelBusy(*busy));
        }
        let mut owned = Vec::with_capacity(channels.len());
        for &c in channels {
            if inner.held.insert(c) {
                owned.push(c);
            }
        }
        Ok(ChannelLease {
            bus: self.clone(),
            channels: owned,
        })
    }

    pub fn is_held(&self, channel: ChannelId) -> bool {
        self.lock().held.contains(&channel)
    }
}

/// Exclusive hold on a set of pump channels.
pub struct ChannelLease {
    bus: PulseBus,
    channels: Vec<ChannelId>,
}

impl fmt::Debug for ChannelLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelLease")
            .field("channels", &self.channels)
            .finish()
    }
}

impl ChannelLease {
    pub fn channels(&self) -> &[ChannelId] {
        &self.channels
    }

    /// Emit one pulse on every leased channel. Stops at the first failure.
    /// A lease with no channels cannot deliver anything and always fails.
    pub fn emit(&self, duration: Duration) -> Result<(), HardwareError> {
        if self.channels.is_empty() {
            return Err(HardwareError::NoChannels);
        }
        let mut inner = self.bus.lock();
        for &c in &self.channels {
            inner.device.emit_pulse(c, duration)?;
        }
        Ok(())
    }
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        let mut inner = self.bus.lock();
        for c in &self.channels {
            inner.held.remove(c);
        }
    }
}

/// Pulse device that remembers every pulse it was asked for.
///
/// Clones share the same log, so a test can keep one handle while the bus
/// owns the other.
#[derive(Debug, Clone, Default)]
pub struct RecordingPump {
    pulses: Arc<Mutex<Vec<(ChannelId, Duration)>>>,
    fail_after: Option<usize>,
}

impl RecordingPump {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every emission after `n` successful ones.
    pub fn failing_after(n: usize) -> Self {
        Self {
            pulses: Arc::default(),
            fail_after: Some(n),
        }
    }

    pub fn pulses(&self) -> Vec<(ChannelId, Duration)> {
        self.pulses
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

impl PulseChannel for RecordingPump {
    fn emit_pulse(&mut self, channel: ChannelId, duration: Duration) -> Result<(), HardwareError> {
        let mut pulses = self.pulses.lock().map_err(|_| HardwareError::Disconnected)?;
        if self.fail_after.is_some_and(|n| pulses.len() >= n) {
            return Err(HardwareError::Actuation {
                channel,
                message: "pump did not acknowledge".to_string(),
            });
        }
        pulses.push((channel, duration));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_is_exclusive_until_dropped() {
        let bus = PulseBus::new(RecordingPump::new());
        let lease = bus.acquire(&[ChannelId(1), ChannelId(2)]).unwrap();
        assert!(bus.is_held(ChannelId(2)));

        let err = bus.acquire(&[ChannelId(2)]).unwrap_err();
        assert_eq!(err, HardwareError::ChannelBusy(ChannelId(2)));

        // A failed acquisition does not grab the free channels either.
        assert!(bus.acquire(&[ChannelId(3), ChannelId(1)]).is_err());
        assert!(!bus.is_held(ChannelId(3)));

        drop(lease);
        assert!(!bus.is_held(ChannelId(1)));
        assert!(bus.acquire(&[ChannelId(2)]).is_ok());
    }

    #[test]
    fn emit_hits_every_channel() {
        let pump = RecordingPump::new();
        let bus = PulseBus::new(pump.clone());
        let lease = bus.acquire(&[ChannelId(1), ChannelId(2)]).unwrap();
        lease.emit(Duration::from_millis(500)).unwrap();
        assert_eq!(
            pump.pulses(),
            vec![
                (ChannelId(1), Duration::from_millis(500)),
                (ChannelId(2), Duration::from_millis(500)),
            ]
        );
    }

    #[test]
    fn empty_lease_never_reports_a_delivery() {
        let pump = RecordingPump::new();
        let bus = PulseBus::new(pump.clone());
        let lease = bus.acquire(&[]).unwrap();
        assert_eq!(lease.emit(Duration::from_millis(10)), Err(HardwareError::NoChannels));
        assert!(pump.pulses().is_empty());
    }

    #[test]
    fn failing_pump_reports_actuation_error() {
        let bus = PulseBus::new(RecordingPump::failing_after(1));
        let lease = bus.acquire(&[ChannelId(1)]).unwrap();
        assert!(lease.emit(Duration::from_millis(10)).is_ok());
        assert!(matches!(
            lease.emit(Duration::from_millis(10)),
            Err(HardwareError::Actuation { .. })
        ));
    }
}
