//! Stand-in reward device for dry runs.

use std::time::Duration;
use tracing::info;
use trialrig::error::HardwareError;
use trialrig::pulse::{ChannelId, PulseChannel};

#[derive(Debug, Default)]
pub struct LoggingPump {
    pulses: u64,
}

impl LoggingPump {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PulseChannel for LoggingPump {
    fn emit_pulse(&mut self, channel: ChannelId, duration: Duration) -> Result<(), HardwareError> {
        self.pulses += 1;
        info!(
            %channel,
            ms = duration.as_millis() as u64,
            total = self.pulses,
            "reward pulse"
        );
        Ok(())
    }
}
