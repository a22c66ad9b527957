use crate::error::{BrokerError, Result};

/// Default number of subscriber slots in a new registry.
pub const DEFAULT_REGISTRY_CAPACITY: usize = 256;

/// Upper bound on registry slots.
pub const MAX_REGISTRY_CAPACITY: usize = 65_536;

/// Default wake signal (`SIGUSR1`).
pub const DEFAULT_WAKE_SIGNAL: i32 = 10;

/// Settings applied when a broker instance is created.
///
/// Capacity and wake signal are recorded in the shared registry, so every
/// process that opens the instance uses the creator's choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Maximum number of concurrent subscribers.
    pub registry_capacity: usize,
    /// Signal used to wake subscribers.
    pub wake_signal: i32,
    /// Permission bits for the registry segment and transport queue.
    pub mode: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            registry_capacity: DEFAULT_REGISTRY_CAPACITY,
            wake_signal: DEFAULT_WAKE_SIGNAL,
            mode: nbroker_sysv::DEFAULT_MODE,
        }
    }
}

impl BrokerConfig {
    pub fn with_registry_capacity(mut self, capacity: usize) -> Self {
        self.registry_capacity = capacity;
        self
    }

    pub fn with_wake_signal(mut self, signal: i32) -> Self {
        self.wake_signal = signal;
        self
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Reject settings that cannot produce a working instance.
    pub fn validate(&self) -> Result<()> {
        if self.registry_capacity == 0 || self.registry_capacity > MAX_REGISTRY_CAPACITY {
            return Err(BrokerError::InvalidArgument(format!(
                "registry capacity must be between 1 and {MAX_REGISTRY_CAPACITY}, got {}",
                self.registry_capacity
            )));
        }
        if !nbroker_sysv::signal::is_catchable(self.wake_signal) {
            return Err(BrokerError::InvalidArgument(format!(
                "signal {} cannot be used as a wake signal",
                self.wake_signal
            )));
        }
        if self.mode & !0o777 != 0 {
            return Err(BrokerError::InvalidArgument(format!(
                "mode {:#o} has bits outside 0o777",
                self.mode
            )));
        }
        if self.mode & 0o600 != 0o600 {
            return Err(BrokerError::InvalidArgument(format!(
                "mode {:#o} must grant the owner read and write access",
                self.mode
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = BrokerConfig::default();
        assert_eq!(config.registry_capacity, DEFAULT_REGISTRY_CAPACITY);
        assert_eq!(config.mode, 0o600);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_bad_capacity() {
        assert!(BrokerConfig::default()
            .with_registry_capacity(0)
            .validate()
            .is_err());
        assert!(BrokerConfig::default()
            .with_registry_capacity(MAX_REGISTRY_CAPACITY + 1)
            .validate()
            .is_err());
    }

    #[test]
    fn rejects_uncatchable_signal() {
        assert!(BrokerConfig::default()
            .with_wake_signal(9)
            .validate()
            .is_err());
        BrokerConfig::default()
            .with_wake_signal(12)
            .validate()
            .unwrap();
    }

    #[test]
    fn rejects_bad_mode() {
        assert!(BrokerConfig::default().with_mode(0o1777).validate().is_err());
        assert!(BrokerConfig::default().with_mode(0o066).validate().is_err());
        BrokerConfig::default().with_mode(0o666).validate().unwrap();
    }
}
