//! Engine-wide timing and behaviour knobs, bundled the way a per-device
//! config table would be, but for protocol timing rather than controller
//! register values.

/// Timing and behaviour constants for a reader session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Timer ticks to wait before the first reader bit of a transaction.
    pub t_wait_first: u32,
    /// Timer ticks to wait between frames within a transaction.
    pub t_wait_sc: u32,
    /// Minimum field-off time between challenge-sweep attempts, in timer ticks.
    pub t_reset: u32,
    /// When set, the write path polls the tear-off hook after transmitting
    /// the data frame and before waiting for the ACK.
    pub tearoff_enabled: bool,
}

impl EngineConfig {
    /// Values matching the reference firmware's reader timing constants.
    pub const fn reference() -> Self {
        EngineConfig {
            t_wait_first: 300,
            t_wait_sc: 200,
            t_reset: 2000,
            tearoff_enabled: false,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::reference()
    }
}
