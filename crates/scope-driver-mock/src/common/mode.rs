//! Response modes for simulated devices.

/// How a simulated device paces its responses.
///
/// - **Instant**: commands complete on the next busy poll, frames have no
///   exposure delay. Deterministic, for unit tests.
/// - **Realistic**: motion stays busy for a travel time derived from the
///   configured speed; frame reads sleep for the exposure time.
/// - **Chaos**: Realistic timing plus random command failures from the
///   device's error configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MockMode {
    #[default]
    Instant,
    Realistic,
    Chaos,
}

impl MockMode {
    /// True when commands should take simulated wall-clock time.
    pub fn is_timed(self) -> bool {
        !matches!(self, MockMode::Instant)
    }
}
