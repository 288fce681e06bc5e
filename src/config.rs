//! Simulation configuration.

/// Seed used when none is given.
pub const DEFAULT_SEED: u64 = 12345;

/// Settings fixed for the lifetime of one simulation.
///
/// Two simulations built from equal configs and driven by the same
/// processes produce identical traces.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SimConfig {
    /// Seed for the simulation's random source.
    pub seed: u64,
    /// Record every dispatched event in an [`EventLog`](crate::eventlog::EventLog).
    pub trace: bool,
}

impl SimConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            seed: DEFAULT_SEED,
            trace: false,
        }
    }
}
