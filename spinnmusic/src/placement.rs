//! CPU placement of the main-loop thread.
//!
//! The main loop busy-waits between ticks, so it benefits from a core of its
//! own. In automatic mode it is pinned to the highest available core id,
//! away from core 0 where most interrupt handling lands, but only when the
//! machine has more than one physical core; on a single core pinning would
//! starve the receive thread.

use std::str::FromStr;

use core_affinity::CoreId;

/// CPU topology information detected at runtime.
#[derive(Debug, Clone)]
pub struct CpuTopology {
    /// Total logical cores (including SMT siblings).
    pub logical_cores: usize,
    /// Total physical cores.
    pub physical_cores: usize,
    /// Core IDs the process may be pinned to.
    pub available_cores: Vec<usize>,
}

impl CpuTopology {
    /// Detects the CPU topology of the current system.
    #[must_use]
    pub fn detect() -> Self {
        let logical_cores = num_cpus::get();
        let physical_cores = num_cpus::get_physical();
        let available_cores = core_affinity::get_core_ids()
            .map(|ids| ids.into_iter().map(|id| id.id).collect())
            .unwrap_or_else(|| (0..logical_cores).collect());

        Self {
            logical_cores,
            physical_cores,
            available_cores,
        }
    }

    /// Core chosen for the main loop in automatic mode.
    #[must_use]
    pub fn main_loop_core(&self) -> Option<usize> {
        if self.physical_cores < 2 {
            return None;
        }
        self.available_cores.iter().copied().max()
    }
}

/// Where to run the main loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CpuConfig {
    /// Pick a core from the detected topology.
    #[default]
    Auto,
    /// Pin to the given core id.
    Core(usize),
    /// Leave placement to the scheduler.
    Disabled,
}

impl CpuConfig {
    /// Resolves the config to a core id, `None` meaning unpinned.
    #[must_use]
    pub fn resolve(&self) -> Option<usize> {
        match self {
            Self::Auto => CpuTopology::detect().main_loop_core(),
            Self::Core(id) => Some(*id),
            Self::Disabled => None,
        }
    }
}

/// Error parsing a [`CpuConfig`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected 'auto', 'off' or a core id, got '{0}'")]
pub struct ParseCpuConfigError(String);

impl FromStr for CpuConfig {
    type Err = ParseCpuConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "off" | "none" => Ok(Self::Disabled),
            other => other
                .parse()
                .map(Self::Core)
                .map_err(|_| ParseCpuConfigError(other.to_owned())),
        }
    }
}

/// Pins the current thread to the specified core.
///
/// Returns `true` if pinning succeeded. Pinning may fail if the core ID is
/// invalid or the OS denies the request.
pub fn pin_to_core(core_id: usize) -> bool {
    core_affinity::set_for_current(CoreId { id: core_id })
}
