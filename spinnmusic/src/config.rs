//! Adapter configuration.
//!
//! [`InputConfig`] and [`OutputConfig`] carry everything an adapter needs at
//! construction. Both start from sensible defaults and are adjusted with
//! builder-style setters; [`validate`](InputConfig::validate) is called by
//! the adapter constructors.

use std::time::Duration;

/// Default time between ticks of the coupled runtime.
pub const DEFAULT_TIMESTEP: Duration = Duration::from_millis(10);

/// Default pause between a lock-step tick and the continue signal.
pub const DEFAULT_SYNC_PAUSE: Duration = Duration::from_millis(1);

/// Default remaining time below which [`Pacing::Park`] stops parking and spins.
pub const DEFAULT_SPIN_THRESHOLD: Duration = Duration::from_micros(200);

/// How the main loop waits for the next grid target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Poll continuously, yielding the processor between polls.
    Spin,
    /// Sleep on the stop signal until `spin_threshold` before the next
    /// deadline, then spin.
    Park { spin_threshold: Duration },
}

impl Default for Pacing {
    fn default() -> Self {
        Self::Park {
            spin_threshold: DEFAULT_SPIN_THRESHOLD,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("timestep must be positive")]
    ZeroTimestep,
    #[error("population size must be positive")]
    ZeroUnits,
    #[error("population label must not be empty")]
    EmptyLabel,
    #[error("port name must not be empty")]
    EmptyPortName,
    #[error("sync interval must be positive when given")]
    ZeroSyncInterval,
    #[error("{name} must be finite and non-negative, got {value}")]
    InvalidSeconds { name: &'static str, value: String },
}

fn check_seconds(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidSeconds {
            name,
            value: value.to_string(),
        })
    }
}

fn check_common(label: &str, units: u32, port_name: &str, timestep: Duration) -> Result<(), ConfigError> {
    if label.is_empty() {
        return Err(ConfigError::EmptyLabel);
    }
    if units == 0 {
        return Err(ConfigError::ZeroUnits);
    }
    if port_name.is_empty() {
        return Err(ConfigError::EmptyPortName);
    }
    if timestep.is_zero() {
        return Err(ConfigError::ZeroTimestep);
    }
    Ok(())
}

/// Configuration of the input adapter (coupled runtime → remote device).
#[derive(Debug, Clone, PartialEq)]
pub struct InputConfig {
    /// Remote population label.
    pub label: String,

    /// Population size; the adapter maps indices `0..units`.
    pub units: u32,

    /// Name of the input port published on the coupling layer.
    ///
    /// **Default**: `in`
    pub port_name: String,

    /// Time between ticks; also the clock's grid interval.
    ///
    /// **Default**: 10ms
    pub timestep: Duration,

    /// Simulated time in seconds at which the main loop ends.
    ///
    /// **Default**: 0 (no ticks)
    pub stop_time: f64,

    /// Seconds added to every incoming event time before forwarding.
    ///
    /// **Default**: 0
    pub delay: f64,

    /// Buffering hint in ticks, passed through to the coupling layer.
    ///
    /// **Default**: `None`
    pub max_buffered: Option<u32>,

    /// Wait on the coupling layer's process-group barrier during construction.
    ///
    /// **Default**: `false`
    pub use_barrier: bool,

    /// Selects lock-step mode when set. Only its presence matters; the
    /// remote device paces the steps.
    ///
    /// **Default**: `None` (free-running)
    pub sync_interval: Option<Duration>,

    /// Real sleep between a lock-step tick and the continue signal.
    ///
    /// **Default**: 1ms
    pub sync_pause: Duration,

    /// Wait strategy between grid targets.
    ///
    /// **Default**: [`Pacing::Park`] with a 200µs spin threshold
    pub pacing: Pacing,
}

impl InputConfig {
    /// Creates a configuration for `units` units of population `label`.
    #[must_use]
    pub fn new(label: impl Into<String>, units: u32) -> Self {
        Self {
            label: label.into(),
            units,
            port_name: "in".to_owned(),
            timestep: DEFAULT_TIMESTEP,
            stop_time: 0.0,
            delay: 0.0,
            max_buffered: None,
            use_barrier: false,
            sync_interval: None,
            sync_pause: DEFAULT_SYNC_PAUSE,
            pacing: Pacing::default(),
        }
    }

    #[must_use]
    pub fn with_port_name(mut self, name: impl Into<String>) -> Self {
        self.port_name = name.into();
        self
    }

    #[must_use]
    pub fn with_timestep(mut self, timestep: Duration) -> Self {
        self.timestep = timestep;
        self
    }

    #[must_use]
    pub fn with_stop_time(mut self, seconds: f64) -> Self {
        self.stop_time = seconds;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, seconds: f64) -> Self {
        self.delay = seconds;
        self
    }

    #[must_use]
    pub fn with_max_buffered(mut self, ticks: Option<u32>) -> Self {
        self.max_buffered = ticks;
        self
    }

    #[must_use]
    pub fn with_barrier(mut self, use_barrier: bool) -> Self {
        self.use_barrier = use_barrier;
        self
    }

    #[must_use]
    pub fn with_sync_interval(mut self, interval: Option<Duration>) -> Self {
        self.sync_interval = interval;
        self
    }

    #[must_use]
    pub fn with_sync_pause(mut self, pause: Duration) -> Self {
        self.sync_pause = pause;
        self
    }

    #[must_use]
    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Returns `true` in lock-step mode.
    #[must_use]
    pub const fn is_lock_step(&self) -> bool {
        self.sync_interval.is_some()
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_common(&self.label, self.units, &self.port_name, self.timestep)?;
        check_seconds("stop time", self.stop_time)?;
        check_seconds("delay", self.delay)?;
        if self.sync_interval.is_some_and(|i| i.is_zero()) {
            return Err(ConfigError::ZeroSyncInterval);
        }
        Ok(())
    }
}

/// Configuration of the output adapter (remote device → coupled runtime).
#[derive(Debug, Clone, PartialEq)]
pub struct OutputConfig {
    /// Remote population label.
    pub label: String,

    /// Population size; the adapter maps indices `0..units`.
    pub units: u32,

    /// Name of the output port published on the coupling layer.
    ///
    /// **Default**: `out`
    pub port_name: String,

    /// Time between ticks; also the clock's grid interval.
    ///
    /// **Default**: 10ms
    pub timestep: Duration,

    /// Simulated time in seconds at which the main loop ends.
    ///
    /// **Default**: 0 (no ticks)
    pub stop_time: f64,

    /// Wait strategy between grid targets.
    ///
    /// **Default**: [`Pacing::Park`] with a 200µs spin threshold
    pub pacing: Pacing,
}

impl OutputConfig {
    /// Creates a configuration for `units` units of population `label`.
    #[must_use]
    pub fn new(label: impl Into<String>, units: u32) -> Self {
        Self {
            label: label.into(),
            units,
            port_name: "out".to_owned(),
            timestep: DEFAULT_TIMESTEP,
            stop_time: 0.0,
            pacing: Pacing::default(),
        }
    }

    #[must_use]
    pub fn with_port_name(mut self, name: impl Into<String>) -> Self {
        self.port_name = name.into();
        self
    }

    #[must_use]
    pub fn with_timestep(mut self, timestep: Duration) -> Self {
        self.timestep = timestep;
        self
    }

    #[must_use]
    pub fn with_stop_time(mut self, seconds: f64) -> Self {
        self.stop_time = seconds;
        self
    }

    #[must_use]
    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_common(&self.label, self.units, &self.port_name, self.timestep)?;
        check_seconds("stop time", self.stop_time)
    }
}
