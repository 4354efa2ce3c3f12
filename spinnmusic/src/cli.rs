//! Command-line arguments of the `spinnmusic-in` and `spinnmusic-out`
//! binaries.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser};

use crate::config::{ConfigError, InputConfig, OutputConfig, Pacing};
use crate::link::udp::UdpLinkConfig;
use crate::net::Endpoint;
use crate::net::endpoint::DEFAULT_NOTIFY_PORT;
use crate::placement::CpuConfig;

/// Arguments shared by both directions.
#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// Label of the population on the remote device.
    #[arg(short, long)]
    pub label: String,

    /// Population size; unit ids 0..RANGE are mapped.
    #[arg(short = 'r', long = "range")]
    pub units: u32,

    /// UDP port notifications are received on.
    #[arg(short = 'p', long = "port", default_value_t = DEFAULT_NOTIFY_PORT)]
    pub notify_port: u16,

    /// Remote device address; learned from its first start notification when omitted.
    #[arg(long)]
    pub remote: Option<Endpoint>,

    /// Time between ticks of the coupled runtime, in seconds.
    #[arg(short, long, default_value_t = 0.01)]
    pub timestep: f64,

    /// Simulated time at which the run ends, in seconds.
    #[arg(long = "stoptime", default_value_t = 1.0)]
    pub stop_time: f64,

    /// Core to run the main loop on: `auto`, `off` or a core id.
    #[arg(long, default_value = "auto")]
    pub cpu: CpuConfig,

    /// Busy-poll between ticks instead of sleeping until close to them.
    #[arg(long)]
    pub spin: bool,
}

impl CommonArgs {
    /// Socket settings for the notification link.
    #[must_use]
    pub fn link_config(&self) -> UdpLinkConfig {
        UdpLinkConfig {
            bind: Endpoint::any(self.notify_port),
            remote: self.remote,
            recv_buffer_size: None,
        }
    }

    fn timestep(&self) -> Result<Duration, ConfigError> {
        seconds("timestep", self.timestep)
    }

    fn pacing(&self) -> Pacing {
        if self.spin {
            Pacing::Spin
        } else {
            Pacing::default()
        }
    }
}

fn seconds(name: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::InvalidSeconds {
        name,
        value: value.to_string(),
    })
}

/// Forwards events from a coupled runtime to a live population.
#[derive(Debug, Clone, Parser)]
#[command(name = "spinnmusic-in", version, about)]
pub struct InputArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Name of the published input port.
    #[arg(short = 'o', long = "portname", default_value = "in")]
    pub port_name: String,

    /// Seconds added to every event before it is forwarded.
    #[arg(short, long, default_value_t = 0.0)]
    pub delay: f64,

    /// Buffering hint in ticks; 0 leaves it to the coupling layer.
    #[arg(short = 'b', long = "maxbuffered", default_value_t = 0)]
    pub max_buffered: u32,

    /// Wait at the coupling barrier before running.
    #[arg(short = 'a', long)]
    pub barrier: bool,

    /// Run in lock-step with the remote device, with this sync interval in seconds.
    #[arg(short, long)]
    pub sync: Option<f64>,

    /// Event file with `<time> <id>` lines to replay into the input port.
    pub events: Option<PathBuf>,
}

impl InputArgs {
    /// Builds the adapter configuration.
    ///
    /// # Errors
    ///
    /// Fails when a time argument is negative or not finite.
    pub fn to_config(&self) -> Result<InputConfig, ConfigError> {
        let sync_interval = self.sync.map(|s| seconds("sync interval", s)).transpose()?;
        Ok(InputConfig::new(&self.common.label, self.common.units)
            .with_port_name(&self.port_name)
            .with_timestep(self.common.timestep()?)
            .with_stop_time(self.common.stop_time)
            .with_delay(self.delay)
            .with_max_buffered((self.max_buffered > 0).then_some(self.max_buffered))
            .with_barrier(self.barrier)
            .with_sync_interval(sync_interval)
            .with_pacing(self.common.pacing()))
    }
}

/// Injects spikes from a live population into a coupled runtime.
#[derive(Debug, Clone, Parser)]
#[command(name = "spinnmusic-out", version, about)]
pub struct OutputArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Name of the published output port.
    #[arg(short = 'o', long = "portname", default_value = "out")]
    pub port_name: String,

    /// File the received events are written to; standard output if omitted.
    pub output: Option<PathBuf>,
}

impl OutputArgs {
    /// Builds the adapter configuration.
    ///
    /// # Errors
    ///
    /// Fails when the timestep is negative or not finite.
    pub fn to_config(&self) -> Result<OutputConfig, ConfigError> {
        Ok(OutputConfig::new(&self.common.label, self.common.units)
            .with_port_name(&self.port_name)
            .with_timestep(self.common.timestep()?)
            .with_stop_time(self.common.stop_time)
            .with_pacing(self.common.pacing()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_defaults() {
        let args = InputArgs::try_parse_from(["spinnmusic-in", "-l", "pop", "-r", "100"]).unwrap();
        assert_eq!(args.common.notify_port, DEFAULT_NOTIFY_PORT);
        assert_eq!(args.common.cpu, CpuConfig::Auto);
        assert!(args.events.is_none());

        let config = args.to_config().unwrap();
        assert_eq!(config.label, "pop");
        assert_eq!(config.units, 100);
        assert_eq!(config.port_name, "in");
        assert_eq!(config.timestep, Duration::from_millis(10));
        assert_eq!(config.max_buffered, None);
        assert!(!config.is_lock_step());
        assert_eq!(config.pacing, Pacing::default());
    }

    #[test]
    fn input_options() {
        let args = InputArgs::try_parse_from([
            "spinnmusic-in",
            "-l",
            "pop",
            "-r",
            "4",
            "-t",
            "0.001",
            "-d",
            "0.5",
            "-b",
            "3",
            "-a",
            "-s",
            "0.002",
            "--stoptime",
            "2",
            "--remote",
            "10.0.0.2:17895",
            "--cpu",
            "off",
            "--spin",
            "events.txt",
        ])
        .unwrap();
        assert_eq!(args.common.remote, Some(Endpoint::new_v4(10, 0, 0, 2, 17895)));
        assert_eq!(args.common.cpu, CpuConfig::Disabled);
        assert_eq!(args.events, Some(PathBuf::from("events.txt")));

        let config = args.to_config().unwrap();
        assert_eq!(config.timestep, Duration::from_millis(1));
        assert_eq!(config.stop_time, 2.0);
        assert_eq!(config.delay, 0.5);
        assert_eq!(config.max_buffered, Some(3));
        assert!(config.use_barrier);
        assert_eq!(config.sync_interval, Some(Duration::from_millis(2)));
        assert_eq!(config.pacing, Pacing::Spin);
    }

    #[test]
    fn output_defaults_and_link() {
        let args =
            OutputArgs::try_parse_from(["spinnmusic-out", "-l", "pop", "-r", "8", "-p", "20000"])
                .unwrap();
        let config = args.to_config().unwrap();
        assert_eq!(config.port_name, "out");
        assert_eq!(args.common.link_config().bind, Endpoint::any(20000));
        assert!(args.common.link_config().remote.is_none());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(InputArgs::try_parse_from(["spinnmusic-in", "-l", "pop"]).is_err());
        assert!(InputArgs::try_parse_from(["spinnmusic-in", "-l", "pop", "-r", "1", "--cpu", "x"]).is_err());

        let args =
            OutputArgs::try_parse_from(["spinnmusic-out", "-l", "pop", "-r", "1", "--timestep=-1"])
                .unwrap();
        assert!(matches!(
            args.to_config(),
            Err(ConfigError::InvalidSeconds { name: "timestep", .. })
        ));
    }
}
