//! Forwards events from a coupled runtime to a live population.
//!
//! Events are replayed from a `<time> <id>` file and sent to the remote
//! device in real time once it notifies a start for the population label.
//!
//! # Usage
//!
//! ```sh
//! spinnmusic-in --label pop --range 100 --stoptime 10 events.txt
//! ```

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use spinnmusic::InputAdapter;
use spinnmusic::cli::InputArgs;
use spinnmusic::coupling::text::TextCoupling;
use spinnmusic::link::udp::UdpLiveConnection;
use spinnmusic::placement::pin_to_core;

fn main() -> Result<()> {
    let args = InputArgs::parse();
    spinnmusic::init_tracing();

    let config = args.to_config().context("invalid arguments")?;

    let mut coupling = TextCoupling::new();
    if let Some(path) = &args.events {
        let file =
            File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
        coupling = coupling
            .with_events(BufReader::new(file))
            .with_context(|| format!("cannot read {}", path.display()))?;
    }

    let adapter = InputAdapter::new(coupling, config).context("failed to set up adapter")?;
    let link = UdpLiveConnection::spawn(args.common.link_config())
        .context("failed to open notification socket")?;
    link.register(args.common.label.as_str(), Arc::new(adapter.listener()));
    eprintln!(
        "spinnmusic-in: waiting for '{}' on {}",
        args.common.label,
        link.local_addr()
    );

    if let Some(core) = args.common.cpu.resolve()
        && !pin_to_core(core)
    {
        eprintln!("spinnmusic-in: could not pin main loop to core {core}");
    }

    let summary = adapter.main_loop().context("main loop failed")?;
    link.close();

    eprintln!(
        "spinnmusic-in: {} ({} ticks, {} spikes sent)",
        summary.exit, summary.ticks, summary.events
    );
    Ok(())
}
