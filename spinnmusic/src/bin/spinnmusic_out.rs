//! Injects spikes from a live population into a coupled runtime.
//!
//! Received spikes are written as `<time> <id>` lines, to a file or to
//! standard output. The run pauses and resumes with the remote device.
//!
//! # Usage
//!
//! ```sh
//! spinnmusic-out --label pop --range 100 --stoptime 10 spikes.txt
//! ```

use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use spinnmusic::OutputAdapter;
use spinnmusic::cli::OutputArgs;
use spinnmusic::coupling::text::TextCoupling;
use spinnmusic::link::udp::UdpLiveConnection;
use spinnmusic::placement::pin_to_core;

fn main() -> Result<()> {
    let args = OutputArgs::parse();
    spinnmusic::init_tracing();

    let config = args.to_config().context("invalid arguments")?;

    let coupling = match &args.output {
        Some(path) => {
            let file =
                File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
            TextCoupling::new().with_sink(BufWriter::new(file))
        }
        None => TextCoupling::new().with_sink(std::io::stdout()),
    };

    let adapter = OutputAdapter::new(coupling, config).context("failed to set up adapter")?;
    let link = UdpLiveConnection::spawn(args.common.link_config())
        .context("failed to open notification socket")?;
    link.register(args.common.label.as_str(), Arc::new(adapter.listener()));
    eprintln!(
        "spinnmusic-out: waiting for '{}' on {}",
        args.common.label,
        link.local_addr()
    );

    if let Some(core) = args.common.cpu.resolve()
        && !pin_to_core(core)
    {
        eprintln!("spinnmusic-out: could not pin main loop to core {core}");
    }

    let summary = adapter.main_loop().context("main loop failed")?;
    link.close();

    eprintln!(
        "spinnmusic-out: {} ({} ticks, {} spikes received, {} pauses)",
        summary.exit, summary.ticks, summary.events, summary.pauses
    );
    Ok(())
}
