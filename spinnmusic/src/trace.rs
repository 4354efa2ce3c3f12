//! Log output of the adapters.
//!
//! The main loops log phase changes and the run summary at `info`; the UDP
//! receive thread logs each spike packet at `trace`. Without the `tracing`
//! feature every log call in the crate expands to nothing and
//! [`init_tracing`] is a no-op.

/// Sends log output of both binaries to standard error.
///
/// Lines carry the thread name, so the main loop and the notification
/// receive thread can be told apart. `RUST_LOG` overrides the default
/// filter of `spinnmusic=info`. Only the first call installs the subscriber.
#[cfg(feature = "tracing")]
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("spinnmusic=info"));

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(false)
                .with_line_number(false)
                .with_timer(fmt::time::uptime()),
        )
        .with(filter)
        .try_init();
}

#[cfg(not(feature = "tracing"))]
pub const fn init_tracing() {}

#[cfg(feature = "tracing")]
pub(crate) use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing"))]
macro_rules! discard {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
pub(crate) use {
    discard as debug, discard as error, discard as info, discard as trace, discard as warn,
};
