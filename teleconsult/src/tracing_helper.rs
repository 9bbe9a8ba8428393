use std::{num::NonZeroU8, panic, path::Path};

use anyhow::Result;
use time::format_description::well_known::{iso8601, Iso8601};
use tracing::{error, Level};
use tracing_subscriber::{
    fmt::{time::LocalTime, writer::MakeWriterExt},
    prelude::__tracing_subscriber_SubscriberExt,
    EnvFilter, Layer,
};

const MY_CONFIG: iso8601::EncodedConfig = iso8601::Config::DEFAULT
    .set_time_precision(iso8601::TimePrecision::Second {
        decimal_digits: NonZeroU8::new(3),
    })
    .encode();

fn make_filter() -> EnvFilter {
    let level = if cfg!(debug_assertions) {
        "trace"
    } else {
        "info"
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{}={},teleconsult_lib={}",
            env!("CARGO_CRATE_NAME"),
            level,
            level
        ))
    })
}

/// Logs to stderr, and warnings and worse also to `<log_dir>/<file_name>`
/// when a directory is given.
pub fn init_tracing(log_dir: Option<&Path>, file_name: &str, ansi: bool) -> Result<()> {
    let default_layer = || {
        const WITH_FILE_PATH: bool = cfg!(debug_assertions);
        tracing_subscriber::fmt::layer()
            .compact()
            .with_file(WITH_FILE_PATH)
            .with_line_number(WITH_FILE_PATH)
            .with_target(!WITH_FILE_PATH)
            .with_thread_ids(true)
            .with_timer(LocalTime::new(Iso8601::<MY_CONFIG>))
    };
    let console = default_layer()
        .with_ansi(ansi)
        .with_writer(std::io::stderr)
        .with_filter(make_filter());

    if let Some(log_dir) = log_dir {
        let writer = tracing_appender::rolling::never(log_dir, file_name);
        let file = default_layer()
            .with_ansi(false)
            .with_writer(writer.with_max_level(Level::WARN))
            .with_filter(make_filter());
        tracing::subscriber::set_global_default(
            tracing_subscriber::registry().with(console.and_then(file)),
        )?;
    } else {
        tracing::subscriber::set_global_default(tracing_subscriber::registry().with(console))?;
    }

    panic::set_hook(Box::new(|panic| error!("{}", panic)));
    Ok(())
}
