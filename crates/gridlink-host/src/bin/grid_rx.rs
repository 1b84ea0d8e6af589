//! Receive a stream from the fabric to a file.
//!
//! Usage: `grid-rx [config.toml] [output.dat]`
//!
//! With no configuration file, a loopback-addressed single-block receive
//! chain is assumed. Writing to `-` (or omitting the output) discards
//! samples and just reports rates. Ctrl-C stops the stream cleanly.

use std::fs::File;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::info;

use gridlink_host::config::GridConfig;
use gridlink_host::transport::UdpTransport;
use gridlink_host::{HostContext, RecvStatus, StreamMode, StreamSession};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => GridConfig::load(&path).with_context(|| format!("loading {path}"))?,
        None => GridConfig::loopback_default(),
    };
    let mut outfile = match args.next().as_deref() {
        Some("-") | None => None,
        Some(path) => Some(File::create(path).with_context(|| format!("creating {path}"))?),
    };

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed))
            .context("installing Ctrl-C handler")?;
    }

    let transport = UdpTransport::connect(&config.transport.bind, &config.transport.peer)
        .context("opening UDP link")?;
    let ctx = HostContext::new(Arc::new(transport), config.host.clone());

    let mut session = StreamSession::open(config.chain.clone(), &ctx)?;
    session.start(StreamMode::Continuous)?;
    info!("streaming, Ctrl-C to stop");

    let mut buf = vec![0u8; config.chain.bytes_per_packet()];
    let mut window_bytes = 0u64;
    let mut last_report = Instant::now();

    while !stop.load(Ordering::Relaxed) {
        let (n, status) = session.recv(&mut buf, Duration::from_secs(1))?;
        match status {
            RecvStatus::Ok => {}
            RecvStatus::Timeout => {
                info!("timeout while streaming");
                continue;
            }
            RecvStatus::SequenceGap { expected, actual } => {
                info!(expected, actual, "sequence gap");
            }
            RecvStatus::Overrun => {
                info!("overrun reported upstream");
            }
        }
        if let Some(f) = outfile.as_mut() {
            f.write_all(&buf[..n])?;
        }
        window_bytes += n as u64;
        if last_report.elapsed() >= Duration::from_secs(1) {
            let secs = last_report.elapsed().as_secs_f64();
            info!("{:.2} MByte/s", window_bytes as f64 / secs / 1e6);
            window_bytes = 0;
            last_report = Instant::now();
        }
    }

    let stats = session.stop()?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
