//! Background progress reporter.
//!
//! Samples channel occupancy and per-consumer counters at a fixed interval
//! and writes them as flat lines: `timestamp,metric,value[,label]`.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::TransferProperties;
use crate::error::Result;
use crate::pipeline::TransferListener;

use super::channel::ChannelProbe;

/// Destination of progress lines.
#[derive(Debug, Clone, Default)]
pub enum MetricsSink {
    /// Process standard output.
    #[default]
    Stdout,
    /// File opened in append mode.
    File(PathBuf),
    /// Shared in-memory buffer.
    Buffer(SharedBuffer),
}

impl MetricsSink {
    /// File sink when `metrics_path` is set, standard output otherwise.
    pub fn from_properties(props: &TransferProperties) -> Self {
        match &props.metrics_path {
            Some(path) => MetricsSink::File(path.clone()),
            None => MetricsSink::Stdout,
        }
    }

    fn open(&self) -> Result<Box<dyn Write + Send>> {
        let out: Box<dyn Write + Send> = match self {
            MetricsSink::Stdout => Box::new(io::stdout()),
            MetricsSink::File(path) => {
                Box::new(OpenOptions::new().create(true).append(true).open(path)?)
            }
            MetricsSink::Buffer(buffer) => Box::new(buffer.clone()),
        };
        Ok(out)
    }
}

/// Cloneable byte buffer that progress lines can be written to.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// One sample's lines.
pub fn render_sample(probe: &ChannelProbe, listener: &TransferListener) -> Vec<String> {
    let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let mut lines = vec![
        format!("{ts},queue.size,{}", probe.len()),
        format!("{ts},queue.capacity,{}", probe.capacity()),
        format!("{ts},queue.ratio,{:.3}", probe.ratio()),
    ];

    let cursors = listener.cursors();
    if cursors.is_empty() {
        lines.push(format!(
            "{ts},insert.commits,{},{}",
            listener.commit_count(),
            listener.name()
        ));
        lines.push(format!(
            "{ts},insert.rows,{},{}",
            listener.row_count(),
            listener.name()
        ));
    } else {
        for cursor in cursors {
            lines.push(format!(
                "{ts},insert.commits,{},{}",
                cursor.commits(),
                cursor.label()
            ));
            lines.push(format!(
                "{ts},insert.rows,{},{}",
                cursor.rows(),
                cursor.label()
            ));
        }
    }
    lines
}

/// Handle on a running reporter.
pub struct ProgressReporter {
    handle: JoinHandle<()>,
    done: CancellationToken,
}

impl ProgressReporter {
    /// Start sampling. The first sample is taken immediately.
    pub fn spawn(
        probe: ChannelProbe,
        listener: Arc<TransferListener>,
        sink: &MetricsSink,
        interval: Duration,
    ) -> Result<Self> {
        let out = sink.open()?;
        let done = CancellationToken::new();
        let stop = done.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut out = Some(out);
            let mut samples = 0u64;

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let lines = render_sample(&probe, &listener);
                        out = write_sample(out, lines, listener.name()).await;
                        samples += 1;
                    }
                }
            }

            // Final state after the consumers finished.
            write_sample(out, render_sample(&probe, &listener), listener.name()).await;
            debug!("{}: reporter stopped after {} samples", listener.name(), samples + 1);
        });

        Ok(Self { handle, done })
    }

    /// Signal that the consumers are done and wait for the final sample.
    pub async fn finish(self) {
        self.done.cancel();
        if let Err(e) = self.handle.await {
            warn!("Progress reporter task failed: {}", e);
        }
    }
}

/// Write one sample on the blocking pool; file and stdout writes block.
/// Returns the writer, or `None` once it can no longer be used.
async fn write_sample(
    out: Option<Box<dyn Write + Send>>,
    lines: Vec<String>,
    name: &str,
) -> Option<Box<dyn Write + Send>> {
    let mut out = out?;
    let written = tokio::task::spawn_blocking(move || {
        let result = lines
            .iter()
            .try_for_each(|line| writeln!(out, "{}", line))
            .and_then(|_| out.flush());
        (out, result)
    })
    .await;

    match written {
        Ok((out, Ok(()))) => Some(out),
        Ok((out, Err(e))) => {
            warn!("{}: failed to write progress sample: {}", name, e);
            Some(out)
        }
        Err(e) => {
            warn!("{}: progress writer stopped: {}", name, e);
            None
        }
    }
}
