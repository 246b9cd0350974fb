//! Ordered Diagnostic Sink
//!
//! Diagnostics are written by relay threads that swallow every write failure, so
//! logging during teardown can neither crash the supervisor nor change its exit
//! code when stdout/stderr are already gone (a closed pipe, a vanished terminal).
//!
//! If both channels lead to the same file a single relay serves them, keeping
//! their relative order. Distinct destinations get one relay each.
//!
//! The sink doubles as the `log` backend: see [`install_logger`].

use std::io::{self, Write};
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::Duration;

use log::{Level, LevelFilter, Log, Metadata, Record};

/// Longest time [`DiagnosticSink::flush`] waits for a relay
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Prefix of every diagnostic line
pub const LOG_PREFIX: &str = "[with-mount]";

/// Output channel of a diagnostic line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Out,
    Err,
}

impl Channel {
    fn index(self) -> usize {
        match self {
            Channel::Out => 0,
            Channel::Err => 1,
        }
    }
}

enum Message {
    Line(Channel, String),
    Flush(mpsc::SyncSender<()>),
}

type Target = Box<dyn Write + Send>;

/// Handle to the relay threads; cheap to clone
#[derive(Clone)]
pub struct DiagnosticSink {
    // One sender per relay; `route[channel]` picks the relay for a channel
    relays: Vec<Sender<Message>>,
    route: [usize; 2],
}

impl DiagnosticSink {
    /// Relay to this process's stdout and stderr
    pub fn for_std_streams() -> Self {
        Self::with_writers(
            Box::new(io::stdout()),
            Box::new(io::stderr()),
            std_streams_shared(),
        )
    }

    /// Relay to arbitrary writers. With `shared` set both channels go through one
    /// relay, which preserves their relative order.
    pub fn with_writers(out: Target, err: Target, shared: bool) -> Self {
        if shared {
            let tx = spawn_relay([Some(out), Some(err)]);
            Self {
                relays: vec![tx],
                route: [0, 0],
            }
        } else {
            let out_tx = spawn_relay([Some(out), None]);
            let err_tx = spawn_relay([None, Some(err)]);
            Self {
                relays: vec![out_tx, err_tx],
                route: [0, 1],
            }
        }
    }

    /// Number of relay threads behind this sink
    pub fn relay_count(&self) -> usize {
        self.relays.len()
    }

    /// Queue one line. Never fails; a line for a dead relay is dropped.
    pub fn line(&self, channel: Channel, text: impl Into<String>) {
        let tx = &self.relays[self.route[channel.index()]];
        let _ = tx.send(Message::Line(channel, text.into()));
    }

    /// Block until every line queued before this call was written or dropped,
    /// giving up on a relay stuck for longer than [`FLUSH_TIMEOUT`].
    pub fn flush(&self) {
        for tx in &self.relays {
            let (ack_tx, ack_rx) = mpsc::sync_channel(1);
            if tx.send(Message::Flush(ack_tx)).is_ok() {
                let _ = ack_rx.recv_timeout(FLUSH_TIMEOUT);
            }
        }
    }
}

fn spawn_relay(mut targets: [Option<Target>; 2]) -> Sender<Message> {
    let (tx, rx) = mpsc::channel::<Message>();
    let spawned = thread::Builder::new()
        .name("diagnostic-relay".to_string())
        .spawn(move || {
            for message in rx {
                match message {
                    Message::Line(channel, text) => {
                        if let Some(target) = targets[channel.index()].as_mut() {
                            let _ = target.write_all(text.as_bytes());
                            let _ = target.write_all(b"\n");
                            let _ = target.flush();
                        }
                    }
                    Message::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
        });
    // Without a relay thread the receiver is dropped and every send is a no-op
    drop(spawned);
    tx
}

/// Whether stdout and stderr refer to the same open file
#[cfg(unix)]
pub fn std_streams_shared() -> bool {
    match (fd_identity(libc::STDOUT_FILENO), fd_identity(libc::STDERR_FILENO)) {
        (Some(out), Some(err)) => out == err,
        // Unknown destinations are treated as shared to keep ordering
        _ => true,
    }
}

#[cfg(not(unix))]
pub fn std_streams_shared() -> bool {
    true
}

#[cfg(unix)]
fn fd_identity(fd: libc::c_int) -> Option<(u64, u64)> {
    // SAFETY: fstat only writes into the provided struct
    unsafe {
        let mut st: libc::stat = std::mem::zeroed();
        if libc::fstat(fd, &mut st) == 0 {
            Some((st.st_dev as u64, st.st_ino as u64))
        } else {
            None
        }
    }
}

/// `log` backend writing through a [`DiagnosticSink`]
pub struct SinkLogger {
    sink: DiagnosticSink,
    verbose: bool,
}

impl SinkLogger {
    pub fn new(sink: DiagnosticSink, verbose: bool) -> Self {
        Self { sink, verbose }
    }
}

impl Log for SinkLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= level_filter(self.verbose)
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let channel = match record.level() {
            Level::Error | Level::Warn => Channel::Err,
            _ => Channel::Out,
        };
        self.sink.line(
            channel,
            format_line(record.level(), &record.args().to_string(), self.verbose),
        );
    }

    fn flush(&self) {
        self.sink.flush();
    }
}

fn level_filter(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Format one diagnostic line
pub fn format_line(level: Level, message: &str, verbose: bool) -> String {
    if verbose {
        return format!("{} {} {:<5} {}", LOG_PREFIX, get_timestamp(), level, message);
    }
    match level {
        Level::Error => format!("{} Error: {}", LOG_PREFIX, message),
        Level::Warn => format!("{} Warning: {}", LOG_PREFIX, message),
        _ => format!("{} {}", LOG_PREFIX, message),
    }
}

/// Get current timestamp in log format
pub fn get_timestamp() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%d %H:%M:%S%.3f")
        .to_string()
}

/// Install a [`SinkLogger`] as the global logger.
///
/// Returns false when a logger was already installed; the sink is still usable.
pub fn install_logger(sink: DiagnosticSink, verbose: bool) -> bool {
    let installed = log::set_boxed_logger(Box::new(SinkLogger::new(sink, verbose))).is_ok();
    if installed {
        log::set_max_level(level_filter(verbose));
    }
    installed
}
