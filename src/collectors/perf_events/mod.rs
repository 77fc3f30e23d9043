// Streaming hardware-counter collector backed by a long-running `perf stat` subprocess.
//
// States: stopped -> starting -> streaming -> unavailable, back to stopped on close or
// on a CPU-subset/interval change. sample() never waits on perf output; it returns the
// last finalized interval.

pub mod parse;

use async_trait::async_trait;
use serde_json::{Value, json};
use std::fmt;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::Collector;
use crate::config::PerfConfig;
use crate::error::{CollectionError, PerfError};
use crate::models::{Fields, PerfIntervalSample};
use crate::settings::SettingsHandle;
use parse::{IntervalAssembler, build_perf_args, normalize_cpu_list};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerfState {
    Stopped,
    Starting,
    Streaming,
    Unavailable,
}

impl PerfState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PerfState::Stopped => "stopped",
            PerfState::Starting => "starting",
            PerfState::Streaming => "streaming",
            PerfState::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for PerfState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// (normalized cpu subset, interval ms). Any change restarts the subprocess.
type Signature = (Option<String>, u64);

/// Written by the reader task, read by `sample()`.
#[derive(Debug)]
struct Shared {
    latest: Option<PerfIntervalSample>,
    state: PerfState,
    last_error: Option<String>,
    intervals_finalized: u64,
    /// Bumped per launch and per stop so a stale reader cannot overwrite newer state.
    generation: u64,
}

impl Default for Shared {
    fn default() -> Self {
        Self {
            latest: None,
            state: PerfState::Stopped,
            last_error: None,
            intervals_finalized: 0,
            generation: 0,
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Running {
    child: Child,
    reader: JoinHandle<()>,
    signature: Signature,
}

pub struct PerfEventsCollector {
    settings: SettingsHandle,
    binary: String,
    stop_timeout: Duration,
    shared: Arc<Mutex<Shared>>,
    /// Also serves as the start-lock: held across stop/spawn so concurrent samples
    /// never launch two subprocesses.
    process: tokio::sync::Mutex<Option<Running>>,
}

impl PerfEventsCollector {
    pub fn new(config: &PerfConfig, settings: SettingsHandle) -> Self {
        Self {
            settings,
            binary: config.binary.clone(),
            stop_timeout: Duration::from_millis(config.stop_timeout_ms),
            shared: Arc::new(Mutex::new(Shared::default())),
            process: tokio::sync::Mutex::new(None),
        }
    }

    pub fn state(&self) -> PerfState {
        lock(&self.shared).state
    }

    pub fn intervals_finalized(&self) -> u64 {
        lock(&self.shared).intervals_finalized
    }

    pub fn latest_sample(&self) -> Option<PerfIntervalSample> {
        lock(&self.shared).latest.clone()
    }

    fn set_state(&self, state: PerfState, error: Option<String>) {
        let mut s = lock(&self.shared);
        s.state = state;
        s.last_error = error;
    }

    fn spawn(&self, signature: &Signature) -> Result<Running, PerfError> {
        self.set_state(PerfState::Starting, None);
        let (cpu_list, interval_ms) = signature;
        let args = build_perf_args(*interval_ms, cpu_list.as_deref());
        debug!(binary = %self.binary, ?args, "launching perf");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    PerfError::BinaryMissing(self.binary.clone())
                } else {
                    PerfError::SpawnFailed(e)
                }
            })?;

        if let Ok(Some(status)) = child.try_wait() {
            return Err(PerfError::ExitedImmediately(status.to_string()));
        }
        let stderr = child.stderr.take().ok_or(PerfError::NoOutputPipe)?;

        let generation = {
            let mut s = lock(&self.shared);
            s.generation += 1;
            s.latest = None;
            s.last_error = None;
            s.state = PerfState::Streaming;
            s.generation
        };
        let reader = tokio::spawn(read_stream(
            BufReader::new(stderr),
            self.shared.clone(),
            generation,
        ));
        info!(pid = ?child.id(), cpus = ?cpu_list, interval_ms, "perf stat streaming");

        Ok(Running {
            child,
            reader,
            signature: signature.clone(),
        })
    }

    /// SIGTERM, wait up to `stop_timeout`, then SIGKILL. Leaves the state to the caller.
    async fn terminate(&self, mut running: Running) {
        lock(&self.shared).generation += 1;

        #[cfg(unix)]
        if let Some(pid) = running.child.id() {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        let _ = running.child.start_kill();

        if tokio::time::timeout(self.stop_timeout, running.child.wait())
            .await
            .is_err()
        {
            warn!(
                timeout_ms = self.stop_timeout.as_millis() as u64,
                "perf did not exit after SIGTERM, killing"
            );
            let _ = running.child.kill().await;
        }
        running.reader.abort();
    }

    fn payload(&self, signature: &Signature) -> Fields {
        let s = lock(&self.shared);
        match (&s.latest, s.state) {
            (Some(sample), PerfState::Streaming) => {
                sample.to_fields(signature.1, signature.0.as_deref())
            }
            _ => {
                let mut out = Fields::new();
                out.insert("available".into(), Value::Bool(false));
                out.insert("state".into(), json!(s.state.as_str()));
                let error = s.last_error.clone().or_else(|| {
                    (s.state == PerfState::Streaming).then(|| "waiting for first interval".into())
                });
                out.insert("error".into(), json!(error));
                out
            }
        }
    }
}

#[async_trait]
impl Collector for PerfEventsCollector {
    fn name(&self) -> &str {
        "perf_events"
    }

    #[instrument(skip(self), fields(collector = "perf_events", operation = "sample"))]
    async fn sample(&self) -> Result<Fields, CollectionError> {
        let settings = self.settings.current();
        let mut process = self.process.lock().await;

        if !settings.enabled {
            if let Some(running) = process.take() {
                info!("perf collection disabled, stopping subprocess");
                self.terminate(running).await;
            }
            self.set_state(PerfState::Stopped, None);
            let mut out = Fields::new();
            out.insert("available".into(), Value::Bool(false));
            out.insert("disabled".into(), Value::Bool(true));
            return Ok(out);
        }

        let signature: Signature = (
            normalize_cpu_list(settings.cpu_list.as_deref()),
            settings.interval_ms,
        );

        if let Some(running) = process.take_if(|r| r.signature != signature) {
            info!(
                old = ?running.signature,
                new = ?signature,
                "perf configuration changed, restarting"
            );
            self.terminate(running).await;
            self.set_state(PerfState::Stopped, None);
        }

        let alive = match process.as_mut() {
            Some(r) => !r.reader.is_finished() && matches!(r.child.try_wait(), Ok(None)),
            None => false,
        };
        if !alive {
            if let Some(dead) = process.take() {
                self.terminate(dead).await;
            }
            match self.spawn(&signature) {
                Ok(running) => *process = Some(running),
                Err(e) => {
                    let was = self.state();
                    if was != PerfState::Unavailable {
                        warn!(error = %e, "perf unavailable");
                    } else {
                        debug!(error = %e, "perf still unavailable");
                    }
                    self.set_state(PerfState::Unavailable, Some(e.to_string()));
                }
            }
        }
        drop(process);

        Ok(self.payload(&signature))
    }

    async fn close(&self) {
        let mut process = self.process.lock().await;
        if let Some(running) = process.take() {
            self.terminate(running).await;
        }
        self.set_state(PerfState::Stopped, None);
    }
}

/// Consume perf output until EOF, publishing each finalized interval.
async fn read_stream<R>(reader: R, shared: Arc<Mutex<Shared>>, generation: u64)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut assembler = IntervalAssembler::new();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(sample) = assembler.push(&line) {
                    publish(&shared, generation, sample);
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "perf output read failed");
                break;
            }
        }
    }
    if let Some(sample) = assembler.finish() {
        publish(&shared, generation, sample);
    }

    let mut s = lock(&shared);
    if s.generation == generation {
        s.state = PerfState::Unavailable;
        s.last_error = Some(match assembler.last_unparsed() {
            Some(msg) => format!("perf exited: {msg}"),
            None => "perf exited".to_string(),
        });
        warn!(error = ?s.last_error, "perf stream ended");
    }
}

fn publish(shared: &Mutex<Shared>, generation: u64, sample: PerfIntervalSample) {
    let mut s = lock(shared);
    if s.generation != generation {
        return;
    }
    s.intervals_finalized += 1;
    s.latest = Some(sample);
}
