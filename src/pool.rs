//! Process pool supervisor.
//!
//! Keeps a fixed number of worker slots alive, each running one agent in its
//! own process. A slot whose process exits is respawned into the same index
//! after `restart_delay`; the delay is tracked per slot so a crashing worker
//! never holds up its siblings. Shutdown terminates every worker, waits for
//! them under an overall deadline and kills whatever is left.

use crate::defaults;
use crate::error::{Result, SigncastError};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl WorkerExit {
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signal(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    pub fn unknown() -> Self {
        Self {
            code: None,
            signal: None,
        }
    }

    fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            Self {
                code: status.code(),
                signal: status.signal(),
            }
        }
        #[cfg(not(unix))]
        {
            Self {
                code: status.code(),
                signal: None,
            }
        }
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// Control surface of one running worker.
#[async_trait::async_trait]
pub trait WorkerHandle: Send {
    /// OS process id, if the worker still has one.
    fn id(&self) -> Option<u32>;

    /// Non-blocking exit check.
    fn try_wait(&mut self) -> Result<Option<WorkerExit>>;

    /// Asks the worker to stop gracefully.
    fn terminate(&mut self) -> Result<()>;

    /// Forces the worker down and reaps it.
    async fn kill(&mut self) -> Result<()>;

    async fn wait(&mut self) -> Result<WorkerExit>;
}

/// Starts workers for slots.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, slot: usize) -> Result<Box<dyn WorkerHandle>>;
}

/// Launches workers as child processes, passing the slot index through
/// [`defaults::SLOT_ENV`].
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Re-executes the running binary in agent mode.
    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe()?;
        Ok(Self::new(program).arg("agent"))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, slot: usize) -> Result<Box<dyn WorkerHandle>> {
        let child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env(defaults::SLOT_ENV, slot.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SigncastError::WorkerSpawn {
                slot,
                message: format!("{}: {}", self.program.display(), e),
            })?;
        Ok(Box::new(ProcessHandle { child }))
    }
}

/// A worker running as a child process.
pub struct ProcessHandle {
    child: tokio::process::Child,
}

#[async_trait::async_trait]
impl WorkerHandle for ProcessHandle {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_wait(&mut self) -> Result<Option<WorkerExit>> {
        Ok(self.child.try_wait()?.map(WorkerExit::from_status))
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> Result<()> {
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        let pid = libc::pid_t::try_from(pid).map_err(|_| SigncastError::WorkerControl {
            message: format!("pid {} out of range", pid),
        })?;
        // SAFETY: kill(2) has no memory-safety preconditions.
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            // ESRCH: already gone, the next try_wait reaps it.
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(SigncastError::WorkerControl {
                    message: format!("SIGTERM to pid {} failed: {}", pid, err),
                });
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> Result<()> {
        self.child.start_kill()?;
        Ok(())
    }

    async fn kill(&mut self) -> Result<()> {
        self.child.kill().await?;
        Ok(())
    }

    async fn wait(&mut self) -> Result<WorkerExit> {
        Ok(WorkerExit::from_status(self.child.wait().await?))
    }
}

/// Pool timing and size.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSettings {
    pub workers: usize,
    pub restart_delay: Duration,
    pub poll_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            workers: defaults::WORKERS,
            restart_delay: Duration::from_secs(defaults::RESTART_DELAY_SECS),
            poll_interval: Duration::from_millis(defaults::POLL_INTERVAL_MS),
            shutdown_timeout: Duration::from_secs(defaults::SHUTDOWN_TIMEOUT_SECS),
        }
    }
}

/// One supervised worker position.
pub struct SupervisedSlot {
    index: usize,
    handle: Option<Box<dyn WorkerHandle>>,
    last_exit: Option<WorkerExit>,
    restarts: u64,
    respawn_at: Option<Instant>,
}

impl SupervisedSlot {
    fn new(index: usize) -> Self {
        Self {
            index,
            handle: None,
            last_exit: None,
            restarts: 0,
            respawn_at: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().and_then(|h| h.id())
    }

    pub fn last_exit(&self) -> Option<WorkerExit> {
        self.last_exit
    }

    pub fn last_exit_code(&self) -> Option<i32> {
        self.last_exit.and_then(|exit| exit.code)
    }

    /// Successful respawns after the initial start.
    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    pub fn respawn_at(&self) -> Option<Instant> {
        self.respawn_at
    }
}

/// Keeps `workers` slots alive until told to stop.
pub struct PoolSupervisor {
    launcher: Arc<dyn WorkerLauncher>,
    settings: PoolSettings,
    slots: Vec<SupervisedSlot>,
}

impl PoolSupervisor {
    pub fn new(launcher: Arc<dyn WorkerLauncher>, settings: PoolSettings) -> Self {
        let slots = (0..settings.workers).map(SupervisedSlot::new).collect();
        Self {
            launcher,
            settings,
            slots,
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn slots(&self) -> &[SupervisedSlot] {
        &self.slots
    }

    pub fn running(&self) -> usize {
        self.slots.iter().filter(|s| s.is_running()).count()
    }

    /// Spawns every slot. Slots that fail to spawn are scheduled for a retry;
    /// if none could be spawned at all the pool gives up.
    pub fn start(&mut self) -> Result<usize> {
        let now = Instant::now();
        let mut last_error = None;
        for slot in &mut self.slots {
            match self.launcher.launch(slot.index) {
                Ok(handle) => {
                    log::info!(
                        "Started worker {} (pid {})",
                        slot.index,
                        describe_pid(handle.id())
                    );
                    slot.handle = Some(handle);
                    slot.respawn_at = None;
                }
                Err(e) => {
                    log::error!("Failed to start worker {}: {}", slot.index, e);
                    slot.respawn_at = Some(later(now, self.settings.restart_delay));
                    last_error = Some(e);
                }
            }
        }

        let started = self.running();
        if started == 0 {
            return Err(match last_error {
                Some(SigncastError::WorkerSpawn { slot, message }) => SigncastError::WorkerSpawn {
                    slot,
                    message: format!("no worker could be started: {}", message),
                },
                Some(other) => other,
                None => SigncastError::WorkerSpawn {
                    slot: 0,
                    message: "pool has no slots".to_string(),
                },
            });
        }
        log::info!("Pool started {}/{} workers", started, self.slots.len());
        Ok(started)
    }

    /// One liveness pass: records exits and respawns slots whose delay has
    /// elapsed.
    pub fn poll(&mut self) {
        let now = Instant::now();
        for slot in &mut self.slots {
            if let Some(handle) = slot.handle.as_mut() {
                let exit = match handle.try_wait() {
                    Ok(Some(exit)) => exit,
                    Ok(None) => continue,
                    Err(e) => {
                        log::warn!("Lost track of worker {}: {}", slot.index, e);
                        WorkerExit::unknown()
                    }
                };
                log::warn!(
                    "Worker {} exited ({}), respawning in {:?}",
                    slot.index,
                    exit,
                    self.settings.restart_delay
                );
                slot.handle = None;
                slot.last_exit = Some(exit);
                slot.respawn_at = Some(later(now, self.settings.restart_delay));
                continue;
            }

            match slot.respawn_at {
                Some(at) if at <= now => {}
                _ => continue,
            }
            match self.launcher.launch(slot.index) {
                Ok(handle) => {
                    slot.restarts += 1;
                    log::info!(
                        "Respawned worker {} (pid {}, restart {})",
                        slot.index,
                        describe_pid(handle.id()),
                        slot.restarts
                    );
                    slot.handle = Some(handle);
                    slot.respawn_at = None;
                }
                Err(e) => {
                    log::error!("Failed to respawn worker {}: {}", slot.index, e);
                    slot.respawn_at = Some(later(now, self.settings.restart_delay));
                }
            }
        }
    }

    /// Earliest instant the supervisor needs to look at its slots again.
    fn next_wake(&self, now: Instant) -> Instant {
        let tick = later(now, self.settings.poll_interval);
        self.slots
            .iter()
            .filter_map(|s| s.respawn_at)
            .fold(tick, |earliest, at| earliest.min(at))
    }

    /// Starts the pool and supervises it until `shutdown` resolves, then
    /// stops every worker.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.start()?;
        tokio::pin!(shutdown);
        loop {
            let wake = self.next_wake(Instant::now());
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = tokio::time::sleep_until(wake) => self.poll(),
            }
        }
        log::info!("Shutting down pool");
        self.shutdown().await;
        Ok(())
    }

    /// Terminates every running worker and waits for them under
    /// `shutdown_timeout`. Workers still alive at the deadline are killed.
    /// Returns how many had to be killed.
    pub async fn shutdown(&mut self) -> usize {
        for slot in &mut self.slots {
            slot.respawn_at = None;
            let Some(handle) = slot.handle.as_mut() else {
                continue;
            };
            if let Err(e) = handle.terminate() {
                log::warn!("Failed to terminate worker {}: {}", slot.index, e);
            }
        }

        let deadline = later(Instant::now(), self.settings.shutdown_timeout);
        let mut killed = 0;
        for slot in &mut self.slots {
            let Some(mut handle) = slot.handle.take() else {
                continue;
            };
            match tokio::time::timeout_at(deadline, handle.wait()).await {
                Ok(Ok(exit)) => {
                    log::debug!("Worker {} stopped ({})", slot.index, exit);
                    slot.last_exit = Some(exit);
                }
                Ok(Err(e)) => log::warn!("Failed to wait for worker {}: {}", slot.index, e),
                Err(_) => {
                    log::warn!(
                        "Worker {} did not stop within {:?}, killing it",
                        slot.index,
                        self.settings.shutdown_timeout
                    );
                    if let Err(e) = handle.kill().await {
                        log::error!("Failed to kill worker {}: {}", slot.index, e);
                    }
                    killed += 1;
                }
            }
        }
        killed
    }
}

/// `now + delay`, with the delay capped at `MAX_POOL_WAIT_SECS`.
fn later(now: Instant, delay: Duration) -> Instant {
    now + delay.min(Duration::from_secs(defaults::MAX_POOL_WAIT_SECS))
}

fn describe_pid(pid: Option<u32>) -> String {
    pid.map_or_else(|| "?".to_string(), |pid| pid.to_string())
}
