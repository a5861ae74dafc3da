//! The kopach supervisor: spawns the worker pool, relays bus messages to
//! it over IPC, and fails over between controllers.

use std::net::SocketAddr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, trace, warn};
use thiserror::Error;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use kopach_common::{
    config::CONTROLLER_TIMEOUT_SECS,
    message::BusEnvelope,
    network::Network,
    tokio::{select, signal, time::interval},
    wire::{Channel, ChannelConfig, WireError},
};

use crate::ipc::{IpcClient, IpcError};

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("worker subprocess has no stdio pipes")]
    MissingPipes,
    #[error(transparent)]
    Ipc(#[from] IpcError),
    #[error(transparent)]
    Wire(#[from] WireError),
}

#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    pub network: Network,
    pub miner_pass: String,
    /// Worker subprocesses to spawn.
    pub gen_threads: usize,
    /// Log level handed to each worker.
    pub log_level: String,
    pub channel: ChannelConfig,
}

/// First-sender lock-in: the supervisor attaches to the first controller
/// it hears a job from and ignores the others until that controller goes
/// silent for the timeout.
pub struct SenderLock {
    first: Option<SocketAddr>,
    last_job: Instant,
}

impl SenderLock {
    pub fn new() -> Self {
        Self {
            first: None,
            last_job: Instant::now(),
        }
    }

    pub fn current(&self) -> Option<SocketAddr> {
        self.first
    }

    /// Record a job sender. Returns whether its jobs should be forwarded.
    pub fn observe(&mut self, src: SocketAddr, now: Instant) -> bool {
        match self.first {
            None => {
                info!("locking on to controller {}", src);
                self.first = Some(src);
                self.last_job = now;
                true
            }
            Some(locked) if locked == src => {
                self.last_job = now;
                true
            }
            Some(_) => false,
        }
    }

    pub fn is_locked_to(&self, src: SocketAddr) -> bool {
        self.first == Some(src)
    }

    /// Clear the lock once the controller has been silent too long.
    /// Returns whether a failover happened.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> bool {
        if self.first.is_some() && now.duration_since(self.last_job) > timeout {
            self.first = None;
            true
        } else {
            false
        }
    }
}

impl Default for SenderLock {
    fn default() -> Self {
        Self::new()
    }
}

struct WorkerHandle {
    child: Child,
    client: IpcClient<ChildStdin, ChildStdout>,
}

pub struct Supervisor {
    config: SupervisorConfig,
    channel: Arc<Channel>,
    workers: Vec<WorkerHandle>,
    lock: SenderLock,
}

impl Supervisor {
    /// Open the bus, spawn the worker pool and authenticate each worker's
    /// dispatch channel.
    pub async fn start(config: SupervisorConfig) -> Result<Self, SupervisorError> {
        let channel = Channel::open(&config.miner_pass, config.channel)?;

        let binary = std::env::current_exe()?;
        let count = config.gen_threads.max(1);
        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            let mut child = Command::new(&binary)
                .arg("worker")
                .arg(config.network.to_string())
                .arg(&config.log_level)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .kill_on_drop(true)
                .spawn()?;
            let stdin = child.stdin.take().ok_or(SupervisorError::MissingPipes)?;
            let stdout = child.stdout.take().ok_or(SupervisorError::MissingPipes)?;

            let mut client = IpcClient::new(stdin, stdout);
            client.send_pass(&config.miner_pass).await?;
            debug!("worker {} spawned and authenticated", index);
            workers.push(WorkerHandle { child, client });
        }
        info!("supervising {} workers", workers.len());

        Ok(Self {
            config,
            channel,
            workers,
            lock: SenderLock::new(),
        })
    }

    /// Relay bus traffic to the pool until interrupted.
    pub async fn run(mut self) -> Result<(), SupervisorError> {
        info!("listening for work on the {} bus", self.config.network);
        let mut watchdog = interval(Duration::from_secs(1));
        loop {
            select! {
                received = self.channel.recv() => {
                    match received {
                        Ok((src, envelope)) => self.handle_envelope(src, envelope).await,
                        Err(e) => {
                            error!("bus receive failed: {}", e);
                            break;
                        }
                    }
                }
                _ = watchdog.tick() => self.check_failover().await,
                _ = signal::ctrl_c() => {
                    debug!("interrupt received");
                    break;
                }
            }
        }
        self.kill_all().await;
        Ok(())
    }

    async fn handle_envelope(&mut self, src: SocketAddr, envelope: BusEnvelope) {
        match envelope {
            BusEnvelope::Job(job) => {
                if !self.lock.observe(src, Instant::now()) {
                    trace!("ignoring job from non-locked controller {}", src);
                    return;
                }
                for (index, worker) in self.workers.iter_mut().enumerate() {
                    if let Err(e) = worker.client.new_job(&job).await {
                        warn!("worker {} did not take the job: {}", index, e);
                    }
                }
            }
            BusEnvelope::Pause(_) => {
                if self.lock.is_locked_to(src) {
                    debug!("controller {} sent pause", src);
                    self.pause_all().await;
                }
            }
            // Advertisements, solutions and hashrate reports are
            // controller-side traffic.
            _ => {}
        }
    }

    async fn check_failover(&mut self) {
        let timeout = Duration::from_secs(CONTROLLER_TIMEOUT_SECS);
        if self.lock.expire(Instant::now(), timeout) {
            warn!("controller went silent, releasing first-sender lock");
            self.pause_all().await;
        }
    }

    async fn pause_all(&mut self) {
        for (index, worker) in self.workers.iter_mut().enumerate() {
            if let Err(e) = worker.client.pause().await {
                warn!("worker {} did not acknowledge pause: {}", index, e);
            }
        }
    }

    /// Stop every worker over IPC, then kill the subprocess regardless.
    async fn kill_all(&mut self) {
        for (index, worker) in self.workers.iter_mut().enumerate() {
            if let Err(e) = worker.client.stop().await {
                debug!("worker {} did not acknowledge stop: {}", index, e);
            }
            if let Err(e) = worker.child.kill().await {
                debug!("worker {} already gone: {}", index, e);
            }
        }
        debug!("all workers stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("10.0.0.1:{}", port).parse().unwrap()
    }

    #[test]
    fn test_first_sender_wins() {
        let mut lock = SenderLock::new();
        let now = Instant::now();

        assert!(lock.observe(addr(1), now));
        // A second controller racing within milliseconds is ignored.
        assert!(!lock.observe(addr(2), now + Duration::from_millis(50)));
        assert!(lock.observe(addr(1), now + Duration::from_millis(100)));
        assert_eq!(lock.current(), Some(addr(1)));
    }

    #[test]
    fn test_lock_expires_after_silence() {
        let mut lock = SenderLock::new();
        let now = Instant::now();
        assert!(lock.observe(addr(1), now));

        let timeout = Duration::from_secs(CONTROLLER_TIMEOUT_SECS);
        assert!(!lock.expire(now + Duration::from_secs(2), timeout));
        assert_eq!(lock.current(), Some(addr(1)));

        assert!(lock.expire(now + Duration::from_secs(4), timeout));
        assert_eq!(lock.current(), None);

        // Next sender becomes the new lock.
        assert!(lock.observe(addr(2), now + Duration::from_secs(5)));
        assert_eq!(lock.current(), Some(addr(2)));
    }

    #[test]
    fn test_no_lock_no_expiry() {
        let mut lock = SenderLock::new();
        assert!(!lock.expire(
            Instant::now() + Duration::from_secs(60),
            Duration::from_secs(CONTROLLER_TIMEOUT_SECS)
        ));
    }

    #[test]
    fn test_pause_only_from_locked_sender() {
        let mut lock = SenderLock::new();
        let now = Instant::now();
        lock.observe(addr(1), now);
        assert!(lock.is_locked_to(addr(1)));
        assert!(!lock.is_locked_to(addr(2)));
    }
}
