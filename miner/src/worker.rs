//! The mining worker: a paused/running state machine around a hot hash
//! loop on its own OS thread, plus the async plumbing that feeds it jobs
//! and drains its solutions onto the bus.
//!
//! The block header is owned by the mining thread and mutated in place;
//! everything that crosses a task boundary is an immutable snapshot.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex as StdMutex};
use std::thread;
use std::time::Duration;

use indexmap::IndexMap;
use log::{debug, error, trace, warn};

use kopach_common::{
    block::{Block, BlockHeader},
    config::ROUNDS_PER_ALGO,
    counter::Counter,
    crypto::Hash,
    fork::{hash_meets_target, Fork, TargetBits},
    message::{BusEnvelope, HashrateReport, Job, Solution},
    stats::{hashrate_from_samples, SampleRing},
    time::get_current_time_in_seconds,
    tokio::{
        select, spawn_task,
        sync::{mpsc, watch},
        time::interval,
    },
    wire::{Channel, ChannelConfig},
};

use crate::ipc::{read_request, write_ack, IpcError, IpcMethod};

/// Supervisor-side commands translated for the mining thread.
enum Control {
    Start(Box<MiningJob>),
    Pause,
    Stop,
}

/// Immutable snapshot of one job, handed to the mining thread.
struct MiningJob {
    height: i32,
    prev_block: Hash,
    bitses: TargetBits,
    merkles: IndexMap<i32, Hash>,
    sender_port: i32,
}

impl MiningJob {
    fn from_job(job: &Job) -> Option<Self> {
        if job.bitses.is_empty() {
            return None;
        }
        Some(Self {
            height: job.height,
            prev_block: job.prev_block.clone(),
            bitses: job.bitses.clone(),
            merkles: job.merkles.clone(),
            sender_port: job.controller_port() as i32,
        })
    }
}

pub struct Worker {
    control_tx: std_mpsc::Sender<Control>,
    channel_tx: mpsc::UnboundedSender<Arc<Channel>>,
    dispatch_ready: AtomicBool,
    last_merkle: StdMutex<Option<Hash>>,
    jobs_started: AtomicU64,
    hash_count: Arc<AtomicU64>,
    quit: watch::Sender<bool>,
}

impl Worker {
    /// Build the worker: mining thread, outbound dispatcher and sample
    /// ticker. Mining stays paused until the first job arrives.
    pub fn new(fork: Fork) -> Arc<Self> {
        debug!("creating new worker");
        let (control_tx, control_rx) = std_mpsc::channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let hash_count = Arc::new(AtomicU64::new(0));
        let (quit, _) = watch::channel(false);

        let thread_counts = Arc::clone(&hash_count);
        thread::spawn(move || mine_loop(fork, control_rx, outbound_tx, thread_counts));

        let quit_rx = quit.subscribe();
        spawn_task("worker-dispatch", async move {
            dispatch_loop(channel_rx, outbound_rx, quit_rx).await;
        });

        let sample_counts = Arc::clone(&hash_count);
        let quit_rx = quit.subscribe();
        spawn_task("worker-sampler", async move {
            sample_loop(sample_counts, quit_rx).await;
        });

        Arc::new(Self {
            control_tx,
            channel_tx,
            dispatch_ready: AtomicBool::new(false),
            last_merkle: StdMutex::new(None),
            jobs_started: AtomicU64::new(0),
            hash_count,
            quit,
        })
    }

    pub fn hash_count(&self) -> u64 {
        self.hash_count.load(Ordering::Relaxed)
    }

    pub fn jobs_started(&self) -> u64 {
        self.jobs_started.load(Ordering::Relaxed)
    }

    /// New job from the supervisor. Acknowledged but discarded until the
    /// dispatch channel exists; acknowledged without a restart when the
    /// merkle mapping matches the last job (a rebroadcast).
    pub fn new_job(&self, job: &Job) -> bool {
        if !self.dispatch_ready.load(Ordering::SeqCst) {
            return true;
        }

        let digest = job.merkle_digest();
        {
            let mut last = self.last_merkle.lock().unwrap();
            if last.as_ref() == Some(&digest) {
                trace!("not a new job");
                return true;
            }
            *last = Some(digest);
        }

        let Some(mining_job) = MiningJob::from_job(job) else {
            warn!("job carries no difficulty targets");
            return false;
        };

        self.jobs_started.fetch_add(1, Ordering::SeqCst);
        // Halt current work, then restart on the new template.
        self.control_tx.send(Control::Pause).is_ok()
            && self
                .control_tx
                .send(Control::Start(Box::new(mining_job)))
                .is_ok()
    }

    pub fn pause(&self) -> bool {
        debug!("pausing from IPC");
        self.control_tx.send(Control::Pause).is_ok()
    }

    /// Begin shutdown: the mining thread stops, the async tasks observe
    /// the closed quit channel.
    pub fn stop(&self) -> bool {
        debug!("stopping from IPC");
        let _ = self.control_tx.send(Control::Stop);
        let _ = self.quit.send(true);
        self.dispatch_ready.store(false, Ordering::SeqCst);
        true
    }

    /// Receive the bus passphrase and open the dispatch channel for
    /// solutions and hashrate reports.
    pub fn send_pass(&self, passphrase: &str) -> bool {
        self.send_pass_with(passphrase, ChannelConfig::sender_only())
    }

    pub fn send_pass_with(&self, passphrase: &str, config: ChannelConfig) -> bool {
        debug!("receiving dispatch passphrase");
        match Channel::open(passphrase, config) {
            Ok(channel) => {
                if self.channel_tx.send(channel).is_err() {
                    return false;
                }
                self.dispatch_ready.store(true, Ordering::SeqCst);
                true
            }
            Err(e) => {
                error!("could not open dispatch channel: {}", e);
                false
            }
        }
    }
}

/// Serve the supervisor's IPC requests until the stream closes or a stop
/// arrives.
pub async fn serve_ipc<R, W>(worker: Arc<Worker>, mut reader: R, mut writer: W) -> Result<(), IpcError>
where
    R: kopach_common::tokio::io::AsyncRead + Unpin,
    W: kopach_common::tokio::io::AsyncWrite + Unpin,
{
    debug!("starting up worker IPC");
    loop {
        let Some(request) = read_request(&mut reader).await? else {
            debug!("IPC stream closed");
            worker.stop();
            return Ok(());
        };

        let ack = match request.method {
            IpcMethod::NewJob => match request.job() {
                Ok(job) => worker.new_job(&job),
                Err(e) => {
                    warn!("undecodable job from supervisor: {}", e);
                    false
                }
            },
            IpcMethod::Pause => worker.pause(),
            IpcMethod::Stop => worker.stop(),
            IpcMethod::SendPass => match request.passphrase() {
                Ok(passphrase) => worker.send_pass(&passphrase),
                Err(e) => {
                    warn!("undecodable passphrase from supervisor: {}", e);
                    false
                }
            },
        };
        write_ack(&mut writer, ack).await?;

        if request.method == IpcMethod::Stop {
            debug!("stopping worker IPC");
            return Ok(());
        }
    }
}

async fn dispatch_loop(
    mut channel_rx: mpsc::UnboundedReceiver<Arc<Channel>>,
    mut outbound_rx: mpsc::UnboundedReceiver<BusEnvelope>,
    mut quit: watch::Receiver<bool>,
) {
    // The channel arrives with SendPass; nothing is dispatched before it.
    let channel = select! {
        channel = channel_rx.recv() => match channel {
            Some(channel) => channel,
            None => return,
        },
        _ = quit.changed() => return,
    };

    loop {
        select! {
            envelope = outbound_rx.recv() => match envelope {
                Some(envelope) => {
                    if let Err(e) = channel.send(&envelope).await {
                        error!("dispatch failed: {}", e);
                    }
                }
                None => break,
            },
            _ = quit.changed() => break,
        }
    }
}

/// One-second sample ticker, running in pause and run states alike.
async fn sample_loop(hash_count: Arc<AtomicU64>, mut quit: watch::Receiver<bool>) {
    let mut ring = SampleRing::default();
    let mut ticker = interval(Duration::from_secs(1));
    loop {
        select! {
            _ = ticker.tick() => {
                ring.push(hash_count.load(Ordering::Relaxed));
                trace!("average hashrate {:.2}", hashrate_from_samples(&ring));
            }
            _ = quit.changed() => break,
        }
    }
}

enum RunOutcome {
    Interrupted(Control),
    SolutionFound,
    Stalled,
    Disconnected,
}

/// The state machine: block on controls while paused, hash while running.
fn mine_loop(
    fork: Fork,
    control_rx: std_mpsc::Receiver<Control>,
    outbound: mpsc::UnboundedSender<BusEnvelope>,
    hash_count: Arc<AtomicU64>,
) {
    debug!("main work loop starting");
    let mut counter = Counter::default();
    let mut pending: Option<Box<MiningJob>> = None;
    loop {
        // Pause state: wait for a start.
        let job = match pending.take() {
            Some(job) => job,
            None => match control_rx.recv() {
                Ok(Control::Start(job)) => job,
                Ok(Control::Pause) => continue,
                Ok(Control::Stop) | Err(_) => break,
            },
        };

        // Run state.
        match run_job(&fork, &job, &mut counter, &control_rx, &outbound, &hash_count) {
            RunOutcome::Interrupted(Control::Start(next)) => pending = Some(next),
            RunOutcome::Interrupted(Control::Pause) => trace!("worker pausing"),
            RunOutcome::Interrupted(Control::Stop) => break,
            RunOutcome::SolutionFound => trace!("worker pausing after solution"),
            RunOutcome::Stalled => warn!("job had no usable algorithms"),
            RunOutcome::Disconnected => break,
        }
    }
    trace!("worker finished");
}

fn run_job(
    fork: &Fork,
    job: &MiningJob,
    counter: &mut Counter,
    control_rx: &std_mpsc::Receiver<Control>,
    outbound: &mpsc::UnboundedSender<BusEnvelope>,
    hash_count: &AtomicU64,
) -> RunOutcome {
    counter.set_algos(job.bitses.keys().copied().collect());
    let height = job.height as u64;

    let mut header = BlockHeader::new(
        0,
        job.prev_block.clone(),
        Hash::zero(),
        get_current_time_in_seconds() as u32,
        0,
    );
    header.nonce = rand::random();
    trace!("worker running");

    loop {
        match control_rx.try_recv() {
            Ok(control) => return RunOutcome::Interrupted(control),
            Err(std_mpsc::TryRecvError::Empty) => {}
            Err(std_mpsc::TryRecvError::Disconnected) => return RunOutcome::Disconnected,
        }

        // Report a completed batch of rounds before starting the next.
        if counter.at_round_boundary() {
            hash_count.fetch_add(ROUNDS_PER_ALGO as u64, Ordering::Relaxed);
            let report = HashrateReport::new(
                ROUNDS_PER_ALGO,
                counter.position().wrapping_add(1),
                job.height,
            );
            if outbound.send(BusEnvelope::Hashrate(report)).is_err() {
                return RunOutcome::Disconnected;
            }
        }

        let Some(version) = counter.next_version() else {
            return RunOutcome::Stalled;
        };
        header.version = version;
        // A version missing from the maps cannot happen on a decoded job;
        // skip the round rather than trust it.
        let Some(bits) = job.bitses.get(&version).copied() else {
            continue;
        };
        header.bits = bits;
        let Some(root) = job.merkles.get(&version) else {
            continue;
        };
        header.merkle_root = root.clone();

        let Ok(pow) = header.pow_hash(fork, height) else {
            continue;
        };
        if hash_meets_target(&pow, header.bits) {
            let solution = Solution::new(job.sender_port, Block::new(header.clone()));
            if outbound.send(BusEnvelope::Solution(solution)).is_err() {
                return RunOutcome::Disconnected;
            }
            trace!("sent solution");
            return RunOutcome::SolutionFound;
        }

        header.nonce = header.nonce.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kopach_common::crypto::hash;
    use kopach_common::message::NodeAnnouncement;
    use kopach_common::network::Network;
    use kopach_common::tokio::time::timeout;

    fn loopback_receiver(passphrase: &str) -> (Arc<Channel>, ChannelConfig) {
        let receiver_config = ChannelConfig {
            bind: "127.0.0.1:0".parse().unwrap(),
            group: None,
            target: "127.0.0.1:9".parse().unwrap(),
        };
        let receiver = Channel::open(passphrase, receiver_config).unwrap();
        let sender_config = ChannelConfig {
            bind: "127.0.0.1:0".parse().unwrap(),
            group: None,
            target: receiver.local_addr().unwrap(),
        };
        (receiver, sender_config)
    }

    fn easy_job(bits: u32) -> Job {
        let mut bitses = TargetBits::new();
        bitses.insert(2, bits);
        bitses.insert(514, bits);
        let mut merkles = IndexMap::new();
        merkles.insert(2, hash(b"root-2"));
        merkles.insert(514, hash(b"root-514"));
        Job {
            announcement: NodeAnnouncement {
                ips: vec!["127.0.0.1".parse().unwrap()],
                p2p_port: 11047,
                rpc_port: 11048,
                controller_port: 11050,
            },
            height: 10,
            prev_block: hash(b"tip"),
            bitses,
            merkles,
        }
    }

    #[tokio::test]
    async fn test_job_before_send_pass_discarded() {
        let worker = Worker::new(Fork::new(Network::Mainnet));
        assert!(worker.new_job(&easy_job(0x207fffff)));
        assert_eq!(worker.jobs_started(), 0);
        worker.stop();
    }

    #[tokio::test]
    async fn test_duplicate_job_does_not_restart() {
        let worker = Worker::new(Fork::new(Network::Mainnet));
        let (_receiver, sender_config) = loopback_receiver("pass");
        assert!(worker.send_pass_with("pass", sender_config));

        // An impossible target keeps the loop busy without a solution.
        let job = easy_job(0x01000001);
        assert!(worker.new_job(&job));
        assert!(worker.new_job(&job));
        assert_eq!(worker.jobs_started(), 1);

        let mut changed = job.clone();
        changed.merkles.insert(2, hash(b"other"));
        changed.bitses.insert(2, 0x01000001);
        assert!(worker.new_job(&changed));
        assert_eq!(worker.jobs_started(), 2);
        worker.stop();
    }

    #[tokio::test]
    async fn test_mines_and_emits_solution() {
        let worker = Worker::new(Fork::new(Network::Mainnet));
        let (receiver, sender_config) = loopback_receiver("pass");
        assert!(worker.send_pass_with("pass", sender_config));

        let job = easy_job(0x207fffff);
        assert!(worker.new_job(&job));

        let solution = timeout(Duration::from_secs(10), async {
            loop {
                let (_, envelope) = receiver.recv().await.unwrap();
                if let BusEnvelope::Solution(solution) = envelope {
                    return solution;
                }
            }
        })
        .await
        .expect("no solution within timeout");

        assert_eq!(solution.sender_port, 11050);
        assert_eq!(solution.block.header.prev_block, job.prev_block);
        assert!(solution.block.transactions.is_empty());

        let version = solution.block.header.version;
        assert!(job.bitses.contains_key(&version));
        assert_eq!(
            solution.block.header.merkle_root,
            job.merkles[&version]
        );
        let fork = Fork::new(Network::Mainnet);
        let pow = solution
            .block
            .header
            .pow_hash(&fork, job.height as u64)
            .unwrap();
        assert!(hash_meets_target(&pow, solution.block.header.bits));
        worker.stop();
    }

    #[tokio::test]
    async fn test_emits_hashrate_reports_while_running() {
        let worker = Worker::new(Fork::new(Network::Mainnet));
        let (receiver, sender_config) = loopback_receiver("pass");
        assert!(worker.send_pass_with("pass", sender_config));

        // No solution possible, so only hashrate traffic comes out.
        assert!(worker.new_job(&easy_job(0x01000001)));

        let report = timeout(Duration::from_secs(10), async {
            loop {
                let (_, envelope) = receiver.recv().await.unwrap();
                if let BusEnvelope::Hashrate(report) = envelope {
                    return report;
                }
            }
        })
        .await
        .expect("no hashrate report within timeout");

        assert_eq!(report.count, ROUNDS_PER_ALGO);
        assert_eq!(report.height, 10);
        assert!(worker.pause());
        assert!(worker.hash_count() >= ROUNDS_PER_ALGO as u64);
        worker.stop();
    }

    #[tokio::test]
    async fn test_serve_ipc_stop() {
        use kopach_common::tokio::io::{duplex, split, AsyncReadExt, AsyncWriteExt};

        let worker = Worker::new(Fork::new(Network::Mainnet));
        let (supervisor_side, worker_side) = duplex(64 * 1024);
        let (worker_read, worker_write) = split(worker_side);

        let serve = spawn_task("test-ipc", async move {
            serve_ipc(worker, worker_read, worker_write).await
        });

        let (mut sup_read, mut sup_write) = split(supervisor_side);
        // Stop request: method 3, empty payload.
        sup_write.write_all(&[3, 0, 0, 0, 0]).await.unwrap();
        let mut reply = [0u8; 1];
        sup_read.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[0], 1);

        serve.await.unwrap().unwrap();
    }
}
