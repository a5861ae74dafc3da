//! The mining controller: template engine, job broadcasting and solution
//! ingress for one full node.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use log::{debug, error, info, trace, warn};
use rand::Rng;

use kopach_common::{
    block::{calculate_merkle_root, Block, Transaction},
    config::{CONTROLLER_TIMEOUT_SECS, TEMPLATE_REFRESH_SECS},
    crypto::Hash,
    fork::{calc_block_subsidy, compact_to_big, Fork},
    message::{BusEnvelope, HashrateReport, Job, NodeAnnouncement, Solution},
    network::Network,
    stats::{hashrate_from_samples, SampleRing},
    time::TimestampMillis,
    tokio::{
        select, spawn_task,
        sync::{mpsc, watch, Mutex},
        time::interval,
    },
    wire::{Channel, ChannelConfig},
};

use crate::{
    chain::{
        BlockOutcome, ChainEngine, ChainNotification, PeerConnector, ProcessError, Snapshot,
        TEMPLATE_SEED_ALGO,
    },
    error::ControllerError,
};

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub network: Network,
    /// Payment addresses; one is chosen at random per template.
    pub mining_addrs: Vec<String>,
    pub p2p_listeners: Vec<SocketAddr>,
    pub rpc_listeners: Vec<SocketAddr>,
    /// The port workers echo back in solutions; distinguishes this
    /// controller from peers on the same bus.
    pub controller_port: u16,
    pub miner_pass: String,
    pub channel: ChannelConfig,
}

impl ControllerConfig {
    fn validate(&self) -> Result<(), ControllerError> {
        if self.mining_addrs.is_empty() {
            return Err(ControllerError::NoMiningAddresses);
        }
        if self.rpc_listeners.is_empty() {
            return Err(ControllerError::NoRpcListeners);
        }
        if self.p2p_listeners.is_empty() {
            return Err(ControllerError::NoP2pListeners);
        }
        Ok(())
    }

    fn announcement(&self) -> NodeAnnouncement {
        NodeAnnouncement {
            ips: self.p2p_listeners.iter().map(SocketAddr::ip).collect(),
            p2p_port: self.p2p_listeners.first().map(|l| l.port()).unwrap_or(0),
            rpc_port: self.rpc_listeners.first().map(|l| l.port()).unwrap_or(0),
            controller_port: self.controller_port,
        }
    }
}

/// Everything rebuilt together when a new job is produced. One lock, so a
/// job, its coinbases and its transaction list can never be observed
/// half-swapped.
struct TemplateState {
    coinbases: IndexMap<i32, Transaction>,
    transactions: Vec<Transaction>,
    job_shards: Vec<Vec<u8>>,
    prev_hash: Hash,
    last_generated: Instant,
    last_tx_update: TimestampMillis,
}

enum RefreshReason {
    /// The best block moved; the job is mining on a dead parent.
    NewBest,
    /// Mempool changed and the template is old enough to rebuild.
    StaleMempool,
    /// Nothing changed: resend the cached shards for late joiners, the
    /// bus is lossy UDP.
    Resend,
}

pub struct Controller<C: ChainEngine> {
    chain: Arc<C>,
    peers: Option<Arc<dyn PeerConnector>>,
    config: ControllerConfig,
    fork: Fork,
    channel: Arc<Channel>,
    active: AtomicBool,
    ready: AtomicBool,
    height: AtomicU64,
    state: Mutex<TemplateState>,
    /// Pre-sharded pause message, kept ready so mining can be stopped the
    /// instant a solution is accepted.
    pause_shards: Vec<Vec<u8>>,
    advert_shards: Vec<Vec<u8>>,
    other_nodes: Mutex<HashMap<String, Instant>>,
    hash_count: AtomicU64,
    samples: Mutex<SampleRing>,
    last_nonce: AtomicI32,
    shutdown: watch::Sender<bool>,
}

impl<C: ChainEngine> Controller<C> {
    pub fn new(
        chain: Arc<C>,
        peers: Option<Arc<dyn PeerConnector>>,
        config: ControllerConfig,
    ) -> Result<Arc<Self>, ControllerError> {
        config.validate()?;

        let channel = Channel::open(&config.miner_pass, config.channel)?;
        let announcement = config.announcement();
        let pause_shards = channel.shards(&BusEnvelope::Pause(announcement.clone()))?;
        let advert_shards = channel.shards(&BusEnvelope::Advertisement(announcement))?;
        let (shutdown, _) = watch::channel(false);

        Ok(Arc::new(Self {
            chain,
            peers,
            fork: Fork::new(config.network),
            channel,
            config,
            active: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            height: AtomicU64::new(0),
            state: Mutex::new(TemplateState {
                coinbases: IndexMap::new(),
                transactions: Vec::new(),
                job_shards: Vec::new(),
                prev_hash: Hash::zero(),
                last_generated: Instant::now(),
                last_tx_update: 0,
            }),
            pause_shards,
            advert_shards,
            other_nodes: Mutex::new(HashMap::new()),
            hash_count: AtomicU64::new(0),
            samples: Mutex::new(SampleRing::default()),
            last_nonce: AtomicI32::new(-1),
            shutdown,
        }))
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn height(&self) -> u64 {
        self.height.load(Ordering::SeqCst)
    }

    pub fn hash_count(&self) -> u64 {
        self.hash_count.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Run the controller until shutdown. Spawns the rebroadcaster, the
    /// advertiser, the bus dispatcher and the chain notification handler,
    /// then ticks the ready flag until the node is current.
    pub async fn run(self: &Arc<Self>) -> Result<(), ControllerError> {
        debug!("sending broadcasts to {:?}", self.config.channel.target);
        match self.broadcast_template().await {
            Ok(()) => self.active.store(true, Ordering::SeqCst),
            Err(e) => warn!("could not send initial work: {}", e),
        }

        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        self.chain.subscribe(notify_tx);

        let ctrl = Arc::clone(self);
        spawn_task("controller-rebroadcast", async move {
            ctrl.rebroadcast_loop().await;
        });
        let ctrl = Arc::clone(self);
        spawn_task("controller-advertise", async move {
            ctrl.advertise_loop().await;
        });
        let ctrl = Arc::clone(self);
        spawn_task("controller-bus", async move {
            ctrl.bus_loop().await;
        });
        let ctrl = Arc::clone(self);
        spawn_task("controller-notifications", async move {
            ctrl.notification_loop(notify_rx).await;
        });

        let mut ticker = interval(Duration::from_secs(1));
        let mut shutdown = self.shutdown.subscribe();
        loop {
            select! {
                _ = ticker.tick() => {
                    if !self.ready.load(Ordering::SeqCst) && self.chain.is_current() {
                        info!("chain is current, controller ready");
                        self.ready.store(true, Ordering::SeqCst);
                        self.active.store(true, Ordering::SeqCst);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        debug!("miner controller shutting down");
        self.active.store(false, Ordering::SeqCst);
        if let Err(e) = self.channel.send_shards(&self.pause_shards).await {
            error!("could not send final pause: {}", e);
        }
        self.chain.unsubscribe();
        trace!("controller exiting");
        Ok(())
    }

    /// Produce a new job and multicast it. The state lock is held across
    /// generation and send, so broadcasts from this controller are totally
    /// ordered and the cached state always matches the job on the wire.
    pub async fn broadcast_template(&self) -> Result<(), ControllerError> {
        let mut state = self.state.lock().await;
        let (job, coinbases, transactions) = self.generate_job()?;
        let prev_hash = job.prev_block.clone();
        let height = job.height as u64;
        let shards = self.channel.shards(&BusEnvelope::Job(job))?;
        self.channel.send_shards(&shards).await?;

        if self.height.load(Ordering::SeqCst) < height {
            trace!("new height {}", height);
            self.height.store(height, Ordering::SeqCst);
        }

        state.coinbases = coinbases;
        state.transactions = transactions;
        state.job_shards = shards;
        state.prev_hash = prev_hash;
        state.last_generated = Instant::now();
        state.last_tx_update = self.chain.mempool_last_updated();
        Ok(())
    }

    /// Regenerate after a chain or mempool change. The coinbase set and
    /// transaction list are replaced together with the job they belong to.
    pub async fn update_and_send_template(&self) {
        if let Err(e) = self.broadcast_template().await {
            debug!("could not update template: {}", e);
        }
    }

    /// Build the next job: one coinbase and one merkle root per algorithm
    /// in the difficulty map.
    fn generate_job(
        &self,
    ) -> Result<(Job, IndexMap<i32, Transaction>, Vec<Transaction>), ControllerError> {
        trace!("getting new block template");
        let pay_to = {
            let mut rng = rand::thread_rng();
            &self.config.mining_addrs[rng.gen_range(0..self.config.mining_addrs.len())]
        };
        let template = self.chain.new_block_template(pay_to, TEMPLATE_SEED_ALGO)?;
        let next_height = template.height;

        let bitses = self.target_bits(next_height)?;

        let mut transactions = template.block.transactions;
        if transactions.is_empty() {
            return Err(ControllerError::NoTemplate);
        }
        let base_coinbase = transactions.remove(0);

        // The block right before the fork already bids for the post-fork
        // subsidy.
        let subsidy_height = self.fork.subsidy_height(next_height);

        let mut coinbases = IndexMap::with_capacity(bitses.len());
        let mut merkles = IndexMap::with_capacity(bitses.len());
        for &version in bitses.keys() {
            let mut coinbase = base_coinbase.clone();
            let subsidy = calc_block_subsidy(subsidy_height, self.config.network, version);
            if coinbase.set_last_output_value(subsidy).is_err() {
                return Err(ControllerError::NoTemplate);
            }

            let mut body = Vec::with_capacity(1 + transactions.len());
            body.push(coinbase.clone());
            body.extend(transactions.iter().cloned());
            merkles.insert(version, calculate_merkle_root(&body));
            coinbases.insert(version, coinbase);
        }

        let job = Job {
            announcement: self.config.announcement(),
            height: next_height as i32,
            prev_block: template.block.header.prev_block,
            bitses,
            merkles,
        };
        Ok((job, coinbases, transactions))
    }

    /// Difficulty map for the next block: the tip cache if it matches the
    /// current fork's algorithm set, otherwise recomputed and written
    /// back.
    fn target_bits(
        &self,
        next_height: u64,
    ) -> Result<kopach_common::fork::TargetBits, ControllerError> {
        match self.chain.cached_diffs() {
            Some(diffs) if self.fork.matches_algo_set(&diffs, next_height) => Ok(diffs),
            _ => {
                let diffs = self.chain.calc_controller_diffs()?;
                self.chain.store_diffs(diffs.clone());
                Ok(diffs)
            }
        }
    }

    async fn rebroadcast_loop(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_secs(1));
        let mut shutdown = self.shutdown.subscribe();
        loop {
            select! {
                _ = ticker.tick() => {
                    if !self.chain.is_current() {
                        continue;
                    }
                    let best = self.chain.best_snapshot();
                    let mempool_updated = self.chain.mempool_last_updated();
                    let reason = {
                        let state = self.state.lock().await;
                        self.refresh_reason(&state, &best, mempool_updated)
                    };
                    match reason {
                        RefreshReason::NewBest => {
                            debug!("new best block hash");
                            self.update_and_send_template().await;
                        }
                        RefreshReason::StaleMempool => {
                            debug!("block template is stale");
                            self.update_and_send_template().await;
                        }
                        RefreshReason::Resend => {
                            let shards = {
                                let state = self.state.lock().await;
                                state.job_shards.clone()
                            };
                            if shards.is_empty() {
                                warn!("no job to rebroadcast");
                                continue;
                            }
                            if let Err(e) = self.channel.send_shards(&shards).await {
                                error!("rebroadcast failed: {}", e);
                            }
                        }
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    fn refresh_reason(
        &self,
        state: &TemplateState,
        best: &Snapshot,
        mempool_updated: TimestampMillis,
    ) -> RefreshReason {
        if state.prev_hash != best.hash {
            return RefreshReason::NewBest;
        }
        if state.last_tx_update != mempool_updated
            && state.last_generated.elapsed() >= Duration::from_secs(TEMPLATE_REFRESH_SECS)
        {
            return RefreshReason::StaleMempool;
        }
        RefreshReason::Resend
    }

    async fn advertise_loop(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_secs(1));
        let mut shutdown = self.shutdown.subscribe();
        loop {
            select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.channel.send_shards(&self.advert_shards).await {
                        error!("could not send advertisement: {}", e);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    async fn bus_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
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
                _ = shutdown.changed() => break,
            }
        }
    }

    async fn notification_loop(
        self: Arc<Self>,
        mut notifications: mpsc::UnboundedReceiver<ChainNotification>,
    ) {
        while let Some(notification) = notifications.recv().await {
            if !self.active.load(Ordering::SeqCst) || !self.ready.load(Ordering::SeqCst) {
                debug!("ignoring chain notification while not ready");
                continue;
            }
            match notification {
                ChainNotification::BlockConnected(_) => {
                    trace!("received new chain notification");
                    self.update_and_send_template().await;
                }
            }
        }
    }

    pub async fn handle_envelope(&self, src: SocketAddr, envelope: BusEnvelope) {
        match envelope {
            BusEnvelope::Solution(solution) => self.handle_solution(solution).await,
            BusEnvelope::Advertisement(announcement) => {
                self.handle_advertisement(src.ip(), announcement).await
            }
            BusEnvelope::Hashrate(report) => self.handle_hashrate(report),
            // Jobs and pauses on the bus come from peer controllers.
            BusEnvelope::Job(_) | BusEnvelope::Pause(_) => {}
        }
    }

    /// Solution ingress: validate, stop the miners, submit.
    pub async fn handle_solution(&self, solution: Solution) {
        trace!("received solution");
        if !self.active.load(Ordering::SeqCst) {
            debug!("not active yet");
            return;
        }
        if solution.sender_port != self.config.controller_port as i32 {
            // Answering a peer controller's job.
            return;
        }

        let mut block = solution.block;
        {
            let state = self.state.lock().await;
            let Some(coinbase) = state.coinbases.get(&block.header.version) else {
                debug!("no coinbase for version {}", block.header.version);
                return;
            };
            block.transactions = Vec::with_capacity(1 + state.transactions.len());
            block.transactions.push(coinbase.clone());
            block.transactions.extend(state.transactions.iter().cloned());
        }

        let best = self.chain.best_snapshot();
        if block.header.prev_block != best.hash {
            debug!("solution submitted by worker is stale");
            return;
        }

        // The block is probably good: stop the whole population before the
        // submit so nobody burns hashes on a dead template.
        if let Err(e) = self.channel.send_shards(&self.pause_shards).await {
            error!("could not send pause: {}", e);
        }

        match self.chain.process_block(block.clone()) {
            Ok(BlockOutcome::Accepted) => self.log_accepted(&block, best.height + 1),
            Ok(BlockOutcome::Orphan) => warn!("block accepted as an orphan"),
            Err(ProcessError::Rule(e)) => warn!("block submitted by worker rejected: {}", e),
            Err(ProcessError::Unexpected(e)) => {
                warn!("unexpected error while processing worker block: {}", e)
            }
        }
    }

    fn log_accepted(&self, block: &Block, height: u64) {
        let algo = self
            .fork
            .algo_name(block.header.version, height)
            .unwrap_or("unknown");
        let subsidy = block
            .transactions
            .first()
            .and_then(|cb| cb.outputs.last())
            .map(|out| out.value)
            .unwrap_or(0);
        let since = self
            .chain
            .block_by_height(height.saturating_sub(1))
            .map(|prev| block.header.timestamp.saturating_sub(prev.header.timestamp));
        let hash = block
            .header
            .pow_hash(&self.fork, height)
            .map(|h| h.to_hex())
            .unwrap_or_default();
        info!(
            "new block height {} {} bits {:08x} target {:064x} subsidy {} algo {} {}s since prev",
            height,
            hash,
            block.header.bits,
            compact_to_big(block.header.bits),
            subsidy,
            algo,
            since.unwrap_or_default(),
        );
    }

    /// Advertisement ingress: track peer controllers and auto-mesh with
    /// nodes sharing the passphrase.
    pub async fn handle_advertisement(&self, _src: IpAddr, announcement: NodeAnnouncement) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        let my_port = self
            .config
            .p2p_listeners
            .first()
            .map(|l| l.port())
            .unwrap_or(0);

        let mut nodes = self.other_nodes.lock().await;
        if announcement.p2p_port != my_port {
            for peer in announcement.p2p_listeners() {
                if !nodes.contains_key(&peer) {
                    // Nodes may change ports between launches, so always
                    // reconnect new entries.
                    warn!("connecting to lan peer with same PSK {}", peer);
                    if let Some(connector) = &self.peers {
                        connector.connect(&peer);
                    }
                }
                nodes.insert(peer, Instant::now());
            }
        }
        let timeout = Duration::from_secs(CONTROLLER_TIMEOUT_SECS);
        nodes.retain(|_, last_seen| last_seen.elapsed() <= timeout);
    }

    pub fn other_node_count(&self) -> usize {
        self.other_nodes
            .try_lock()
            .map(|nodes| nodes.len())
            .unwrap_or(0)
    }

    /// Hashrate ingress: drop rebroadcast duplicates on the nonce marker,
    /// accumulate the rest.
    pub fn handle_hashrate(&self, report: HashrateReport) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        if self.last_nonce.swap(report.nonce_marker, Ordering::SeqCst) == report.nonce_marker {
            return;
        }
        if report.count > 0 {
            self.hash_count
                .fetch_add(report.count as u64, Ordering::SeqCst);
        }
    }

    /// Aggregate worker hashrate: sample the cumulative count and average
    /// the recent intervals.
    pub async fn hash_report(&self) -> f64 {
        let mut samples = self.samples.lock().await;
        samples.push(self.hash_count.load(Ordering::SeqCst));
        hashrate_from_samples(&samples)
    }
}
