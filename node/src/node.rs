//! The main Kestrel node struct — wires all subsystems together.
//!
//! Construction order breaks the dependency cycles: chains first, then the
//! pool, then the packager that pulls from the pool, then the dispatch and
//! coordinator layers that hold both. No subsystem keeps a back-pointer
//! into its consumers.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use kestrel_chain::block::{Block, Header, TxRoot};
use kestrel_chain::{BlockChain, EventBus, MultiChainSet, PoaEngine, StateDb, TxPool};
use kestrel_consensus::{
    ContractAccessor, ContractBackend, ElectionManager, Packager, PeriodSynchronizer, SharedClock,
    SystemClock,
};
use kestrel_crypto::{generate_keypair, keypair_from_seed, node_id_from_public};
use kestrel_network::{Broadcaster, PeerRegistry};
use kestrel_types::{Address, BlockHash, NodeId, Timestamp};

use crate::ballot_backend::{ConfiguredBallot, NullBallot};
use crate::config::NodeConfig;
use crate::coordinator::{CoordInput, Coordinator};
use crate::dispatch::{unix_now_secs, Dispatcher};
use crate::downloader::{DownloadIntake, Downloader};
use crate::error::NodeError;
use crate::session::{
    spawn_outbound_router, spawn_peer_read_loop, spawn_peer_writer, ConnectionRegistry,
};
use crate::shutdown::ShutdownController;

/// Channel capacity for outbound peer frames.
const OUTBOUND_CHANNEL_CAPACITY: usize = 1024;
/// Channel capacity for coordinator inputs.
const COORD_CHANNEL_CAPACITY: usize = 256;
/// Quiet-interval poll cadence.
const QUIET_TICK: Duration = Duration::from_secs(1);
/// Cadence for re-dialing dropped bootstrap peers.
const RECONNECT_INTERVAL: Duration = Duration::from_secs(30);
/// Timeout for waiting on background tasks during shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// A running Kestrel node.
pub struct KestrelNode {
    config: NodeConfig,
    local_id: NodeId,
    main_chain: Arc<StdRwLock<BlockChain>>,
    pool: Arc<TxPool>,
    events: EventBus,
    shutdown: Arc<ShutdownController>,
    connections: Arc<RwLock<ConnectionRegistry>>,
    peers: Arc<RwLock<PeerRegistry>>,
    dispatcher: Arc<Dispatcher>,
    coord_tx: mpsc::Sender<CoordInput>,

    coordinator: Option<Coordinator>,
    coord_rx: Option<mpsc::Receiver<CoordInput>>,
    outbound_rx: Option<mpsc::Receiver<(String, Vec<u8>)>>,
    download_intake: Option<DownloadIntake>,
    listen_addr: Option<SocketAddr>,
    task_handles: Vec<JoinHandle<()>>,
}

/// Build the empty genesis block for a fresh chain.
fn genesis_block(state: &StateDb) -> Block {
    Block {
        header: Header {
            parent_hash: BlockHash::ZERO,
            number: 0,
            timestamp: Timestamp::EPOCH,
            producer: NodeId::ZERO,
            state_root: state.root(),
            tx_root: TxRoot::EMPTY,
            extra: Vec::new(),
        },
        transactions: Vec::new(),
    }
}

impl KestrelNode {
    /// Create and initialize a new node. Call [`start`] to begin
    /// accepting connections and running the consensus timers.
    ///
    /// [`start`]: KestrelNode::start
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        // Node identity key.
        let keypair = match &config.key_seed {
            Some(seed_hex) => {
                let bytes = decode_seed(seed_hex)?;
                keypair_from_seed(&bytes)
            }
            None => generate_keypair(),
        };
        let local_id = node_id_from_public(&keypair.public);
        tracing::info!(node_id = %local_id, "node identity loaded");

        // Chains: main plus one isolated chain per configured DApp.
        let genesis_state = StateDb::new();
        let main_chain = Arc::new(StdRwLock::new(BlockChain::new(
            genesis_block(&genesis_state),
            genesis_state,
        )));
        let mut dapp_chains = std::collections::BTreeMap::new();
        for raw in &config.dapp_chains {
            let address = Address::from_str(raw)
                .map_err(|e| NodeError::Config(format!("bad dapp address {raw}: {e}")))?;
            let state = StateDb::new();
            let chain = Arc::new(StdRwLock::new(BlockChain::new(
                genesis_block(&state),
                state,
            )));
            dapp_chains.insert(address, chain);
        }
        let dapp_chains = MultiChainSet::new(dapp_chains);

        // Pool first, then the packager that pulls from it.
        let pool = Arc::new(TxPool::with_default_capacity());
        let events = EventBus::default();
        let clock: SharedClock = Arc::new(SystemClock);
        let packager = Packager::new(
            Arc::new(PoaEngine),
            main_chain.clone(),
            dapp_chains,
            pool.clone(),
            events.clone(),
            clock.clone(),
        );

        // Ballot accessor and the period/election state machines.
        let ballot_address = Address::from_str(&config.ballot_address)
            .map_err(|e| NodeError::Config(format!("bad ballot address: {e}")))?;
        let backend: Arc<dyn ContractBackend> = if config.delegators.is_empty() {
            Arc::new(NullBallot)
        } else {
            Arc::new(ConfiguredBallot::new(config.delegators.clone()))
        };
        let accessor = Arc::new(ContractAccessor::new(backend, ballot_address));
        let synchronizer = PeriodSynchronizer::new(
            keypair,
            accessor,
            clock.clone(),
            config.big_period_secs,
        );
        let election = ElectionManager::new(local_id, clock, config.quiet_interval_secs);

        // Wiring: registries, channels, dispatch, coordinator.
        let shutdown = Arc::new(ShutdownController::new());
        let connections = Arc::new(RwLock::new(ConnectionRegistry::new()));
        let peers = Arc::new(RwLock::new(PeerRegistry::new(config.max_peers)));
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let (coord_tx, coord_rx) = mpsc::channel(COORD_CHANNEL_CAPACITY);
        let broadcaster = Broadcaster::new(outbound_tx);
        let (downloader, download_intake) = Downloader::new();

        let dispatcher = Arc::new(Dispatcher::new(
            main_chain.clone(),
            downloader,
            peers.clone(),
            broadcaster.clone(),
            coord_tx.clone(),
        ));
        let coordinator = Coordinator::new(
            local_id,
            election,
            synchronizer,
            packager,
            events.clone(),
            broadcaster,
            peers.clone(),
            main_chain.clone(),
        );

        Ok(Self {
            config,
            local_id,
            main_chain,
            pool,
            events,
            shutdown,
            connections,
            peers,
            dispatcher,
            coord_tx,
            coordinator: Some(coordinator),
            coord_rx: Some(coord_rx),
            outbound_rx: Some(outbound_rx),
            download_intake: Some(download_intake),
            listen_addr: None,
            task_handles: Vec::new(),
        })
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// Address the listener is bound to (after [`start`]).
    ///
    /// [`start`]: KestrelNode::start
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.listen_addr
    }

    pub fn pool(&self) -> Arc<TxPool> {
        self.pool.clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        self.shutdown.clone()
    }

    /// Inject a coordinator input. Used by tests and by deployments that
    /// drive the timers externally (`skip_timers`).
    pub async fn inject(&self, input: CoordInput) -> Result<(), NodeError> {
        self.coord_tx
            .send(input)
            .await
            .map_err(|_| NodeError::Other("coordinator stopped".into()))
    }

    /// Take the downloader intake for the external chain-sync subsystem.
    pub fn take_download_intake(&mut self) -> Option<DownloadIntake> {
        self.download_intake.take()
    }

    /// Start the listener, peer sessions, outbound router, coordinator,
    /// and (unless `skip_timers`) the consensus timers.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.port)).await?;
        self.listen_addr = Some(listener.local_addr()?);
        tracing::info!(addr = %listener.local_addr()?, "listening for peers");

        // Accept loop.
        {
            let connections = self.connections.clone();
            let peers = self.peers.clone();
            let dispatcher = self.dispatcher.clone();
            let shutdown = self.shutdown.clone();
            let mut shutdown_rx = self.shutdown.subscribe();
            self.task_handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        accepted = listener.accept() => {
                            match accepted {
                                Ok((stream, addr)) => {
                                    register_peer(
                                        stream,
                                        addr.to_string(),
                                        &connections,
                                        &peers,
                                        &dispatcher,
                                        &shutdown,
                                    )
                                    .await;
                                }
                                Err(e) => {
                                    tracing::warn!(error = %e, "accept failed");
                                }
                            }
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
                tracing::debug!("listener stopped");
            }));
        }

        // Outbound router, fanning frames into per-peer writer queues.
        let outbound_rx = self
            .outbound_rx
            .take()
            .ok_or_else(|| NodeError::Other("node already started".into()))?;
        self.task_handles.push(spawn_outbound_router(
            outbound_rx,
            self.connections.clone(),
            self.shutdown.subscribe(),
        ));

        // Coordinator.
        let coordinator = self
            .coordinator
            .take()
            .ok_or_else(|| NodeError::Other("node already started".into()))?;
        let coord_rx = self
            .coord_rx
            .take()
            .ok_or_else(|| NodeError::Other("node already started".into()))?;
        let shutdown_rx = self.shutdown.subscribe();
        self.task_handles
            .push(tokio::spawn(coordinator.run(coord_rx, shutdown_rx)));

        // Bootstrap dials.
        for peer_addr in self.config.bootstrap_peers.clone() {
            match TcpStream::connect(&peer_addr).await {
                Ok(stream) => {
                    register_peer(
                        stream,
                        peer_addr.clone(),
                        &self.connections,
                        &self.peers,
                        &self.dispatcher,
                        &self.shutdown,
                    )
                    .await;
                    tracing::info!(peer = %peer_addr, "connected to bootstrap peer");
                }
                Err(e) => {
                    tracing::warn!(peer = %peer_addr, error = %e, "bootstrap dial failed");
                }
            }
        }

        // Reconnect heartbeat: torn-down bootstrap sessions are re-dialed
        // on the next beat, unless the peer is banned.
        if !self.config.bootstrap_peers.is_empty() {
            let bootstrap = self.config.bootstrap_peers.clone();
            let connections = self.connections.clone();
            let peers = self.peers.clone();
            let dispatcher = self.dispatcher.clone();
            let shutdown = self.shutdown.clone();
            let mut shutdown_rx = self.shutdown.subscribe();
            self.task_handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(RECONNECT_INTERVAL);
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            for peer_addr in &bootstrap {
                                let should_dial = {
                                    let mut peers = peers.write().await;
                                    let connected = peers
                                        .get(peer_addr)
                                        .map(|p| p.connected)
                                        .unwrap_or(false);
                                    !connected && !peers.is_banned(peer_addr, unix_now_secs())
                                };
                                if !should_dial {
                                    continue;
                                }
                                match TcpStream::connect(peer_addr).await {
                                    Ok(stream) => {
                                        register_peer(
                                            stream,
                                            peer_addr.clone(),
                                            &connections,
                                            &peers,
                                            &dispatcher,
                                            &shutdown,
                                        )
                                        .await;
                                        tracing::info!(peer = %peer_addr, "re-dialed peer");
                                    }
                                    Err(e) => {
                                        tracing::debug!(peer = %peer_addr, error = %e, "re-dial failed");
                                    }
                                }
                            }
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
            }));
        }

        // Consensus timers. State is process-local: the period timer fires
        // immediately so a restarted node re-derives its delegator view
        // before the first election round.
        if !self.config.skip_timers {
            self.spawn_timer(Duration::from_secs(self.config.big_period_secs), true, || {
                CoordInput::PeriodTimer
            });
            self.spawn_timer(
                Duration::from_secs(self.config.round_interval_secs),
                false,
                || CoordInput::ElectionTimer,
            );
            self.spawn_timer(QUIET_TICK, false, || CoordInput::QuietTick);
        }

        Ok(())
    }

    fn spawn_timer<F>(&mut self, period: Duration, immediate: bool, make: F)
    where
        F: Fn() -> CoordInput + Send + 'static,
    {
        let coord_tx = self.coord_tx.clone();
        let mut shutdown_rx = self.shutdown.subscribe();
        self.task_handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            if !immediate {
                interval.tick().await; // the first tick fires at once
            }
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if coord_tx.send(make()).await.is_err() {
                            break;
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        }));
    }

    /// Trigger shutdown and wait for every task, bounding the wait.
    pub async fn stop(&mut self) -> Result<(), NodeError> {
        self.shutdown.shutdown();
        let mut timed_out = false;
        for handle in self.task_handles.drain(..) {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(_) => {}
                Err(_) => {
                    timed_out = true;
                }
            }
        }
        if timed_out {
            tracing::warn!("some tasks did not stop within the shutdown timeout");
            return Err(NodeError::ShutdownTimeout);
        }
        tracing::info!("node stopped");
        Ok(())
    }
}

fn decode_seed(seed_hex: &str) -> Result<[u8; 32], NodeError> {
    let seed_hex = seed_hex.strip_prefix("0x").unwrap_or(seed_hex);
    if seed_hex.len() != 64 {
        return Err(NodeError::Config("key_seed must be 32 hex bytes".into()));
    }
    let mut bytes = [0u8; 32];
    for (i, chunk) in bytes.iter_mut().enumerate() {
        *chunk = u8::from_str_radix(&seed_hex[2 * i..2 * i + 2], 16)
            .map_err(|_| NodeError::Config("key_seed is not valid hex".into()))?;
    }
    Ok(bytes)
}

/// Register a fresh TCP connection: split it, spawn the peer's writer
/// task, register its queue, and spawn the reader task.
async fn register_peer(
    stream: TcpStream,
    peer_id: String,
    connections: &Arc<RwLock<ConnectionRegistry>>,
    peers: &Arc<RwLock<PeerRegistry>>,
    dispatcher: &Arc<Dispatcher>,
    shutdown: &ShutdownController,
) {
    let (read_half, write_half) = stream.into_split();
    let (queue, _writer) = spawn_peer_writer(peer_id.clone(), write_half, shutdown.subscribe());
    {
        let mut connections = connections.write().await;
        connections.insert(peer_id.clone(), queue);
    }
    {
        let mut peers = peers.write().await;
        peers.mark_connected(&peer_id, None, unix_now_secs());
    }
    // Both tasks exit on their own via the shutdown subscription.
    let _reader = spawn_peer_read_loop(
        peer_id,
        read_half,
        dispatcher.clone(),
        connections.clone(),
        peers.clone(),
        shutdown.subscribe(),
    );
}
