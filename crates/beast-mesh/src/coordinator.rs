//! Beast Mode coordinator
//!
//! State machine: `Inactive -> Discovering -> Active -> Draining -> Inactive`.
//!
//! A single background loop owns every mutation of the peer view and the
//! claim table. It multiplexes three inputs: commands from callers
//! (attempt, confirm, release, drain), messages from the bus, and the
//! heartbeat timer. Callers read state through [`Coordinator::snapshot`],
//! which takes a read lock on the shared state.
//!
//! ## Claim protocol
//!
//! 1. **Attempt**: if no unexpired claim is known, record a provisional claim
//!    and publish it.
//! 2. **Quiescence**: wait `quiescence_window` for conflicting claims; the
//!    loop yields ours to any claim that outranks it (see [`crate::claims`]).
//! 3. **Confirm**: if our claim still stands, the caller holds it. The
//!    returned guard publishes a release when dropped.
//!
//! A conflicting claim that outranks a confirmed one is logged: this is the
//! accepted race window of an optimistic protocol.

use async_trait::async_trait;
use beast_core::{
    AgentId, AgentIdentity, BeastModeConfig, ClaimGuard, ClaimId, ClaimOutcome,
    CoordinationSnapshot, CoordinationState, ViewHealth, WorkCoordinator,
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep, timeout};
use tracing::{debug, info, warn};

use crate::{
    bus::{CoordinationBus, MessageStream},
    claims::{ClaimTable, Observation},
    error::{MeshError, MeshResult},
    message::{BusMessage, ClaimRelease, PresenceAnnouncement, PresenceStatus, Topic, WorkClaim},
    peer_view::{PeerUpdate, PeerView},
};

const COMMAND_BUFFER: usize = 256;

/// Coordinator timing and topic settings
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub topic: String,
    pub heartbeat_interval: Duration,
    pub staleness_threshold: Duration,
    pub discovery_timeout: Duration,
    pub quiescence_window: Duration,
    pub claim_ttl: Duration,
    /// Bound on a single bus operation or loop round-trip
    pub operation_timeout: Duration,
    /// Defer discovery until the first claim attempt
    pub lazy_start: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            topic: "beast-mode".to_string(),
            heartbeat_interval: Duration::from_secs(5),
            staleness_threshold: Duration::from_secs(15),
            discovery_timeout: Duration::from_millis(2000),
            quiescence_window: Duration::from_millis(250),
            claim_ttl: Duration::from_secs(300),
            operation_timeout: Duration::from_secs(2),
            lazy_start: false,
        }
    }
}

impl From<&BeastModeConfig> for CoordinatorConfig {
    fn from(config: &BeastModeConfig) -> Self {
        Self {
            topic: config.topic.clone(),
            heartbeat_interval: config.heartbeat_interval,
            staleness_threshold: config.staleness_threshold,
            discovery_timeout: config.discovery_timeout,
            quiescence_window: config.quiescence_window,
            claim_ttl: config.claim_ttl,
            ..Default::default()
        }
    }
}

impl CoordinatorConfig {
    #[must_use]
    pub fn with_lazy_start(mut self, lazy: bool) -> Self {
        self.lazy_start = lazy;
        self
    }

    fn validate(&self) -> MeshResult<Topic> {
        let topic = Topic::parse(&self.topic)
            .map_err(|e| MeshError::InvalidConfig(format!("topic '{}': {}", self.topic, e)))?;
        if self.heartbeat_interval.is_zero() {
            return Err(MeshError::InvalidConfig(
                "heartbeat interval must be greater than 0".to_string(),
            ));
        }
        if self.staleness_threshold <= self.heartbeat_interval {
            return Err(MeshError::InvalidConfig(
                "staleness threshold must exceed the heartbeat interval".to_string(),
            ));
        }
        if self.quiescence_window.is_zero() || self.claim_ttl <= self.quiescence_window {
            return Err(MeshError::InvalidConfig(
                "claim TTL must exceed a non-zero quiescence window".to_string(),
            ));
        }
        if self.operation_timeout.is_zero() {
            return Err(MeshError::InvalidConfig(
                "operation timeout must be greater than 0".to_string(),
            ));
        }
        Ok(topic)
    }
}

enum Command {
    Attempt {
        claim_id: ClaimId,
        reply: oneshot::Sender<AttemptReply>,
    },
    Confirm {
        claim_id: ClaimId,
        reply: oneshot::Sender<bool>,
    },
    Release {
        claim_id: ClaimId,
    },
    Drain {
        reply: oneshot::Sender<()>,
    },
}

enum AttemptReply {
    Pending,
    Held(AgentId),
    Failed(String),
}

/// State read by callers, written only by the coordinator
struct Shared {
    state: CoordinationState,
    health: ViewHealth,
    peers: PeerView,
    claims: ClaimTable,
    last_refresh: Option<DateTime<Utc>>,
    announced: PresenceStatus,
}

struct Running {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

/// One agent's participation in Beast Mode
pub struct Coordinator {
    agent_id: AgentId,
    bus: Arc<dyn CoordinationBus>,
    topic: Topic,
    config: CoordinatorConfig,
    shared: Arc<RwLock<Shared>>,
    running: Mutex<Option<Running>>,
    /// Serializes lazy starts; holds the time of the last failed attempt
    last_failure: Mutex<Option<Instant>>,
    stopped: AtomicBool,
}

impl Coordinator {
    /// Create an inactive coordinator; nothing touches the bus until started
    ///
    /// # Errors
    ///
    /// Returns `MeshError::InvalidConfig` for an invalid topic or timing.
    pub fn new(
        identity: &AgentIdentity,
        bus: Arc<dyn CoordinationBus>,
        config: CoordinatorConfig,
    ) -> MeshResult<Self> {
        let topic = config.validate()?;
        let health = if config.lazy_start {
            ViewHealth::Deferred
        } else {
            ViewHealth::Discovering
        };

        Ok(Self {
            agent_id: identity.agent_id().clone(),
            bus,
            topic,
            shared: Arc::new(RwLock::new(Shared {
                state: CoordinationState::Inactive,
                health,
                peers: PeerView::new(config.staleness_threshold),
                claims: ClaimTable::new(),
                last_refresh: None,
                announced: PresenceStatus::Online,
            })),
            config,
            running: Mutex::new(None),
            last_failure: Mutex::new(None),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub async fn state(&self) -> CoordinationState {
        self.shared.read().await.state
    }

    /// Run discovery and start the background loop
    ///
    /// Returns once the agent is `Active`: after one peer round-trip, or
    /// after the discovery timeout when no peer answers.
    ///
    /// # Errors
    ///
    /// Returns `MeshError` if the bus cannot be reached; the coordinator is
    /// left `Inactive` with an unreachable view.
    pub async fn start(&self) -> MeshResult<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(MeshError::NotRunning("coordinator was shut down".to_string()));
        }

        let discovered = Arc::new(Notify::new());
        {
            let mut running = self.running.lock().await;
            if running.is_some() {
                return Ok(());
            }

            self.set_phase(CoordinationState::Discovering, ViewHealth::Discovering)
                .await;
            info!(
                agent_id = %self.agent_id,
                topic = %self.topic,
                "Starting coordination discovery"
            );

            let stream = match self.open().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(agent_id = %self.agent_id, error = %e, "Coordination bus unreachable");
                    self.set_phase(CoordinationState::Inactive, ViewHealth::Unreachable)
                        .await;
                    return Err(e);
                }
            };

            let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
            let event_loop = CoordinationLoop {
                agent_id: self.agent_id.clone(),
                bus: Arc::clone(&self.bus),
                topic: self.topic.clone(),
                claim_ttl: chrono::Duration::from_std(self.config.claim_ttl)
                    .unwrap_or_else(|_| chrono::Duration::seconds(300)),
                heartbeat_interval: self.config.heartbeat_interval,
                operation_timeout: self.config.operation_timeout,
                shared: Arc::clone(&self.shared),
                discovered: Arc::clone(&discovered),
                commands: receiver,
                subscribed: true,
            };
            let task = tokio::spawn(event_loop.run(stream));
            *running = Some(Running { commands, task });
        }

        match timeout(self.config.discovery_timeout, discovered.notified()).await {
            Ok(()) => debug!(agent_id = %self.agent_id, "Peer round-trip completed"),
            Err(_) => debug!(
                agent_id = %self.agent_id,
                "No peer answered within the discovery timeout"
            ),
        }

        let peers = {
            let mut shared = self.shared.write().await;
            if shared.state == CoordinationState::Discovering {
                shared.state = CoordinationState::Active;
                shared.health = ViewHealth::Fresh;
                shared.last_refresh = Some(Utc::now());
            }
            shared.peers.len()
        };
        info!(agent_id = %self.agent_id, peers, "Coordination active");
        Ok(())
    }

    /// Start on first use; used by single-shot platforms
    ///
    /// A failed start is not retried before one heartbeat interval has
    /// passed, so an unreachable bus does not add the discovery timeout to
    /// every invocation.
    ///
    /// # Errors
    ///
    /// Returns `MeshError` if the coordinator could not be started.
    pub async fn ensure_started(&self) -> MeshResult<()> {
        if self.state().await == CoordinationState::Active {
            return Ok(());
        }

        let mut last_failure = self.last_failure.lock().await;
        if self.state().await == CoordinationState::Active {
            return Ok(());
        }
        if let Some(at) = *last_failure
            && at.elapsed() < self.config.heartbeat_interval
        {
            return Err(MeshError::NotRunning(
                "bus unreachable, waiting before the next attempt".to_string(),
            ));
        }

        match self.start().await {
            Ok(()) => {
                *last_failure = None;
                Ok(())
            }
            Err(e) => {
                *last_failure = Some(Instant::now());
                Err(e)
            }
        }
    }

    /// Start in the background, retrying every heartbeat interval while the
    /// bus is unreachable
    pub fn spawn_start(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match coordinator.start().await {
                    Ok(()) => break,
                    Err(MeshError::NotRunning(_)) => break,
                    Err(e) => {
                        warn!(
                            agent_id = %coordinator.agent_id,
                            error = %e,
                            retry_in = ?coordinator.config.heartbeat_interval,
                            "Coordination start failed, retrying"
                        );
                        sleep(coordinator.config.heartbeat_interval).await;
                    }
                }
            }
        })
    }

    /// Drain and stop: announce draining, release held claims, announce
    /// offline, stop the loop
    pub async fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let running = self.running.lock().await.take();
        let Some(running) = running else {
            self.set_phase(CoordinationState::Inactive, ViewHealth::Stopped)
                .await;
            return;
        };

        self.set_phase(CoordinationState::Draining, ViewHealth::Stopped)
            .await;
        info!(agent_id = %self.agent_id, "Draining coordination");

        let drain_timeout = self.config.operation_timeout * 3;
        let (reply, done) = oneshot::channel();
        if running.commands.send(Command::Drain { reply }).await.is_ok()
            && timeout(drain_timeout, done).await.is_err()
        {
            warn!(agent_id = %self.agent_id, "Drain did not finish in time");
        }

        let mut task = running.task;
        if timeout(self.config.operation_timeout, &mut task).await.is_err() {
            task.abort();
        }

        self.set_phase(CoordinationState::Inactive, ViewHealth::Stopped)
            .await;
        info!(agent_id = %self.agent_id, "Coordination stopped");
    }

    async fn open(&self) -> MeshResult<MessageStream> {
        let limit = self.config.operation_timeout;
        let stream = timeout(limit, self.bus.subscribe(&self.topic))
            .await
            .map_err(|_| MeshError::Timeout(limit))??;

        let hello = BusMessage::Presence(PresenceAnnouncement::now(
            self.agent_id.clone(),
            PresenceStatus::Online,
        ));
        timeout(limit, self.bus.publish(&self.topic, &hello))
            .await
            .map_err(|_| MeshError::Timeout(limit))??;
        Ok(stream)
    }

    async fn set_phase(&self, state: CoordinationState, health: ViewHealth) {
        let mut shared = self.shared.write().await;
        shared.state = state;
        shared.health = health;
    }

    async fn commands(&self) -> Option<mpsc::Sender<Command>> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|running| running.commands.clone())
    }

    /// Send a command and wait for its reply within the operation timeout
    async fn request<T>(
        &self,
        commands: &mpsc::Sender<Command>,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Option<T> {
        let (reply, answer) = oneshot::channel();
        let round_trip = async {
            commands.send(make(reply)).await.ok()?;
            answer.await.ok()
        };
        timeout(self.config.operation_timeout, round_trip)
            .await
            .ok()
            .flatten()
    }
}

fn release_guard(claim_id: ClaimId, commands: mpsc::Sender<Command>) -> ClaimGuard {
    ClaimGuard::new(claim_id, move |id| {
        if let Err(e) = commands.try_send(Command::Release {
            claim_id: id.clone(),
        }) {
            warn!(claim_id = %id, error = %e, "Could not queue claim release, it will expire");
        }
    })
}

#[async_trait]
impl WorkCoordinator for Coordinator {
    async fn try_claim(&self, claim_id: &ClaimId) -> ClaimOutcome {
        if self.config.lazy_start
            && let Err(e) = self.ensure_started().await
        {
            return ClaimOutcome::Unavailable {
                reason: e.to_string(),
            };
        }

        let state = self.state().await;
        if state != CoordinationState::Active {
            return ClaimOutcome::Unavailable {
                reason: format!("coordination is {}", state.as_str()),
            };
        }
        let Some(commands) = self.commands().await else {
            return ClaimOutcome::Unavailable {
                reason: "coordination loop not running".to_string(),
            };
        };

        let attempt = self
            .request(&commands, |reply| Command::Attempt {
                claim_id: claim_id.clone(),
                reply,
            })
            .await;
        match attempt {
            Some(AttemptReply::Pending) => {}
            Some(AttemptReply::Held(holder)) => {
                debug!(claim_id = %claim_id, holder = %holder, "Claim already held");
                return ClaimOutcome::Lost {
                    claim_id: claim_id.clone(),
                };
            }
            Some(AttemptReply::Failed(reason)) => return ClaimOutcome::Unavailable { reason },
            None => {
                return ClaimOutcome::Unavailable {
                    reason: "claim attempt timed out".to_string(),
                };
            }
        }

        // Released on drop, so cancellation during quiescence gives it back
        let guard = release_guard(claim_id.clone(), commands.clone());
        sleep(self.config.quiescence_window).await;

        let confirmed = self
            .request(&commands, |reply| Command::Confirm {
                claim_id: claim_id.clone(),
                reply,
            })
            .await;
        match confirmed {
            Some(true) => ClaimOutcome::Acquired(guard),
            Some(false) => {
                drop(guard);
                ClaimOutcome::Lost {
                    claim_id: claim_id.clone(),
                }
            }
            None => {
                drop(guard);
                ClaimOutcome::Unavailable {
                    reason: "claim confirmation timed out".to_string(),
                }
            }
        }
    }

    async fn snapshot(&self) -> CoordinationSnapshot {
        let shared = self.shared.read().await;
        let view = match (shared.state, shared.health, shared.last_refresh) {
            (CoordinationState::Active, ViewHealth::Fresh, Some(at)) => {
                let age = (Utc::now() - at).to_std().unwrap_or_default();
                if age > self.config.staleness_threshold {
                    ViewHealth::Stale
                } else {
                    ViewHealth::Fresh
                }
            }
            (_, health, _) => health,
        };

        CoordinationSnapshot {
            state: shared.state,
            view,
            peers: shared.peers.summaries(),
            claims_held: shared.claims.held_by(&self.agent_id).len(),
            last_refresh: shared.last_refresh,
        }
    }
}

/// Background task owning all coordination mutations
struct CoordinationLoop {
    agent_id: AgentId,
    bus: Arc<dyn CoordinationBus>,
    topic: Topic,
    claim_ttl: chrono::Duration,
    heartbeat_interval: Duration,
    operation_timeout: Duration,
    shared: Arc<RwLock<Shared>>,
    discovered: Arc<Notify>,
    commands: mpsc::Receiver<Command>,
    /// Whether the bus subscription is currently open
    subscribed: bool,
}

/// Busy while holding confirmed claims, online otherwise
fn own_status(claims: &ClaimTable, agent_id: &AgentId) -> PresenceStatus {
    if claims.held_by(agent_id).is_empty() {
        PresenceStatus::Online
    } else {
        PresenceStatus::Busy
    }
}

async fn next_message(stream: &mut Option<MessageStream>) -> Option<MeshResult<BusMessage>> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

impl CoordinationLoop {
    async fn run(mut self, stream: MessageStream) {
        let mut stream = Some(stream);
        let period = self.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Drain { reply }) => {
                        self.drain().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!(agent_id = %self.agent_id, "Coordinator dropped, stopping loop");
                        break;
                    }
                },
                message = next_message(&mut stream) => match message {
                    Some(Ok(message)) => self.handle_message(message).await,
                    Some(Err(e)) => warn!(error = %e, "Dropping unreadable bus message"),
                    None => {
                        warn!(agent_id = %self.agent_id, "Bus subscription lost");
                        stream = None;
                        self.subscribed = false;
                        self.set_bus_ok(false).await;
                    }
                },
                _ = heartbeat.tick() => {
                    if stream.is_none() {
                        stream = self.resubscribe().await;
                    }
                    self.heartbeat().await;
                }
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Attempt { claim_id, reply } => {
                let now = Utc::now();
                let claim = WorkClaim {
                    claim_id: claim_id.clone(),
                    agent_id: self.agent_id.clone(),
                    claimed_at: now,
                    expires_at: now + self.claim_ttl,
                };
                let begun = self.shared.write().await.claims.begin(claim.clone(), now);
                let answer = match begun {
                    Err(holder) => AttemptReply::Held(holder.agent_id),
                    Ok(()) => match self.publish(BusMessage::Claim(claim)).await {
                        Ok(()) => AttemptReply::Pending,
                        Err(e) => {
                            self.shared
                                .write()
                                .await
                                .claims
                                .release(&claim_id, &self.agent_id);
                            AttemptReply::Failed(e.to_string())
                        }
                    },
                };
                let _ = reply.send(answer);
            }
            Command::Confirm { claim_id, reply } => {
                let confirmed = self
                    .shared
                    .write()
                    .await
                    .claims
                    .confirm(&claim_id, &self.agent_id, Utc::now());
                let _ = reply.send(confirmed);
                if confirmed {
                    debug!(claim_id = %claim_id, "Claim confirmed");
                    self.update_status().await;
                }
            }
            Command::Release { claim_id } => {
                let released = self
                    .shared
                    .write()
                    .await
                    .claims
                    .release(&claim_id, &self.agent_id);
                if released {
                    let release = BusMessage::Release(ClaimRelease {
                        claim_id: claim_id.clone(),
                        agent_id: self.agent_id.clone(),
                    });
                    let _ = self.publish(release).await;
                    debug!(claim_id = %claim_id, "Claim released");
                    self.update_status().await;
                }
            }
            // Handled by the loop itself
            Command::Drain { reply } => {
                let _ = reply.send(());
            }
        }
    }

    async fn handle_message(&mut self, message: BusMessage) {
        if message.sender() == &self.agent_id {
            return;
        }
        let now = Utc::now();

        match message {
            BusMessage::Presence(announcement) => {
                let update = {
                    let mut shared = self.shared.write().await;
                    let update = shared.peers.apply(&announcement);
                    if update != PeerUpdate::Ignored {
                        shared.last_refresh = Some(now);
                    }
                    update
                };
                match update {
                    PeerUpdate::Joined => {
                        info!(
                            peer = %announcement.agent_id,
                            status = announcement.status.as_str(),
                            "Peer joined"
                        );
                        self.discovered.notify_one();
                        self.announce().await;
                    }
                    PeerUpdate::Departed => info!(peer = %announcement.agent_id, "Peer left"),
                    PeerUpdate::Refreshed | PeerUpdate::Ignored => {}
                }
            }
            BusMessage::Claim(claim) => {
                let claim_id = claim.claim_id.clone();
                let peer = claim.agent_id.clone();
                let observation =
                    self.shared
                        .write()
                        .await
                        .claims
                        .observe(claim, &self.agent_id, now);
                match observation {
                    Observation::Preempted { confirmed: true } => {
                        warn!(
                            claim_id = %claim_id,
                            peer = %peer,
                            "Confirmed claim overtaken by an earlier peer claim, work may be duplicated"
                        );
                        self.update_status().await;
                    }
                    Observation::Preempted { confirmed: false } => {
                        debug!(claim_id = %claim_id, peer = %peer, "Yielding provisional claim");
                    }
                    Observation::Defend(ours) => {
                        debug!(claim_id = %claim_id, peer = %peer, "Re-asserting claim");
                        let _ = self.publish(BusMessage::Claim(ours)).await;
                    }
                    Observation::Recorded | Observation::Ignored => {}
                }
            }
            BusMessage::Release(release) => {
                self.shared
                    .write()
                    .await
                    .claims
                    .release(&release.claim_id, &release.agent_id);
            }
        }
    }

    async fn resubscribe(&mut self) -> Option<MessageStream> {
        match timeout(self.operation_timeout, self.bus.subscribe(&self.topic)).await {
            Ok(Ok(stream)) => {
                info!(agent_id = %self.agent_id, "Bus subscription restored");
                self.subscribed = true;
                Some(stream)
            }
            Ok(Err(e)) => {
                debug!(error = %e, "Resubscribe failed");
                None
            }
            Err(_) => {
                debug!("Resubscribe timed out");
                None
            }
        }
    }

    async fn heartbeat(&mut self) {
        let now = Utc::now();
        let (pruned, expired, status) = {
            let mut shared = self.shared.write().await;
            let pruned = shared.peers.prune(now);
            let expired = shared.claims.expire(now);
            if expired > 0 {
                shared.announced = own_status(&shared.claims, &self.agent_id);
            }
            (pruned, expired, shared.announced)
        };
        for peer in &pruned {
            info!(peer = %peer, "Pruned stale peer");
        }
        if expired > 0 {
            debug!(expired, "Dropped expired claims");
        }

        let heartbeat = BusMessage::Presence(PresenceAnnouncement::now(
            self.agent_id.clone(),
            status,
        ));
        if self.publish(heartbeat).await.is_ok() && self.subscribed {
            self.shared.write().await.last_refresh = Some(now);
        }
    }

    async fn drain(&mut self) {
        let _ = self.publish(self.presence(PresenceStatus::Draining)).await;

        let owned = {
            let mut shared = self.shared.write().await;
            let owned = shared.claims.owned_by(&self.agent_id);
            for claim_id in &owned {
                shared.claims.release(claim_id, &self.agent_id);
            }
            owned
        };
        for claim_id in &owned {
            let release = BusMessage::Release(ClaimRelease {
                claim_id: claim_id.clone(),
                agent_id: self.agent_id.clone(),
            });
            let _ = self.publish(release).await;
        }

        let _ = self.publish(self.presence(PresenceStatus::Offline)).await;
        info!(agent_id = %self.agent_id, released = owned.len(), "Coordination drained");
    }

    /// Announce a status change after claims were confirmed or released
    async fn update_status(&self) {
        let changed = {
            let mut shared = self.shared.write().await;
            let status = own_status(&shared.claims, &self.agent_id);
            let changed = shared.announced != status;
            shared.announced = status;
            changed
        };
        if changed {
            self.announce().await;
        }
    }

    async fn announce(&self) {
        let status = self.shared.read().await.announced;
        let _ = self.publish(self.presence(status)).await;
    }

    fn presence(&self, status: PresenceStatus) -> BusMessage {
        BusMessage::Presence(PresenceAnnouncement::now(self.agent_id.clone(), status))
    }

    async fn publish(&self, message: BusMessage) -> MeshResult<()> {
        let limit = self.operation_timeout;
        let result = match timeout(limit, self.bus.publish(&self.topic, &message)).await {
            Ok(result) => result,
            Err(_) => Err(MeshError::Timeout(limit)),
        };
        if let Err(e) = &result {
            warn!(kind = message.kind(), error = %e, "Bus publish failed");
        }
        let ok = result.is_ok() && self.subscribed;
        self.set_bus_ok(ok).await;
        result
    }

    async fn set_bus_ok(&self, ok: bool) {
        let mut shared = self.shared.write().await;
        if shared.state == CoordinationState::Active {
            shared.health = if ok {
                ViewHealth::Fresh
            } else {
                ViewHealth::Unreachable
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBus;
    use beast_core::Platform;

    fn fast_config() -> CoordinatorConfig {
        CoordinatorConfig {
            discovery_timeout: Duration::from_millis(100),
            quiescence_window: Duration::from_millis(30),
            operation_timeout: Duration::from_millis(500),
            ..Default::default()
        }
    }

    #[test]
    fn test_config_validation() {
        let identity = AgentIdentity::new(Platform::Gke);
        let bus: Arc<dyn CoordinationBus> = Arc::new(InMemoryBus::new());

        let bad_topic = CoordinatorConfig {
            topic: "beast mode".into(),
            ..Default::default()
        };
        assert!(Coordinator::new(&identity, bus.clone(), bad_topic).is_err());

        let bad_staleness = CoordinatorConfig {
            staleness_threshold: Duration::from_secs(5),
            ..Default::default()
        };
        assert!(Coordinator::new(&identity, bus.clone(), bad_staleness).is_err());

        assert!(Coordinator::new(&identity, bus, CoordinatorConfig::default()).is_ok());
    }

    #[test]
    fn test_from_beast_mode_config() {
        let beast = BeastModeConfig {
            topic: "beast-prod".into(),
            quiescence_window: Duration::from_millis(100),
            ..Default::default()
        };
        let config = CoordinatorConfig::from(&beast);
        assert_eq!(config.topic, "beast-prod");
        assert_eq!(config.quiescence_window, Duration::from_millis(100));
        assert!(!config.lazy_start);
    }

    #[tokio::test]
    async fn test_initial_state() {
        let identity = AgentIdentity::new(Platform::CloudFunctions);
        let bus: Arc<dyn CoordinationBus> = Arc::new(InMemoryBus::new());

        let eager = Coordinator::new(&identity, bus.clone(), fast_config()).unwrap();
        let snapshot = eager.snapshot().await;
        assert_eq!(snapshot.state, CoordinationState::Inactive);
        assert_eq!(snapshot.view, ViewHealth::Discovering);

        let lazy = Coordinator::new(&identity, bus, fast_config().with_lazy_start(true)).unwrap();
        assert_eq!(lazy.snapshot().await.view, ViewHealth::Deferred);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let identity = AgentIdentity::new(Platform::Gke);
        let coordinator =
            Coordinator::new(&identity, Arc::new(InMemoryBus::new()), fast_config()).unwrap();

        coordinator.start().await.unwrap();
        let snapshot = coordinator.snapshot().await;
        assert_eq!(snapshot.state, CoordinationState::Active);
        assert_eq!(snapshot.view, ViewHealth::Fresh);
        // Own announcements are not peers
        assert!(snapshot.peers.is_empty());

        coordinator.shutdown().await;
        assert_eq!(coordinator.state().await, CoordinationState::Inactive);
        assert!(coordinator.start().await.is_err());
    }
    fn require_send<F: std::future::Future + Send>(future: F) -> F {
        future
    }

    #[tokio::test]
    async fn test_start_runs_on_spawned_task() {
        let identity = AgentIdentity::new(Platform::CloudRun);
        let coordinator = Arc::new(
            Coordinator::new(&identity, Arc::new(InMemoryBus::new()), fast_config()).unwrap(),
        );

        let background = Arc::clone(&coordinator);
        tokio::spawn(require_send(async move { background.start().await }))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(coordinator.state().await, CoordinationState::Active);

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_expired_claim_clears_busy_status() {
        let bus = InMemoryBus::new();
        let topic = Topic::parse("beast-mode").unwrap();
        let mut listener = bus.subscribe(&topic).await.unwrap();

        let identity = AgentIdentity::new(Platform::Gke);
        let config = CoordinatorConfig {
            heartbeat_interval: Duration::from_millis(50),
            staleness_threshold: Duration::from_millis(200),
            discovery_timeout: Duration::from_millis(50),
            quiescence_window: Duration::from_millis(10),
            claim_ttl: Duration::from_millis(100),
            operation_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        let coordinator = Coordinator::new(&identity, Arc::new(bus), config).unwrap();
        coordinator.start().await.unwrap();

        let guard = match coordinator.try_claim(&ClaimId::from_wire("job-1")).await {
            ClaimOutcome::Acquired(guard) => guard,
            other => panic!("expected an acquired claim, got {other:?}"),
        };
        assert_eq!(coordinator.snapshot().await.claims_held, 1);

        sleep(Duration::from_millis(300)).await;
        assert_eq!(coordinator.snapshot().await.claims_held, 0);

        let mut statuses = Vec::new();
        while let Ok(Some(message)) = timeout(Duration::from_millis(20), listener.next()).await {
            if let Ok(BusMessage::Presence(presence)) = message
                && &presence.agent_id == identity.agent_id()
            {
                statuses.push(presence.status);
            }
        }
        assert!(statuses.contains(&PresenceStatus::Busy));
        assert_eq!(statuses.last(), Some(&PresenceStatus::Online));

        drop(guard);
        coordinator.shutdown().await;
    }
}
