//! Connection/session core.
//!
//! One session owns one socket, its mirrored state, and the background
//! tasks that keep them in sync. Pushes are dispatched in arrival order:
//! the state mirror is updated first, then the push is fanned out to
//! command correlators. Sessions do not reconnect by themselves;
//! reconnection policy belongs to the caller.

use crate::bus::PushBus;
use crate::context::Context;
use crate::error::ClientError;
use crate::evals::{DefaultEvalParser, EvalHint, EvalParser};
use crate::sightings::{now_ms, EntitySighting, PlayerSighting};
use crate::socket::Socket;
use crate::state::{Character, Entity, State};
use log::{debug, error, info, warn};
use shared::messages::{
    ClientMessage, EntitiesData, GameResponse, NewMapData, ServerEvent, ServerPush, UpgradeKind,
    WelcomeData,
};
use shared::{Position, SPECIAL_MONSTERS};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

/// Opaque authentication payload. The session never inspects these values;
/// they pass straight through to the server.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user_id: String,
    pub user_auth: String,
    pub character_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    AwaitingWelcome,
    AwaitingStart,
    Ready,
}

pub struct Session {
    pub(crate) context: Arc<Context>,
    pub(crate) socket: Socket,
    pub(crate) bus: PushBus,
    pub(crate) state: RwLock<State>,
    pub(crate) status: Mutex<SessionStatus>,
    pub(crate) credentials: Option<Credentials>,
    pub(crate) parser: Box<dyn EvalParser>,
    /// Monotonic counter; a newer route supersedes an older one.
    pub(crate) route_epoch: AtomicU64,
    ping_counter: AtomicU64,
    ping_sent: Mutex<HashMap<u64, Instant>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Connects, authenticates, and resolves once the initial state
    /// snapshot arrives. Rejects on an explicit game error or when the
    /// handshake deadline passes.
    pub async fn connect(
        context: Arc<Context>,
        addr: &str,
        credentials: Credentials,
    ) -> Result<Arc<Session>, ClientError> {
        Self::establish(context, addr, Some(credentials)).await
    }

    /// Connects as a bare observer: no authentication, no character mirror,
    /// but entity tracking and sighting recording still run.
    pub async fn observe(context: Arc<Context>, addr: &str) -> Result<Arc<Session>, ClientError> {
        Self::establish(context, addr, None).await
    }

    async fn establish(
        context: Arc<Context>,
        addr: &str,
        credentials: Option<Credentials>,
    ) -> Result<Arc<Session>, ClientError> {
        info!("Connecting to {}...", addr);

        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let socket = Socket::connect(addr, push_tx).await?;
        let state = State::new(&context.config);

        let session = Arc::new(Session {
            context,
            socket,
            bus: PushBus::new(),
            state: RwLock::new(state),
            status: Mutex::new(SessionStatus::AwaitingWelcome),
            credentials,
            parser: Box::new(DefaultEvalParser),
            route_epoch: AtomicU64::new(0),
            ping_counter: AtomicU64::new(1),
            ping_sent: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
        });

        // Subscribe before the dispatcher starts so a fast server cannot
        // deliver the handshake pushes ahead of the waiter.
        let rx = session.bus.subscribe();
        session.spawn_dispatcher(push_rx);

        let is_player = session.credentials.is_some();
        let connected = session
            .bus
            .wait(rx, session.context.config.connect_timeout, |push| {
                match push {
                    // Players are connected once the full initial snapshot
                    // arrives; observers once the server says hello.
                    ServerPush::Start(_) if is_player => Some(Ok(())),
                    ServerPush::Welcome(_) if !is_player => Some(Ok(())),
                    ServerPush::GameError { message } => Some(Err(ClientError::Connection(
                        format!("game error during connect: {}", message),
                    ))),
                    _ => None,
                }
            })
            .await;

        if let Err(e) = connected {
            session.disconnect().await;
            return Err(e);
        }

        *session.status.lock().unwrap() = SessionStatus::Ready;
        session.spawn_ping_loop();
        info!("Connected");
        Ok(session)
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.lock().unwrap()
    }

    /// Tears the session down: closes the socket and cancels every
    /// background task the session owns. Does not retry.
    pub async fn disconnect(&self) {
        let already_down = {
            let mut status = self.status.lock().unwrap();
            let was = *status == SessionStatus::Disconnected;
            *status = SessionStatus::Disconnected;
            was
        };
        if already_down {
            return;
        }
        warn!("Disconnecting!");

        self.socket.shutdown();
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }

    fn spawn_dispatcher(self: &Arc<Self>, mut push_rx: mpsc::UnboundedReceiver<ServerPush>) {
        let weak: Weak<Session> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while let Some(push) = push_rx.recv().await {
                let Some(session) = weak.upgrade() else {
                    break;
                };
                session.dispatch(push).await;
            }
            debug!("push channel closed, dispatcher exiting");
        });
        self.tasks.lock().unwrap().push(task);
    }

    fn spawn_ping_loop(self: &Arc<Self>) {
        let weak: Weak<Session> = Arc::downgrade(self);
        let every = self.context.config.ping_every;
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; that first sample is useful.
            loop {
                interval.tick().await;
                let Some(session) = weak.upgrade() else {
                    break;
                };
                if session.send_ping().is_err() {
                    break;
                }
            }
        });
        self.tasks.lock().unwrap().push(task);
    }

    /// Sends one latency probe. The matching ack feeds the rolling window.
    pub fn send_ping(&self) -> Result<u64, ClientError> {
        let id = self.ping_counter.fetch_add(1, Ordering::Relaxed);
        self.ping_sent.lock().unwrap().insert(id, Instant::now());
        self.socket.send(ClientMessage::Ping { id })?;
        Ok(id)
    }

    /// Updates the mirror for one push, then fans it out to correlators.
    async fn dispatch(self: &Arc<Self>, push: ServerPush) {
        match &push {
            ServerPush::Welcome(welcome) => self.handle_welcome(welcome).await,
            ServerPush::Start(start) => {
                let mut state = self.state.write().await;
                state.apply_character(&start.character, &self.context.game_data);
                if let Some(entities) = &start.entities {
                    state.apply_entities(entities, &self.context.game_data);
                }
                state.server_info = start.server_info.clone();
                drop(state);
                *self.status.lock().unwrap() = SessionStatus::Ready;
            }
            ServerPush::Character(snapshot) => {
                {
                    let mut state = self.state.write().await;
                    state.apply_character(snapshot, &self.context.game_data);
                }
                // Hitchhiking game responses are re-dispatched so command
                // correlators see them as first-class pushes.
                for hitchhiker in &snapshot.hitchhikers {
                    self.handle_game_response(hitchhiker).await;
                    self.bus
                        .publish(Arc::new(ServerPush::GameResponse(hitchhiker.clone())));
                }
            }
            ServerPush::Entities(entities) => {
                {
                    let mut state = self.state.write().await;
                    state.apply_entities(entities, &self.context.game_data);
                }
                self.record_sightings(entities).await;
            }
            ServerPush::NewMap(new_map) => self.handle_new_map(new_map).await,
            ServerPush::Death { id } => {
                let removed = {
                    let mut state = self.state.write().await;
                    state.apply_death(id)
                };
                if let Some(entity) = removed {
                    self.forget_special(&entity).await;
                }
            }
            ServerPush::Disappear { id } => {
                let mut state = self.state.write().await;
                state.apply_disappear(id);
            }
            ServerPush::ChestDrop(chest) => {
                let mut state = self.state.write().await;
                state.chests.insert(chest.id.clone(), chest.clone());
            }
            ServerPush::ChestOpened(opened) => {
                let mut state = self.state.write().await;
                state.chests.remove(&opened.id);
            }
            ServerPush::Action(action) => {
                let mut state = self.state.write().await;
                state.projectiles.insert(action.pid.clone(), action.clone());
            }
            ServerPush::Hit(hit) => {
                let mut state = self.state.write().await;
                state.apply_hit(hit);
            }
            ServerPush::Eval { code } => self.handle_eval(code).await,
            ServerPush::GameResponse(response) => self.handle_game_response(response).await,
            ServerPush::GameError { message } => {
                error!("Game error: {}", message);
            }
            ServerPush::PartyUpdate(party) => {
                let mut state = self.state.write().await;
                state.party = Some(party.clone());
            }
            ServerPush::PingAck { id } => {
                let sent = self.ping_sent.lock().unwrap().remove(id);
                if let Some(sent) = sent {
                    let round_trip = sent.elapsed().as_millis() as u64;
                    debug!("Ping: {}ms", round_trip);
                    let mut state = self.state.write().await;
                    state.record_ping(round_trip);
                }
            }
            ServerPush::ServerInfo(info) => self.handle_server_info(info).await,
            ServerPush::Upgrade(result) => {
                let mut state = self.state.write().await;
                if let Some(character) = state.character.as_mut() {
                    match result.kind {
                        UpgradeKind::Upgrade => character.q.upgrade = None,
                        UpgradeKind::Compound => character.q.compound = None,
                        UpgradeKind::Exchange => {}
                    }
                }
            }
            ServerPush::QueueData(queue) => {
                let mut state = self.state.write().await;
                if let Some(character) = state.character.as_mut() {
                    if queue.upgrade.is_some() {
                        character.q.upgrade = queue.upgrade;
                    }
                    if queue.compound.is_some() {
                        character.q.compound = queue.compound;
                    }
                }
            }
            ServerPush::DisappearingText(_) | ServerPush::Ui(_) => {}
        }

        self.bus.publish(Arc::new(push));
    }

    async fn handle_welcome(self: &Arc<Self>, welcome: &WelcomeData) {
        {
            let mut state = self.state.write().await;
            state.server = Some(welcome.clone());
            state.observed = Some(Position::new(welcome.map.clone(), welcome.x, welcome.y));
        }
        *self.status.lock().unwrap() = SessionStatus::AwaitingStart;

        // Tell the server we are ready, then authenticate if we are a
        // player rather than a bare observer.
        let loaded = self.socket.send(ClientMessage::Loaded {
            success: true,
            width: 1920,
            height: 1080,
            scale: 2,
        });
        if let Err(e) = loaded {
            error!("Failed to acknowledge welcome: {}", e);
            return;
        }

        if let Some(credentials) = &self.credentials {
            let auth = self.socket.send(ClientMessage::Auth {
                user: credentials.user_id.clone(),
                auth: credentials.user_auth.clone(),
                character: credentials.character_id.clone(),
                width: 1920,
                height: 1080,
                scale: 2,
                no_graphics: true,
            });
            if let Err(e) = auth {
                error!("Failed to authenticate: {}", e);
            }
        }
    }

    async fn handle_new_map(self: &Arc<Self>, new_map: &NewMapData) {
        let mut state = self.state.write().await;
        state.projectiles.clear();
        if let Some(entities) = &new_map.entities {
            state.apply_entities(entities, &self.context.game_data);
        }
        state.observed = Some(Position::new(new_map.name.clone(), new_map.x, new_map.y));
        if let Some(character) = state.character.as_mut() {
            character.map = new_map.name.clone();
            character.x = new_map.x;
            character.y = new_map.y;
            character.going_x = new_map.x;
            character.going_y = new_map.y;
            character.moving = false;
            character.m = new_map.m;
        }
    }

    /// Structured responses double as a cooldown side channel.
    async fn handle_game_response(self: &Arc<Self>, response: &GameResponse) {
        match response.response.as_str() {
            "cooldown" => {
                if let Some(skill) = &response.skill {
                    if let Some(ms) = response.ms {
                        let mut state = self.state.write().await;
                        state.set_next_skill(skill, ms as f64);
                    }
                }
            }
            "skill_success" => {
                if let Some(skill) = &response.name {
                    let cooldown = self
                        .context
                        .game_data
                        .skills
                        .get(skill)
                        .and_then(|s| s.cooldown);
                    if let Some(cooldown) = cooldown {
                        let mut state = self.state.write().await;
                        state.set_next_skill(skill, cooldown);
                    }
                }
            }
            "ex_condition" => {
                if let Some(name) = &response.name {
                    let mut state = self.state.write().await;
                    if let Some(character) = state.character.as_mut() {
                        character.s.remove(name);
                    }
                }
            }
            other => {
                debug!("game response: {}", other);
            }
        }
    }

    /// Cooldowns that only exist as text in eval pushes.
    async fn handle_eval(self: &Arc<Self>, code: &str) {
        match self.parser.parse(code) {
            Some(EvalHint::SkillTimeout { skill, ms }) => {
                let ms = ms.or_else(|| {
                    self.context
                        .game_data
                        .skills
                        .get(&skill)
                        .and_then(|s| s.cooldown)
                });
                if let Some(ms) = ms {
                    let mut state = self.state.write().await;
                    state.set_next_skill(&skill, ms);
                }
            }
            Some(EvalHint::PotionTimeout { ms }) => {
                let mut state = self.state.write().await;
                state.set_next_skill("use_hp", ms);
                state.set_next_skill("use_mp", ms);
            }
            None => {
                debug!("unrecognized eval payload: {}", code);
            }
        }
    }

    async fn handle_server_info(self: &Arc<Self>, info: &HashMap<String, ServerEvent>) {
        let server = self.server_key().await;
        for (kind, event) in info {
            if !SPECIAL_MONSTERS.contains(&kind.as_str()) {
                continue;
            }
            if event.live {
                if let (Some(map), Some(x), Some(y)) = (&event.map, event.x, event.y) {
                    self.context.sightings.record_entity(EntitySighting {
                        kind: kind.clone(),
                        id: None,
                        server: server.clone(),
                        map: map.clone(),
                        x,
                        y,
                        hp: event.hp.or_else(|| {
                            self.context.game_data.monsters.get(kind).map(|m| m.hp)
                        }),
                        target: event.target.clone(),
                        last_seen_ms: now_ms(),
                    });
                }
            } else {
                self.context.sightings.remove_entity(kind, &server);
            }
        }

        let mut state = self.state.write().await;
        state.server_info = info.clone();
    }

    /// Publishes player and special-monster sightings for other sessions.
    async fn record_sightings(self: &Arc<Self>, entities: &EntitiesData) {
        let server = self.server_key().await;

        for player in &entities.players {
            if player.npc.is_some() {
                continue;
            }
            self.context.sightings.record_player(PlayerSighting {
                name: player.id.clone(),
                server: server.clone(),
                map: player.map.clone().unwrap_or_else(|| entities.map.clone()),
                x: player.x,
                y: player.y,
                last_seen_ms: now_ms(),
            });
        }

        for monster in &entities.monsters {
            if !SPECIAL_MONSTERS.contains(&monster.kind.as_str()) {
                continue;
            }
            self.context.sightings.record_entity(EntitySighting {
                kind: monster.kind.clone(),
                id: Some(monster.id.clone()),
                server: server.clone(),
                map: monster.map.clone().unwrap_or_else(|| entities.map.clone()),
                x: monster.x,
                y: monster.y,
                hp: monster.hp,
                target: monster.target.clone(),
                last_seen_ms: now_ms(),
            });
        }
    }

    async fn forget_special(self: &Arc<Self>, entity: &Entity) {
        if SPECIAL_MONSTERS.contains(&entity.kind.as_str()) {
            let server = self.server_key().await;
            self.context.sightings.remove_entity(&entity.kind, &server);
        }
    }

    async fn server_key(&self) -> String {
        let state = self.state.read().await;
        state
            .server
            .as_ref()
            .map(|s| format!("{}-{}", s.region, s.name))
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// A fresh copy of the character mirror, extrapolated to now.
    pub async fn character(&self) -> Option<Character> {
        let mut state = self.state.write().await;
        state.update_positions();
        state.character.clone()
    }

    /// Current mirrored position: the character's for players, the observed
    /// camera position for observers.
    pub async fn position(&self) -> Option<Position> {
        let mut state = self.state.write().await;
        state.update_positions();
        state
            .character
            .as_ref()
            .map(|c| c.position())
            .or_else(|| state.observed.clone())
    }

    pub async fn entities(&self) -> Vec<Entity> {
        let mut state = self.state.write().await;
        state.update_positions();
        state.entities.values().cloned().collect()
    }

    pub async fn players(&self) -> Vec<shared::messages::PlayerSnapshot> {
        let mut state = self.state.write().await;
        state.update_positions();
        state.players.values().cloned().collect()
    }

    pub async fn party(&self) -> Option<shared::messages::PartyData> {
        self.state.read().await.party.clone()
    }

    pub async fn latency_ms(&self) -> u64 {
        self.state.read().await.latency_ms()
    }

    pub async fn cooldown_remaining(&self, skill: &str) -> Duration {
        self.state.read().await.cooldown_remaining(skill)
    }

    pub async fn can_use(&self, skill: &str) -> bool {
        self.state
            .read()
            .await
            .can_use(skill, &self.context.game_data)
    }
}
