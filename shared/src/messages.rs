//! Wire protocol: event-tagged messages exchanged with the game server.
//!
//! Messages travel as u32-length-prefixed bincode frames over a persistent
//! TCP stream. Pushes for one session arrive in socket order; there is no
//! cross-session ordering guarantee.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Number of bytes in the frame length prefix.
pub const FRAME_HEADER_LEN: usize = 4;
/// Upper bound on a single frame body; anything larger is a protocol error.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Encodes one message as a length-prefixed frame.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>, bincode::Error> {
    let body = bincode::serialize(message)?;
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decodes a frame body (the bytes after the length prefix).
pub fn decode_frame<'a, T: Deserialize<'a>>(body: &'a [u8]) -> Result<T, bincode::Error> {
    bincode::deserialize(body)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEffect {
    /// Remaining duration in milliseconds.
    pub ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemInfo {
    pub name: String,
    pub level: Option<u32>,
    /// Stack quantity; `None` for unstackable items.
    pub q: Option<u32>,
    /// Special modifier (shiny, glitched, ...).
    pub p: Option<String>,
}

/// An equipment or merchant-stand slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotItem {
    pub name: String,
    pub level: Option<u32>,
    pub p: Option<String>,
    /// Listing price when this is a trade slot.
    pub price: Option<u64>,
    pub q: Option<u32>,
    /// Listing id when this is a trade slot.
    pub rid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BankInfo {
    pub gold: u64,
    /// Pack name ("items0" .. "items47") -> slots.
    pub packs: HashMap<String, Vec<Option<ItemInfo>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Milliseconds until the queued action finishes.
    pub ms: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueInfo {
    pub upgrade: Option<QueueEntry>,
    pub compound: Option<QueueEntry>,
}

/// Full or partial character snapshot. Fields the server may omit on
/// incremental updates are optional and merged over the previous mirror.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharacterSnapshot {
    pub id: String,
    pub map: String,
    pub x: f64,
    pub y: f64,
    pub going_x: Option<f64>,
    pub going_y: Option<f64>,
    pub moving: Option<bool>,
    pub speed: f64,
    pub hp: f64,
    pub max_hp: f64,
    pub mp: f64,
    pub max_mp: f64,
    /// Mana cost of a plain attack.
    pub mp_cost: f64,
    pub level: u32,
    pub xp: f64,
    pub rip: bool,
    pub ctype: String,
    pub gold: u64,
    pub range: f64,
    pub attack: f64,
    /// Map instance counter, echoed back in move messages.
    pub m: u64,
    pub items: Vec<Option<ItemInfo>>,
    pub slots: HashMap<String, Option<SlotItem>>,
    /// Status conditions with remaining-duration timers.
    pub s: HashMap<String, StatusEffect>,
    /// Channeling actions (e.g. a town warp in progress).
    pub c: HashMap<String, StatusEffect>,
    pub q: QueueInfo,
    /// Bank contents, only present while standing in a bank.
    pub user: Option<BankInfo>,
    /// Piggybacked game responses delivered with the snapshot.
    pub hitchhikers: Vec<GameResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: String,
    /// Monster type, a key into the reference dataset.
    pub kind: String,
    pub map: Option<String>,
    pub x: f64,
    pub y: f64,
    pub going_x: f64,
    pub going_y: f64,
    pub moving: bool,
    /// Fields the server omits when they match the dataset defaults.
    pub hp: Option<f64>,
    pub max_hp: Option<f64>,
    pub mp: Option<f64>,
    pub speed: Option<f64>,
    pub attack: Option<f64>,
    pub range: Option<f64>,
    pub level: Option<u32>,
    pub xp: Option<f64>,
    pub target: Option<String>,
    pub s: HashMap<String, StatusEffect>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: String,
    pub map: Option<String>,
    pub x: f64,
    pub y: f64,
    pub going_x: f64,
    pub going_y: f64,
    pub moving: bool,
    pub speed: f64,
    pub hp: f64,
    pub max_hp: f64,
    pub level: u32,
    pub rip: bool,
    pub ctype: String,
    /// Set when this "player" is actually a vendor NPC.
    pub npc: Option<String>,
    pub target: Option<String>,
    pub s: HashMap<String, StatusEffect>,
    /// Equipment and merchant-stand slots.
    pub slots: HashMap<String, Option<SlotItem>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefreshKind {
    /// Replace everything we know about nearby entities.
    Full,
    /// Merge over the existing mirror.
    Incremental,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitiesData {
    pub kind: RefreshKind,
    pub map: String,
    pub monsters: Vec<EntitySnapshot>,
    pub players: Vec<PlayerSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WelcomeData {
    pub region: String,
    pub name: String,
    pub map: String,
    pub x: f64,
    pub y: f64,
    pub pvp: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartData {
    pub character: CharacterSnapshot,
    pub entities: Option<EntitiesData>,
    pub server_info: HashMap<String, ServerEvent>,
}

/// Server-wide special monster status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEvent {
    pub live: bool,
    pub map: Option<String>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub hp: Option<f64>,
    pub max_hp: Option<f64>,
    pub target: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapEffect {
    /// Arrived via a town warp.
    Town,
    /// Arrived via a magiport.
    Magiport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMapData {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub m: u64,
    pub effect: Option<MapEffect>,
    pub entities: Option<EntitiesData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionData {
    pub attacker: String,
    pub target: String,
    /// Skill that produced the projectile ("attack", "supershot", ...).
    pub kind: String,
    pub pid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitData {
    pub id: String,
    pub pid: String,
    pub damage: Option<f64>,
    pub kill: bool,
    pub miss: bool,
    pub evade: bool,
    pub reflect: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChestDropData {
    pub id: String,
    pub map: String,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChestOpenedData {
    pub id: String,
    pub gold: u64,
    pub items: Vec<ItemInfo>,
}

/// Structured success/failure record attached to many command outcomes.
/// The `response` code drives interpretation; the remaining fields are
/// populated per code.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GameResponse {
    pub response: String,
    pub id: Option<String>,
    pub skill: Option<String>,
    pub name: Option<String>,
    pub place: Option<String>,
    pub ms: Option<i64>,
    pub num: Option<u32>,
    pub gold: Option<u64>,
    pub dist: Option<f64>,
    pub q: Option<u32>,
}

impl GameResponse {
    pub fn code(response: impl Into<String>) -> Self {
        GameResponse {
            response: response.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartyData {
    pub list: Vec<String>,
    pub leader: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpgradeKind {
    Upgrade,
    Compound,
    Exchange,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeData {
    pub kind: UpgradeKind,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisappearingTextData {
    pub id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiData {
    pub kind: String,
    pub ids: Vec<String>,
}

/// Everything the server can push at us.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerPush {
    Welcome(WelcomeData),
    Start(StartData),
    Character(CharacterSnapshot),
    Entities(EntitiesData),
    NewMap(NewMapData),
    Death { id: String },
    Disappear { id: String },
    DisappearingText(DisappearingTextData),
    ChestDrop(ChestDropData),
    ChestOpened(ChestOpenedData),
    Action(ActionData),
    Hit(HitData),
    /// Generated code fragments; cooldowns arrive through here.
    Eval { code: String },
    GameResponse(GameResponse),
    GameError { message: String },
    PartyUpdate(PartyData),
    PingAck { id: u64 },
    ServerInfo(HashMap<String, ServerEvent>),
    Upgrade(UpgradeData),
    Ui(UiData),
    QueueData(QueueInfo),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BankOperation {
    Deposit { amount: u64 },
    Withdraw { amount: u64 },
    /// Swap between an inventory slot and a bank pack slot. A slot of -1
    /// lets the server pick one (stacking onto an existing pile).
    Swap {
        pack: String,
        pack_slot: i64,
        inventory_slot: i64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PartyEvent {
    Invite { name: String },
    Request { name: String },
    Accept { name: String },
    AcceptRequest { name: String },
    Leave,
}

/// Everything we can send to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Client-ready acknowledgment sent in response to `Welcome`.
    Loaded {
        success: bool,
        width: u32,
        height: u32,
        scale: u32,
    },
    Auth {
        user: String,
        auth: String,
        character: String,
        width: u32,
        height: u32,
        scale: u32,
        no_graphics: bool,
    },
    Move {
        x: f64,
        y: f64,
        going_x: f64,
        going_y: f64,
        m: u64,
    },
    Attack { id: String },
    Skill {
        name: String,
        id: Option<String>,
        x: Option<f64>,
        y: Option<f64>,
    },
    /// Use a consumable ("hp" / "mp" for base regen).
    Use { item: String },
    Buy { name: String, quantity: Option<u32> },
    Sell { num: usize, quantity: u32 },
    TradeBuy {
        id: String,
        slot: String,
        rid: String,
        q: u32,
    },
    Equip { num: usize, slot: Option<String> },
    Unequip { slot: String },
    Bank(BankOperation),
    Upgrade {
        item_num: usize,
        scroll_num: usize,
        clevel: u32,
    },
    Compound {
        items: [usize; 3],
        scroll_num: usize,
        clevel: u32,
    },
    Exchange { item_num: usize, q: u32 },
    Party(PartyEvent),
    SendGold { to: String, gold: u64 },
    SendItem { to: String, num: usize, q: u32 },
    Respawn,
    /// Begin a town warp.
    Town,
    /// Cancel a channeled action ("town").
    Stop { action: String },
    Transport { to: String, spawn: usize },
    /// Leave a dead-end map back to the default map.
    Leave,
    OpenChest { id: String },
    /// Property toggle used to provoke a fresh character push.
    Property { typing: bool },
    Ping { id: u64 },
}
