//! The mirrored game state for one session.
//!
//! Nothing in here is authoritative. The server pushes full and incremental
//! snapshots; between pushes, moving things are extrapolated along their
//! reported velocity from elapsed wall-clock time. Consumers must treat
//! every read as a latency-skewed approximation.

use crate::config::ClientConfig;
use log::warn;
use shared::data::GameData;
use shared::distance;
use shared::messages::{
    ActionData, BankInfo, CharacterSnapshot, ChestDropData, EntitiesData, EntitySnapshot,
    HitData, ItemInfo, PartyData, PlayerSnapshot, QueueInfo, RefreshKind, ServerEvent, SlotItem,
    StatusEffect, WelcomeData,
};
use shared::Position;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Our own character's mirror. Created on the first snapshot after a
/// successful handshake; merged in place on every push afterwards.
#[derive(Debug, Clone)]
pub struct Character {
    pub id: String,
    pub map: String,
    pub x: f64,
    pub y: f64,
    pub going_x: f64,
    pub going_y: f64,
    pub moving: bool,
    pub speed: f64,
    pub hp: f64,
    pub max_hp: f64,
    pub mp: f64,
    pub max_mp: f64,
    pub mp_cost: f64,
    pub level: u32,
    pub xp: f64,
    pub rip: bool,
    pub ctype: String,
    pub gold: u64,
    pub range: f64,
    pub attack: f64,
    pub m: u64,
    pub items: Vec<Option<ItemInfo>>,
    pub slots: HashMap<String, Option<SlotItem>>,
    pub s: HashMap<String, StatusEffect>,
    pub c: HashMap<String, StatusEffect>,
    pub q: QueueInfo,
    pub damage_type: Option<String>,
}

impl Character {
    fn from_snapshot(snapshot: &CharacterSnapshot, data: &GameData) -> Character {
        Character {
            id: snapshot.id.clone(),
            map: snapshot.map.clone(),
            x: snapshot.x,
            y: snapshot.y,
            going_x: snapshot.going_x.unwrap_or(snapshot.x),
            going_y: snapshot.going_y.unwrap_or(snapshot.y),
            moving: false,
            speed: snapshot.speed,
            hp: snapshot.hp,
            max_hp: snapshot.max_hp,
            mp: snapshot.mp,
            max_mp: snapshot.max_mp,
            mp_cost: snapshot.mp_cost,
            level: snapshot.level,
            xp: snapshot.xp,
            rip: snapshot.rip,
            ctype: snapshot.ctype.clone(),
            gold: snapshot.gold,
            range: snapshot.range,
            attack: snapshot.attack,
            m: snapshot.m,
            items: snapshot.items.clone(),
            slots: snapshot.slots.clone(),
            s: snapshot.s.clone(),
            c: snapshot.c.clone(),
            q: snapshot.q,
            damage_type: data
                .classes
                .get(&snapshot.ctype)
                .map(|c| c.damage_type.clone()),
        }
    }

    /// Merges an incremental snapshot. The motion fields belong to the
    /// extrapolator and the optimistic mover; `moving` is never taken from
    /// the snapshot.
    fn merge(&mut self, snapshot: &CharacterSnapshot) {
        self.map = snapshot.map.clone();
        self.x = snapshot.x;
        self.y = snapshot.y;
        if let Some(going_x) = snapshot.going_x {
            self.going_x = going_x;
        }
        if let Some(going_y) = snapshot.going_y {
            self.going_y = going_y;
        }
        self.speed = snapshot.speed;
        self.hp = snapshot.hp;
        self.max_hp = snapshot.max_hp;
        self.mp = snapshot.mp;
        self.max_mp = snapshot.max_mp;
        self.mp_cost = snapshot.mp_cost;
        self.level = snapshot.level;
        self.xp = snapshot.xp;
        self.rip = snapshot.rip;
        self.gold = snapshot.gold;
        self.range = snapshot.range;
        self.attack = snapshot.attack;
        self.m = snapshot.m;
        self.items = snapshot.items.clone();
        self.slots = snapshot.slots.clone();
        self.s = snapshot.s.clone();
        self.c = snapshot.c.clone();
        self.q = snapshot.q;
    }

    /// Merges a sighting of ourselves from an entities push.
    fn merge_player(&mut self, player: &PlayerSnapshot) {
        if let Some(map) = &player.map {
            self.map = map.clone();
        }
        self.x = player.x;
        self.y = player.y;
        self.going_x = player.going_x;
        self.going_y = player.going_y;
        self.moving = player.moving;
        self.speed = player.speed;
        self.hp = player.hp;
        self.max_hp = player.max_hp;
        self.level = player.level;
        self.rip = player.rip;
        self.s = player.s.clone();
    }

    pub fn position(&self) -> Position {
        Position::new(self.map.clone(), self.x, self.y)
    }

    /// Whether every inventory slot is occupied.
    pub fn is_full(&self) -> bool {
        self.items.iter().all(|slot| slot.is_some())
    }

    pub fn has_item(&self, name: &str) -> bool {
        self.locate_item(name).is_some()
    }

    /// Index of the first inventory slot holding the item.
    pub fn locate_item(&self, name: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|slot| slot.as_ref().map_or(false, |item| item.name == name))
    }

    /// All inventory slots holding the item.
    pub fn locate_items(&self, name: &str) -> Vec<usize> {
        self.items
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                slot.as_ref()
                    .filter(|item| item.name == name)
                    .map(|_| i)
            })
            .collect()
    }

    /// Total quantity held across all inventory stacks.
    pub fn count_item(&self, name: &str) -> u32 {
        count_in(&self.items, name)
    }

    pub fn is_equipped(&self, name: &str) -> bool {
        self.slots
            .values()
            .any(|slot| slot.as_ref().map_or(false, |item| item.name == name))
    }
}

/// Counts an item across a slot list (inventory or a bank pack).
pub fn count_in(slots: &[Option<ItemInfo>], name: &str) -> u32 {
    slots
        .iter()
        .flatten()
        .filter(|item| item.name == name)
        .map(|item| item.q.unwrap_or(1))
        .sum()
}

/// A nearby monster's mirror, soft-filled from the reference dataset.
#[derive(Debug, Clone)]
pub struct Entity {
    pub id: String,
    pub kind: String,
    pub map: String,
    pub x: f64,
    pub y: f64,
    pub going_x: f64,
    pub going_y: f64,
    pub moving: bool,
    pub speed: f64,
    pub hp: f64,
    pub max_hp: f64,
    pub mp: f64,
    pub attack: f64,
    pub range: f64,
    pub level: u32,
    pub xp: f64,
    pub target: Option<String>,
    pub s: HashMap<String, StatusEffect>,
}

impl Entity {
    fn from_snapshot(snapshot: &EntitySnapshot, data: &GameData, fallback_map: &str) -> Entity {
        let defaults = data.monsters.get(&snapshot.kind);
        let default = |field: Option<f64>, pick: fn(&shared::data::MonsterData) -> f64| {
            field.unwrap_or_else(|| defaults.map(pick).unwrap_or(0.0))
        };

        Entity {
            id: snapshot.id.clone(),
            kind: snapshot.kind.clone(),
            map: snapshot
                .map
                .clone()
                .unwrap_or_else(|| fallback_map.to_string()),
            x: snapshot.x,
            y: snapshot.y,
            going_x: snapshot.going_x,
            going_y: snapshot.going_y,
            moving: snapshot.moving,
            speed: default(snapshot.speed, |m| m.speed),
            hp: default(snapshot.hp, |m| m.hp),
            max_hp: default(snapshot.max_hp, |m| m.hp),
            mp: default(snapshot.mp, |m| m.mp),
            attack: default(snapshot.attack, |m| m.attack),
            range: default(snapshot.range, |m| m.range),
            level: snapshot.level.unwrap_or(1),
            xp: default(snapshot.xp, |m| m.xp),
            target: snapshot.target.clone(),
            s: snapshot.s.clone(),
        }
    }

    fn merge(&mut self, snapshot: &EntitySnapshot) {
        self.x = snapshot.x;
        self.y = snapshot.y;
        self.going_x = snapshot.going_x;
        self.going_y = snapshot.going_y;
        self.moving = snapshot.moving;
        if let Some(map) = &snapshot.map {
            self.map = map.clone();
        }
        if let Some(hp) = snapshot.hp {
            self.hp = hp;
        }
        if let Some(max_hp) = snapshot.max_hp {
            self.max_hp = max_hp;
        }
        if let Some(mp) = snapshot.mp {
            self.mp = mp;
        }
        if let Some(speed) = snapshot.speed {
            self.speed = speed;
        }
        if let Some(attack) = snapshot.attack {
            self.attack = attack;
        }
        if let Some(range) = snapshot.range {
            self.range = range;
        }
        if let Some(level) = snapshot.level {
            self.level = level;
        }
        if let Some(xp) = snapshot.xp {
            self.xp = xp;
        }
        self.target = snapshot.target.clone();
        self.s = snapshot.s.clone();
    }
}

/// Constant-velocity projection toward the motion target, clamping at the
/// goal and clearing the moving flag on arrival.
fn project_motion(
    x: &mut f64,
    y: &mut f64,
    going_x: f64,
    going_y: f64,
    moving: &mut bool,
    speed: f64,
    elapsed: Duration,
) {
    if !*moving {
        return;
    }
    let travelled = speed * elapsed.as_secs_f64();
    let remaining = distance(*x, *y, going_x, going_y);
    if travelled >= remaining {
        *moving = false;
        *x = going_x;
        *y = going_y;
    } else {
        let angle = (going_y - *y).atan2(going_x - *x);
        *x += angle.cos() * travelled;
        *y += angle.sin() * travelled;
    }
}

/// Counts down status-effect timers, dropping the expired ones.
fn age_conditions(conditions: &mut HashMap<String, StatusEffect>, elapsed: Duration) {
    let elapsed_ms = elapsed.as_millis() as i64;
    conditions.retain(|_, effect| {
        effect.ms -= elapsed_ms;
        effect.ms > 0
    });
}

/// Everything one session mirrors about the world.
pub struct State {
    pub server: Option<WelcomeData>,
    pub character: Option<Character>,
    /// Where a bare observer is; players carry position on the character.
    pub observed: Option<Position>,
    pub entities: HashMap<String, Entity>,
    pub players: HashMap<String, PlayerSnapshot>,
    pub chests: HashMap<String, ChestDropData>,
    pub projectiles: HashMap<String, ActionData>,
    pub party: Option<PartyData>,
    pub server_info: HashMap<String, ServerEvent>,
    pub bank: BankInfo,
    pings: VecDeque<u64>,
    cooldowns: HashMap<String, Instant>,
    last_position_update: Option<Instant>,
    eviction_radius: f64,
    max_pings: usize,
}

impl State {
    pub fn new(config: &ClientConfig) -> State {
        State {
            server: None,
            character: None,
            observed: None,
            entities: HashMap::new(),
            players: HashMap::new(),
            chests: HashMap::new(),
            projectiles: HashMap::new(),
            party: None,
            server_info: HashMap::new(),
            bank: BankInfo::default(),
            pings: VecDeque::new(),
            cooldowns: HashMap::new(),
            last_position_update: None,
            eviction_radius: config.eviction_radius,
            max_pings: config.max_pings,
        }
    }

    /// Records a round-trip sample, evicting the oldest beyond the window.
    pub fn record_ping(&mut self, round_trip_ms: u64) {
        self.pings.push_back(round_trip_ms);
        while self.pings.len() > self.max_pings {
            self.pings.pop_front();
        }
    }

    /// Estimated one-way latency: half the best round trip in the window.
    /// What the server reports is roughly this much older than it claims.
    pub fn latency_ms(&self) -> u64 {
        self.pings.iter().min().map_or(0, |&best| best / 2)
    }

    /// Marks a skill unusable for `ms`, compensated downward by the
    /// estimated latency (the denial left the server that long ago).
    pub fn set_next_skill(&mut self, skill: &str, ms: f64) {
        let adjusted = (ms - self.latency_ms() as f64).max(0.0);
        self.cooldowns.insert(
            skill.to_string(),
            Instant::now() + Duration::from_millis(adjusted.ceil() as u64),
        );
    }

    pub fn cooldown_remaining(&self, skill: &str) -> Duration {
        self.cooldowns
            .get(skill)
            .map_or(Duration::ZERO, |ready| {
                ready.saturating_duration_since(Instant::now())
            })
    }

    pub fn is_on_cooldown(&self, skill: &str) -> bool {
        self.cooldown_remaining(skill) > Duration::ZERO
    }

    /// Extrapolates all moving mirrors from elapsed wall-clock time, ages
    /// status timers, and evicts anything beyond the configured radius.
    pub fn update_positions(&mut self) {
        let elapsed = self
            .last_position_update
            .map_or(Duration::ZERO, |at| at.elapsed());
        self.update_positions_with(elapsed);
    }

    pub fn update_positions_with(&mut self, elapsed: Duration) {
        if self.last_position_update.is_some() && elapsed > Duration::ZERO {
            for entity in self.entities.values_mut() {
                project_motion(
                    &mut entity.x,
                    &mut entity.y,
                    entity.going_x,
                    entity.going_y,
                    &mut entity.moving,
                    entity.speed,
                    elapsed,
                );
                age_conditions(&mut entity.s, elapsed);
            }

            for player in self.players.values_mut() {
                project_motion(
                    &mut player.x,
                    &mut player.y,
                    player.going_x,
                    player.going_y,
                    &mut player.moving,
                    player.speed,
                    elapsed,
                );
                age_conditions(&mut player.s, elapsed);
            }

            if let Some(character) = self.character.as_mut() {
                project_motion(
                    &mut character.x,
                    &mut character.y,
                    character.going_x,
                    character.going_y,
                    &mut character.moving,
                    character.speed,
                    elapsed,
                );
                age_conditions(&mut character.s, elapsed);
                age_conditions(&mut character.c, elapsed);
            }
        }

        // Anything far enough away that the server stopped updating it is
        // stale; drop it rather than act on fiction.
        if let Some(character) = &self.character {
            let (cx, cy) = (character.x, character.y);
            let radius = self.eviction_radius;
            self.entities
                .retain(|_, e| distance(cx, cy, e.x, e.y) < radius);
            self.players
                .retain(|_, p| distance(cx, cy, p.x, p.y) < radius);
        }

        self.last_position_update = Some(Instant::now());
    }

    /// Applies a character snapshot, creating the mirror on first sight.
    pub fn apply_character(&mut self, snapshot: &CharacterSnapshot, data: &GameData) {
        match self.character.as_mut() {
            Some(character) => character.merge(snapshot),
            None => self.character = Some(Character::from_snapshot(snapshot, data)),
        }
        if let Some(bank) = &snapshot.user {
            self.bank = bank.clone();
        }
    }

    /// Applies an entities push. A full refresh erases the mirrors first;
    /// an incremental one extrapolates everything to now before merging.
    pub fn apply_entities(&mut self, data: &EntitiesData, game_data: &GameData) {
        match data.kind {
            RefreshKind::Full => {
                self.entities.clear();
                self.players.clear();
            }
            RefreshKind::Incremental => {
                if self.character.is_some() {
                    self.update_positions();
                }
            }
        }

        // What the server reported is already about half a round trip old;
        // advance arriving snapshots by that much so reads line up with
        // where things actually are.
        let lag = Duration::from_millis(self.latency_ms());

        for monster in &data.monsters {
            let entity = match self.entities.entry(monster.id.clone()) {
                Entry::Occupied(occupied) => {
                    let entity = occupied.into_mut();
                    entity.merge(monster);
                    entity
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(Entity::from_snapshot(monster, game_data, &data.map))
                }
            };
            project_motion(
                &mut entity.x,
                &mut entity.y,
                entity.going_x,
                entity.going_y,
                &mut entity.moving,
                entity.speed,
                lag,
            );
        }

        for player in &data.players {
            let is_self = self
                .character
                .as_ref()
                .map_or(false, |c| c.id == player.id);
            if is_self {
                if let Some(character) = self.character.as_mut() {
                    character.merge_player(player);
                }
            } else {
                let mirror = self
                    .players
                    .entry(player.id.clone())
                    .and_modify(|m| *m = player.clone())
                    .or_insert_with(|| player.clone());
                project_motion(
                    &mut mirror.x,
                    &mut mirror.y,
                    mirror.going_x,
                    mirror.going_y,
                    &mut mirror.moving,
                    mirror.speed,
                    lag,
                );
            }
        }
    }

    /// Removes a dead entity; also clears it from the server-event mirror.
    pub fn apply_death(&mut self, id: &str) -> Option<Entity> {
        let removed = self.entities.remove(id);
        if let Some(entity) = &removed {
            self.server_info.remove(&entity.kind);
        }
        removed
    }

    pub fn apply_disappear(&mut self, id: &str) -> Option<PlayerSnapshot> {
        self.players.remove(id)
    }

    /// Applies a projectile hit: resolves the projectile and adjusts the
    /// target mirror.
    pub fn apply_hit(&mut self, hit: &HitData) {
        if hit.miss || hit.evade {
            self.projectiles.remove(&hit.pid);
            return;
        }
        if hit.kill {
            self.projectiles.remove(&hit.pid);
            self.entities.remove(&hit.id);
        } else if let Some(damage) = hit.damage {
            self.projectiles.remove(&hit.pid);
            if let Some(entity) = self.entities.get_mut(&hit.id) {
                entity.hp -= damage;
            }
        }
    }

    /// Nearest mirrored monster, optionally filtered by type.
    pub fn nearest_monster(&self, kind: Option<&str>) -> Option<(&Entity, f64)> {
        let character = self.character.as_ref()?;
        let mut best: Option<(&Entity, f64)> = None;
        for entity in self.entities.values() {
            if let Some(kind) = kind {
                if entity.kind != kind {
                    continue;
                }
            }
            let d = distance(character.x, character.y, entity.x, entity.y);
            if best.as_ref().map_or(true, |(_, b)| d < *b) {
                best = Some((entity, d));
            }
        }
        best
    }

    /// Whether combat against other players can happen where we stand.
    pub fn is_pvp(&self, data: &GameData) -> bool {
        let server_pvp = self.server.as_ref().map_or(false, |s| s.pvp);
        let map_pvp = self
            .character
            .as_ref()
            .and_then(|c| data.map(&c.map))
            .map_or(false, |m| m.pvp);
        server_pvp || map_pvp
    }

    /// Synchronous usability check for a skill: alive, not stunned, off
    /// cooldown, and meeting the dataset's resource and gear requirements.
    pub fn can_use(&self, skill: &str, data: &GameData) -> bool {
        let Some(character) = &self.character else {
            return false;
        };
        if character.rip {
            return false;
        }
        if character.s.contains_key("stoned") {
            return false;
        }
        if self.is_on_cooldown(skill) {
            return false;
        }
        if skill == "attack" && character.mp < character.mp_cost {
            return false;
        }

        let Some(info) = data.skills.get(skill) else {
            // Unknown skills fail the local check rather than the server's.
            warn!("can_use: unknown skill '{}'", skill);
            return false;
        };
        if let Some(mp) = info.mp {
            if character.mp < mp {
                return false;
            }
        }
        if let Some(level) = info.level {
            if character.level < level {
                return false;
            }
        }
        if let Some(classes) = &info.class {
            if !classes.iter().any(|c| *c == character.ctype) {
                return false;
            }
        }
        if let Some(weapon_types) = &info.wtype {
            let Some(Some(mainhand)) = character.slots.get("mainhand") else {
                return false;
            };
            let equipped_type = data
                .items
                .get(&mainhand.name)
                .and_then(|item| item.wtype.as_deref());
            match equipped_type {
                Some(wtype) if weapon_types.iter().any(|w| w == wtype) => {}
                _ => return false,
            }
        }
        if let Some(required) = &info.slot {
            for (slot, item) in required {
                match character.slots.get(slot) {
                    Some(Some(equipped)) if equipped.name == *item => {}
                    _ => return false,
                }
            }
        }
        if character.s.contains_key("dampened") && skill == "blink" {
            return false;
        }

        true
    }

    /// Whether we could buy the item right now (inventory space, an NPC
    /// that sells it, and either gold plus a remote-access item or a
    /// vendor nearby is the caller's concern).
    pub fn can_buy(&self, name: &str, data: &GameData) -> bool {
        let Some(character) = &self.character else {
            return false;
        };
        if character.is_full() {
            return false;
        }
        let Some(item) = data.items.get(name) else {
            return false;
        };

        let npc_sells = item.buy
            || data.maps.iter().any(|(_, map)| {
                !map.ignore
                    && map.npcs.iter().any(|npc| {
                        data.npcs
                            .get(&npc.id)
                            .and_then(|n| n.items.as_ref())
                            .map_or(false, |items| items.iter().any(|i| i == name))
                    })
            });
        if !npc_sells {
            return false;
        }

        let computer_available = character.has_item("computer");
        let can_afford = (character.gold as f64) >= item.g;
        computer_available && can_afford
    }
}
