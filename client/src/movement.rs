//! Movement: optimistic moves, map transitions, and route execution.
//!
//! A move is optimistic: the local mirror starts moving toward the target
//! the moment the command is emitted. A watcher then re-checks actual vs
//! intended trajectory on an interval scaled to the estimated remaining
//! travel time, and fails the move cleanly if the character diverges.
//!
//! Routes are executed step by step. Before each walk the executor scans a
//! bounded window of upcoming steps and jumps to the furthest one that is
//! directly walkable; the graph is a conservative under-approximation of
//! true walkability, so this frequently shortcuts whole step sequences.
//! A newer route supersedes an older one through the session's route
//! epoch; the superseded executor aborts at its next checkpoint.

use crate::error::ClientError;
use crate::session::Session;
use log::{info, warn};
use pathfinder::Step;
use shared::messages::{ClientMessage, MapEffect, ServerPush};
use shared::{distance, Position};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Town warps channel for several seconds before they land.
const WARP_TIMEOUT: Duration = Duration::from_secs(5);

/// Where a smart move should go.
#[derive(Debug, Clone)]
pub enum SmartMoveTarget {
    /// An exact position.
    Position(Position),
    /// A map's primary spawn.
    Map(String),
    /// The cheapest-to-reach spawn area of a monster type.
    Monster(String),
    /// The cheapest-to-reach placement of an NPC.
    Npc(String),
}

impl From<Position> for SmartMoveTarget {
    fn from(position: Position) -> Self {
        SmartMoveTarget::Position(position)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SmartMoveOptions {
    /// Stop once within this distance of the destination.
    pub get_within: f64,
}

impl Session {
    /// Walks in a straight line to (x, y) on the current map, clamping the
    /// target to the furthest safely walkable point first.
    pub async fn move_to(&self, x: f64, y: f64) -> Result<Position, ClientError> {
        self.do_move(x, y, true).await
    }

    pub(crate) async fn do_move(
        &self,
        x: f64,
        y: f64,
        safety: bool,
    ) -> Result<Position, ClientError> {
        let (from, m, speed) = {
            let mut state = self.state.write().await;
            state.update_positions();
            let character = state
                .character
                .as_ref()
                .ok_or_else(|| ClientError::precondition("no character"))?;
            (character.position(), character.m, character.speed)
        };

        if from.x == x && from.y == y {
            return Ok(from);
        }

        let mut to = Position::new(from.map.clone(), x, y);
        if safety {
            to = self.context.pathfinder.safe_walk_to(&from, &to);
            if to.x != x || to.y != y {
                warn!(
                    "move: cannot reach ({}, {}) safely, moving to ({}, {}) instead",
                    x, y, to.x, to.y
                );
            }
        }

        self.socket.send(ClientMessage::Move {
            x: from.x,
            y: from.y,
            going_x: to.x,
            going_y: to.y,
            m,
        })?;

        // Optimistic: the mirror starts moving before confirmation.
        {
            let mut state = self.state.write().await;
            if let Some(character) = state.character.as_mut() {
                character.going_x = to.x;
                character.going_y = to.y;
                character.moving = true;
            }
        }

        self.watch_move(&to, speed).await
    }

    /// Re-checks that we are still heading to `to`: on a timer stretched to
    /// the estimated remaining travel time, and on every raw character push
    /// (the mirror deliberately ignores the snapshot's moving flag, so a
    /// server-side stop is only visible in the raw push).
    async fn watch_move(&self, to: &Position, speed: f64) -> Result<Position, ClientError> {
        let mut rx = self.bus.subscribe();
        let started = Instant::now();
        let initial_distance = {
            let state = self.state.read().await;
            let character = state
                .character
                .as_ref()
                .ok_or_else(|| ClientError::precondition("no character"))?;
            distance(character.x, character.y, to.x, to.y)
        };
        // Generous overall bound; divergence is detected far earlier.
        let deadline = Duration::from_secs_f64(1.0 + 3.0 * initial_distance / speed.max(1.0));
        let mut rechecked = false;

        loop {
            let character = {
                let mut state = self.state.write().await;
                state.update_positions();
                state
                    .character
                    .clone()
                    .ok_or_else(|| ClientError::precondition("no character"))?
            };

            if character.x == to.x && character.y == to.y {
                return Ok(to.clone());
            }

            let on_course =
                character.moving && character.going_x == to.x && character.going_y == to.y;
            if !on_course {
                // We might be looking at a stale mirror; confirm once with
                // fresh data before giving up.
                if !rechecked {
                    rechecked = true;
                    if let Ok(fresh) = self.request_player_data().await {
                        if fresh.moving == Some(true)
                            && fresh.going_x == Some(to.x)
                            && fresh.going_y == Some(to.y)
                        {
                            continue;
                        }
                    }
                }
                return Err(ClientError::MoveInterrupted(format!(
                    "move to ({}, {}) failed (currently going to ({}, {}))",
                    to.x, to.y, character.going_x, character.going_y
                )));
            }

            if started.elapsed() > deadline {
                return Err(ClientError::MoveInterrupted(format!(
                    "move to ({}, {}) took too long",
                    to.x, to.y
                )));
            }

            let remaining = distance(character.x, character.y, to.x, to.y);
            let wait = (remaining / character.speed.max(1.0)).max(0.05);

            tokio::select! {
                _ = sleep(Duration::from_secs_f64(wait)) => {}
                push = rx.recv() => {
                    if let Ok(push) = push {
                        if let ServerPush::Character(snapshot) = push.as_ref() {
                            let stopped = snapshot.moving == Some(false);
                            let redirected = snapshot.going_x.map_or(false, |gx| gx != to.x)
                                || snapshot.going_y.map_or(false, |gy| gy != to.y);
                            if (stopped || redirected) && !rechecked {
                                rechecked = true;
                                match self.request_player_data().await {
                                    Ok(fresh)
                                        if fresh.moving == Some(true)
                                            && fresh.going_x == Some(to.x)
                                            && fresh.going_y == Some(to.y) => {}
                                    _ => {
                                        return Err(ClientError::MoveInterrupted(format!(
                                            "move to ({}, {}) failed (server reports a different trajectory)",
                                            to.x, to.y
                                        )));
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    /// Warps to the current map's primary spawn. Fails if the channel is
    /// interrupted before the warp lands.
    pub async fn warp_to_town(&self) -> Result<Position, ClientError> {
        let rx = self.bus.subscribe();
        self.socket.send(ClientMessage::Town)?;

        let mut channeling = false;
        self.bus
            .wait(rx, WARP_TIMEOUT, move |push| match push {
                ServerPush::Character(snapshot) => {
                    if !channeling && snapshot.c.contains_key("town") {
                        channeling = true;
                        return None;
                    }
                    if channeling && !snapshot.c.contains_key("town") {
                        return Some(Err(ClientError::rejection("town warp was interrupted")));
                    }
                    None
                }
                ServerPush::NewMap(new_map) if new_map.effect == Some(MapEffect::Town) => {
                    Some(Ok(Position::new(
                        new_map.name.clone(),
                        new_map.x,
                        new_map.y,
                    )))
                }
                _ => None,
            })
            .await
    }

    /// Cancels an in-progress town warp channel.
    pub fn stop_town_warp(&self) -> Result<(), ClientError> {
        self.socket.send(ClientMessage::Stop {
            action: "town".to_string(),
        })
    }

    /// Takes a door or transporter to the given map and spawn.
    pub async fn transport(&self, map: &str, spawn: usize) -> Result<Position, ClientError> {
        let rx = self.bus.subscribe();
        self.socket.send(ClientMessage::Transport {
            to: map.to_string(),
            spawn,
        })?;

        let expected = map.to_string();
        self.bus
            .wait(rx, self.context.config.command_timeout, move |push| {
                match push {
                    ServerPush::NewMap(new_map) => {
                        if new_map.name == expected {
                            Some(Ok(Position::new(
                                new_map.name.clone(),
                                new_map.x,
                                new_map.y,
                            )))
                        } else {
                            Some(Err(ClientError::rejection(format!(
                                "ended up in {}, expected {}",
                                new_map.name, expected
                            ))))
                        }
                    }
                    _ => None,
                }
            })
            .await
    }

    /// Leaves a dead-end map back to the default map's spawn.
    pub async fn leave_map(&self) -> Result<Position, ClientError> {
        let rx = self.bus.subscribe();
        self.socket.send(ClientMessage::Leave)?;

        self.bus
            .wait(rx, self.context.config.command_timeout, |push| match push {
                ServerPush::NewMap(new_map) => {
                    if new_map.name == "main" {
                        Some(Ok(Position::new(
                            new_map.name.clone(),
                            new_map.x,
                            new_map.y,
                        )))
                    } else {
                        Some(Err(ClientError::rejection(format!(
                            "ended up in {}, expected main",
                            new_map.name
                        ))))
                    }
                }
                _ => None,
            })
            .await
    }

    /// Plans a route to the destination and executes it step by step.
    /// Issuing a newer smart move aborts this one at its next checkpoint.
    pub async fn smart_move(
        &self,
        target: impl Into<SmartMoveTarget>,
        options: SmartMoveOptions,
    ) -> Result<Position, ClientError> {
        let epoch = self.route_epoch.fetch_add(1, Ordering::SeqCst) + 1;

        let from = self
            .character()
            .await
            .ok_or_else(|| ClientError::precondition("no character"))?
            .position();

        let to = self.resolve_destination(target.into(), &from)?;

        if options.get_within > 0.0
            && from.map == to.map
            && distance(from.x, from.y, to.x, to.y) <= options.get_within
        {
            return Ok(from);
        }

        let steps = self.context.pathfinder.find_path(&from, &to)?;
        info!(
            "smart_move: {} steps to {}:{},{}",
            steps.len(),
            to.map,
            to.x,
            to.y
        );

        let lookahead = self.context.config.route_lookahead;
        let mut i = 0;
        let mut last_failed: Option<usize> = None;

        while i < steps.len() {
            if self.route_epoch.load(Ordering::SeqCst) != epoch {
                return Err(ClientError::MoveInterrupted(
                    "superseded by a newer route".to_string(),
                ));
            }

            let here = self
                .character()
                .await
                .ok_or_else(|| ClientError::precondition("no character"))?
                .position();
            let mut current = steps[i].clone();

            if matches!(current, Step::Move { .. }) {
                // Close enough to the goal already?
                if options.get_within > 0.0 && here.map == to.map {
                    if distance(here.x, here.y, to.x, to.y) <= options.get_within {
                        break;
                    }
                    // Try a straight shot to the get_within perimeter.
                    let angle = (here.y - to.y).atan2(here.x - to.x);
                    let perimeter = Position::new(
                        to.map.clone(),
                        to.x + angle.cos() * options.get_within,
                        to.y + angle.sin() * options.get_within,
                    );
                    if self.context.pathfinder.can_walk(&here, &perimeter) {
                        self.do_move(perimeter.x, perimeter.y, false).await?;
                        break;
                    }
                }

                // Skip ahead to the furthest directly walkable step in a
                // bounded window.
                let limit = (i + 1 + lookahead).min(steps.len());
                for j in i + 1..limit {
                    if steps[j].map() != here.map {
                        break;
                    }
                    if let Step::Move { x, y, .. } = &steps[j] {
                        let candidate = Position::new(here.map.clone(), *x, *y);
                        if self.context.pathfinder.can_walk(&here, &candidate) {
                            i = j;
                            current = steps[j].clone();
                        }
                    }
                }
            }

            let result = match &current {
                Step::Move { map, x, y } => {
                    if *map != here.map {
                        return Err(ClientError::MoveInterrupted(format!(
                            "expected to be on {}, but we are on {}",
                            map, here.map
                        )));
                    }
                    self.do_move(*x, *y, false).await.map(|_| ())
                }
                Step::Town { .. } => self.warp_to_town().await.map(|_| ()),
                Step::Transport { map, spawn, .. } => {
                    self.transport(map, *spawn).await.map(|_| ())
                }
                Step::Leave { .. } => self.leave_map().await.map(|_| ()),
            };

            match result {
                Ok(()) => {
                    last_failed = None;
                    i += 1;
                }
                Err(e) => {
                    warn!("smart_move step {} failed: {}", i, e);
                    let _ = self.request_player_data().await;
                    if last_failed == Some(i) {
                        return Err(ClientError::MoveInterrupted(format!(
                            "no progress at route step {}",
                            i
                        )));
                    }
                    last_failed = Some(i);
                }
            }
        }

        self.position()
            .await
            .ok_or_else(|| ClientError::precondition("no character"))
    }

    /// Halts route execution and stops in place.
    pub async fn stop_smart_move(&self) -> Result<Position, ClientError> {
        self.route_epoch.fetch_add(1, Ordering::SeqCst);
        let here = self
            .character()
            .await
            .ok_or_else(|| ClientError::precondition("no character"))?;
        self.do_move(here.x, here.y, true).await
    }

    /// Resolves a symbolic destination to a concrete position, choosing
    /// the cheapest reachable candidate by planned route cost.
    fn resolve_destination(
        &self,
        target: SmartMoveTarget,
        from: &Position,
    ) -> Result<Position, ClientError> {
        let data = &self.context.game_data;
        match target {
            SmartMoveTarget::Position(p) => Ok(p),
            SmartMoveTarget::Map(name) => data
                .primary_spawn(&name)
                .map(|s| Position::new(name.clone(), s.x, s.y))
                .ok_or_else(|| {
                    ClientError::precondition(format!("unknown destination map '{}'", name))
                }),
            SmartMoveTarget::Monster(kind) => self
                .cheapest_candidate(from, self.locate_monsters(&kind))
                .ok_or_else(|| {
                    ClientError::precondition(format!("no reachable spawn of '{}'", kind))
                }),
            SmartMoveTarget::Npc(id) => self
                .cheapest_candidate(from, self.locate_npcs(&id))
                .ok_or_else(|| {
                    ClientError::precondition(format!("no reachable npc '{}'", id))
                }),
        }
    }

    /// Known spawn areas of a monster type, across all prepared maps.
    pub fn locate_monsters(&self, kind: &str) -> Vec<Position> {
        let mut found = Vec::new();
        for (map_name, map) in &self.context.game_data.maps {
            if map.ignore || !self.context.pathfinder.has_map(map_name) {
                continue;
            }
            for placement in &map.monsters {
                if placement.kind == kind {
                    found.push(Position::new(map_name.clone(), placement.x, placement.y));
                }
            }
        }
        found
    }

    /// Placements of an NPC, across all prepared maps.
    pub fn locate_npcs(&self, id: &str) -> Vec<Position> {
        let mut found = Vec::new();
        for (map_name, map) in &self.context.game_data.maps {
            if map.ignore || !self.context.pathfinder.has_map(map_name) {
                continue;
            }
            for npc in &map.npcs {
                if npc.id == id {
                    found.push(Position::new(map_name.clone(), npc.x, npc.y));
                }
            }
        }
        found
    }

    fn cheapest_candidate(
        &self,
        from: &Position,
        candidates: Vec<Position>,
    ) -> Option<Position> {
        let pathfinder = &self.context.pathfinder;
        let mut best: Option<(f64, Position)> = None;
        for candidate in candidates {
            let Ok(steps) = pathfinder.find_path(from, &candidate) else {
                continue;
            };
            let cost = pathfinder.path_cost(&steps);
            if best.as_ref().map_or(true, |(b, _)| cost < *b) {
                best = Some((cost, candidate));
            }
        }
        best.map(|(_, position)| position)
    }
}
