//! Correlated game actions.
//!
//! Every state-changing action follows the same shape: validate local
//! preconditions synchronously (nothing is emitted on violation), subscribe
//! to the push bus, emit the command, and wait for the first correlated
//! push that settles the operation, or the deadline. Settlement on any
//! path drops the subscription.

use crate::error::ClientError;
use crate::session::Session;
use crate::state::count_in;
use log::warn;
use shared::messages::{
    BankOperation, CharacterSnapshot, ClientMessage, PartyData, PartyEvent, ServerPush,
    UpgradeKind,
};
use shared::{distance, NPC_INTERACTION_DISTANCE};

impl Session {
    /// Basic attack on a target. Resolves with the projectile id.
    pub async fn attack(&self, id: &str) -> Result<String, ClientError> {
        let me = {
            let state = self.state.read().await;
            let character = state
                .character
                .as_ref()
                .ok_or_else(|| ClientError::precondition("no character"))?;
            if character.mp < character.mp_cost {
                return Err(ClientError::precondition("not enough mp to attack"));
            }
            character.id.clone()
        };

        let rx = self.bus.subscribe();
        self.socket.send(ClientMessage::Attack {
            id: id.to_string(),
        })?;

        let target = id.to_string();
        self.bus
            .wait(rx, self.context.config.command_timeout, move |push| {
                match push {
                    ServerPush::Action(action)
                        if action.attacker == me
                            && action.target == target
                            && action.kind == "attack" =>
                    {
                        Some(Ok(action.pid.clone()))
                    }
                    ServerPush::Death { id } if *id == target => Some(Err(
                        ClientError::rejection(format!("entity {} not found", target)),
                    )),
                    ServerPush::GameResponse(r) => match r.response.as_str() {
                        "disabled" => {
                            Some(Err(ClientError::rejection("attack failed (disabled)")))
                        }
                        "attack_failed" if r.id.as_deref() == Some(target.as_str()) => Some(Err(
                            ClientError::rejection(format!("attack on {} failed", target)),
                        )),
                        "too_far" if r.id.as_deref() == Some(target.as_str()) => {
                            Some(Err(ClientError::rejection(format!(
                                "{} is too far away to attack (dist: {:?})",
                                target, r.dist
                            ))))
                        }
                        "cooldown" if r.id.as_deref() == Some(target.as_str()) => {
                            Some(Err(ClientError::rejection(format!(
                                "attack on {} failed due to cooldown ({:?}ms)",
                                target, r.ms
                            ))))
                        }
                        "no_mp" if r.place.as_deref() == Some("attack") => Some(Err(
                            ClientError::rejection("attack failed, insufficient mp"),
                        )),
                        _ => None,
                    },
                    _ => None,
                }
            })
            .await
    }

    /// Uses a named skill, optionally on a target. Resolves once the
    /// server acknowledges it through the cooldown side channel.
    pub async fn use_skill(&self, name: &str, target: Option<&str>) -> Result<(), ClientError> {
        {
            let state = self.state.read().await;
            if !state.can_use(name, &self.context.game_data) {
                return Err(ClientError::precondition(format!(
                    "cannot use '{}' right now (dead, cooldown, or unmet requirements)",
                    name
                )));
            }
        }

        let rx = self.bus.subscribe();
        self.socket.send(ClientMessage::Skill {
            name: name.to_string(),
            id: target.map(|t| t.to_string()),
            x: None,
            y: None,
        })?;

        let skill = name.to_string();
        self.bus
            .wait(rx, self.context.config.command_timeout, |push| match push {
                ServerPush::Eval { code } => match self.parser.parse(code) {
                    Some(crate::evals::EvalHint::SkillTimeout { skill: s, .. }) if s == skill => {
                        Some(Ok(()))
                    }
                    _ => None,
                },
                ServerPush::GameResponse(r) => {
                    let relevant = r.skill.as_deref() == Some(skill.as_str())
                        || r.name.as_deref() == Some(skill.as_str())
                        || r.place.as_deref() == Some(skill.as_str());
                    match r.response.as_str() {
                        "skill_success" if r.name.as_deref() == Some(skill.as_str()) => Some(Ok(())),
                        "cooldown" if relevant => Some(Err(ClientError::rejection(format!(
                            "'{}' is on cooldown ({:?}ms)",
                            skill, r.ms
                        )))),
                        "no_mp" if relevant => Some(Err(ClientError::rejection(format!(
                            "not enough mp for '{}'",
                            skill
                        )))),
                        "too_far" if relevant => Some(Err(ClientError::rejection(format!(
                            "target is too far away for '{}'",
                            skill
                        )))),
                        "disabled" if relevant => {
                            Some(Err(ClientError::rejection("skills are disabled")))
                        }
                        _ => None,
                    }
                }
                _ => None,
            })
            .await
    }

    /// Regenerates hp with the base regen skill.
    pub async fn regen_hp(&self) -> Result<(), ClientError> {
        self.use_consumable("hp").await
    }

    /// Regenerates mp with the base regen skill.
    pub async fn regen_mp(&self) -> Result<(), ClientError> {
        self.use_consumable("mp").await
    }

    async fn use_consumable(&self, item: &str) -> Result<(), ClientError> {
        let rx = self.bus.subscribe();
        self.socket.send(ClientMessage::Use {
            item: item.to_string(),
        })?;
        self.bus
            .wait(rx, self.context.config.command_timeout, |push| match push {
                ServerPush::Eval { code } if code.contains("pot_timeout") => Some(Ok(())),
                _ => None,
            })
            .await
    }

    /// Drinks the potion in the given inventory slot.
    pub async fn use_potion(&self, inventory_pos: usize) -> Result<(), ClientError> {
        {
            let state = self.state.read().await;
            let character = state
                .character
                .as_ref()
                .ok_or_else(|| ClientError::precondition("no character"))?;
            if character.items.get(inventory_pos).map_or(true, |i| i.is_none()) {
                return Err(ClientError::precondition(format!(
                    "no item in inventory slot {}",
                    inventory_pos
                )));
            }
        }

        let rx = self.bus.subscribe();
        self.socket.send(ClientMessage::Equip {
            num: inventory_pos,
            slot: None,
        })?;
        self.bus
            .wait(rx, self.context.config.command_timeout, |push| match push {
                ServerPush::Eval { code } if code.contains("pot_timeout") => Some(Ok(())),
                _ => None,
            })
            .await
    }

    /// Buys an item from an NPC. Resolves with the inventory slot the item
    /// landed in.
    pub async fn buy(&self, name: &str, quantity: u32) -> Result<u32, ClientError> {
        let item = self
            .context
            .game_data
            .items
            .get(name)
            .ok_or_else(|| ClientError::precondition(format!("unknown item '{}'", name)))?;
        let stackable = item.s.is_some();

        {
            let state = self.state.read().await;
            let character = state
                .character
                .as_ref()
                .ok_or_else(|| ClientError::precondition("no character"))?;
            let cost = item.g * quantity as f64;
            if (character.gold as f64) < cost {
                return Err(ClientError::precondition(format!(
                    "insufficient gold: have {}, need {}",
                    character.gold, cost
                )));
            }
        }

        let rx = self.bus.subscribe();
        self.socket.send(ClientMessage::Buy {
            name: name.to_string(),
            quantity: if stackable { Some(quantity) } else { None },
        })?;

        let wanted = name.to_string();
        self.bus
            .wait(rx, self.context.config.command_timeout, move |push| {
                let ServerPush::GameResponse(r) = push else {
                    return None;
                };
                match r.response.as_str() {
                    "buy_success"
                        if r.name.as_deref() == Some(wanted.as_str())
                            && (!stackable || r.q == Some(quantity)) =>
                    {
                        Some(Ok(r.num.unwrap_or(0)))
                    }
                    "buy_cant_npc" => Some(Err(ClientError::rejection(format!(
                        "cannot buy {} from an npc",
                        wanted
                    )))),
                    "buy_cant_space" => Some(Err(ClientError::rejection(format!(
                        "not enough inventory space for {} {}(s)",
                        quantity, wanted
                    )))),
                    "buy_cost" => Some(Err(ClientError::rejection("not enough gold"))),
                    _ => None,
                }
            })
            .await
    }

    /// Sells an item to an NPC. Fire and forget.
    pub async fn sell(&self, inventory_pos: usize, quantity: u32) -> Result<(), ClientError> {
        {
            let state = self.state.read().await;
            let character = state
                .character
                .as_ref()
                .ok_or_else(|| ClientError::precondition("no character"))?;
            if character.items.get(inventory_pos).map_or(true, |i| i.is_none()) {
                return Err(ClientError::precondition(format!(
                    "no item in inventory slot {}",
                    inventory_pos
                )));
            }
        }
        self.socket.send(ClientMessage::Sell {
            num: inventory_pos,
            quantity,
        })?;
        Ok(())
    }

    /// Buys from another player's merchant stand, clamping the quantity to
    /// what is listed and what we can afford.
    pub async fn buy_from_merchant(
        &self,
        id: &str,
        slot: &str,
        rid: &str,
        mut quantity: u32,
    ) -> Result<(), ClientError> {
        if quantity == 0 {
            return Err(ClientError::precondition("cannot buy a quantity of 0"));
        }

        {
            let state = self.state.read().await;
            let character = state
                .character
                .as_ref()
                .ok_or_else(|| ClientError::precondition("no character"))?;
            let merchant = state
                .players
                .get(id)
                .ok_or_else(|| ClientError::precondition(format!("{} is not nearby", id)))?;
            if distance(character.x, character.y, merchant.x, merchant.y)
                > NPC_INTERACTION_DISTANCE
            {
                return Err(ClientError::precondition(format!(
                    "too far away from {} to buy",
                    id
                )));
            }
            let listing = merchant
                .slots
                .get(slot)
                .and_then(|s| s.as_ref())
                .ok_or_else(|| {
                    ClientError::precondition(format!("{} has nothing listed in {}", id, slot))
                })?;
            let price = listing.price.unwrap_or(0);

            match listing.q {
                None if quantity != 1 => {
                    warn!("only 1 is available, buying 1");
                    quantity = 1;
                }
                Some(available) if quantity > available => {
                    warn!("only {} are available, buying that many", available);
                    quantity = available;
                }
                _ => {}
            }

            if character.gold < price * quantity as u64 {
                if character.gold < price {
                    return Err(ClientError::precondition(format!(
                        "not enough gold: it costs {}, we have {}",
                        price, character.gold
                    )));
                }
                let buyable = (character.gold / price.max(1)) as u32;
                warn!("can only afford {}, buying that many", buyable);
                quantity = buyable;
            }
        }

        self.socket.send(ClientMessage::TradeBuy {
            id: id.to_string(),
            slot: slot.to_string(),
            rid: rid.to_string(),
            q: quantity,
        })?;
        Ok(())
    }

    /// Equips an inventory item, optionally into a specific slot.
    pub async fn equip(
        &self,
        inventory_pos: usize,
        slot: Option<String>,
    ) -> Result<(), ClientError> {
        let (me, item) = {
            let state = self.state.read().await;
            let character = state
                .character
                .as_ref()
                .ok_or_else(|| ClientError::precondition("no character"))?;
            let item = character
                .items
                .get(inventory_pos)
                .and_then(|i| i.clone())
                .ok_or_else(|| {
                    ClientError::precondition(format!(
                        "no item in inventory slot {}",
                        inventory_pos
                    ))
                })?;
            (character.id.clone(), item)
        };

        let rx = self.bus.subscribe();
        self.socket.send(ClientMessage::Equip {
            num: inventory_pos,
            slot: slot.clone(),
        })?;

        self.bus
            .wait(rx, self.context.config.command_timeout, move |push| {
                match push {
                    ServerPush::Character(snapshot) => {
                        let equipped = match &slot {
                            Some(slot) => snapshot
                                .slots
                                .get(slot)
                                .and_then(|s| s.as_ref())
                                .map_or(false, |s| {
                                    s.name == item.name && s.level == item.level
                                }),
                            None => snapshot
                                .slots
                                .values()
                                .flatten()
                                .any(|s| s.name == item.name),
                        };
                        if equipped {
                            Some(Ok(()))
                        } else {
                            None
                        }
                    }
                    ServerPush::DisappearingText(text)
                        if text.id == me && text.message == "CAN'T EQUIP" =>
                    {
                        Some(Err(ClientError::rejection(format!(
                            "can't equip slot {} ({})",
                            inventory_pos, item.name
                        ))))
                    }
                    _ => None,
                }
            })
            .await
    }

    /// Unequips a slot back into the inventory.
    pub async fn unequip(&self, slot: &str) -> Result<(), ClientError> {
        {
            let state = self.state.read().await;
            let character = state
                .character
                .as_ref()
                .ok_or_else(|| ClientError::precondition("no character"))?;
            match character.slots.get(slot) {
                None => {
                    return Err(ClientError::precondition(format!(
                        "slot {} does not exist",
                        slot
                    )))
                }
                Some(None) => {
                    return Err(ClientError::precondition(format!(
                        "slot {} is empty; nothing to unequip",
                        slot
                    )))
                }
                Some(Some(_)) => {}
            }
        }

        let rx = self.bus.subscribe();
        self.socket.send(ClientMessage::Unequip {
            slot: slot.to_string(),
        })?;

        let slot = slot.to_string();
        self.bus
            .wait(rx, self.context.config.command_timeout, move |push| {
                match push {
                    ServerPush::Character(snapshot)
                        if snapshot.slots.get(&slot) == Some(&None) =>
                    {
                        Some(Ok(()))
                    }
                    _ => None,
                }
            })
            .await
    }

    /// Deposits gold; must be standing in the bank.
    pub async fn deposit_gold(&self, mut amount: u64) -> Result<(), ClientError> {
        {
            let state = self.state.read().await;
            let character = state
                .character
                .as_ref()
                .ok_or_else(|| ClientError::precondition("no character"))?;
            if character.map != "bank" {
                return Err(ClientError::precondition(
                    "we need to be in 'bank' to deposit gold",
                ));
            }
            if amount == 0 {
                return Err(ClientError::precondition("cannot deposit 0 gold"));
            }
            if character.gold < amount {
                warn!("only depositing {} gold", character.gold);
                amount = character.gold;
            }
        }
        self.socket
            .send(ClientMessage::Bank(BankOperation::Deposit { amount }))?;
        Ok(())
    }

    /// Withdraws gold; must be standing in the bank.
    pub async fn withdraw_gold(&self, mut amount: u64) -> Result<(), ClientError> {
        {
            let state = self.state.read().await;
            let character = state
                .character
                .as_ref()
                .ok_or_else(|| ClientError::precondition("no character"))?;
            if character.map != "bank" {
                return Err(ClientError::precondition(
                    "we need to be in 'bank' to withdraw gold",
                ));
            }
            if amount == 0 {
                return Err(ClientError::precondition("cannot withdraw 0 gold"));
            }
            if state.bank.gold < amount {
                warn!("only withdrawing {} gold", state.bank.gold);
                amount = state.bank.gold;
            }
        }
        self.socket
            .send(ClientMessage::Bank(BankOperation::Withdraw { amount }))?;
        Ok(())
    }

    /// Deposits an inventory item into the bank, picking a pack and slot
    /// (stacking where possible) when none is given.
    pub async fn deposit_item(
        &self,
        inventory_pos: usize,
        pack: Option<String>,
    ) -> Result<(), ClientError> {
        let (item, pack, pack_slot, count_before) = {
            let state = self.state.read().await;
            let character = state
                .character
                .as_ref()
                .ok_or_else(|| ClientError::precondition("no character"))?;

            let tier = match character.map.as_str() {
                "bank" => 0..=7,
                "bank_b" => 8..=23,
                "bank_u" => 24..=47,
                other => {
                    return Err(ClientError::precondition(format!(
                        "not in the bank (we're in '{}')",
                        other
                    )))
                }
            };

            let item = character
                .items
                .get(inventory_pos)
                .and_then(|i| i.clone())
                .ok_or_else(|| {
                    ClientError::precondition(format!(
                        "no item in inventory slot {}",
                        inventory_pos
                    ))
                })?;

            let (pack, pack_slot) = match pack {
                Some(pack) => (pack, -1),
                None => {
                    let stack_limit = self
                        .context
                        .game_data
                        .items
                        .get(&item.name)
                        .and_then(|i| i.s);
                    find_bank_slot(&state.bank, tier, &item, stack_limit).ok_or_else(|| {
                        ClientError::precondition(format!(
                            "bank is full, nowhere to place '{}'",
                            item.name
                        ))
                    })?
                }
            };

            let count_before = state
                .bank
                .packs
                .get(&pack)
                .map_or(0, |slots| count_in(slots, &item.name));
            (item, pack, pack_slot, count_before)
        };

        let rx = self.bus.subscribe();
        self.socket.send(ClientMessage::Bank(BankOperation::Swap {
            pack: pack.clone(),
            pack_slot,
            inventory_slot: inventory_pos as i64,
        }))?;

        let deposited = item.q.unwrap_or(1);
        self.bus
            .wait(rx, self.context.config.command_timeout, move |push| {
                let ServerPush::Character(snapshot) = push else {
                    return None;
                };
                match &snapshot.user {
                    Some(bank) => {
                        let now = bank
                            .packs
                            .get(&pack)
                            .map_or(0, |slots| count_in(slots, &item.name));
                        if now >= count_before + deposited {
                            Some(Ok(()))
                        } else {
                            None
                        }
                    }
                    None if !snapshot.map.starts_with("bank") => Some(Err(
                        ClientError::rejection("left the bank before the deposit settled"),
                    )),
                    None => None,
                }
            })
            .await
    }

    /// Withdraws a bank item back into the inventory.
    pub async fn withdraw_item(&self, pack: &str, pack_slot: usize) -> Result<(), ClientError> {
        let (item, count_before) = {
            let state = self.state.read().await;
            let character = state
                .character
                .as_ref()
                .ok_or_else(|| ClientError::precondition("no character"))?;
            if !character.map.starts_with("bank") {
                return Err(ClientError::precondition(format!(
                    "not in the bank (we're in '{}')",
                    character.map
                )));
            }
            let item = state
                .bank
                .packs
                .get(pack)
                .and_then(|slots| slots.get(pack_slot))
                .and_then(|slot| slot.clone())
                .ok_or_else(|| {
                    ClientError::precondition(format!("nothing in {} slot {}", pack, pack_slot))
                })?;
            (item.clone(), character.count_item(&item.name))
        };

        let rx = self.bus.subscribe();
        self.socket.send(ClientMessage::Bank(BankOperation::Swap {
            pack: pack.to_string(),
            pack_slot: pack_slot as i64,
            inventory_slot: -1,
        }))?;

        let withdrawn = item.q.unwrap_or(1);
        self.bus
            .wait(rx, self.context.config.command_timeout, move |push| {
                let ServerPush::Character(snapshot) = push else {
                    return None;
                };
                let now = count_in(&snapshot.items, &item.name);
                if now >= count_before + withdrawn {
                    Some(Ok(()))
                } else {
                    None
                }
            })
            .await
    }

    /// Upgrades an item with a scroll. Slow: resolves with the success flag
    /// when the upgrade finishes, which can take a long while.
    pub async fn upgrade(
        &self,
        item_pos: usize,
        scroll_pos: usize,
    ) -> Result<bool, ClientError> {
        let clevel = {
            let state = self.state.read().await;
            let character = state
                .character
                .as_ref()
                .ok_or_else(|| ClientError::precondition("no character"))?;
            if character.map.starts_with("bank") {
                return Err(ClientError::precondition("cannot upgrade in the bank"));
            }
            let item = character
                .items
                .get(item_pos)
                .and_then(|i| i.as_ref())
                .ok_or_else(|| {
                    ClientError::precondition(format!("no item in inventory slot {}", item_pos))
                })?;
            if !self
                .context
                .game_data
                .items
                .get(&item.name)
                .map_or(false, |i| i.upgrade)
            {
                return Err(ClientError::precondition(format!(
                    "'{}' is not upgradable",
                    item.name
                )));
            }
            if character
                .items
                .get(scroll_pos)
                .map_or(true, |i| i.is_none())
            {
                return Err(ClientError::precondition(format!(
                    "no scroll in inventory slot {}",
                    scroll_pos
                )));
            }
            item.level.unwrap_or(0)
        };

        let rx = self.bus.subscribe();
        self.socket.send(ClientMessage::Upgrade {
            item_num: item_pos,
            scroll_num: scroll_pos,
            clevel,
        })?;

        self.bus
            .wait(
                rx,
                self.context.config.slow_command_timeout,
                move |push| match push {
                    ServerPush::Upgrade(result) if result.kind == UpgradeKind::Upgrade => {
                        Some(Ok(result.success))
                    }
                    ServerPush::GameResponse(r) => match r.response.as_str() {
                        "upgrade_success" if r.num == Some(item_pos as u32) => Some(Ok(true)),
                        "upgrade_fail" if r.num == Some(item_pos as u32) => Some(Ok(false)),
                        "bank_restrictions" if r.place.as_deref() == Some("upgrade") => {
                            Some(Err(ClientError::rejection("cannot upgrade in the bank")))
                        }
                        "upgrade_in_progress" => Some(Err(ClientError::rejection(
                            "already upgrading something",
                        ))),
                        "upgrade_incompatible_scroll" => Some(Err(ClientError::rejection(
                            "the scroll is too low a grade for this item",
                        ))),
                        _ => None,
                    },
                    _ => None,
                },
            )
            .await
    }

    /// Compounds three identical items with a scroll. Slow, like upgrade.
    pub async fn compound(
        &self,
        items: [usize; 3],
        scroll_pos: usize,
    ) -> Result<bool, ClientError> {
        let clevel = {
            let state = self.state.read().await;
            let character = state
                .character
                .as_ref()
                .ok_or_else(|| ClientError::precondition("no character"))?;

            let mut infos = Vec::with_capacity(3);
            for &pos in &items {
                let item = character
                    .items
                    .get(pos)
                    .and_then(|i| i.as_ref())
                    .ok_or_else(|| {
                        ClientError::precondition(format!("no item in inventory slot {}", pos))
                    })?;
                infos.push(item);
            }
            if infos[0].name != infos[1].name || infos[0].name != infos[2].name {
                return Err(ClientError::precondition(
                    "can only compound 3 of the same item",
                ));
            }
            if infos[0].level != infos[1].level || infos[0].level != infos[2].level {
                return Err(ClientError::precondition(
                    "can only compound 3 items of the same level",
                ));
            }
            if character
                .items
                .get(scroll_pos)
                .map_or(true, |i| i.is_none())
            {
                return Err(ClientError::precondition(format!(
                    "no scroll in inventory slot {}",
                    scroll_pos
                )));
            }
            infos[0].level.unwrap_or(0)
        };

        let rx = self.bus.subscribe();
        self.socket.send(ClientMessage::Compound {
            items,
            scroll_num: scroll_pos,
            clevel,
        })?;

        self.bus
            .wait(
                rx,
                self.context.config.slow_command_timeout,
                |push| match push {
                    ServerPush::Upgrade(result) if result.kind == UpgradeKind::Compound => {
                        Some(Ok(result.success))
                    }
                    ServerPush::GameResponse(r) => match r.response.as_str() {
                        "compound_success" => Some(Ok(true)),
                        "compound_fail" => Some(Ok(false)),
                        "compound_no_item" => {
                            Some(Err(ClientError::rejection("compound items missing")))
                        }
                        "bank_restrictions" if r.place.as_deref() == Some("compound") => {
                            Some(Err(ClientError::rejection("cannot compound in the bank")))
                        }
                        _ => None,
                    },
                    _ => None,
                },
            )
            .await
    }

    /// Exchanges an item (quest turn-ins and the like).
    pub async fn exchange(&self, inventory_pos: usize) -> Result<bool, ClientError> {
        let quantity = {
            let state = self.state.read().await;
            let character = state
                .character
                .as_ref()
                .ok_or_else(|| ClientError::precondition("no character"))?;
            character
                .items
                .get(inventory_pos)
                .and_then(|i| i.as_ref())
                .map(|i| i.q.unwrap_or(1))
                .ok_or_else(|| {
                    ClientError::precondition(format!(
                        "no item in inventory slot {}",
                        inventory_pos
                    ))
                })?
        };

        let rx = self.bus.subscribe();
        self.socket.send(ClientMessage::Exchange {
            item_num: inventory_pos,
            q: quantity,
        })?;

        self.bus
            .wait(
                rx,
                self.context.config.slow_command_timeout,
                |push| match push {
                    ServerPush::Upgrade(result) if result.kind == UpgradeKind::Exchange => {
                        Some(Ok(result.success))
                    }
                    ServerPush::GameResponse(r) => match r.response.as_str() {
                        "exchange_notenough" => Some(Err(ClientError::rejection(
                            "not enough items to exchange",
                        ))),
                        "exchange_existing" => {
                            Some(Err(ClientError::rejection("already exchanging something")))
                        }
                        "bank_restrictions" => {
                            Some(Err(ClientError::rejection("cannot exchange in the bank")))
                        }
                        _ => None,
                    },
                    _ => None,
                },
            )
            .await
    }

    pub fn send_party_invite(&self, id: &str) -> Result<(), ClientError> {
        self.socket.send(ClientMessage::Party(PartyEvent::Invite {
            name: id.to_string(),
        }))
    }

    pub fn send_party_request(&self, id: &str) -> Result<(), ClientError> {
        self.socket.send(ClientMessage::Party(PartyEvent::Request {
            name: id.to_string(),
        }))
    }

    pub fn leave_party(&self) -> Result<(), ClientError> {
        self.socket.send(ClientMessage::Party(PartyEvent::Leave))
    }

    /// Accepts a party invite; resolves with the resulting party roster.
    pub async fn accept_party_invite(&self, id: &str) -> Result<PartyData, ClientError> {
        self.accept_party(id, PartyEvent::Accept {
            name: id.to_string(),
        })
        .await
    }

    /// Accepts another character's request to join our party.
    pub async fn accept_party_request(&self, id: &str) -> Result<PartyData, ClientError> {
        self.accept_party(id, PartyEvent::AcceptRequest {
            name: id.to_string(),
        })
        .await
    }

    async fn accept_party(
        &self,
        id: &str,
        event: PartyEvent,
    ) -> Result<PartyData, ClientError> {
        let (me, current_party) = {
            let state = self.state.read().await;
            let character = state
                .character
                .as_ref()
                .ok_or_else(|| ClientError::precondition("no character"))?;
            (character.id.clone(), state.party.clone())
        };

        let rx = self.bus.subscribe();
        self.socket.send(ClientMessage::Party(event))?;

        let other = id.to_string();
        self.bus
            .wait(rx, self.context.config.command_timeout, move |push| {
                match push {
                    ServerPush::PartyUpdate(party)
                        if party.list.contains(&me) && party.list.contains(&other) =>
                    {
                        Some(Ok(party.clone()))
                    }
                    ServerPush::GameResponse(r) => match r.response.as_str() {
                        "invitation_expired" => {
                            Some(Err(ClientError::rejection("invitation expired")))
                        }
                        "not_found" => Some(Err(ClientError::rejection(format!(
                            "{} is not found",
                            other
                        )))),
                        "already_partying" => {
                            // Fine if we are already in the right party.
                            match &current_party {
                                Some(party)
                                    if party.list.contains(&me)
                                        && party.list.contains(&other) =>
                                {
                                    Some(Ok(party.clone()))
                                }
                                _ => Some(Err(ClientError::rejection("already partying"))),
                            }
                        }
                        _ => None,
                    },
                    _ => None,
                }
            })
            .await
    }

    /// Sends gold to a visible player. Resolves with the amount actually
    /// sent, which the server may shave.
    pub async fn send_gold(&self, to: &str, amount: u64) -> Result<u64, ClientError> {
        {
            let state = self.state.read().await;
            let character = state
                .character
                .as_ref()
                .ok_or_else(|| ClientError::precondition("no character"))?;
            if character.gold == 0 {
                return Err(ClientError::precondition("no gold to send"));
            }
            if !state.players.contains_key(to) {
                return Err(ClientError::precondition(format!(
                    "cannot see {} to send gold",
                    to
                )));
            }
        }

        let rx = self.bus.subscribe();
        self.socket.send(ClientMessage::SendGold {
            to: to.to_string(),
            gold: amount,
        })?;

        let recipient = to.to_string();
        self.bus
            .wait(rx, self.context.config.command_timeout, move |push| {
                let ServerPush::GameResponse(r) = push else {
                    return None;
                };
                match r.response.as_str() {
                    "gold_sent" if r.name.as_deref() == Some(recipient.as_str()) => {
                        let sent = r.gold.unwrap_or(0);
                        if sent != amount {
                            warn!("wanted to send {} gold but sent {}", amount, sent);
                        }
                        Some(Ok(sent))
                    }
                    "trade_get_closer" => Some(Err(ClientError::rejection(format!(
                        "too far away from {} to send gold",
                        recipient
                    )))),
                    _ => None,
                }
            })
            .await
    }

    /// Sends an inventory item to a visible player.
    pub async fn send_item(
        &self,
        to: &str,
        inventory_pos: usize,
        quantity: u32,
    ) -> Result<(), ClientError> {
        {
            let state = self.state.read().await;
            let character = state
                .character
                .as_ref()
                .ok_or_else(|| ClientError::precondition("no character"))?;
            if !state.players.contains_key(to) {
                return Err(ClientError::precondition(format!("{} is not nearby", to)));
            }
            let item = character
                .items
                .get(inventory_pos)
                .and_then(|i| i.as_ref())
                .ok_or_else(|| {
                    ClientError::precondition(format!(
                        "no item in inventory slot {}",
                        inventory_pos
                    ))
                })?;
            if item.q.unwrap_or(1) < quantity {
                return Err(ClientError::precondition(format!(
                    "only have {} of {}, not {}",
                    item.q.unwrap_or(1),
                    item.name,
                    quantity
                )));
            }
        }

        let rx = self.bus.subscribe();
        self.socket.send(ClientMessage::SendItem {
            to: to.to_string(),
            num: inventory_pos,
            q: quantity,
        })?;

        let recipient = to.to_string();
        self.bus
            .wait(rx, self.context.config.command_timeout, move |push| {
                let ServerPush::GameResponse(r) = push else {
                    return None;
                };
                match r.response.as_str() {
                    "item_sent"
                        if r.name.as_deref() == Some(recipient.as_str()) && r.q == Some(quantity) =>
                    {
                        Some(Ok(()))
                    }
                    "trade_get_closer" => Some(Err(ClientError::rejection(format!(
                        "{} is too far away",
                        recipient
                    )))),
                    "send_no_space" => Some(Err(ClientError::rejection(format!(
                        "{} has no inventory space",
                        recipient
                    )))),
                    _ => None,
                }
            })
            .await
    }

    pub fn respawn(&self) -> Result<(), ClientError> {
        self.socket.send(ClientMessage::Respawn)
    }

    pub fn open_chest(&self, id: &str) -> Result<(), ClientError> {
        self.socket.send(ClientMessage::OpenChest {
            id: id.to_string(),
        })
    }

    /// Provokes the server into sending a fresh character push by toggling
    /// a cosmetic property, and resolves with that snapshot.
    pub async fn request_player_data(&self) -> Result<CharacterSnapshot, ClientError> {
        let rx = self.bus.subscribe();
        self.socket.send(ClientMessage::Property { typing: true })?;
        self.bus
            .wait(rx, self.context.config.command_timeout, |push| match push {
                ServerPush::Character(snapshot) if snapshot.s.contains_key("typing") => {
                    Some(Ok(snapshot.clone()))
                }
                _ => None,
            })
            .await
    }
}

/// Finds a bank pack and slot for an item within the accessible pack range:
/// an existing stack with room first, otherwise the first empty slot.
fn find_bank_slot(
    bank: &shared::messages::BankInfo,
    tier: std::ops::RangeInclusive<usize>,
    item: &shared::messages::ItemInfo,
    stack_limit: Option<u32>,
) -> Option<(String, i64)> {
    let mut empty: Option<(String, i64)> = None;

    for pack_num in tier {
        let pack_name = format!("items{}", pack_num);
        let Some(slots) = bank.packs.get(&pack_name) else {
            continue;
        };
        for (slot_num, slot) in slots.iter().enumerate() {
            match slot {
                None => {
                    if stack_limit.is_none() {
                        // Unstackable: any empty slot is perfect.
                        return Some((pack_name, slot_num as i64));
                    }
                    if empty.is_none() {
                        empty = Some((pack_name.clone(), slot_num as i64));
                    }
                }
                Some(existing) => {
                    if let Some(limit) = stack_limit {
                        if existing.name == item.name
                            && existing.q.unwrap_or(1) + item.q.unwrap_or(1) <= limit
                        {
                            // Stack onto the existing pile; the server
                            // resolves the exact slot for -1.
                            return Some((pack_name, -1));
                        }
                    }
                }
            }
        }
    }

    empty
}
