//! Converts buffered pipeline events into database rows.

use fragdb_db::db::{EventForDb, EventKind};

use crate::ingest::context::PendingEvent;
use crate::ingest::event::{Actor, EventData};

pub fn event_row(index: i32, event: &PendingEvent) -> EventForDb {
    let mut row = EventForDb::new(index, kind_of(&event.data), event.at);
    row.round_start_index = event.round_start;

    match &event.data {
        EventData::Kill {
            killer,
            victim,
            weapon,
            headshot,
            killer_pos,
            victim_pos,
        } => {
            set_actor(&mut row, killer);
            set_target(&mut row, victim);
            row.weapon = Some(weapon.clone());
            row.headshot = Some(*headshot);
            row.actor_pos = *killer_pos;
            row.target_pos = *victim_pos;
        }
        EventData::Attack {
            attacker,
            victim,
            weapon,
            damage,
            armor_damage,
            health_remaining,
            hitgroup,
            attacker_pos,
            victim_pos,
        } => {
            set_actor(&mut row, attacker);
            set_target(&mut row, victim);
            row.weapon = Some(weapon.clone());
            row.damage = Some(*damage);
            row.armor_damage = Some(*armor_damage);
            row.health_remaining = Some(*health_remaining);
            row.hitgroup = Some(hitgroup.clone());
            row.actor_pos = *attacker_pos;
            row.target_pos = *victim_pos;
        }
        EventData::Assist {
            assister,
            victim,
            kind,
        } => {
            set_actor(&mut row, assister);
            set_target(&mut row, victim);
            row.assist_kind = Some(kind.as_str().to_string());
        }
        EventData::RoundEnd { players } => {
            row.scorecard = serde_json::to_value(players).ok();
        }
        EventData::BombPlant { player, site } => {
            set_actor(&mut row, player);
            row.bomb_site = Some(site.as_str().to_string());
        }
        EventData::BombDefuseBegin { player } => {
            set_actor(&mut row, player);
        }
        EventData::RoundStart
        | EventData::BombDefused
        | EventData::BombExploded
        | EventData::GameOver { .. }
        | EventData::GameProcessed => {}
        EventData::ServerIdentity { .. } | EventData::Accolade(_) => {
            unreachable!("never buffered for persistence")
        }
    }

    row
}

fn kind_of(data: &EventData) -> EventKind {
    match data {
        EventData::RoundStart => EventKind::RoundStart,
        EventData::RoundEnd { .. } => EventKind::RoundEnd,
        EventData::Kill { .. } => EventKind::Kill,
        EventData::Attack { .. } => EventKind::Attack,
        EventData::Assist { .. } => EventKind::Assist,
        EventData::BombPlant { .. } => EventKind::BombPlant,
        EventData::BombDefuseBegin { .. } => EventKind::BombDefuseBegin,
        EventData::BombDefused => EventKind::BombDefused,
        EventData::BombExploded => EventKind::BombExploded,
        EventData::GameOver { .. } => EventKind::GameOver,
        EventData::GameProcessed => EventKind::GameProcessed,
        EventData::ServerIdentity { .. } | EventData::Accolade(_) => {
            unreachable!("never buffered for persistence")
        }
    }
}

fn set_actor(row: &mut EventForDb, actor: &Actor) {
    row.actor_name = Some(actor.name.clone());
    row.actor_id = actor.steam_id.clone();
    row.actor_team = actor.team.map(|team| team.as_log().to_string());
}

fn set_target(row: &mut EventForDb, actor: &Actor) {
    row.target_name = Some(actor.name.clone());
    row.target_id = actor.steam_id.clone();
    row.target_team = actor.team.map(|team| team.as_log().to_string());
}
