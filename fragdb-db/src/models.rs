use chrono::NaiveDateTime;
use diesel::prelude::*;

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::data::games)]
pub struct NewGame<'a> {
    pub server_identity: i64,
    pub map: &'a str,
    pub mode: &'a str,
    pub score1: i32,
    pub score2: i32,
    pub duration_minutes: Option<i32>,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub game_over_time: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::data::game_events)]
#[diesel(treat_none_as_default_value = false)]
pub struct NewGameEvent<'a> {
    pub game_id: i64,
    pub game_event_index: i32,
    pub kind: &'a str,
    pub event_time: NaiveDateTime,
    pub round_start_id: Option<i64>,
    pub actor_name: Option<&'a str>,
    pub actor_id: Option<&'a str>,
    pub actor_team: Option<&'a str>,
    pub target_name: Option<&'a str>,
    pub target_id: Option<&'a str>,
    pub target_team: Option<&'a str>,
    pub weapon: Option<&'a str>,
    pub headshot: Option<bool>,
    pub damage: Option<i32>,
    pub armor_damage: Option<i32>,
    pub health_remaining: Option<i32>,
    pub hitgroup: Option<&'a str>,
    pub assist_kind: Option<&'a str>,
    pub bomb_site: Option<&'a str>,
    pub actor_x: Option<i32>,
    pub actor_y: Option<i32>,
    pub actor_z: Option<i32>,
    pub target_x: Option<i32>,
    pub target_y: Option<i32>,
    pub target_z: Option<i32>,
    pub scorecard: Option<serde_json::Value>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::data::accolades)]
pub struct NewAccolade<'a> {
    pub game_id: i64,
    pub kind: &'a str,
    pub player_id: &'a str,
    pub player_name: &'a str,
    pub value: f64,
    pub position: i32,
    pub score: f64,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::data::player_stats)]
pub struct NewPlayerStats<'a> {
    pub player_id: &'a str,
    pub game_time: NaiveDateTime,
    pub last_seen_nickname: &'a str,
    pub kills: i32,
    pub deaths: i32,
    pub assists: i32,
    pub headshot_kills: i32,
    pub rounds_played: i32,
    pub damage_dealt: f64,
    pub clutches_won: i32,
    pub rating: i32,
}
