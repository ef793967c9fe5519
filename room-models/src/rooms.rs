use std::collections::BTreeMap;

use log::info;
use rand::seq::SliceRandom;
use redis_orm::utils::{DEFAULT_ID_LENGTH, new_id};
use redis_orm::{Error, Object, Relation, RelationManager, Value};

use crate::topics::topic;
use crate::users::User;

/// 成员角色中参与发牌的那一种
pub const PLAYER: &str = "player";

/// 一副牌的点数
const CARD_VALUES: [&str; 10] = ["1", "2", "3", "4", "5", "6", "7", "8", "9", "10"];
const CARD_ID_LENGTH: usize = 4;

#[derive(Object)]
#[object(
    name = "Room",
    fields = ["name", "round", "cards", "messages"],
    lefts(users = UsersRooms)
)]
pub struct Room;

#[derive(Relation)]
#[relation(name = "member", left = User, right = Room, fields = ["role", "status"])]
pub struct UsersRooms;

/// 新开一轮的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Round {
    pub id: String,
    pub topic: String,
    /// 牌 id → `{flipped, player_id, peeked, value}`
    pub cards: BTreeMap<String, Value>,
}

/// 开始新的一轮：随机主题，给每个 `player` 成员发一张不重复的牌，清空消息后保存房间。
pub async fn new_round(room: &mut Object<Room>) -> Result<Round, Error> {
    let members = room.users().all().await?;
    let players: Vec<&str> = members
        .iter()
        .filter(|(_, link)| link.text("role").is_ok_and(|role| role == PLAYER))
        .map(|(user_id, _)| user_id.as_str())
        .collect();
    if players.len() > CARD_VALUES.len() {
        return Err(Error::ValidationError(format!(
            "too many players ({}): max {}",
            players.len(),
            CARD_VALUES.len()
        )));
    }

    let round_id = new_id(DEFAULT_ID_LENGTH);
    let round_topic = topic().to_string();

    let mut values = CARD_VALUES;
    values.shuffle(&mut rand::thread_rng());

    let peeked: Value = members
        .keys()
        .map(|user_id| (user_id.clone(), Value::from("False")))
        .collect();

    let mut cards = BTreeMap::new();
    for (player_id, value) in players.iter().zip(values) {
        let card_id = loop {
            let candidate = new_id(CARD_ID_LENGTH);
            if !cards.contains_key(&candidate) {
                break candidate;
            }
        };
        let card: Value = [
            ("flipped", Value::from("True")),
            ("player_id", Value::from(*player_id)),
            ("peeked", peeked.clone()),
            ("value", Value::from(value)),
        ]
        .into_iter()
        .collect();
        cards.insert(card_id, card);
    }

    let round: Value = [
        ("id", Value::from(round_id.as_str())),
        ("topic", Value::from(round_topic.as_str())),
    ]
    .into_iter()
    .collect();
    room.set_field("round", round)?;
    room.set_field("cards", Value::Map(cards.clone()))?;
    room.set_field("messages", Value::map())?;
    room.save().await?;

    info!(
        "Room {}: round {} dealt {} cards",
        room.id(),
        round_id,
        cards.len()
    );
    Ok(Round {
        id: round_id,
        topic: round_topic,
        cards,
    })
}
