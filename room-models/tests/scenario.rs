use std::collections::BTreeSet;
use std::sync::Arc;

use redis_orm::{Error, MemoryStore, Object, Relation, RelationManager, connection, fields};
use room_models::{
    Code, CodeRelations, Principal, Room, RoomRelations, User, UserCodes, UserRelations,
    UsersRooms, code_auth, load_user, new_round, topics::TOPICS,
};
use serial_test::serial;

fn setup() -> MemoryStore {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = MemoryStore::new();
    connection::set(Arc::new(store.clone())).unwrap();
    store
}

async fn user(name: &str) -> Object<User> {
    Object::<User>::create(fields! { "name" => name, "status" => "active" })
        .await
        .unwrap()
}

#[tokio::test]
#[serial]
async fn login_code_resolves_its_owner() {
    setup();
    redis_orm::validate_models().unwrap();

    let alice = user("Alice").await;
    let code = Object::<Code>::create(fields! {}).await.unwrap();
    assert_eq!(code.id().len(), 24);
    assert_eq!(code.key(), format!("code:{}", code.id()));

    alice
        .codes()
        .add(code.id(), fields! { "type" => "login" })
        .await
        .unwrap();

    let codes = alice.codes().all().await.unwrap();
    assert_eq!(codes.len(), 1);
    assert_eq!(codes[code.id()].text("type").unwrap(), "login");

    let logged_in = code_auth(code.id()).await.unwrap().unwrap();
    assert_eq!(logged_in.id(), alice.id());
    assert!(logged_in.is_authenticated());
    assert_eq!(logged_in.get_id(), Some(alice.id()));
    assert_eq!(logged_in.name(), "Alice");

    let loaded = load_user(alice.id()).await.unwrap().unwrap();
    assert_eq!(loaded.text("status").unwrap(), "active");

    assert!(code_auth("nope").await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn code_belongs_to_a_single_user() {
    setup();
    let alice = user("Alice").await;
    let bob = user("Bob").await;
    let code = Object::<Code>::create(fields! {}).await.unwrap();

    alice.codes().add(code.id(), fields! { "type" => "login" }).await.unwrap();
    let err = bob
        .codes()
        .add(code.id(), fields! { "type" => "login" })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RelationError(_)));

    let (owner, _) = code.user().first().await.unwrap().unwrap();
    assert_eq!(owner.id(), alice.id());
}

#[tokio::test]
#[serial]
async fn orphan_codes_are_refused() {
    setup();
    let orphan = Object::<Code>::create(fields! {}).await.unwrap();
    assert!(code_auth(orphan.id()).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn deleting_a_user_deletes_its_codes() {
    setup();
    let alice = user("Alice").await;
    let first = Object::<Code>::create(fields! {}).await.unwrap();
    let second = Object::<Code>::create(fields! {}).await.unwrap();
    alice.codes().add(first.id(), fields! { "type" => "login" }).await.unwrap();
    alice.codes().add(second.id(), fields! { "type" => "login" }).await.unwrap();

    assert!(alice.delete().await.unwrap());

    assert!(!Object::<User>::exists_by_id(alice.id()).await.unwrap());
    assert!(!Object::<Code>::exists_by_id(first.id()).await.unwrap());
    assert!(!Object::<Code>::exists_by_id(second.id()).await.unwrap());
    assert!(
        !Relation::<UserCodes>::exists_by_ids(alice.id(), first.id())
            .await
            .unwrap()
    );
    assert!(code_auth(first.id()).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn new_round_deals_cards_to_players() {
    setup();
    let alice = user("Alice").await;
    let bob = user("Bob").await;
    let carol = user("Carol").await;
    let mut room = Object::<Room>::create(fields! { "name" => "Friday" }).await.unwrap();

    room.users()
        .add(alice.id(), fields! { "role" => "player", "status" => "online" })
        .await
        .unwrap();
    room.users()
        .add(bob.id(), fields! { "role" => "player" })
        .await
        .unwrap();
    carol
        .rooms()
        .add(room.id(), fields! { "role" => "watcher" })
        .await
        .unwrap();

    room.set_field("messages", fields! { "m1" => "hello" }).unwrap();
    room.save().await.unwrap();

    let round = new_round(&mut room).await.unwrap();
    assert_eq!(round.id.len(), 10);
    assert!(TOPICS.contains(&round.topic.as_str()));
    assert_eq!(round.cards.len(), 2);

    let mut dealt_to = BTreeSet::new();
    let mut values = BTreeSet::new();
    for (card_id, card) in &round.cards {
        assert_eq!(card_id.len(), 4);
        assert_eq!(card.get("flipped").and_then(|v| v.as_str()), Some("True"));
        dealt_to.insert(card.get("player_id").and_then(|v| v.as_str()).unwrap().to_string());
        let value: u32 = card.get("value").and_then(|v| v.as_str()).unwrap().parse().unwrap();
        assert!((1..=10).contains(&value));
        values.insert(value);

        let peeked = card.get("peeked").and_then(|v| v.as_map()).unwrap();
        assert_eq!(peeked.len(), 3);
        assert!(peeked.values().all(|v| v.as_str() == Some("False")));
        assert!(peeked.contains_key(carol.id()));
    }
    assert_eq!(values.len(), 2);
    assert_eq!(
        dealt_to,
        BTreeSet::from([alice.id().to_string(), bob.id().to_string()])
    );

    let stored = Object::<Room>::get_by_id(room.id()).await.unwrap().unwrap();
    let stored_round = stored.field("round").unwrap();
    assert_eq!(stored_round.get("id").and_then(|v| v.as_str()), Some(round.id.as_str()));
    assert_eq!(
        stored_round.get("topic").and_then(|v| v.as_str()),
        Some(round.topic.as_str())
    );
    assert_eq!(stored.field("cards").unwrap().as_map(), Some(&round.cards));
    // 清空后的消息在存储中不留任何子字段
    assert!(stored.field("messages").unwrap().is_empty());
    assert_eq!(stored.version(), 2);
}

#[tokio::test]
#[serial]
async fn next_round_replaces_previous_cards() {
    setup();
    let alice = user("Alice").await;
    let mut room = Object::<Room>::create(fields! { "name" => "Solo" }).await.unwrap();
    room.users()
        .add(alice.id(), fields! { "role" => "player" })
        .await
        .unwrap();

    let first = new_round(&mut room).await.unwrap();
    let second = new_round(&mut room).await.unwrap();
    assert_ne!(first.id, second.id);

    let stored = Object::<Room>::get_by_id(room.id()).await.unwrap().unwrap();
    let cards = stored.field("cards").unwrap().as_map().unwrap();
    assert_eq!(cards.len(), 1);
    assert_eq!(cards.keys().collect::<Vec<_>>(), second.cards.keys().collect::<Vec<_>>());
}

#[tokio::test]
#[serial]
async fn too_many_players_is_refused() {
    setup();
    let mut room = Object::<Room>::create(fields! { "name" => "Crowded" }).await.unwrap();
    for i in 0..11 {
        let player = user(&format!("P{i}")).await;
        player
            .rightward::<UsersRooms>()
            .add(room.id(), fields! { "role" => "player" })
            .await
            .unwrap();
    }

    let err = new_round(&mut room).await.unwrap_err();
    assert!(matches!(err, Error::ValidationError(ref msg) if msg.contains("max 10")));
}
