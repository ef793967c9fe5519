use std::sync::Arc;

use redis_orm::{
    Error, MemoryStore, ModelKind, Object, Relation, RelationManager, all_models, connection,
    fields, validate_models,
};
use serial_test::serial;

// 关系名以 `person:` 开头，键会落在 Person 的扫描范围内
#[derive(Object)]
#[object(fields = ["name"], rights(pets = PersonPets))]
pub struct Person;

#[derive(Object)]
#[object(fields = ["species"])]
pub struct Pet;

#[derive(Relation)]
#[relation(name = "person:pets", left = Person, right = Pet)]
pub struct PersonPets;

#[test]
fn registry_lists_derived_models() {
    let models = all_models();
    let names: Vec<&str> = models.iter().map(|meta| meta.name).collect();
    assert_eq!(names, vec!["Person", "Pet", "person:pets"]);

    let pets = models.iter().find(|meta| meta.name == "person:pets").unwrap();
    assert_eq!(pets.kind, ModelKind::Relation);
    assert_eq!((pets.key_prefix)(), "person:pets::");
    assert!(pets.fields.is_empty());

    let person = models.iter().find(|meta| meta.name == "Person").unwrap();
    assert_eq!(person.kind, ModelKind::Object);
    assert_eq!((person.key_prefix)(), "person:");
    assert_eq!(person.fields, ["name"]);
}

#[test]
fn overlapping_prefixes_are_reported() {
    let err = validate_models().unwrap_err();
    let Error::ValidationError(msg) = err else {
        panic!("expected a validation error");
    };
    assert!(msg.contains("person:") && msg.contains("person:pets::"));
}

#[tokio::test]
#[serial]
async fn object_search_skips_relation_keys() {
    let _ = env_logger::builder().is_test(true).try_init();
    connection::set(Arc::new(MemoryStore::new())).unwrap();

    let alice = Object::<Person>::create(fields! { "name" => "Alice" }).await.unwrap();
    let rex = Object::<Pet>::create(fields! { "species" => "dog" }).await.unwrap();
    alice.rightward::<PersonPets>().add(rex.id(), fields! {}).await.unwrap();

    let (people, next) = Object::<Person>::search(0, 100).await.unwrap();
    assert_eq!(next, 0);
    assert_eq!(people.len(), 1);
    assert_eq!(people[0].id(), alice.id());

    let (links, _) = Relation::<PersonPets>::search(0, 100).await.unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].left_id(), alice.id());
}
