use redis_orm::{Error, Object, Relation, RelationManager, fields};

#[derive(Object)]
#[object(fields = ["name", "email"], rights(rooms = Membership))]
pub struct Member;

#[derive(Object)]
#[object(fields = ["title"], lefts(members = Membership))]
pub struct Lobby;

#[derive(Relation)]
#[relation(name = "joined", left = Member, right = Lobby, fields = ["role"])]
pub struct Membership;

// 需要本地 Redis，地址取自 REDIS_HOST / REDIS_PORT / REDIS_DATA_DB
#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::init();
    redis_orm::validate_models()?;

    let alice = Object::<Member>::create(fields! {
        "name" => "Alice",
        "email" => "alice@example.com",
    })
    .await?;
    let lobby = Object::<Lobby>::create(fields! { "title" => "Planning" }).await?;

    alice.rooms().add(lobby.id(), fields! { "role" => "host" }).await?;
    println!("{}", alice.to_dict(true).await?);

    let mut edit = Object::<Member>::get_by_id(alice.id())
        .await?
        .ok_or_else(|| Error::InvalidKey(alice.key().to_string()))?;
    edit.set_field("name", "Alice B.")?;
    edit.save().await?;

    for (id, link) in lobby.members().all().await? {
        println!("{id}: {:?}", link.attributes());
    }

    alice.delete().await?;
    println!(
        "after delete: member={} link={}",
        Object::<Member>::exists_by_id(alice.id()).await?,
        Relation::<Membership>::exists_by_ids(alice.id(), lobby.id()).await?
    );
    lobby.delete().await?;

    Ok(())
}
