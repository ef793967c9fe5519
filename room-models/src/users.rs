use std::hash::{DefaultHasher, Hash, Hasher};

use log::{info, warn};
use rand::seq::SliceRandom;
use rand::{SeedableRng, rngs::StdRng};
use redis_orm::{Error, Object, Relation, RelationManager, utils::random_string};

use crate::rooms::UsersRooms;

/// 登录码使用的字母表
pub const S_ALPHABET: &str = "0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
pub const SID_LENGTH: usize = 24;

const COLORS: &[&str] = &[
    "Almond", "Amethyst", "Apricot", "Aqua", "Azure", "Beige", "Black", "Blue", "Bronze", "Brown",
    "Burgundy", "Byzantine", "Cerulean", "Champagne", "Charcoal", "Cherry", "Cobalt", "Coral",
    "Crimson", "Cyan", "Emerald", "Fuchsia", "Gold", "Gray", "Green", "Indigo", "Ivory", "Jade",
    "Lavender", "Lemon", "Lilac", "Lime", "Magenta", "Maroon", "Mint", "Navy", "Olive", "Orange",
    "Peach", "Periwinkle", "Pink", "Plum", "Purple", "Red", "Rose", "Ruby", "Salmon", "Sapphire",
    "Silver", "Teal", "Yellow",
];

const ANIMALS: &[&str] = &[
    "Aardvark", "Albatross", "Alligator", "Antelope", "Armadillo", "Badger", "Bat", "Beaver",
    "Bison", "Buffalo", "Camel", "Capybara", "Caribou", "Chameleon", "Cheetah", "Chipmunk",
    "Cobra", "Cougar", "Coyote", "Crab", "Crocodile", "Deer", "Dingo", "Dolphin", "Dragonfly",
    "Eagle", "Elephant", "Elk", "Ferret", "Flamingo", "Fox", "Frog", "Gazelle", "Giraffe", "Goat",
    "Gorilla", "Grasshopper", "Hamster", "Hedgehog", "Heron", "Hippo", "Horse", "Hyena", "Iguana",
    "Jaguar", "Jellyfish", "Kangaroo", "Koala", "Lemur", "Leopard",
];

#[derive(Object)]
#[object(
    name = "User",
    fields = ["name", "status"],
    rights(codes = UserCodes, rooms = UsersRooms)
)]
pub struct User;

/// 登录码：没有字段，id 本身就是秘密。
#[derive(Object)]
#[object(name = "Code", id = new_sid, lefts(user = UserCodes))]
pub struct Code;

/// 用户与登录码的归属关系，删除用户时一并删除其登录码。
#[derive(Relation)]
#[relation(
    name = "user_code_ownership",
    left = User,
    right = Code,
    cardinality = "one_to_many",
    fields = ["type"],
    cascade
)]
pub struct UserCodes;

pub fn new_sid() -> String {
    random_string(S_ALPHABET, SID_LENGTH)
}

/// 由种子确定地生成匿名名字，形如 `Teal Koala`。
pub fn new_name(seed: &str) -> String {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    let mut rng = StdRng::seed_from_u64(hasher.finish());
    let color = COLORS.choose(&mut rng).copied().unwrap_or(COLORS[0]);
    let animal = ANIMALS.choose(&mut rng).copied().unwrap_or(ANIMALS[0]);
    format!("{color} {animal}")
}

/// 会话中的当前身份
pub trait Principal {
    fn get_id(&self) -> Option<&str>;
    fn name(&self) -> String;
    fn is_active(&self) -> bool;
    fn is_authenticated(&self) -> bool;
    fn is_anonymous(&self) -> bool;
}

impl Principal for Object<User> {
    fn get_id(&self) -> Option<&str> {
        Some(self.id())
    }

    fn name(&self) -> String {
        self.text("name").unwrap_or_default().to_string()
    }

    fn is_active(&self) -> bool {
        true
    }

    fn is_authenticated(&self) -> bool {
        true
    }

    fn is_anonymous(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnonymousUser {
    pub id: Option<String>,
}

impl AnonymousUser {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: Some(id.into()) }
    }
}

impl Principal for AnonymousUser {
    fn get_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn name(&self) -> String {
        new_name(self.id.as_deref().unwrap_or_default())
    }

    fn is_active(&self) -> bool {
        false
    }

    fn is_authenticated(&self) -> bool {
        false
    }

    fn is_anonymous(&self) -> bool {
        true
    }
}

/// 按 id 加载会话用户
pub async fn load_user(user_id: &str) -> Result<Option<Object<User>>, Error> {
    Object::<User>::get_by_id(user_id).await
}

/// 用登录码换取其所属用户；登录码不存在或无主时返回 `None`。
pub async fn code_auth(code_id: &str) -> Result<Option<Object<User>>, Error> {
    let Some(code) = Object::<Code>::get_by_id(code_id).await? else {
        warn!("code_auth: unknown code");
        return Ok(None);
    };
    let Some((user, _)) = code.user().first().await? else {
        warn!("code_auth: code {} has no owner", code.id());
        return Ok(None);
    };
    info!("code_auth: user {} logged in", user.id());
    Ok(Some(user))
}
