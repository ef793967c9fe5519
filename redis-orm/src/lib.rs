extern crate self as redis_orm;

pub mod config;
pub mod connection;
mod entity;
mod error;
mod manager;
mod object;
mod relation;
pub mod store;
pub mod utils;
mod value;

pub use config::StoreConfig;
pub use entity::{DEL_EXPIRE, Entity, META_FIELDS, Meta, Model};
pub use error::Error;
pub use manager::{LeftwardManager, RelationManager, RightwardManager};
pub use object::{Object, ObjectModel, RelationSlot};
pub use redis_orm_derive::{Object, Relation};
pub use relation::{Cardinality, Relation, RelationModel};
pub use store::{Batch, MemoryStore, RedisStore, Store};
pub use value::{Fields, Value};

#[doc(hidden)]
pub use inventory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Object,
    Relation,
}

// 模型元信息
pub struct ModelMeta {
    pub name: &'static str,
    pub kind: ModelKind,
    pub fields: &'static [&'static str],
    pub key_prefix: fn() -> String,
}

impl ModelMeta {
    pub const fn object<M: ObjectModel>() -> Self {
        Self {
            name: M::NAME,
            kind: ModelKind::Object,
            fields: M::FIELDS,
            key_prefix: Object::<M>::prefix,
        }
    }

    pub const fn relation<R: RelationModel>() -> Self {
        Self {
            name: R::NAME,
            kind: ModelKind::Relation,
            fields: R::FIELDS,
            key_prefix: Relation::<R>::prefix,
        }
    }
}

impl std::fmt::Debug for ModelMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ModelMeta {{ name: {}, kind: {:?}, prefix: {}, fields: {:?} }}",
            self.name,
            self.kind,
            (self.key_prefix)(),
            self.fields
        )
    }
}

// 使用 inventory 收集所有派生出来的模型
inventory::collect!(ModelMeta);

// 获取所有已注册的模型，按名称排序
pub fn all_models() -> Vec<&'static ModelMeta> {
    let mut models: Vec<&'static ModelMeta> = inventory::iter::<ModelMeta>().collect();
    models.sort_by_key(|meta| meta.name);
    models
}

/// 检查已注册模型的键前缀是否冲突
///
/// 一个前缀是另一个前缀的前缀时（如 `user:` 与 `user:posts::`），按前缀扫描
/// 会把另一类记录也扫出来，返回 [`Error::ValidationError`]。
pub fn validate_models() -> Result<(), Error> {
    let prefixes: Vec<(&'static str, String)> = all_models()
        .into_iter()
        .map(|meta| (meta.name, (meta.key_prefix)()))
        .collect();

    for (i, (name, prefix)) in prefixes.iter().enumerate() {
        for (other_name, other_prefix) in &prefixes[i + 1..] {
            if prefix.starts_with(other_prefix.as_str()) || other_prefix.starts_with(prefix.as_str())
            {
                return Err(Error::ValidationError(format!(
                    "key prefix '{prefix}' of {name} collides with '{other_prefix}' of {other_name}"
                )));
            }
        }
    }
    Ok(())
}

pub(crate) fn object_prefix(type_name: &str) -> String {
    format!("{}:", type_name.to_lowercase())
}

pub(crate) fn object_key(type_name: &str, id: &str) -> String {
    format!("{}{}", object_prefix(type_name), id)
}

pub(crate) fn relation_prefix(relation_name: &str) -> String {
    format!("{}::", relation_name)
}

pub(crate) fn relation_key(
    relation_name: &str,
    left_type: &str,
    left_id: &str,
    right_type: &str,
    right_id: &str,
) -> String {
    format!(
        "{}{}::{}",
        relation_prefix(relation_name),
        object_key(left_type, left_id),
        object_key(right_type, right_id)
    )
}
