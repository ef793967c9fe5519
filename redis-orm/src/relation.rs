use std::{
    collections::BTreeMap,
    fmt,
    ops::{Deref, DerefMut},
};

use futures::TryStreamExt;
use serde_json::{Map, Value as Json};

use crate::{
    Entity, Error, Fields, Model, Object, ObjectModel, object_prefix, relation_key,
    relation_prefix, store::escape_pattern,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cardinality {
    #[default]
    ManyToMany,
    /// 每个右侧对象最多关联一个左侧对象
    OneToMany,
}

/// 连接两类对象的记录类型
pub trait RelationModel: Model + Sized {
    type Left: ObjectModel;
    type Right: ObjectModel;

    const CARDINALITY: Cardinality = Cardinality::ManyToMany;

    /// 为 `true` 时删除左侧对象会连带删除其关联的右侧对象
    const CASCADE: bool = false;
}

/// 键为 `<关系名>::<左类型>:<左 id>::<右类型>:<右 id>` 的记录
pub struct Relation<R> {
    entity: Entity<R>,
    left_id: String,
    right_id: String,
}

impl<R> Clone for Relation<R> {
    fn clone(&self) -> Self {
        Self {
            entity: self.entity.clone(),
            left_id: self.left_id.clone(),
            right_id: self.right_id.clone(),
        }
    }
}

impl<R: Model> fmt::Debug for Relation<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relation")
            .field("left_id", &self.left_id)
            .field("right_id", &self.right_id)
            .field("entity", &self.entity)
            .finish()
    }
}

impl<R> Deref for Relation<R> {
    type Target = Entity<R>;

    fn deref(&self) -> &Self::Target {
        &self.entity
    }
}

impl<R> DerefMut for Relation<R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.entity
    }
}

impl<R: RelationModel> Relation<R> {
    pub fn prefix() -> String {
        relation_prefix(R::NAME)
    }

    pub fn key_for(left_id: &str, right_id: &str) -> String {
        relation_key(R::NAME, R::Left::NAME, left_id, R::Right::NAME, right_id)
    }

    fn from_entity(entity: Entity<R>) -> Result<Self, Error> {
        let invalid = || Error::InvalidKey(entity.key().to_string());
        let left_prefix = object_prefix(R::Left::NAME);
        let right_prefix = object_prefix(R::Right::NAME);

        let (left_id, right_id) = entity
            .key()
            .strip_prefix(&Self::prefix())
            .and_then(|rest| rest.strip_prefix(&left_prefix))
            .and_then(|rest| rest.split_once("::"))
            .and_then(|(left_id, rest)| Some((left_id, rest.strip_prefix(&right_prefix)?)))
            .ok_or_else(invalid)?;

        Ok(Self {
            left_id: left_id.to_string(),
            right_id: right_id.to_string(),
            entity,
        })
    }

    fn from_entities(entities: Vec<Entity<R>>) -> Result<Vec<Self>, Error> {
        entities.into_iter().map(Self::from_entity).collect()
    }

    /// 固定左侧 id 的扫描模式
    fn rights_pattern(left_id: &str) -> String {
        format!(
            "{}*",
            escape_pattern(&format!(
                "{}{}{}::{}",
                Self::prefix(),
                object_prefix(R::Left::NAME),
                left_id,
                object_prefix(R::Right::NAME)
            ))
        )
    }

    /// 固定右侧 id 的扫描模式
    fn lefts_pattern(right_id: &str) -> String {
        format!(
            "{}*{}",
            escape_pattern(&format!("{}{}", Self::prefix(), object_prefix(R::Left::NAME))),
            escape_pattern(&format!("::{}{}", object_prefix(R::Right::NAME), right_id))
        )
    }

    pub fn left_id(&self) -> &str {
        &self.left_id
    }

    pub fn right_id(&self) -> &str {
        &self.right_id
    }

    pub fn into_entity(self) -> Entity<R> {
        self.entity
    }

    /// 两端对象都必须存在；一对多时右侧对象不能已有关联
    ///
    /// 基数检查与写入之间不是原子的，并发创建仍可能产生重复关联。
    pub async fn create(left_id: &str, right_id: &str, fields: Fields) -> Result<Self, Error> {
        log::info!(
            "Creating {} between {}:{} and {}:{}",
            R::NAME,
            R::Left::NAME,
            left_id,
            R::Right::NAME,
            right_id
        );

        if !Object::<R::Left>::exists_by_id(left_id).await? {
            return Err(Error::RelationError(format!(
                "{}:{} does not exist.",
                R::Left::NAME,
                left_id
            )));
        }
        if !Object::<R::Right>::exists_by_id(right_id).await? {
            return Err(Error::RelationError(format!(
                "{}:{} does not exist.",
                R::Right::NAME,
                right_id
            )));
        }

        if R::CARDINALITY == Cardinality::OneToMany
            && Entity::<R>::scan(Self::lefts_pattern(right_id))
                .try_next()
                .await?
                .is_some()
        {
            return Err(Error::RelationError(format!(
                "{}:{} is already linked to a {}",
                R::Right::NAME,
                right_id,
                R::Left::NAME
            )));
        }

        Self::from_entity(Entity::create(Self::key_for(left_id, right_id), fields).await?)
    }

    pub async fn get_by_ids(left_id: &str, right_id: &str) -> Result<Option<Self>, Error> {
        match Entity::get(&Self::key_for(left_id, right_id)).await? {
            Some(entity) => Ok(Some(Self::from_entity(entity)?)),
            None => Ok(None),
        }
    }

    pub async fn exists_by_ids(left_id: &str, right_id: &str) -> Result<bool, Error> {
        Entity::<R>::exists(&Self::key_for(left_id, right_id)).await
    }

    pub async fn patch(
        left_id: &str,
        right_id: &str,
        field: &str,
        value: impl Into<String>,
        is_new: bool,
    ) -> Result<bool, Error> {
        Entity::<R>::patch(&Self::key_for(left_id, right_id), field, value, is_new).await
    }

    pub async fn save(&mut self) -> Result<Self, Error> {
        Self::from_entity(self.entity.save().await?)
    }

    pub async fn search(cursor: u64, count: usize) -> Result<(Vec<Self>, u64), Error> {
        let pattern = format!(
            "{}*{}*",
            escape_pattern(&format!("{}{}", Self::prefix(), object_prefix(R::Left::NAME))),
            escape_pattern(&format!("::{}", object_prefix(R::Right::NAME)))
        );
        let (entities, next) = Entity::<R>::search(&pattern, cursor, count).await?;
        Ok((Self::from_entities(entities)?, next))
    }

    pub async fn left(&self) -> Result<Option<Object<R::Left>>, Error> {
        Object::get_by_id(&self.left_id).await
    }

    pub async fn right(&self) -> Result<Option<Object<R::Right>>, Error> {
        Object::get_by_id(&self.right_id).await
    }

    /// 与 `right_id` 相连的关系，按左侧 id 索引
    pub async fn lefts(right_id: &str) -> Result<BTreeMap<String, Self>, Error> {
        let mut lefts = BTreeMap::new();
        let mut stream = Entity::<R>::scan(Self::lefts_pattern(right_id));
        while let Some(entity) = stream.try_next().await? {
            let relation = Self::from_entity(entity)?;
            lefts.insert(relation.left_id.clone(), relation);
        }
        Ok(lefts)
    }

    /// 与 `left_id` 相连的关系，按右侧 id 索引
    pub async fn rights(left_id: &str) -> Result<BTreeMap<String, Self>, Error> {
        let mut rights = BTreeMap::new();
        let mut stream = Entity::<R>::scan(Self::rights_pattern(left_id));
        while let Some(entity) = stream.try_next().await? {
            let relation = Self::from_entity(entity)?;
            rights.insert(relation.right_id.clone(), relation);
        }
        Ok(rights)
    }

    /// 左侧对象的 `to_dict`，附带本关系的属性；左侧对象已不存在时为 `None`
    pub async fn left_to_dict(&self) -> Result<Option<Map<String, Json>>, Error> {
        let Some(left) = self.left().await? else {
            log::warn!("{} {} points to a missing left side", R::NAME, self.key());
            return Ok(None);
        };
        Ok(Some(self.with_relation(left.id(), left.to_dict(false).await?)))
    }

    pub async fn right_to_dict(&self) -> Result<Option<Map<String, Json>>, Error> {
        let Some(right) = self.right().await? else {
            log::warn!("{} {} points to a missing right side", R::NAME, self.key());
            return Ok(None);
        };
        Ok(Some(self.with_relation(right.id(), right.to_dict(false).await?)))
    }

    fn with_relation(&self, id: &str, dict: Json) -> Map<String, Json> {
        let Json::Object(mut dict) = dict else {
            return Map::new();
        };
        if let Some(Json::Object(body)) = dict.get_mut(id) {
            body.insert("relation".to_string(), Json::Object(self.attributes()));
        }
        dict
    }
}
