use std::{
    fmt,
    marker::PhantomData,
    ops::{Deref, DerefMut},
};

use futures::future::BoxFuture;
use serde_json::{Map, Value as Json};

use crate::{
    Entity, Error, Fields, LeftwardManager, Model, RelationManager, RelationModel,
    RightwardManager, connection, object_key, object_prefix, store::escape_pattern,
    utils::{DEFAULT_ID_LENGTH, new_id},
};

/// 以生成的 id 为键的记录类型
pub trait ObjectModel: Model + Sized {
    /// 生成新 id，唯一性由 [`Object::create`] 检查
    fn new_id() -> String {
        new_id(DEFAULT_ID_LENGTH)
    }

    /// 声明的关系访问器
    fn relations() -> Vec<RelationSlot<Self>> {
        Vec::new()
    }
}

type RemoveAll = for<'a> fn(&'a str) -> BoxFuture<'a, Result<usize, Error>>;
type Related = for<'a> fn(&'a str) -> BoxFuture<'a, Result<Map<String, Json>, Error>>;

/// 对象类型上的一个具名关系访问器
pub struct RelationSlot<M> {
    pub name: &'static str,
    remove_all: RemoveAll,
    related: Related,
    _marker: PhantomData<fn() -> M>,
}

impl<M> fmt::Debug for RelationSlot<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationSlot")
            .field("name", &self.name)
            .finish()
    }
}

impl<M: ObjectModel> RelationSlot<M> {
    pub fn rightward<R: RelationModel<Left = M>>(name: &'static str) -> Self {
        Self {
            name,
            remove_all: purge_rights::<R>,
            related: render_rights::<R>,
            _marker: PhantomData,
        }
    }

    pub fn leftward<R: RelationModel<Right = M>>(name: &'static str) -> Self {
        Self {
            name,
            remove_all: purge_lefts::<R>,
            related: render_lefts::<R>,
            _marker: PhantomData,
        }
    }

    /// 删除 `id` 在这个访问器下的全部关系
    pub async fn remove_all(&self, id: &str) -> Result<usize, Error> {
        (self.remove_all)(id).await
    }

    /// `{related_id: {...related, relation: {...}}}`
    pub async fn related(&self, id: &str) -> Result<Map<String, Json>, Error> {
        (self.related)(id).await
    }
}

fn purge_rights<R: RelationModel>(left_id: &str) -> BoxFuture<'_, Result<usize, Error>> {
    Box::pin(async move {
        let manager = RightwardManager::<R>::new(left_id);
        if !R::CASCADE {
            return manager.remove_all().await;
        }

        // 先断开关系，再删除被拥有的右侧对象
        let owned: Vec<String> = manager.all().await?.into_keys().collect();
        let removed = manager.remove_all().await?;
        for right_id in owned {
            if let Some(right) = Object::<R::Right>::get_by_id(&right_id).await? {
                log::info!("Cascading delete of {} {}", R::Right::NAME, right_id);
                right.delete().await?;
            }
        }
        Ok(removed)
    })
}

fn purge_lefts<R: RelationModel>(right_id: &str) -> BoxFuture<'_, Result<usize, Error>> {
    Box::pin(async move { LeftwardManager::<R>::new(right_id).remove_all().await })
}

fn render_rights<R: RelationModel>(left_id: &str) -> BoxFuture<'_, Result<Map<String, Json>, Error>> {
    Box::pin(async move {
        let mut rendered = Map::new();
        for relation in RightwardManager::<R>::new(left_id).all().await?.into_values() {
            if let Some(entry) = relation.right_to_dict().await? {
                rendered.extend(entry);
            }
        }
        Ok(rendered)
    })
}

fn render_lefts<R: RelationModel>(right_id: &str) -> BoxFuture<'_, Result<Map<String, Json>, Error>> {
    Box::pin(async move {
        let mut rendered = Map::new();
        for relation in LeftwardManager::<R>::new(right_id).all().await?.into_values() {
            if let Some(entry) = relation.left_to_dict().await? {
                rendered.extend(entry);
            }
        }
        Ok(rendered)
    })
}

/// 键为 `<小写类型名>:<id>` 的记录
pub struct Object<M> {
    entity: Entity<M>,
    id: String,
}

impl<M> Clone for Object<M> {
    fn clone(&self) -> Self {
        Self {
            entity: self.entity.clone(),
            id: self.id.clone(),
        }
    }
}

impl<M: Model> fmt::Debug for Object<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.id)
            .field("entity", &self.entity)
            .finish()
    }
}

impl<M> Deref for Object<M> {
    type Target = Entity<M>;

    fn deref(&self) -> &Self::Target {
        &self.entity
    }
}

impl<M> DerefMut for Object<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.entity
    }
}

impl<M: ObjectModel> Object<M> {
    pub fn prefix() -> String {
        object_prefix(M::NAME)
    }

    pub fn key_for(id: &str) -> String {
        object_key(M::NAME, id)
    }

    fn from_entity(entity: Entity<M>) -> Result<Self, Error> {
        let Some(id) = entity.key().strip_prefix(&Self::prefix()) else {
            return Err(Error::InvalidKey(entity.key().to_string()));
        };
        Ok(Self {
            id: id.to_string(),
            entity,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn into_entity(self) -> Entity<M> {
        self.entity
    }

    /// 生成未被占用的 id 并创建对象
    pub async fn create(fields: Fields) -> Result<Self, Error> {
        let store = connection::get()?;
        let key = loop {
            let key = Self::key_for(&M::new_id());
            if !store.exists(&key).await? {
                break key;
            }
            log::debug!("{} id collision on {}, drawing again", M::NAME, key);
        };
        Self::from_entity(Entity::create(key, fields).await?)
    }

    pub async fn get_by_id(id: &str) -> Result<Option<Self>, Error> {
        match Entity::get(&Self::key_for(id)).await? {
            Some(entity) => Ok(Some(Self::from_entity(entity)?)),
            None => Ok(None),
        }
    }

    pub async fn exists_by_id(id: &str) -> Result<bool, Error> {
        Entity::<M>::exists(&Self::key_for(id)).await
    }

    pub async fn patch_by_id(
        id: &str,
        field: &str,
        value: impl Into<String>,
        is_new: bool,
    ) -> Result<bool, Error> {
        Entity::<M>::patch(&Self::key_for(id), field, value, is_new).await
    }

    pub async fn save(&mut self) -> Result<Self, Error> {
        Self::from_entity(self.entity.save().await?)
    }

    /// 先删除所有声明的关系，再软删除自身
    pub async fn delete(&self) -> Result<bool, Error> {
        for slot in M::relations() {
            let removed = slot.remove_all(&self.id).await?;
            log::info!(
                "Removed {} '{}' relations of {} {}",
                removed,
                slot.name,
                M::NAME,
                self.id
            );
        }
        self.entity.delete().await
    }

    /// `{id: {字段..., 元字段..., 关系名: {...}}}`
    pub async fn to_dict(&self, include_related: bool) -> Result<Json, Error> {
        let mut body = self.attributes();
        if include_related {
            for slot in M::relations() {
                body.insert(slot.name.to_string(), Json::Object(slot.related(&self.id).await?));
            }
        }

        let mut dict = Map::new();
        dict.insert(self.id.clone(), Json::Object(body));
        Ok(Json::Object(dict))
    }

    /// 扫描本类型的对象，跳过共享前缀的关系键
    pub async fn search(cursor: u64, count: usize) -> Result<(Vec<Self>, u64), Error> {
        let prefix = Self::prefix();
        let pattern = format!("{}*", escape_pattern(&prefix));
        let (entities, next) = Entity::<M>::search_where(&pattern, cursor, count, |key| {
            key.strip_prefix(prefix.as_str())
                .is_some_and(|id| !id.is_empty() && !id.contains("::"))
        })
        .await?;

        let objects = entities
            .into_iter()
            .map(Self::from_entity)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((objects, next))
    }

    /// 本对象作为左侧的关系
    pub fn rightward<R: RelationModel<Left = M>>(&self) -> RightwardManager<R> {
        RightwardManager::new(&self.id)
    }

    /// 本对象作为右侧的关系
    pub fn leftward<R: RelationModel<Right = M>>(&self) -> LeftwardManager<R> {
        LeftwardManager::new(&self.id)
    }
}
