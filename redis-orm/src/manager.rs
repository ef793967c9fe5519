//! 按方向封装的关系操作
//!
//! [`RightwardManager`] 以对象为关系左侧，[`LeftwardManager`] 以对象为关系右侧，
//! 两者对外提供同一套 [`RelationManager`] 接口。

use std::{collections::BTreeMap, future::Future, marker::PhantomData};

use crate::{Error, Fields, Model, Object, ObjectModel, Relation, RelationModel};

pub trait RelationManager: Sync {
    type Link: RelationModel;
    type Related: ObjectModel;

    /// 持有这个管理器的对象 id
    fn instance_id(&self) -> &str;

    /// 所有关系，按另一侧对象的 id 索引
    fn all(
        &self,
    ) -> impl Future<Output = Result<BTreeMap<String, Relation<Self::Link>>, Error>> + Send;

    fn add(
        &self,
        related_id: &str,
        fields: Fields,
    ) -> impl Future<Output = Result<Relation<Self::Link>, Error>> + Send;

    /// 软删除与 `related_id` 之间的关系，关系不存在时返回 `false`
    fn remove(&self, related_id: &str) -> impl Future<Output = Result<bool, Error>> + Send;

    fn get_by_id(
        &self,
        related_id: &str,
    ) -> impl Future<Output = Result<Option<(Object<Self::Related>, Relation<Self::Link>)>, Error>> + Send;

    fn exists(&self, related_id: &str) -> impl Future<Output = Result<bool, Error>> + Send;

    fn first(
        &self,
    ) -> impl Future<Output = Result<Option<(Object<Self::Related>, Relation<Self::Link>)>, Error>> + Send;

    /// 修改关系字段并保存
    fn set(
        &self,
        related_id: &str,
        fields: Fields,
    ) -> impl Future<Output = Result<Option<(Object<Self::Related>, Relation<Self::Link>)>, Error>> + Send
    {
        async move {
            let Some((object, mut relation)) = self.get_by_id(related_id).await? else {
                return Ok(None);
            };
            for (name, value) in fields {
                log::debug!("Setting {}:{:?} on {}", name, value, relation.key());
                relation.set_field(&name, value)?;
            }
            let relation = relation.save().await?;
            Ok(Some((object, relation)))
        }
    }

    /// 删除全部关系，返回删除的数量
    fn remove_all(&self) -> impl Future<Output = Result<usize, Error>> + Send {
        async move {
            log::info!(
                "Removing all {} relations of {}",
                <Self::Link as Model>::NAME,
                self.instance_id()
            );
            let mut removed = 0;
            for related_id in self.all().await?.into_keys() {
                if self.remove(&related_id).await? {
                    removed += 1;
                }
            }
            Ok(removed)
        }
    }
}

/// 对象位于关系左侧
pub struct RightwardManager<R> {
    left_id: String,
    _marker: PhantomData<fn() -> R>,
}

impl<R: RelationModel> RightwardManager<R> {
    pub fn new(left_id: impl Into<String>) -> Self {
        let left_id = left_id.into();
        log::debug!("Rightward {} manager for {}", R::NAME, left_id);
        Self {
            left_id,
            _marker: PhantomData,
        }
    }
}

impl<R: RelationModel> RelationManager for RightwardManager<R> {
    type Link = R;
    type Related = R::Right;

    fn instance_id(&self) -> &str {
        &self.left_id
    }

    async fn all(&self) -> Result<BTreeMap<String, Relation<R>>, Error> {
        Relation::rights(&self.left_id).await
    }

    async fn add(&self, related_id: &str, fields: Fields) -> Result<Relation<R>, Error> {
        Relation::create(&self.left_id, related_id, fields).await
    }

    async fn remove(&self, related_id: &str) -> Result<bool, Error> {
        match Relation::<R>::get_by_ids(&self.left_id, related_id).await? {
            Some(relation) => relation.delete().await,
            None => Ok(false),
        }
    }

    async fn get_by_id(
        &self,
        related_id: &str,
    ) -> Result<Option<(Object<R::Right>, Relation<R>)>, Error> {
        let Some(relation) = Relation::get_by_ids(&self.left_id, related_id).await? else {
            return Ok(None);
        };
        Ok(relation.right().await?.map(|object| (object, relation)))
    }

    async fn exists(&self, related_id: &str) -> Result<bool, Error> {
        Relation::<R>::exists_by_ids(&self.left_id, related_id).await
    }

    async fn first(&self) -> Result<Option<(Object<R::Right>, Relation<R>)>, Error> {
        for relation in self.all().await?.into_values() {
            if let Some(object) = relation.right().await? {
                return Ok(Some((object, relation)));
            }
        }
        Ok(None)
    }
}

/// 对象位于关系右侧
pub struct LeftwardManager<R> {
    right_id: String,
    _marker: PhantomData<fn() -> R>,
}

impl<R: RelationModel> LeftwardManager<R> {
    pub fn new(right_id: impl Into<String>) -> Self {
        let right_id = right_id.into();
        log::debug!("Leftward {} manager for {}", R::NAME, right_id);
        Self {
            right_id,
            _marker: PhantomData,
        }
    }
}

impl<R: RelationModel> RelationManager for LeftwardManager<R> {
    type Link = R;
    type Related = R::Left;

    fn instance_id(&self) -> &str {
        &self.right_id
    }

    async fn all(&self) -> Result<BTreeMap<String, Relation<R>>, Error> {
        Relation::lefts(&self.right_id).await
    }

    async fn add(&self, related_id: &str, fields: Fields) -> Result<Relation<R>, Error> {
        Relation::create(related_id, &self.right_id, fields).await
    }

    async fn remove(&self, related_id: &str) -> Result<bool, Error> {
        match Relation::<R>::get_by_ids(related_id, &self.right_id).await? {
            Some(relation) => relation.delete().await,
            None => Ok(false),
        }
    }

    async fn get_by_id(
        &self,
        related_id: &str,
    ) -> Result<Option<(Object<R::Left>, Relation<R>)>, Error> {
        let Some(relation) = Relation::get_by_ids(related_id, &self.right_id).await? else {
            return Ok(None);
        };
        Ok(relation.left().await?.map(|object| (object, relation)))
    }

    async fn exists(&self, related_id: &str) -> Result<bool, Error> {
        Relation::<R>::exists_by_ids(related_id, &self.right_id).await
    }

    async fn first(&self) -> Result<Option<(Object<R::Left>, Relation<R>)>, Error> {
        for relation in self.all().await?.into_values() {
            if let Some(object) = relation.left().await? {
                return Ok(Some((object, relation)));
            }
        }
        Ok(None)
    }
}
