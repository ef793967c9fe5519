#![allow(dead_code)]

use std::sync::Arc;

use redis_orm::{MemoryStore, Object, Relation, connection, utils::random_string};

#[derive(Object)]
#[object(fields = ["name", "email", "profile"], rights(posts = Authorship))]
pub struct Author;

#[derive(Object)]
#[object(fields = ["title", "body"], lefts(author = Authorship), rights(tags = Tagging))]
pub struct Post;

#[derive(Object)]
#[object(fields = ["label"], id = tag_id, lefts(posts = Tagging))]
pub struct Tag;

#[derive(Relation)]
#[relation(
    name = "authorship",
    left = Author,
    right = Post,
    cardinality = "one_to_many",
    fields = ["role"],
    cascade
)]
pub struct Authorship;

#[derive(Relation)]
#[relation(name = "tagging", left = Post, right = Tag, fields = ["weight"])]
pub struct Tagging;

pub fn tag_id() -> String {
    random_string("abcdefghijklmnopqrstuvwxyz", 8)
}

/// 为每个测试安装一个全新的内存存储
pub fn setup() -> MemoryStore {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = MemoryStore::new();
    connection::set(Arc::new(store.clone())).unwrap();
    store
}
