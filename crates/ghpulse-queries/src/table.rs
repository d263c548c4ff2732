//!
//! A minimal key-value table interface, backed by DynamoDB in production and memory in tests
//!
use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::AttributeValue;
use serde_dynamo::aws_sdk_dynamodb_1::{from_item, to_item};
use serde_json::Value;
use tracing::log::*;

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::{QueryError, QueryResult};

/// Items are plain JSON objects, the key attributes are always present in a stored item
pub type Item = serde_json::Map<String, Value>;

/// Primary key of an item: a partition attribute and an optional sort attribute
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Key {
    partition: (String, String),
    sort: Option<(String, String)>,
}

impl Key {
    pub fn partition(attr: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            partition: (attr.into(), value.into()),
            sort: None,
        }
    }

    pub fn with_sort(mut self, attr: impl Into<String>, value: impl Into<String>) -> Self {
        self.sort = Some((attr.into(), value.into()));
        self
    }

    fn pairs(&self) -> impl Iterator<Item = &(String, String)> {
        std::iter::once(&self.partition).chain(self.sort.iter())
    }

    fn attributes(&self) -> HashMap<String, AttributeValue> {
        self.pairs()
            .map(|(attr, value)| (attr.clone(), AttributeValue::S(value.clone())))
            .collect()
    }

    /// Copy the key attributes into `item`, overriding whatever was there
    fn stamp(&self, item: &mut Item) {
        for (attr, value) in self.pairs() {
            item.insert(attr.clone(), Value::String(value.clone()));
        }
    }
}

#[async_trait]
pub trait Table: Send + Sync {
    async fn exists(&self, table: &str, key: &Key) -> QueryResult<bool> {
        Ok(self.get(table, key).await?.is_some())
    }

    async fn get(&self, table: &str, key: &Key) -> QueryResult<Option<Item>>;

    /// Insert or replace the item stored under `key`
    async fn put(&self, table: &str, key: &Key, item: Item) -> QueryResult<()>;

    /// Remove the item under `key`, removing an item which doesn't exist is not an error
    async fn delete(&self, table: &str, key: &Key) -> QueryResult<()>;

    /// Every item whose partition attribute `attr` equals `value`
    async fn list(&self, table: &str, attr: &str, value: &str) -> QueryResult<Vec<Item>>;
}

/// [Table] implementation on top of DynamoDB
#[derive(Clone, Debug)]
pub struct DynamoTable {
    client: aws_sdk_dynamodb::Client,
}

impl DynamoTable {
    pub fn new(client: aws_sdk_dynamodb::Client) -> Self {
        Self { client }
    }
}

fn table_error(table: &str, e: impl std::error::Error) -> QueryError {
    QueryError::Table(format!("{table}: {}", DisplayErrorContext(e)))
}

#[async_trait]
impl Table for DynamoTable {
    async fn get(&self, table: &str, key: &Key) -> QueryResult<Option<Item>> {
        let output = self
            .client
            .get_item()
            .table_name(table)
            .set_key(Some(key.attributes()))
            .send()
            .await
            .map_err(|e| table_error(table, e))?;

        match output.item {
            Some(item) => Ok(Some(from_item(item).map_err(|e| table_error(table, e))?)),
            None => Ok(None),
        }
    }

    async fn put(&self, table: &str, key: &Key, mut item: Item) -> QueryResult<()> {
        key.stamp(&mut item);
        let attributes: HashMap<String, AttributeValue> =
            to_item(item).map_err(|e| table_error(table, e))?;

        self.client
            .put_item()
            .table_name(table)
            .set_item(Some(attributes))
            .send()
            .await
            .map_err(|e| table_error(table, e))?;
        Ok(())
    }

    async fn delete(&self, table: &str, key: &Key) -> QueryResult<()> {
        self.client
            .delete_item()
            .table_name(table)
            .set_key(Some(key.attributes()))
            .send()
            .await
            .map_err(|e| table_error(table, e))?;
        Ok(())
    }

    async fn list(&self, table: &str, attr: &str, value: &str) -> QueryResult<Vec<Item>> {
        let mut stream = self
            .client
            .query()
            .table_name(table)
            .expression_attribute_names("#p", attr)
            .expression_attribute_values(":v", AttributeValue::S(value.to_string()))
            .key_condition_expression("#p = :v")
            .into_paginator()
            .items()
            .send();

        let mut items = vec![];
        while let Some(item) = stream.next().await {
            let item = item.map_err(|e| table_error(table, e))?;
            items.push(from_item(item).map_err(|e| table_error(table, e))?);
        }
        debug!("Listed {} items from {table} where {attr} = {value}", items.len());
        Ok(items)
    }
}

/// [Table] kept entirely in process memory
#[derive(Debug, Default)]
pub struct MemoryTable {
    items: Mutex<BTreeMap<(String, Key), Item>>,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> QueryResult<std::sync::MutexGuard<'_, BTreeMap<(String, Key), Item>>> {
        self.items
            .lock()
            .map_err(|_| QueryError::Table("memory table lock poisoned".into()))
    }
}

#[async_trait]
impl Table for MemoryTable {
    async fn get(&self, table: &str, key: &Key) -> QueryResult<Option<Item>> {
        Ok(self.lock()?.get(&(table.to_string(), key.clone())).cloned())
    }

    async fn put(&self, table: &str, key: &Key, mut item: Item) -> QueryResult<()> {
        key.stamp(&mut item);
        self.lock()?.insert((table.to_string(), key.clone()), item);
        Ok(())
    }

    async fn delete(&self, table: &str, key: &Key) -> QueryResult<()> {
        self.lock()?.remove(&(table.to_string(), key.clone()));
        Ok(())
    }

    async fn list(&self, table: &str, attr: &str, value: &str) -> QueryResult<Vec<Item>> {
        Ok(self
            .lock()?
            .iter()
            .filter(|((name, key), _)| {
                name == table && key.partition.0 == attr && key.partition.1 == value
            })
            .map(|(_, item)| item.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(value: Value) -> Item {
        match value {
            Value::Object(map) => map,
            _ => panic!("Test items must be objects"),
        }
    }

    #[tokio::test]
    async fn test_memory_table_lifecycle() {
        let table = MemoryTable::new();
        let key = Key::partition("query_name", "daily");

        assert!(!table.exists("queries", &key).await.unwrap());
        table
            .put("queries", &key, item(json!({"created_at": "now"})))
            .await
            .unwrap();
        assert!(table.exists("queries", &key).await.unwrap());
        assert!(
            !table.exists("other", &key).await.unwrap(),
            "tables must not share items"
        );

        let stored = table.get("queries", &key).await.unwrap().unwrap();
        assert_eq!(Some(&json!("daily")), stored.get("query_name"));
        assert_eq!(Some(&json!("now")), stored.get("created_at"));

        table.delete("queries", &key).await.unwrap();
        table.delete("queries", &key).await.expect("double delete is fine");
        assert!(table.get("queries", &key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_table_list_by_partition() {
        let table = MemoryTable::new();
        for (query, target) in [("a", "http://1"), ("a", "http://2"), ("b", "http://3")] {
            let key = Key::partition("query_name", query).with_sort("subscriber_target", target);
            table.put("subscribers", &key, Item::new()).await.unwrap();
        }

        let listed = table.list("subscribers", "query_name", "a").await.unwrap();
        assert_eq!(2, listed.len());
        assert!(listed
            .iter()
            .all(|item| item.get("query_name") == Some(&json!("a"))));
        assert!(table
            .list("subscribers", "query_name", "c")
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_key_attributes() {
        let key = Key::partition("query_name", "a").with_sort("subscriber_target", "http://x");
        let attributes = key.attributes();
        assert_eq!(2, attributes.len());
        assert_eq!(
            Some(&AttributeValue::S("http://x".into())),
            attributes.get("subscriber_target")
        );
    }
}
