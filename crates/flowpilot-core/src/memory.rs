//! In-process entity store — local mode and test backend.
//!
//! The production deployment points `EntityStore` at the hosted CRM
//! platform; this backend keeps typed collections in a HashMap so the
//! engine can run standalone and tests stay hermetic.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{FlowError, Result};
use crate::traits::EntityStore;

/// HashMap-backed entity store. Records are JSON objects keyed by `id`.
#[derive(Default)]
pub struct MemoryEntityStore {
    collections: Mutex<HashMap<String, Vec<Value>>>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(record: &Value, predicate: &HashMap<String, Value>) -> bool {
        predicate.iter().all(|(k, v)| record.get(k) == Some(v))
    }

    fn sort_records(records: &mut [Value], sort_key: &str) {
        let (key, descending) = match sort_key.strip_prefix('-') {
            Some(k) => (k, true),
            None => (sort_key, false),
        };
        records.sort_by(|a, b| {
            let av = a.get(key);
            let bv = b.get(key);
            let ord = match (av, bv) {
                (Some(Value::Number(x)), Some(Value::Number(y))) => x
                    .as_f64()
                    .partial_cmp(&y.as_f64())
                    .unwrap_or(std::cmp::Ordering::Equal),
                (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
                (Some(_), None) => std::cmp::Ordering::Greater,
                (None, Some(_)) => std::cmp::Ordering::Less,
                _ => std::cmp::Ordering::Equal,
            };
            if descending { ord.reverse() } else { ord }
        });
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn create(&self, entity_type: &str, fields: Value) -> Result<Value> {
        let mut record = match fields {
            Value::Object(map) => Value::Object(map),
            other => {
                return Err(FlowError::validation(format!(
                    "record must be a JSON object, got: {other}"
                )));
            }
        };
        if record.get("id").and_then(|v| v.as_str()).is_none() {
            record["id"] = Value::String(uuid::Uuid::new_v4().to_string());
        }
        let mut collections = self.collections.lock().unwrap();
        collections
            .entry(entity_type.to_string())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn update(&self, entity_type: &str, id: &str, fields: Value) -> Result<Value> {
        let mut collections = self.collections.lock().unwrap();
        let records = collections
            .get_mut(entity_type)
            .ok_or_else(|| FlowError::not_found(format!("{entity_type}/{id}")))?;
        let record = records
            .iter_mut()
            .find(|r| r.get("id").and_then(|v| v.as_str()) == Some(id))
            .ok_or_else(|| FlowError::not_found(format!("{entity_type}/{id}")))?;
        if let (Value::Object(existing), Value::Object(updates)) = (&mut *record, fields) {
            for (k, v) in updates {
                existing.insert(k, v);
            }
        }
        Ok(record.clone())
    }

    async fn delete(&self, entity_type: &str, id: &str) -> Result<()> {
        let mut collections = self.collections.lock().unwrap();
        let records = collections
            .get_mut(entity_type)
            .ok_or_else(|| FlowError::not_found(format!("{entity_type}/{id}")))?;
        let before = records.len();
        records.retain(|r| r.get("id").and_then(|v| v.as_str()) != Some(id));
        if records.len() == before {
            return Err(FlowError::not_found(format!("{entity_type}/{id}")));
        }
        Ok(())
    }

    async fn filter(
        &self,
        entity_type: &str,
        predicate: HashMap<String, Value>,
        sort_key: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Value>> {
        let collections = self.collections.lock().unwrap();
        let mut results: Vec<Value> = collections
            .get(entity_type)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| Self::matches(r, &predicate))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if let Some(key) = sort_key {
            Self::sort_records(&mut results, key);
        }
        if let Some(n) = limit {
            results.truncate(n);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_assigns_id() {
        let store = MemoryEntityStore::new();
        let rec = store
            .create("client", json!({"tenant_id": "t1", "name": "Acme"}))
            .await
            .unwrap();
        assert!(rec["id"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let store = MemoryEntityStore::new();
        let rec = store
            .create("lead", json!({"tenant_id": "t1", "current_stage": 1}))
            .await
            .unwrap();
        let id = rec["id"].as_str().unwrap().to_string();

        let updated = store
            .update("lead", &id, json!({"current_stage": 2}))
            .await
            .unwrap();
        assert_eq!(updated["current_stage"], 2);
        assert_eq!(updated["tenant_id"], "t1");
    }

    #[tokio::test]
    async fn test_filter_is_tenant_scoped() {
        let store = MemoryEntityStore::new();
        store
            .create("client", json!({"tenant_id": "t1", "name": "A"}))
            .await
            .unwrap();
        store
            .create("client", json!({"tenant_id": "t2", "name": "B"}))
            .await
            .unwrap();

        let mut pred = HashMap::new();
        pred.insert("tenant_id".into(), json!("t1"));
        let rows = store.filter("client", pred, None, None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "A");
    }

    #[tokio::test]
    async fn test_filter_sort_descending_and_limit() {
        let store = MemoryEntityStore::new();
        for n in [3, 1, 2] {
            store
                .create("task", json!({"tenant_id": "t1", "rank": n}))
                .await
                .unwrap();
        }
        let rows = store
            .filter("task", HashMap::new(), Some("-rank"), Some(2))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["rank"], 3);
        assert_eq!(rows[1]["rank"], 2);
    }

    #[tokio::test]
    async fn test_delete_missing_is_error() {
        let store = MemoryEntityStore::new();
        assert!(store.delete("client", "nope").await.is_err());
    }
}
