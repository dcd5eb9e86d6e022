//! Redis-backed mapping store.
//!
//! Each environment lives in its own hash at `{prefix}:{id}` with the fields
//! `id`, `branch`, `updated_by` and `services` (a JSON array). Enumeration
//! walks the keyspace with `SCAN MATCH {prefix}:*`, so no index key has to be
//! kept in sync.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::error::{Error, Result};
use crate::record::{EnvironmentId, EnvironmentRecord, IN_TREE};
use crate::store::MappingStore;

/// Default key prefix for environment hashes.
pub const DEFAULT_KEY_PREFIX: &str = "subenv:environment";

const SCAN_BATCH: usize = 100;

const FIELD_ID: &str = "id";
const FIELD_BRANCH: &str = "branch";
const FIELD_UPDATED_BY: &str = "updated_by";
const FIELD_SERVICES: &str = "services";

/// Mapping store persisting records as Redis hashes.
#[derive(Clone)]
pub struct RedisMappingStore {
    conn: ConnectionManager,
    prefix: String,
}

impl std::fmt::Debug for RedisMappingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisMappingStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl RedisMappingStore {
    /// Connects to Redis at `url` using the default key prefix.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the URL is invalid or the initial
    /// connection fails.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_prefix(url, DEFAULT_KEY_PREFIX).await
    }

    /// Connects to Redis at `url`, storing hashes under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the URL is invalid or the initial
    /// connection fails.
    pub async fn connect_with_prefix(url: &str, prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::storage_with_source("invalid redis url", e))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::storage_with_source("redis connect failed", e))?;
        Ok(Self {
            conn,
            prefix: prefix.into(),
        })
    }

    fn key(&self, id: &EnvironmentId) -> String {
        format!("{}:{id}", self.prefix)
    }

    async fn scan_keys(&self) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}:*", self.prefix);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| Error::storage_with_source("redis scan failed", e))?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }

    async fn load(&self, key: &str) -> Result<Option<EnvironmentRecord>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn
            .hgetall(key)
            .await
            .map_err(|e| Error::storage_with_source(format!("redis hgetall {key}"), e))?;
        if fields.is_empty() {
            return Ok(None);
        }
        decode(key, &fields).map(Some)
    }
}

fn decode(key: &str, fields: &HashMap<String, String>) -> Result<EnvironmentRecord> {
    let id = fields
        .get(FIELD_ID)
        .cloned()
        .or_else(|| key.rsplit(':').next().map(str::to_string))
        .ok_or_else(|| Error::Serialization {
            message: format!("record {key} has no id"),
        })?;
    let services: BTreeSet<String> = match fields.get(FIELD_SERVICES) {
        Some(raw) if !raw.is_empty() => serde_json::from_str(raw)?,
        _ => BTreeSet::new(),
    };
    Ok(EnvironmentRecord {
        id: EnvironmentId::new(id),
        owning_branch: fields
            .get(FIELD_BRANCH)
            .cloned()
            .unwrap_or_else(|| IN_TREE.to_string()),
        last_updated_by: fields.get(FIELD_UPDATED_BY).cloned().unwrap_or_default(),
        deployed_services: services,
    })
}

/// Drops records that exist but do not decode. Storage failures propagate.
fn skip_undecodable(
    key: &str,
    loaded: Result<Option<EnvironmentRecord>>,
) -> Result<Option<EnvironmentRecord>> {
    match loaded {
        Err(err @ Error::Serialization { .. }) => {
            tracing::warn!(key = %key, error = %err, "skipping undecodable environment record");
            Ok(None)
        }
        // Ok(None): deleted between SCAN and HGETALL.
        other => other,
    }
}

fn encode(record: &EnvironmentRecord) -> Result<Vec<(&'static str, String)>> {
    Ok(vec![
        (FIELD_ID, record.id.to_string()),
        (FIELD_BRANCH, record.owning_branch.clone()),
        (FIELD_UPDATED_BY, record.last_updated_by.clone()),
        (
            FIELD_SERVICES,
            serde_json::to_string(&record.deployed_services)?,
        ),
    ])
}

#[async_trait]
impl MappingStore for RedisMappingStore {
    async fn save(&self, record: &EnvironmentRecord) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = self.key(&record.id);
        let fields = encode(record)?;
        let () = conn
            .hset_multiple(&key, fields.as_slice())
            .await
            .map_err(|e| Error::storage_with_source(format!("redis hset {key}"), e))?;
        Ok(())
    }

    async fn get(&self, id: &EnvironmentId) -> Result<Option<EnvironmentRecord>> {
        self.load(&self.key(id)).await
    }

    async fn get_all(&self) -> Result<Vec<EnvironmentRecord>> {
        let keys = self.scan_keys().await?;
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            let loaded = self.load(&key).await;
            records.extend(skip_undecodable(&key, loaded)?);
        }
        Ok(records)
    }

    async fn delete(&self, id: &EnvironmentId) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = self.key(id);
        let removed: i64 = conn
            .del(&key)
            .await
            .map_err(|e| Error::storage_with_source(format!("redis del {key}"), e))?;
        if removed == 0 {
            return Err(Error::NotFound(format!("environment record {id}")));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::storage_with_source("redis ping failed", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_preserves_record() -> Result<()> {
        let record = EnvironmentRecord::new("test7".into(), "feature/ABC-9", "ci", ["b", "a"]);
        let fields: HashMap<String, String> = encode(&record)?
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(fields[FIELD_SERVICES], r#"["a","b"]"#);

        let decoded = decode("subenv:environment:test7", &fields)?;
        assert_eq!(decoded, record);
        Ok(())
    }

    #[test]
    fn decode_fills_missing_fields() -> Result<()> {
        let fields = HashMap::from([(FIELD_UPDATED_BY.to_string(), "ops".to_string())]);
        let decoded = decode("subenv:environment:test4", &fields)?;
        assert_eq!(decoded.id.as_str(), "test4");
        assert_eq!(decoded.owning_branch, IN_TREE);
        assert!(decoded.deployed_services.is_empty());
        Ok(())
    }

    #[test]
    fn decode_rejects_malformed_services() {
        let fields = HashMap::from([(FIELD_SERVICES.to_string(), "not json".to_string())]);
        let err = decode("subenv:environment:test4", &fields).err();
        assert!(matches!(err, Some(Error::Serialization { .. })));
    }

    #[test]
    fn scan_skips_undecodable_records_but_not_storage_failures() -> Result<()> {
        let key = "subenv:environment:test4";

        let malformed = HashMap::from([(FIELD_SERVICES.to_string(), "not json".to_string())]);
        assert!(skip_undecodable(key, decode(key, &malformed).map(Some))?.is_none());

        let unreachable = skip_undecodable(key, Err(Error::storage("redis hgetall failed")));
        assert!(matches!(unreachable, Err(Error::Storage { .. })));

        let record = EnvironmentRecord::new("test4".into(), "feature/ABC-4", "ci", ["a"]);
        assert_eq!(skip_undecodable(key, Ok(Some(record.clone())))?, Some(record));
        assert!(skip_undecodable(key, Ok(None))?.is_none());
        Ok(())
    }
}
