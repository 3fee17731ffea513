//! Ledger over an OpenDAL operator
//!
//! Layout under `prefix`:
//! ```text
//! {prefix}/entries/{entry_id}          entry bytes
//! {prefix}/tags/{chunk_id}/{entry_id}  empty marker, one per publish
//! ```
//! Entry ids are uuid v4, so concurrent publishers never collide and a
//! published entry is never overwritten.

use async_trait::async_trait;
use bytes::Bytes;
use opendal::{ErrorKind, Operator};
use pstore_core::ChunkId;
use tracing::debug;
use uuid::Uuid;

use crate::ledger::{EntryRef, Ledger, LedgerError};

#[derive(Clone)]
pub struct OpendalLedger {
    op: Operator,
    prefix: String,
}

impl OpendalLedger {
    pub fn new(op: Operator, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_matches('/').to_string();
        OpendalLedger { op, prefix }
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    fn entry_path(&self, entry: &EntryRef) -> String {
        format!("{}/entries/{}", self.prefix, entry)
    }

    fn tag_dir(&self, id: &ChunkId) -> String {
        format!("{}/tags/{}/", self.prefix, id)
    }
}

#[async_trait]
impl Ledger for OpendalLedger {
    async fn query_by_tag(&self, id: &ChunkId) -> Result<Vec<EntryRef>, LedgerError> {
        let dir = self.tag_dir(id);
        let listed = match self.op.list(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(source) => {
                return Err(LedgerError::Backend {
                    operation: "list",
                    source,
                })
            }
        };

        let mut refs: Vec<EntryRef> = listed
            .iter()
            .map(|entry| entry.path())
            .filter(|path| !path.ends_with('/'))
            .filter_map(|path| path.rsplit('/').next())
            .filter(|name| !name.is_empty())
            .map(EntryRef::new)
            .collect();
        refs.sort();

        debug!(id = %id, candidates = refs.len(), "ledger query");
        Ok(refs)
    }

    async fn fetch_raw(&self, entry: &EntryRef) -> Result<Bytes, LedgerError> {
        match self.op.read(&self.entry_path(entry)).await {
            Ok(buffer) => Ok(buffer.to_bytes()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(LedgerError::EntryNotFound(entry.clone()))
            }
            Err(source) => Err(LedgerError::Backend {
                operation: "read",
                source,
            }),
        }
    }

    async fn publish(&self, id: &ChunkId, data: Bytes) -> Result<EntryRef, LedgerError> {
        let entry = EntryRef::new(Uuid::new_v4().to_string());
        let len = data.len();

        self.op
            .write(&self.entry_path(&entry), data)
            .await
            .map_err(|source| LedgerError::Backend {
                operation: "write",
                source,
            })?;

        // The marker goes last so a listed tag always has a readable entry.
        let marker = format!("{}{}", self.tag_dir(id), entry);
        self.op
            .write(&marker, Bytes::new())
            .await
            .map_err(|source| LedgerError::Backend {
                operation: "write",
                source,
            })?;

        debug!(id = %id, entry = %entry, bytes = len, "ledger entry published");
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::build_memory_operator;

    fn ledger() -> OpendalLedger {
        OpendalLedger::new(build_memory_operator().unwrap(), "ledger")
    }

    fn id(s: &str) -> ChunkId {
        ChunkId::parse(s).unwrap()
    }

    #[tokio::test]
    async fn unknown_tag_is_empty() {
        let ledger = ledger();
        assert!(ledger.query_by_tag(&id("abc123")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn publish_then_query_and_fetch() {
        let ledger = ledger();
        let tag = id("deadbeef");
        let first = ledger
            .publish(&tag, Bytes::from_static(b"one"))
            .await
            .unwrap();
        let second = ledger
            .publish(&tag, Bytes::from_static(b"two"))
            .await
            .unwrap();
        assert_ne!(first, second);

        let mut found = ledger.query_by_tag(&tag).await.unwrap();
        found.sort();
        let mut expected = vec![first.clone(), second.clone()];
        expected.sort();
        assert_eq!(found, expected);

        assert_eq!(ledger.fetch_raw(&first).await.unwrap().as_ref(), b"one");
        assert_eq!(ledger.fetch_raw(&second).await.unwrap().as_ref(), b"two");
    }

    #[tokio::test]
    async fn tags_are_isolated() {
        let ledger = ledger();
        ledger
            .publish(&id("aaaa"), Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert!(ledger.query_by_tag(&id("aaab")).await.unwrap().is_empty());
        assert!(ledger.query_by_tag(&id("aaa")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_entry_is_not_found() {
        let ledger = ledger();
        let err = ledger
            .fetch_raw(&EntryRef::new("no-such-entry"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::EntryNotFound(_)));
    }

    #[tokio::test]
    async fn empty_payload_roundtrips() {
        let ledger = ledger();
        let entry = ledger.publish(&id("e0"), Bytes::new()).await.unwrap();
        assert!(ledger.fetch_raw(&entry).await.unwrap().is_empty());
    }
}
