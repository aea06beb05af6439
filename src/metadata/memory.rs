use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ImageRecord, MetadataError, MetadataStore};
use crate::storage::Lookup;

/// 进程内元数据存储。
#[derive(Default)]
pub struct InMemoryMetadataStore {
    records: Mutex<BTreeMap<(String, String), ImageRecord>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn upsert(
        &self,
        partition_key: &str,
        row_key: &str,
        record: &ImageRecord,
    ) -> Result<(), MetadataError> {
        let mut records = self.records.lock().map_err(|_| MetadataError::Poisoned)?;
        let mut stored = record.clone();
        stored.partition_key = partition_key.to_string();
        stored.row_key = row_key.to_string();
        records.insert((partition_key.to_string(), row_key.to_string()), stored);
        Ok(())
    }

    async fn get(
        &self,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Lookup<ImageRecord>, MetadataError> {
        let records = self.records.lock().map_err(|_| MetadataError::Poisoned)?;
        Ok(
            match records.get(&(partition_key.to_string(), row_key.to_string())) {
                Some(record) => Lookup::Found(record.clone()),
                None => Lookup::NotFound,
            },
        )
    }

    async fn delete(&self, partition_key: &str, row_key: &str) -> Result<Lookup<()>, MetadataError> {
        let mut records = self.records.lock().map_err(|_| MetadataError::Poisoned)?;
        Ok(
            match records.remove(&(partition_key.to_string(), row_key.to_string())) {
                Some(_) => Lookup::Found(()),
                None => Lookup::NotFound,
            },
        )
    }

    async fn query(&self, partition_key: Option<&str>) -> Result<Vec<ImageRecord>, MetadataError> {
        let records = self.records.lock().map_err(|_| MetadataError::Poisoned)?;
        Ok(records
            .iter()
            .filter(|((pk, _), _)| partition_key.is_none_or(|wanted| wanted == pk.as_str()))
            .map(|(_, record)| record.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn query_filters_by_partition() {
        let store = InMemoryMetadataStore::new();
        for (pk, rk) in [("a", "1"), ("b", "2"), ("a", "3")] {
            store
                .upsert(pk, rk, &ImageRecord::new(pk, rk))
                .await
                .expect("upsert");
        }

        let in_a = store.query(Some("a")).await.expect("query");
        assert_eq!(
            in_a.iter().map(|r| r.row_key.as_str()).collect::<Vec<_>>(),
            vec!["1", "3"]
        );
        assert_eq!(store.query(None).await.expect("query").len(), 3);
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_row() {
        let store = InMemoryMetadataStore::new();
        let mut record = ImageRecord::new("f", "i");
        store.upsert("f", "i", &record).await.expect("upsert");

        record.dominant_colour = "#FF0000".to_string();
        store.upsert("f", "i", &record).await.expect("upsert");

        let stored = store.get("f", "i").await.expect("get").into_option().expect("found");
        assert_eq!(stored.dominant_colour, "#FF0000");
        assert_eq!(store.delete("f", "i").await.expect("delete"), Lookup::Found(()));
        assert_eq!(store.get("f", "i").await.expect("get"), Lookup::NotFound);
    }
}
