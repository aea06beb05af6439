//! 进程内对象存储。
//!
//! 对象与暂存块分别保存在两张受 `Mutex` 保护的表里，锁内只做内存拷贝，不跨 `.await`。

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use super::{CommittedObject, Lookup, ObjectStore, StorageError, validate_object_name};

type ObjectKey = (String, String);

#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashMap<ObjectKey, Bytes>>,
    blocks: Mutex<HashMap<ObjectKey, HashMap<String, Bytes>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前已提交对象数量（不含暂存块）。
    pub fn object_count(&self) -> Result<usize, StorageError> {
        let objects = self.objects.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(objects.len())
    }

    /// 指定对象当前暂存的块数量。
    pub fn staged_block_count(&self, container: &str, name: &str) -> Result<usize, StorageError> {
        let blocks = self.blocks.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(blocks
            .get(&key(container, name))
            .map(|staged| staged.len())
            .unwrap_or(0))
    }

    /// 列出容器内全部对象名（排序后返回）。
    pub fn list(&self, container: &str) -> Result<Vec<String>, StorageError> {
        let objects = self.objects.lock().map_err(|_| StorageError::Poisoned)?;
        let mut names: Vec<String> = objects
            .keys()
            .filter(|(c, _)| c == container)
            .map(|(_, n)| n.clone())
            .collect();
        names.sort();
        Ok(names)
    }
}

fn key(container: &str, name: &str) -> ObjectKey {
    (container.to_string(), name.to_string())
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, container: &str, name: &str, data: Bytes) -> Result<(), StorageError> {
        validate_object_name(name)?;
        let mut objects = self.objects.lock().map_err(|_| StorageError::Poisoned)?;
        objects.insert(key(container, name), data);
        Ok(())
    }

    async fn get(&self, container: &str, name: &str) -> Result<Lookup<Bytes>, StorageError> {
        let objects = self.objects.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(match objects.get(&key(container, name)) {
            Some(data) => Lookup::Found(data.clone()),
            None => Lookup::NotFound,
        })
    }

    async fn delete(&self, container: &str, name: &str) -> Result<Lookup<()>, StorageError> {
        let removed = {
            let mut objects = self.objects.lock().map_err(|_| StorageError::Poisoned)?;
            objects.remove(&key(container, name)).is_some()
        };
        let removed_blocks = {
            let mut blocks = self.blocks.lock().map_err(|_| StorageError::Poisoned)?;
            blocks.remove(&key(container, name)).is_some()
        };

        Ok(if removed || removed_blocks {
            Lookup::Found(())
        } else {
            Lookup::NotFound
        })
    }

    async fn stage_block(
        &self,
        container: &str,
        name: &str,
        block_id: &str,
        data: Bytes,
    ) -> Result<(), StorageError> {
        validate_object_name(name)?;
        let mut blocks = self.blocks.lock().map_err(|_| StorageError::Poisoned)?;
        blocks
            .entry(key(container, name))
            .or_default()
            .insert(block_id.to_string(), data);
        Ok(())
    }

    async fn commit_blocks(
        &self,
        container: &str,
        name: &str,
        block_ids: &[String],
    ) -> Result<CommittedObject, StorageError> {
        validate_object_name(name)?;

        let assembled = {
            let blocks = self.blocks.lock().map_err(|_| StorageError::Poisoned)?;
            let staged = blocks.get(&key(container, name));

            let missing: Vec<String> = block_ids
                .iter()
                .filter(|id| !staged.is_some_and(|s| s.contains_key(id.as_str())))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(StorageError::MissingBlocks { missing });
            }

            let mut assembled = BytesMut::new();
            if let Some(staged) = staged {
                for id in block_ids {
                    if let Some(block) = staged.get(id) {
                        assembled.extend_from_slice(block);
                    }
                }
            }
            assembled.freeze()
        };

        let size = assembled.len() as u64;
        let mut objects = self.objects.lock().map_err(|_| StorageError::Poisoned)?;
        objects.insert(key(container, name), assembled);

        Ok(CommittedObject {
            container: container.to_string(),
            name: name.to_string(),
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn restaging_overwrites_instead_of_duplicating() {
        let store = InMemoryObjectStore::new();
        store.stage_block("c", "obj", "b1", Bytes::from_static(b"old")).await.expect("stage");
        store.stage_block("c", "obj", "b1", Bytes::from_static(b"new")).await.expect("restage");

        assert_eq!(store.staged_block_count("c", "obj").expect("count"), 1);

        store
            .commit_blocks("c", "obj", &["b1".to_string()])
            .await
            .expect("commit");
        let data = store.get("c", "obj").await.expect("get").into_option().expect("found");
        assert_eq!(&data[..], b"new");
    }

    #[tokio::test]
    async fn commit_reports_every_missing_block() {
        let store = InMemoryObjectStore::new();
        store.stage_block("c", "obj", "a", Bytes::from_static(b"1")).await.expect("stage");

        let err = store
            .commit_blocks("c", "obj", &["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .expect_err("must fail");

        match err {
            StorageError::MissingBlocks { missing } => assert_eq!(missing, vec!["b", "c"]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!store.get("c", "obj").await.expect("get").is_found());
        assert_eq!(store.staged_block_count("c", "obj").expect("count"), 1);
    }

    #[tokio::test]
    async fn delete_drops_object_and_blocks() {
        let store = InMemoryObjectStore::new();
        store.stage_block("c", "obj", "a", Bytes::from_static(b"1")).await.expect("stage");
        store.commit_blocks("c", "obj", &["a".to_string()]).await.expect("commit");

        assert_eq!(store.delete("c", "obj").await.expect("delete"), Lookup::Found(()));
        assert_eq!(store.staged_block_count("c", "obj").expect("count"), 0);
        assert_eq!(store.delete("c", "obj").await.expect("delete"), Lookup::NotFound);
    }
}
