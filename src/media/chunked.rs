//! # 分块上传组装模块
//!
//! ## 设计思路
//!
//! 大文件拆成可独立重试、任意顺序到达的块，最后一次按序提交：
//! - `stage_chunk`：同一 token 重复暂存覆盖内容，不会重复追加
//! - `commit`：严格按调用方给出的 token 顺序拼接；引用未暂存的块返回 `IncompleteUpload`，
//!   已暂存的块保留，上传可以续传
//!
//! 调用方需保证提交顺序就是客户端切块的原始顺序，这里不做推断。
//!
//! ## 实现思路
//!
//! 组装器本身无状态，仅持有对象存储句柄。并发暂存的安全性由存储实现保证。
//! `FileChunk` / `FileChunkList` 这一层负责文件名清洗与对象名推导，暂存与提交共用同一推导。

use std::sync::Arc;

use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use super::MediaError;
use super::source::{FileChunk, FileChunkList};
use crate::storage::{CommittedObject, ObjectStore};

static FILENAME_DISALLOWED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^0-9A-Za-z.,]").expect("filename pattern is a valid regex"));

/// 分块上传组装器。
pub struct ChunkedUploadAssembler {
    store: Arc<dyn ObjectStore>,
    container: String,
}

impl ChunkedUploadAssembler {
    pub fn new(store: Arc<dyn ObjectStore>, container: impl Into<String>) -> Self {
        Self {
            store,
            container: container.into(),
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// 暂存一个命名块，可安全重试。
    pub async fn stage_chunk(
        &self,
        object_id: &str,
        block_token: &str,
        data: Bytes,
    ) -> Result<(), MediaError> {
        if object_id.trim().is_empty() {
            return Err(MediaError::InvalidArgument("对象名不能为空".to_string()));
        }
        if block_token.trim().is_empty() {
            return Err(MediaError::InvalidArgument("块 token 不能为空".to_string()));
        }

        log::debug!(
            "📦 暂存块 - {}/{} token={} 大小: {} 字节",
            self.container,
            object_id,
            block_token,
            data.len()
        );
        self.store
            .stage_block(&self.container, object_id, block_token, data)
            .await?;
        Ok(())
    }

    /// 按给定顺序提交已暂存的块。
    pub async fn commit(
        &self,
        object_id: &str,
        ordered_block_tokens: &[String],
    ) -> Result<CommittedObject, MediaError> {
        if object_id.trim().is_empty() {
            return Err(MediaError::InvalidArgument("对象名不能为空".to_string()));
        }
        if ordered_block_tokens.is_empty() {
            return Err(MediaError::InvalidArgument("块列表不能为空".to_string()));
        }
        if ordered_block_tokens.iter().any(|token| token.trim().is_empty()) {
            return Err(MediaError::InvalidArgument("块 token 不能为空".to_string()));
        }

        let committed = self
            .store
            .commit_blocks(&self.container, object_id, ordered_block_tokens)
            .await?;

        log::info!(
            "📦 分块提交完成 - {}/{} 块数: {} 大小: {} 字节",
            committed.container,
            committed.name,
            ordered_block_tokens.len(),
            committed.size
        );
        Ok(committed)
    }

    /// 暂存客户端上传的单个文件块。
    ///
    /// `addressed_id` 是请求地址中的文件 id，必须与块自身的 `file_id` 一致。
    pub async fn upload_chunk(&self, addressed_id: Uuid, chunk: FileChunk) -> Result<String, MediaError> {
        if addressed_id != chunk.file_id {
            return Err(MediaError::InvalidArgument(format!(
                "块的文件 id 与请求地址不一致：{} != {}",
                chunk.file_id, addressed_id
            )));
        }
        let object_name = upload_object_name(chunk.file_id, &chunk.name)?;
        self.stage_chunk(&object_name, &chunk.block_id, chunk.data).await?;
        Ok(object_name)
    }

    /// 按清单顺序提交整份文件。
    pub async fn commit_file(&self, list: &FileChunkList) -> Result<CommittedObject, MediaError> {
        let object_name = upload_object_name(list.file_id, &list.name)?;
        self.commit(&object_name, &list.block_ids).await
    }
}

/// 清洗文件名：`[0-9A-Za-z.,]` 以外的字符替换为 `-`。
pub fn sanitize_file_name(name: &str) -> String {
    FILENAME_DISALLOWED.replace_all(name, "-").into_owned()
}

/// 上传对象名：`files/{id}/original-{id}{ext}`，扩展名取自清洗后的文件名。
pub fn upload_object_name(file_id: Uuid, name: &str) -> Result<String, MediaError> {
    if name.trim().is_empty() {
        return Err(MediaError::InvalidArgument("文件名不能为空".to_string()));
    }
    let sanitized = sanitize_file_name(name);
    Ok(format!(
        "files/{id}/original-{id}{ext}",
        id = file_id,
        ext = file_extension(&sanitized)
    ))
}

/// 含点号的扩展名；没有扩展名或点号在末尾时为空串。
fn file_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(index) if index + 1 < name.len() => &name[index..],
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryObjectStore, Lookup};

    fn assembler() -> (Arc<InMemoryObjectStore>, ChunkedUploadAssembler) {
        let store = Arc::new(InMemoryObjectStore::new());
        let assembler = ChunkedUploadAssembler::new(store.clone(), "image-upload");
        (store, assembler)
    }

    fn tokens(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn sanitizes_names_and_derives_object_name() {
        assert_eq!(sanitize_file_name("my photo (1).JPG"), "my-photo--1-.JPG");
        assert_eq!(sanitize_file_name("a,b.c"), "a,b.c");

        let id = Uuid::nil();
        assert_eq!(
            upload_object_name(id, "holiday pic.png").expect("name"),
            format!("files/{id}/original-{id}.png")
        );
        assert_eq!(
            upload_object_name(id, "noext").expect("name"),
            format!("files/{id}/original-{id}")
        );
        assert_eq!(
            upload_object_name(id, "../../etc/passwd.jpg").expect("name"),
            format!("files/{id}/original-{id}.jpg")
        );
        assert!(matches!(
            upload_object_name(id, "  "),
            Err(MediaError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn commit_concatenates_in_caller_order() {
        let (store, assembler) = assembler();
        assembler.stage_chunk("obj", "b2", Bytes::from_static(b"world")).await.expect("stage");
        assembler.stage_chunk("obj", "b1", Bytes::from_static(b"hello ")).await.expect("stage");

        let committed = assembler.commit("obj", &tokens(&["b1", "b2"])).await.expect("commit");
        assert_eq!(committed.size, 11);
        let first = store.get("image-upload", "obj").await.expect("get");
        assert_eq!(first, Lookup::Found(Bytes::from_static(b"hello world")));

        assembler.commit("obj", &tokens(&["b1", "b2"])).await.expect("recommit");
        let second = store.get("image-upload", "obj").await.expect("get");
        assert_eq!(first, second);

        assembler.commit("obj", &tokens(&["b2", "b1"])).await.expect("reordered");
        let reordered = store.get("image-upload", "obj").await.expect("get");
        assert_eq!(reordered, Lookup::Found(Bytes::from_static(b"worldhello ")));
    }

    #[tokio::test]
    async fn restaging_overwrites_instead_of_appending() {
        let (store, assembler) = assembler();
        assembler.stage_chunk("obj", "b1", Bytes::from_static(b"stale")).await.expect("stage");
        assembler.stage_chunk("obj", "b1", Bytes::from_static(b"fresh")).await.expect("restage");

        assembler.commit("obj", &tokens(&["b1"])).await.expect("commit");
        assert_eq!(
            store.get("image-upload", "obj").await.expect("get"),
            Lookup::Found(Bytes::from_static(b"fresh"))
        );
    }

    #[tokio::test]
    async fn missing_blocks_keep_upload_resumable() {
        let (_store, assembler) = assembler();
        assembler.stage_chunk("obj", "b1", Bytes::from_static(b"a")).await.expect("stage");

        let err = assembler
            .commit("obj", &tokens(&["b1", "b2", "b3"]))
            .await
            .expect_err("should be incomplete");
        assert!(matches!(err, MediaError::IncompleteUpload { ref missing } if missing == &["b2", "b3"]));

        assembler.stage_chunk("obj", "b2", Bytes::from_static(b"b")).await.expect("stage");
        assembler.stage_chunk("obj", "b3", Bytes::from_static(b"c")).await.expect("stage");
        let committed = assembler.commit("obj", &tokens(&["b1", "b2", "b3"])).await.expect("commit");
        assert_eq!(committed.size, 3);
    }

    #[tokio::test]
    async fn rejects_invalid_arguments_before_io() {
        let (store, assembler) = assembler();
        assert!(matches!(
            assembler.commit("obj", &[]).await,
            Err(MediaError::InvalidArgument(_))
        ));
        assert!(matches!(
            assembler.stage_chunk("obj", "", Bytes::new()).await,
            Err(MediaError::InvalidArgument(_))
        ));

        let chunk = FileChunk {
            file_id: Uuid::new_v4(),
            block_id: "b1".to_string(),
            name: "a.jpg".to_string(),
            parent_id: "folder".to_string(),
            data: Bytes::from_static(b"x"),
        };
        assert!(matches!(
            assembler.upload_chunk(Uuid::new_v4(), chunk).await,
            Err(MediaError::InvalidArgument(_))
        ));
        assert_eq!(store.staged_block_count("image-upload", "obj").expect("count"), 0);
        assert_eq!(store.object_count().expect("count"), 0);
    }

    #[tokio::test]
    async fn file_chunks_stage_and_commit_under_the_same_name() {
        let (store, assembler) = assembler();
        let file_id = Uuid::new_v4();
        let parts = [("b0", "abc"), ("b1", "def")];

        for (block_id, data) in parts.iter().rev() {
            let chunk = FileChunk {
                file_id,
                block_id: block_id.to_string(),
                name: "Photo 1.jpg".to_string(),
                parent_id: "folder".to_string(),
                data: Bytes::from(data.to_string()),
            };
            assembler.upload_chunk(file_id, chunk).await.expect("upload chunk");
        }

        let list = FileChunkList {
            file_id,
            name: "Photo 1.jpg".to_string(),
            parent_id: "folder".to_string(),
            description: String::new(),
            block_ids: tokens(&["b0", "b1"]),
        };
        let committed = assembler.commit_file(&list).await.expect("commit file");
        assert_eq!(committed.name, format!("files/{file_id}/original-{file_id}.jpg"));
        assert_eq!(
            store.get("image-upload", &committed.name).await.expect("get"),
            Lookup::Found(Bytes::from_static(b"abcdef"))
        );
    }
}
