//! # 服务层（可注入状态）
//!
//! ## 设计思路
//!
//! `MediaService` 是对外入口，内部持有编排器与“进行中请求”的取消标志表。
//! 实例由调用方创建并持有，不存在进程级单例；测试可以创建彼此独立的实例。
//!
//! ## 实现思路
//!
//! - 每个可取消请求以调用方给定的 `request_id` 登记一个 `AtomicBool`
//! - `cancel(request_id)` 只翻转标志，编排器在阶段之间以及写记录之前检查
//! - 请求结束（无论成功失败，或 future 被中途丢弃）都会注销标志

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use uuid::Uuid;

use super::source::{FileChunk, FileChunkList, IngestRequest, ProjectionOutput, Quadrilateral};
use super::{MediaConfig, MediaError, MediaIngestionOrchestrator};
use crate::metadata::{ImageRecord, MetadataStore};
use crate::storage::ObjectStore;

/// 媒体服务状态。
pub struct MediaService {
    handler: MediaIngestionOrchestrator,
    cancel_flags: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl MediaService {
    pub fn new(
        config: MediaConfig,
        objects: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Result<Self, MediaError> {
        Ok(Self {
            handler: MediaIngestionOrchestrator::new(config, objects, metadata)?,
            cancel_flags: Mutex::new(HashMap::new()),
        })
    }

    pub fn orchestrator(&self) -> &MediaIngestionOrchestrator {
        &self.handler
    }

    pub async fn upload_chunk(&self, addressed_id: Uuid, chunk: FileChunk) -> Result<String, MediaError> {
        self.handler.upload_chunk(addressed_id, chunk).await
    }

    pub async fn finalize_upload(
        &self,
        request_id: &str,
        list: FileChunkList,
    ) -> Result<ImageRecord, MediaError> {
        self.run_cancellable(request_id, |flag| async move {
            self.handler
                .finalize_upload(&list, || flag.load(Ordering::SeqCst))
                .await
        })
        .await
    }

    pub async fn ingest_bytes(
        &self,
        request_id: &str,
        bytes: Bytes,
        request: IngestRequest,
    ) -> Result<ImageRecord, MediaError> {
        self.run_cancellable(request_id, |flag| async move {
            self.handler
                .ingest_bytes(bytes, &request, || flag.load(Ordering::SeqCst))
                .await
        })
        .await
    }

    pub async fn save_edit(
        &self,
        request_id: &str,
        partition_key: &str,
        row_key: &str,
        bytes: Bytes,
    ) -> Result<ImageRecord, MediaError> {
        self.run_cancellable(request_id, |flag| async move {
            self.handler
                .save_edit(partition_key, row_key, bytes, || flag.load(Ordering::SeqCst))
                .await
        })
        .await
    }

    pub async fn project(&self, bytes: Bytes, quad: Quadrilateral) -> Result<ProjectionOutput, MediaError> {
        self.handler.project(bytes, quad).await
    }

    /// 按分区列出图片记录；`None` 表示全部。
    pub async fn list(&self, partition_key: Option<&str>) -> Result<Vec<ImageRecord>, MediaError> {
        Ok(self.handler.metadata().query(partition_key).await?)
    }

    /// 请求取消；返回该请求是否仍在进行中。
    pub fn cancel(&self, request_id: &str) -> Result<bool, MediaError> {
        let guard = self
            .cancel_flags
            .lock()
            .map_err(|_| MediaError::ResourceLimit("取消标志锁已中毒".to_string()))?;

        if let Some(flag) = guard.get(request_id) {
            flag.store(true, Ordering::SeqCst);
            log::info!("🛑 已请求取消：{}", request_id);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// 当前登记中的请求数量。
    pub fn in_flight(&self) -> Result<usize, MediaError> {
        let guard = self
            .cancel_flags
            .lock()
            .map_err(|_| MediaError::ResourceLimit("取消标志锁已中毒".to_string()))?;
        Ok(guard.len())
    }

    async fn run_cancellable<T, F, Fut>(&self, request_id: &str, run: F) -> Result<T, MediaError>
    where
        F: FnOnce(Arc<AtomicBool>) -> Fut,
        Fut: Future<Output = Result<T, MediaError>>,
    {
        if request_id.trim().is_empty() {
            return Err(MediaError::InvalidArgument("request_id 不能为空".to_string()));
        }

        let cancel_flag = Arc::new(AtomicBool::new(false));
        let registration = {
            let mut guard = self
                .cancel_flags
                .lock()
                .map_err(|_| MediaError::ResourceLimit("取消标志锁已中毒".to_string()))?;
            if guard.contains_key(request_id) {
                return Err(MediaError::InvalidArgument(format!(
                    "请求 id 已在处理中：{}",
                    request_id
                )));
            }
            guard.insert(request_id.to_string(), Arc::clone(&cancel_flag));
            FlagRegistration {
                flags: &self.cancel_flags,
                request_id,
            }
        };

        let result = run(cancel_flag).await;
        drop(registration);

        if let Err(err) = &result {
            log::warn!("⚠️ 请求失败 - id={} 错误: {}", request_id, err);
        }
        result
    }
}

/// 取消标志的登记凭证，析构时注销，覆盖 future 被中途丢弃的情况。
struct FlagRegistration<'a> {
    flags: &'a Mutex<HashMap<String, Arc<AtomicBool>>>,
    request_id: &'a str,
}

impl Drop for FlagRegistration<'_> {
    fn drop(&mut self) {
        match self.flags.lock() {
            Ok(mut guard) => {
                guard.remove(self.request_id);
            }
            Err(poisoned) => {
                poisoned.into_inner().remove(self.request_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::InMemoryMetadataStore;
    use crate::storage::InMemoryObjectStore;
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn service() -> MediaService {
        MediaService::new(
            MediaConfig::default(),
            Arc::new(InMemoryObjectStore::new()),
            Arc::new(InMemoryMetadataStore::new()),
        )
        .expect("service init failed")
    }

    #[test]
    fn cancel_unknown_request_is_noop() {
        let service = service();
        assert!(!service.cancel("nope").expect("cancel"));
        assert_eq!(service.in_flight().expect("in flight"), 0);
    }

    #[tokio::test]
    async fn registered_flag_is_visible_and_removed_afterwards() {
        let service = service();
        let observed = AtomicUsize::new(0);

        let result: Result<(), MediaError> = service
            .run_cancellable("req-1", |flag| {
                let service = &service;
                let observed = &observed;
                async move {
                    observed.store(service.in_flight()?, Ordering::SeqCst);
                    assert!(service.cancel("req-1")?);
                    if flag.load(Ordering::SeqCst) {
                        return Err(MediaError::Cancelled("req-1".to_string()));
                    }
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(MediaError::Cancelled(_))));
        assert_eq!(observed.load(Ordering::SeqCst), 1);
        assert_eq!(service.in_flight().expect("in flight"), 0);
    }

    #[tokio::test]
    async fn duplicate_request_ids_are_rejected() {
        let service = service();
        let result: Result<(), MediaError> = service
            .run_cancellable("dup", |_| {
                let service = &service;
                async move {
                    let nested: Result<(), MediaError> =
                        service.run_cancellable("dup", |_| async { Ok(()) }).await;
                    assert!(matches!(nested, Err(MediaError::InvalidArgument(_))));
                    Ok(())
                }
            })
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn dropped_request_releases_its_id() {
        let service = service();
        let img = ImageBuffer::from_fn(1024, 1024, |x, y| Rgb([(x % 255) as u8, (y % 255) as u8, 90u8]));
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut cursor, ImageFormat::Png)
            .expect("failed to encode test image");
        let bytes = Bytes::from(cursor.into_inner());
        let request = IngestRequest {
            parent_id: "folder".to_string(),
            description: String::new(),
        };

        // 首次轮询停在阻塞解码上，超时后 future 被丢弃
        let _ = tokio::time::timeout(
            Duration::ZERO,
            service.ingest_bytes("req-x", bytes.clone(), request.clone()),
        )
        .await;
        assert_eq!(service.in_flight().expect("in flight"), 0);

        let record = service
            .ingest_bytes("req-x", bytes, request)
            .await
            .expect("retry with the same id");
        assert_eq!(record.partition_key, "folder");
        assert_eq!(service.in_flight().expect("in flight"), 0);
    }
}
