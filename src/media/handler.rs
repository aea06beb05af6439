//! # 核心编排模块
//!
//! ## 设计思路
//!
//! `MediaIngestionOrchestrator` 只负责流程编排与配置管理，存储与元数据都通过显式传入的
//! 协作者句柄访问，不持有任何全局单例。摄取链路固定为：
//! 1. 读取配置快照，校验入参（任何 I/O 之前）
//! 2. 解码为位图（阻塞线程池）
//! 3. 主色调 + 五档预览并行生成（有界并行）
//! 4. 写入全部预览 blob
//! 5. 最后一步写入 `ImageRecord`
//!
//! 第 5 步是唯一的线性化点：任一预览或主色调失败、或请求在此之前被取消，都不会写记录。
//! 已写入的孤立 blob 留给外部清理。
//!
//! ## 实现思路
//!
//! - 配置通过 `Arc<RwLock<MediaConfig>>` 支持运行时替换，单次请求内使用同一快照。
//! - CPU 密集阶段走 `spawn_blocking`，并发度由 `Semaphore` 限制为 `max_parallel_previews`。
//! - 记录 `decode/derive/persist/commit/total` 阶段耗时，便于性能诊断。

use std::sync::{Arc, RwLock};
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use super::chunked::ChunkedUploadAssembler;
use super::color::{average_color, calculate_dominant_color};
use super::decode::decode_image;
use super::preview::{encode_png, generate_preview};
use super::projection::project_to_jpeg;
use super::source::{
    DecodedBitmap, FileChunk, FileChunkList, IngestRequest, PreviewResult, PreviewSpec,
    ProjectionOutput, Quadrilateral, RgbColor,
};
use super::{MediaConfig, MediaError};
use crate::metadata::{ImageRecord, MetadataStore, PreviewRef};
use crate::storage::{Lookup, ObjectStore};

/// 并行派生阶段的单个产物。
enum Derived {
    Colors(DerivedColors),
    Preview(PreviewResult),
}

/// 主色调与平均色，由同一个阻塞任务计算。
struct DerivedColors {
    dominant: RgbColor,
    average: RgbColor,
}

/// 媒体摄取编排器。
pub struct MediaIngestionOrchestrator {
    config: Arc<RwLock<MediaConfig>>,
    objects: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
}

impl MediaIngestionOrchestrator {
    /// 使用给定配置与协作者创建编排器，配置先经过校验。
    ///
    /// # 示例
    /// ```rust,no_run
    /// use std::sync::Arc;
    /// use gallery_media::media::{MediaConfig, MediaIngestionOrchestrator};
    /// use gallery_media::metadata::InMemoryMetadataStore;
    /// use gallery_media::storage::InMemoryObjectStore;
    ///
    /// let orchestrator = MediaIngestionOrchestrator::new(
    ///     MediaConfig::default(),
    ///     Arc::new(InMemoryObjectStore::new()),
    ///     Arc::new(InMemoryMetadataStore::new()),
    /// )?;
    /// # Ok::<(), gallery_media::media::MediaError>(())
    /// ```
    pub fn new(
        config: MediaConfig,
        objects: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Result<Self, MediaError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            objects,
            metadata,
        })
    }

    /// 获取配置快照，保证单次请求链路使用一致参数。
    pub fn config_snapshot(&self) -> Result<MediaConfig, MediaError> {
        self.config
            .read()
            .map(|cfg| cfg.clone())
            .map_err(|_| MediaError::ResourceLimit("配置读取锁已中毒".to_string()))
    }

    /// 替换配置；进行中的请求继续使用各自的快照。
    pub fn set_config(&self, config: MediaConfig) -> Result<(), MediaError> {
        config.validate()?;
        let mut guard = self
            .config
            .write()
            .map_err(|_| MediaError::ResourceLimit("配置写入锁已中毒".to_string()))?;
        *guard = config;
        log::info!("⚙️ 已更新媒体配置");
        Ok(())
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    fn assembler(&self, config: &MediaConfig) -> ChunkedUploadAssembler {
        ChunkedUploadAssembler::new(Arc::clone(&self.objects), config.upload_container.clone())
    }

    /// 暂存客户端上传的一个块，返回上传对象名。
    pub async fn upload_chunk(&self, addressed_id: Uuid, chunk: FileChunk) -> Result<String, MediaError> {
        let config = self.config_snapshot()?;
        self.assembler(&config).upload_chunk(addressed_id, chunk).await
    }

    /// 完成分块上传：提交 → 读取 → 摄取（以上传的 `file_id` 作为图片 id）→ 删除上传源。
    pub async fn finalize_upload<C>(
        &self,
        list: &FileChunkList,
        is_cancelled: C,
    ) -> Result<ImageRecord, MediaError>
    where
        C: Fn() -> bool + Send + Sync,
    {
        let config = self.config_snapshot()?;
        require_non_blank(&list.parent_id, "父文件夹 id")?;
        require_non_blank(&list.name, "文件名")?;

        let committed = self.assembler(&config).commit_file(list).await?;
        let bytes = self
            .objects
            .get(&committed.container, &committed.name)
            .await?
            .into_option()
            .ok_or_else(|| {
                MediaError::NotFound(format!("上传对象不存在：{}/{}", committed.container, committed.name))
            })?;

        let record = self
            .ingest(
                &config,
                bytes,
                &list.parent_id,
                &list.file_id.to_string(),
                &list.description,
                &is_cancelled,
            )
            .await?;

        match self.objects.delete(&committed.container, &committed.name).await {
            Ok(Lookup::Found(())) => {}
            Ok(Lookup::NotFound) => {
                log::warn!("⚠️ 上传源已不存在：{}/{}", committed.container, committed.name);
            }
            Err(err) => {
                log::warn!(
                    "⚠️ 删除上传源失败（忽略）：{}/{} - {}",
                    committed.container,
                    committed.name,
                    err
                );
            }
        }

        Ok(record)
    }

    /// 直接摄取原始字节，使用新生成的 UUID 作为图片 id。
    pub async fn ingest_bytes<C>(
        &self,
        bytes: Bytes,
        request: &IngestRequest,
        is_cancelled: C,
    ) -> Result<ImageRecord, MediaError>
    where
        C: Fn() -> bool + Send + Sync,
    {
        let config = self.config_snapshot()?;
        require_non_blank(&request.parent_id, "父文件夹 id")?;

        let image_id = Uuid::new_v4().to_string();
        self.ingest(
            &config,
            bytes,
            &request.parent_id,
            &image_id,
            &request.description,
            &is_cancelled,
        )
        .await
    }

    async fn ingest<C>(
        &self,
        config: &MediaConfig,
        bytes: Bytes,
        parent_id: &str,
        image_id: &str,
        description: &str,
        is_cancelled: &C,
    ) -> Result<ImageRecord, MediaError>
    where
        C: Fn() -> bool + Send + Sync,
    {
        let total_start = Instant::now();
        ensure_not_cancelled(is_cancelled, image_id)?;

        let decode_start = Instant::now();
        let bitmap = decode_blocking(bytes, config).await?;
        let decode_elapsed = decode_start.elapsed();
        ensure_not_cancelled(is_cancelled, image_id)?;

        let derive_start = Instant::now();
        let (colors, previews) = derive(config, bitmap, image_id, PreviewSpec::ladder()).await?;
        let derive_elapsed = derive_start.elapsed();
        ensure_not_cancelled(is_cancelled, image_id)?;

        let persist_start = Instant::now();
        self.persist_previews(config, &previews).await?;
        let persist_elapsed = persist_start.elapsed();

        let mut record = ImageRecord::new(parent_id, image_id);
        record.description = description.to_string();
        apply_derived(&mut record, colors, &previews);

        let commit_start = Instant::now();
        ensure_not_cancelled(is_cancelled, image_id)?;
        self.metadata.upsert(parent_id, image_id, &record).await?;
        let commit_elapsed = commit_start.elapsed();

        log::info!(
            "✅ 图片摄取完成 - id={} decode={}ms derive={}ms persist={}ms commit={}ms total={}ms",
            image_id,
            decode_elapsed.as_millis(),
            derive_elapsed.as_millis(),
            persist_elapsed.as_millis(),
            commit_elapsed.as_millis(),
            total_start.elapsed().as_millis()
        );

        Ok(record)
    }

    /// 保存编辑：用新图片重新生成有损四档预览与主色调，原路径覆盖。
    ///
    /// 记录尚无 `original` 时，先把当前 `raw` 预览另存为无损 original。
    pub async fn save_edit<C>(
        &self,
        partition_key: &str,
        row_key: &str,
        bytes: Bytes,
        is_cancelled: C,
    ) -> Result<ImageRecord, MediaError>
    where
        C: Fn() -> bool + Send + Sync,
    {
        let config = self.config_snapshot()?;
        require_non_blank(partition_key, "partition_key")?;
        require_non_blank(row_key, "row_key")?;
        let total_start = Instant::now();

        let mut record = self
            .metadata
            .get(partition_key, row_key)
            .await?
            .into_option()
            .ok_or_else(|| MediaError::NotFound(format!("图片记录不存在：{}/{}", partition_key, row_key)))?;

        // 新图片先解码，解码失败时不写任何 blob
        let bitmap = decode_blocking(bytes, &config).await?;
        ensure_not_cancelled(&is_cancelled, row_key)?;

        if record.preview("original").is_none() {
            let original = self.preserve_raw_as_original(&config, &record).await?;
            record.previews.insert("original".to_string(), original);
        }
        ensure_not_cancelled(&is_cancelled, row_key)?;

        let (colors, previews) = derive(&config, bitmap, row_key, PreviewSpec::lossy_ladder()).await?;
        ensure_not_cancelled(&is_cancelled, row_key)?;

        self.persist_previews(&config, &previews).await?;
        apply_derived(&mut record, colors, &previews);

        ensure_not_cancelled(&is_cancelled, row_key)?;
        self.metadata.upsert(partition_key, row_key, &record).await?;

        log::info!(
            "✅ 编辑已保存 - {}/{} total={}ms",
            partition_key,
            row_key,
            total_start.elapsed().as_millis()
        );
        Ok(record)
    }

    async fn preserve_raw_as_original(
        &self,
        config: &MediaConfig,
        record: &ImageRecord,
    ) -> Result<PreviewRef, MediaError> {
        let raw_path = record
            .preview("raw")
            .map(|raw| raw.path.clone())
            .unwrap_or_else(|| PreviewSpec::lossy("raw", None).destination_path(&record.row_key));

        let raw_bytes = self
            .objects
            .get(&config.image_container, &raw_path)
            .await?
            .into_option()
            .ok_or_else(|| MediaError::NotFound(format!("raw 预览不存在：{}", raw_path)))?;

        let bitmap = decode_blocking(raw_bytes, config).await?;
        let (width, height) = (bitmap.width(), bitmap.height());
        let png = tokio::task::spawn_blocking(move || encode_png(bitmap.as_image())).await??;

        let path = PreviewSpec::lossless("original").destination_path(&record.row_key);
        self.objects
            .put(&config.image_container, &path, Bytes::from(png))
            .await?;
        log::info!("🗂️ 已将 raw 预览另存为 original：{}", path);

        Ok(PreviewRef { path, width, height })
    }

    async fn persist_previews(
        &self,
        config: &MediaConfig,
        previews: &[PreviewResult],
    ) -> Result<(), MediaError> {
        for preview in previews {
            self.objects
                .put(&config.image_container, &preview.path, preview.bytes.clone())
                .await?;
        }
        Ok(())
    }

    /// 透视校正：解码 → 校正 → JPEG 编码。
    pub async fn project(&self, bytes: Bytes, quad: Quadrilateral) -> Result<ProjectionOutput, MediaError> {
        let config = self.config_snapshot()?;
        let started = Instant::now();

        let bitmap = decode_blocking(bytes, &config).await?;
        let output =
            tokio::task::spawn_blocking(move || project_to_jpeg(&bitmap, &quad, &config)).await??;

        log::info!(
            "✅ 透视校正完成 - 输出: {}x{} {} 字节 耗时: {}ms",
            output.width,
            output.height,
            output.bytes.len(),
            started.elapsed().as_millis()
        );
        Ok(output)
    }
}

fn require_non_blank(value: &str, field: &str) -> Result<(), MediaError> {
    if value.trim().is_empty() {
        return Err(MediaError::InvalidArgument(format!("{} 不能为空", field)));
    }
    Ok(())
}

fn ensure_not_cancelled<C>(is_cancelled: &C, id: &str) -> Result<(), MediaError>
where
    C: Fn() -> bool,
{
    if is_cancelled() {
        log::info!("🛑 请求已取消：{}", id);
        return Err(MediaError::Cancelled(id.to_string()));
    }
    Ok(())
}

async fn decode_blocking(bytes: Bytes, config: &MediaConfig) -> Result<DecodedBitmap, MediaError> {
    let config = config.clone();
    tokio::task::spawn_blocking(move || decode_image(&bytes, &config)).await?
}

/// 主色调与各档预览并行生成；任一失败即整体失败。
async fn derive(
    config: &MediaConfig,
    bitmap: DecodedBitmap,
    object_id: &str,
    ladder: Vec<PreviewSpec>,
) -> Result<(DerivedColors, Vec<PreviewResult>), MediaError> {
    let bitmap = Arc::new(bitmap);
    let config = Arc::new(config.clone());
    let semaphore = Arc::new(Semaphore::new(config.max_parallel_previews.max(1)));
    let mut tasks: JoinSet<Result<Derived, MediaError>> = JoinSet::new();

    {
        let permit = acquire(&semaphore).await?;
        let bitmap = Arc::clone(&bitmap);
        let config = Arc::clone(&config);
        tasks.spawn_blocking(move || {
            let _permit = permit;
            let dominant = calculate_dominant_color(
                &bitmap,
                config.saturation_threshold,
                config.brightness_threshold,
                config.hue_smoothing_radius,
            )?;
            Ok(Derived::Colors(DerivedColors {
                dominant,
                average: average_color(&bitmap),
            }))
        });
    }

    for spec in ladder.iter().cloned() {
        let permit = acquire(&semaphore).await?;
        let bitmap = Arc::clone(&bitmap);
        let config = Arc::clone(&config);
        let object_id = object_id.to_string();
        tasks.spawn_blocking(move || {
            let _permit = permit;
            generate_preview(&bitmap, &spec, &object_id, &config).map(Derived::Preview)
        });
    }

    let mut colors = None;
    let mut previews = Vec::with_capacity(ladder.len());
    while let Some(joined) = tasks.join_next().await {
        match joined?? {
            Derived::Colors(c) => colors = Some(c),
            Derived::Preview(p) => previews.push(p),
        }
    }

    let colors = colors.ok_or_else(|| MediaError::Task("主色调任务未返回结果".to_string()))?;
    previews.sort_by_key(|p| ladder.iter().position(|s| s.name == p.name));
    Ok((colors, previews))
}

async fn acquire(semaphore: &Arc<Semaphore>) -> Result<tokio::sync::OwnedSemaphorePermit, MediaError> {
    Arc::clone(semaphore)
        .acquire_owned()
        .await
        .map_err(|e| MediaError::Task(format!("并发许可获取失败：{}", e)))
}

fn apply_derived(record: &mut ImageRecord, colors: DerivedColors, previews: &[PreviewResult]) {
    record.dominant_colour = colors.dominant.to_hex();
    record.average_colour = colors.average.to_hex();
    for preview in previews {
        record.previews.insert(
            preview.name.clone(),
            PreviewRef {
                path: preview.path.clone(),
                width: preview.width,
                height: preview.height,
            },
        );
    }
    record.timestamp = chrono::Utc::now().timestamp_millis();
}
