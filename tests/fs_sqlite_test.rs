use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use gallery_media::media::{FileChunk, FileChunkList, MediaConfig, MediaService};
use gallery_media::metadata::{MetadataStore, SqliteMetadataStore};
use gallery_media::storage::{FsObjectStore, Lookup, ObjectStore};
use image::{DynamicImage, GenericImageView, ImageBuffer, ImageFormat, Rgba};
use uuid::Uuid;

fn unique_temp_dir() -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock error")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("gallery-media-fs-test-{nanos}-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn create_png_bytes(width: u32, height: u32) -> Bytes {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgba([(x % 255) as u8, (y % 255) as u8, 200u8, 255])
    });
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut cursor, ImageFormat::Png)
        .expect("failed to encode test image");
    Bytes::from(cursor.into_inner())
}

fn config_for(dir: &Path) -> MediaConfig {
    let mut config = MediaConfig::default();
    config.storage_root = dir.join("blobs");
    config.database_path = dir.join("db").join("metadata.db");
    config
}

fn service_for(config: &MediaConfig) -> MediaService {
    let objects = Arc::new(FsObjectStore::new(config.storage_root.clone()).expect("fs store"));
    let metadata = Arc::new(SqliteMetadataStore::open(&config.database_path).expect("sqlite store"));
    MediaService::new(config.clone(), objects, metadata).expect("service init failed")
}

#[tokio::test]
async fn upload_survives_restart_and_persists_to_disk() {
    let dir = unique_temp_dir();
    let config = config_for(&dir);
    let source = create_png_bytes(320, 240);
    let file_id = Uuid::new_v4();
    let (head, tail) = source.split_at(source.len() / 2);

    // 第一个进程只暂存了前半部分
    {
        let service = service_for(&config);
        let chunk = FileChunk {
            file_id,
            block_id: "b0".to_string(),
            name: "cat.png".to_string(),
            parent_id: "pets".to_string(),
            data: Bytes::copy_from_slice(head),
        };
        service.upload_chunk(file_id, chunk).await.expect("stage head");
    }

    // 重启后续传并完成
    let service = service_for(&config);
    let chunk = FileChunk {
        file_id,
        block_id: "b1".to_string(),
        name: "cat.png".to_string(),
        parent_id: "pets".to_string(),
        data: Bytes::copy_from_slice(tail),
    };
    service.upload_chunk(file_id, chunk).await.expect("stage tail");

    let list = FileChunkList {
        file_id,
        name: "cat.png".to_string(),
        parent_id: "pets".to_string(),
        description: "napping".to_string(),
        block_ids: vec!["b0".to_string(), "b1".to_string()],
    };
    let record = service.finalize_upload("req", list).await.expect("finalize");

    let original = record.preview("original").expect("original");
    let on_disk = config.storage_root.join("images").join(&original.path);
    let decoded = image::open(&on_disk).expect("open original from disk");
    assert_eq!(decoded.dimensions(), (320, 240));

    let upload_path = config
        .storage_root
        .join("image-upload")
        .join(format!("files/{file_id}/original-{file_id}.png"));
    assert!(!upload_path.exists());

    drop(service);
    let reopened = SqliteMetadataStore::open(&config.database_path).expect("reopen sqlite");
    let stored = reopened
        .get("pets", &file_id.to_string())
        .await
        .expect("get")
        .into_option()
        .expect("record persisted");
    assert_eq!(stored, record);
    assert_eq!(reopened.query(Some("pets")).await.expect("query").len(), 1);

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn fs_store_commit_is_deterministic_and_delete_clears_blocks() {
    let dir = unique_temp_dir();
    let store = FsObjectStore::new(dir.join("blobs")).expect("fs store");
    let order = vec!["x".to_string(), "y/z".to_string()];

    store
        .stage_block("c", "obj.bin", "y/z", Bytes::from_static(b"-tail"))
        .await
        .expect("stage");
    store
        .stage_block("c", "obj.bin", "x", Bytes::from_static(b"head"))
        .await
        .expect("stage");

    store.commit_blocks("c", "obj.bin", &order).await.expect("commit");
    let first = store.get("c", "obj.bin").await.expect("get");
    store.commit_blocks("c", "obj.bin", &order).await.expect("recommit");
    let second = store.get("c", "obj.bin").await.expect("get");
    assert_eq!(first, Lookup::Found(Bytes::from_static(b"head-tail")));
    assert_eq!(first, second);

    assert_eq!(store.delete("c", "obj.bin").await.expect("delete"), Lookup::Found(()));
    assert!(store.commit_blocks("c", "obj.bin", &order).await.is_err());
    assert_eq!(store.get("c", "obj.bin").await.expect("get"), Lookup::NotFound);

    let _ = std::fs::remove_dir_all(dir);
}
