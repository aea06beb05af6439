//! SQLite 元数据存储子模块
//!
//! ## 职责
//! - 创建/迁移 `images` 表结构与索引
//! - 设置 SQLite 运行参数（WAL）
//! - 以 JSON 存储 `ImageRecord` 主体，键列单独建模便于按分区查询
//!
//! ## 错误语义
//! - DDL、读写失败统一映射为 `MetadataError::Database`

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};

use super::{ImageRecord, MetadataError, MetadataStore};
use crate::storage::Lookup;

const SCHEMA_VERSION: i64 = 1;

pub struct SqliteMetadataStore {
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    /// 打开（必要时创建）数据库文件并初始化 Schema。
    pub fn open(path: &Path) -> Result<Self, MetadataError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MetadataError::Database(format!("创建数据库目录失败: {}", e))
            })?;
        }
        log::info!("数据库路径: {}", path.display());

        let conn = Connection::open(path)
            .map_err(|e| MetadataError::Database(format!("打开数据库失败: {}", e)))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| MetadataError::Database(format!("设置 WAL 失败: {}", e)))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, MetadataError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| MetadataError::Database(format!("打开内存数据库失败: {}", e)))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, MetadataError> {
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(
        &self,
        op: impl FnOnce(&Connection) -> Result<T, MetadataError>,
    ) -> Result<T, MetadataError> {
        let conn = self.conn.lock().map_err(|_| MetadataError::Poisoned)?;
        op(&conn)
    }
}

fn get_user_version(conn: &Connection) -> Result<i64, MetadataError> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| MetadataError::Database(format!("读取数据库版本失败: {}", e)))
}

fn set_user_version(conn: &Connection, version: i64) -> Result<(), MetadataError> {
    conn.execute_batch(&format!("PRAGMA user_version = {version};"))
        .map_err(|e| MetadataError::Database(format!("写入数据库版本失败: {}", e)))
}

fn initialize_schema(conn: &Connection) -> Result<(), MetadataError> {
    let version = get_user_version(conn)?;
    if version >= SCHEMA_VERSION {
        return Ok(());
    }

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS images (
            partition_key TEXT NOT NULL,
            row_key TEXT NOT NULL,
            body TEXT NOT NULL,
            updated_at INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (partition_key, row_key)
        );
        CREATE INDEX IF NOT EXISTS idx_images_updated_at ON images(updated_at);",
    )
    .map_err(|e| MetadataError::Database(format!("创建图片表失败: {}", e)))?;

    set_user_version(conn, SCHEMA_VERSION)
}

fn decode_rows(bodies: Vec<String>) -> Result<Vec<ImageRecord>, MetadataError> {
    bodies
        .into_iter()
        .map(|body| serde_json::from_str::<ImageRecord>(&body).map_err(MetadataError::from))
        .collect()
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn upsert(
        &self,
        partition_key: &str,
        row_key: &str,
        record: &ImageRecord,
    ) -> Result<(), MetadataError> {
        let mut stored = record.clone();
        stored.partition_key = partition_key.to_string();
        stored.row_key = row_key.to_string();
        let body = serde_json::to_string(&stored)?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO images (partition_key, row_key, body, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(partition_key, row_key)
                 DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
                params![partition_key, row_key, body, stored.timestamp],
            )?;
            Ok(())
        })
    }

    async fn get(
        &self,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Lookup<ImageRecord>, MetadataError> {
        let body: Option<String> = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT body FROM images WHERE partition_key = ?1 AND row_key = ?2",
                    params![partition_key, row_key],
                    |row| row.get(0),
                )
                .optional()?)
        })?;

        match body {
            Some(body) => Ok(Lookup::Found(serde_json::from_str(&body)?)),
            None => Ok(Lookup::NotFound),
        }
    }

    async fn delete(&self, partition_key: &str, row_key: &str) -> Result<Lookup<()>, MetadataError> {
        let affected = self.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM images WHERE partition_key = ?1 AND row_key = ?2",
                params![partition_key, row_key],
            )?)
        })?;

        Ok(if affected > 0 {
            Lookup::Found(())
        } else {
            Lookup::NotFound
        })
    }

    async fn query(&self, partition_key: Option<&str>) -> Result<Vec<ImageRecord>, MetadataError> {
        let bodies = self.with_conn(|conn| {
            let mut bodies = Vec::new();
            match partition_key {
                Some(pk) => {
                    let mut stmt = conn.prepare(
                        "SELECT body FROM images WHERE partition_key = ?1 ORDER BY row_key",
                    )?;
                    let rows = stmt.query_map(params![pk], |row| row.get::<_, String>(0))?;
                    for row in rows {
                        bodies.push(row?);
                    }
                }
                None => {
                    let mut stmt = conn
                        .prepare("SELECT body FROM images ORDER BY partition_key, row_key")?;
                    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                    for row in rows {
                        bodies.push(row?);
                    }
                }
            }
            Ok(bodies)
        })?;

        decode_rows(bodies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::PreviewRef;

    fn sample_record(pk: &str, rk: &str) -> ImageRecord {
        let mut record = ImageRecord::new(pk, rk);
        record.dominant_colour = "#00FF00".to_string();
        record.previews.insert(
            "small".to_string(),
            PreviewRef {
                path: format!("files/{rk}/preview-small-{rk}.jpg"),
                width: 500,
                height: 375,
            },
        );
        record
    }

    #[test]
    fn schema_initialization_is_idempotent() {
        let conn = Connection::open_in_memory().expect("open in-memory sqlite failed");
        initialize_schema(&conn).expect("first init");
        initialize_schema(&conn).expect("second init");
        assert_eq!(get_user_version(&conn).expect("version"), SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn roundtrips_records_through_json_body() {
        let store = SqliteMetadataStore::open_in_memory().expect("open store");
        let record = sample_record("folder", "img");
        store.upsert("folder", "img", &record).await.expect("upsert");

        let loaded = store
            .get("folder", "img")
            .await
            .expect("get")
            .into_option()
            .expect("found");
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn query_and_delete() {
        let store = SqliteMetadataStore::open_in_memory().expect("open store");
        store.upsert("a", "2", &sample_record("a", "2")).await.expect("upsert");
        store.upsert("a", "1", &sample_record("a", "1")).await.expect("upsert");
        store.upsert("b", "3", &sample_record("b", "3")).await.expect("upsert");

        let a = store.query(Some("a")).await.expect("query");
        assert_eq!(a.iter().map(|r| r.row_key.as_str()).collect::<Vec<_>>(), vec!["1", "2"]);
        assert_eq!(store.query(None).await.expect("query all").len(), 3);

        assert_eq!(store.delete("a", "1").await.expect("delete"), Lookup::Found(()));
        assert_eq!(store.delete("a", "1").await.expect("delete"), Lookup::NotFound);
    }
}
