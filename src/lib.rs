//! # 图库媒体流水线 — 库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │          调用方（CLI / 上层 CRUD / HTTP 适配层）          │
//! └───────┼──────────────────────────────────────────────────┘
//!         ↕ Result<T, MediaError>
//! ┌───────┼──────────────────────────────────────────────────┐
//! │       ↕            media（流水线核心）                    │
//! │                                                          │
//! │  MediaService ── 取消标志表                              │
//! │       │                                                  │
//! │  MediaIngestionOrchestrator                              │
//! │   ├─ chunked      暂存块 / 按序提交                       │
//! │   ├─ decode       签名 · 上限 · 解码 · EXIF 方向          │
//! │   ├─ color        色相直方图 → 主色调                     │
//! │   ├─ preview      small/medium/large/raw/original        │
//! │   └─ projection   四边形 → 矩形（单应矩阵）               │
//! └───────┼───────────────────────┼──────────────────────────┘
//!         ↕ Arc<dyn ObjectStore>  ↕ Arc<dyn MetadataStore>
//! ┌───────┼───────────────────────┼──────────────────────────┐
//! │  storage（memory / fs）   metadata（memory / sqlite）     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 应用级统一错误类型 `AppError` |
//! | [`media`] | 分块上传、解码、主色调、预览阶梯、透视校正与编排 |
//! | [`storage`] | 对象存储协作者接口及内存 / 本地目录实现 |
//! | [`metadata`] | 图片元数据协作者接口及内存 / SQLite 实现 |

pub mod error;
pub mod media;
pub mod metadata;
pub mod storage;
