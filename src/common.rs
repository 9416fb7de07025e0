//! 全局基础类型与错误定义

use thiserror::Error;

// ── ID 类型别名 ───────────────────────────────────────────────────────────────

/// 索引标识：不透明字节串
pub type IndexId     = Vec<u8>;
/// 条目标识：非空字节串
pub type ItemId      = Vec<u8>;
/// 由 IndexId 推导出的 32 位主键，决定所属分区
pub type PrimaryId   = i32;
/// 分区编号（0..num_partitions）
pub type PartitionId = u32;
/// 索引类型（一个类型下挂多个命名索引）
pub type TypeId      = i16;
/// 标签名哈希码（线上格式中代替标签名）
pub type TagHash     = i32;

/// 按字段名引用条目自身 ItemId 时使用的保留名（大小写不敏感）
pub const ITEM_ID_FIELD: &str = "ItemId";

pub fn is_item_id_field(name: &str) -> bool {
    name.eq_ignore_ascii_case(ITEM_ID_FIELD)
}

// ── 错误 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("truncated data: {0}")]
    Truncated(String),
    #[error("unsupported {type_name} version {found} (current {current})")]
    UnsupportedVersion {
        type_name: &'static str,
        found:     u8,
        current:   u8,
    },
    #[error("comparer error: {0}")]
    Comparer(String),
    #[error("primary sort tag not found: {0}")]
    SortTagNotFound(String),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("index config not found: type_id={0} index={1}")]
    IndexConfigNotFound(TypeId, String),
    #[error("string hash not found: type_id={0} hash={1}")]
    StringHashNotFound(TypeId, i32),
    #[error("compression error: {0}")]
    Compression(String),
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("store error: {0}")]
    Store(String),
    #[error("partition {0} unavailable")]
    PartitionUnavailable(PartitionId),
}

impl From<std::io::Error> for QueryError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof => Self::Truncated(e.to_string()),
            _                                 => Self::InvalidData(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;
