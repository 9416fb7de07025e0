//! 二进制键值存储接口、内存实现与索引存取适配

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::codec::envelope;
use crate::common::{PrimaryId, Result, TypeId};
use crate::config::IndexConfig;

/// 外部存储层：按 (类型, PrimaryId, 键) 存取原始字节
pub trait BinaryStore: Send + Sync {
    fn get(&self, type_id: TypeId, primary_id: PrimaryId, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn put(&self, type_id: TypeId, primary_id: PrimaryId, key: &[u8], value: Vec<u8>) -> Result<()>;
    /// 返回是否确有删除
    fn delete(&self, type_id: TypeId, primary_id: PrimaryId, key: &[u8]) -> Result<bool>;
    fn exists(&self, type_id: TypeId, primary_id: PrimaryId, key: &[u8]) -> Result<bool>;
}

// ── MemoryBinaryStore ─────────────────────────────────────────────────────────

const NUM_SHARDS: usize = 64;

type StoreKey = (TypeId, PrimaryId, Vec<u8>);

struct Shard {
    entries: HashMap<StoreKey, Vec<u8>>,
}

/// 内存存储
///
/// 使用 64 个 RwLock Shard 降低读写竞争，按 PrimaryId 分片。
pub struct MemoryBinaryStore {
    shards: Vec<RwLock<Shard>>,
}

impl MemoryBinaryStore {
    pub fn new() -> Self {
        let shards = (0..NUM_SHARDS)
            .map(|_| RwLock::new(Shard { entries: HashMap::new() }))
            .collect();
        Self { shards }
    }

    fn shard(&self, primary_id: PrimaryId) -> &RwLock<Shard> {
        &self.shards[(primary_id as i64).rem_euclid(NUM_SHARDS as i64) as usize]
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().unwrap().entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl Default for MemoryBinaryStore {
    fn default() -> Self { Self::new() }
}

impl BinaryStore for MemoryBinaryStore {
    fn get(&self, type_id: TypeId, primary_id: PrimaryId, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.shard(primary_id)
            .read().unwrap()
            .entries.get(&(type_id, primary_id, key.to_vec()))
            .cloned())
    }

    fn put(&self, type_id: TypeId, primary_id: PrimaryId, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.shard(primary_id)
            .write().unwrap()
            .entries.insert((type_id, primary_id, key.to_vec()), value);
        Ok(())
    }

    fn delete(&self, type_id: TypeId, primary_id: PrimaryId, key: &[u8]) -> Result<bool> {
        Ok(self.shard(primary_id)
            .write().unwrap()
            .entries.remove(&(type_id, primary_id, key.to_vec()))
            .is_some())
    }

    fn exists(&self, type_id: TypeId, primary_id: PrimaryId, key: &[u8]) -> Result<bool> {
        Ok(self.shard(primary_id)
            .read().unwrap()
            .entries.contains_key(&(type_id, primary_id, key.to_vec())))
    }
}

// ── IndexStore ────────────────────────────────────────────────────────────────

/// 索引字节的存取：键为扩展 id（IndexId ++ 后缀），值为带 CRC 的封装
#[derive(Clone)]
pub struct IndexStore {
    store: Arc<dyn BinaryStore>,
}

impl IndexStore {
    pub fn new(store: Arc<dyn BinaryStore>) -> Self { Self { store } }

    pub fn save(
        &self,
        type_id:    TypeId,
        primary_id: PrimaryId,
        config:     &IndexConfig,
        index_id:   &[u8],
        encoded:    &[u8],
    ) -> Result<()> {
        let sealed = envelope::seal(encoded, config.compression)?;
        tracing::debug!(
            type_id,
            primary_id,
            index = %config.index_name,
            raw = encoded.len(),
            stored = sealed.len(),
            "save index",
        );
        self.store.put(type_id, primary_id, &config.extended_id(index_id), sealed)
    }

    /// 索引不存在时返回 None
    pub fn load(
        &self,
        type_id:    TypeId,
        primary_id: PrimaryId,
        config:     &IndexConfig,
        index_id:   &[u8],
    ) -> Result<Option<Vec<u8>>> {
        self.store
            .get(type_id, primary_id, &config.extended_id(index_id))?
            .map(|sealed| envelope::open(&sealed))
            .transpose()
    }

    pub fn remove(&self, type_id: TypeId, primary_id: PrimaryId, config: &IndexConfig, index_id: &[u8]) -> Result<bool> {
        self.store.delete(type_id, primary_id, &config.extended_id(index_id))
    }

    pub fn exists(&self, type_id: TypeId, primary_id: PrimaryId, config: &IndexConfig, index_id: &[u8]) -> Result<bool> {
        self.store.exists(type_id, primary_id, &config.extended_id(index_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::envelope::CompressionType;
    use crate::common::QueryError;
    use crate::field_type::{DataType, PrimarySortInfo, SortOrder};

    fn config(suffix: u8) -> IndexConfig {
        IndexConfig::new("recent", suffix, PrimarySortInfo::by_item_id(vec![SortOrder::asc(DataType::Int32)]))
    }

    #[test]
    fn memory_store_basic_ops() {
        let s = MemoryBinaryStore::new();
        s.put(1, 7, b"k", vec![1, 2]).unwrap();
        assert!(s.exists(1, 7, b"k").unwrap());
        assert!(!s.exists(2, 7, b"k").unwrap());
        assert_eq!(s.get(1, 7, b"k").unwrap(), Some(vec![1, 2]));
        assert!(s.delete(1, 7, b"k").unwrap());
        assert!(!s.delete(1, 7, b"k").unwrap());
        assert!(s.is_empty());
    }

    #[test]
    fn suffix_separates_indexes_of_same_id() {
        let raw = Arc::new(MemoryBinaryStore::new());
        let store = IndexStore::new(raw.clone());
        let (a, b) = (config(1), config(2).with_compression(CompressionType::None));
        store.save(1, 5, &a, b"ix", b"first").unwrap();
        store.save(1, 5, &b, b"ix", b"second").unwrap();

        assert_eq!(store.load(1, 5, &a, b"ix").unwrap().as_deref(), Some(&b"first"[..]));
        assert_eq!(store.load(1, 5, &b, b"ix").unwrap().as_deref(), Some(&b"second"[..]));
        assert!(raw.exists(1, 5, b"ix\x01").unwrap());
        assert!(store.load(1, 6, &a, b"ix").unwrap().is_none());
    }

    #[test]
    fn corrupted_bytes_fail_checksum() {
        let raw = Arc::new(MemoryBinaryStore::new());
        let store = IndexStore::new(raw.clone());
        let cfg = config(1);
        store.save(1, 5, &cfg, b"ix", &[9u8; 64]).unwrap();

        let mut bytes = raw.get(1, 5, b"ix\x01").unwrap().unwrap();
        bytes[3] ^= 0xFF;
        raw.put(1, 5, b"ix\x01", bytes).unwrap();
        assert!(matches!(store.load(1, 5, &cfg, b"ix"), Err(QueryError::ChecksumMismatch)));
    }
}
