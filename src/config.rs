//! 索引类型配置：每个类型下若干命名索引，各自的排序、标识标签与存储选项

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::codec::envelope::CompressionType;
use crate::common::{QueryError, Result, TagHash, TypeId};
use crate::field_type::PrimarySortInfo;
use crate::lookup::tag_hash_code;

// ── 单个索引 ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub index_name:               String,
    /// 拼接在 IndexId 之后构成存储键，区分同一 IndexId 下的不同索引
    pub extended_id_suffix:       u8,
    pub primary_sort_info:        PrimarySortInfo,
    /// 标签排序时用于判等的本地标识标签
    pub local_identity_tag_names: Vec<String>,
    /// 以字符串哈希落盘的标签
    pub string_hash_tags:         BTreeSet<String>,
    /// 落盘条目上限；0 表示不限
    pub max_index_size:           i32,
    /// 元数据以属性集合（而非裸字节）存储
    pub metadata_property_collection: bool,
    pub compression:              CompressionType,
}

impl IndexConfig {
    pub fn new(index_name: &str, extended_id_suffix: u8, primary_sort_info: PrimarySortInfo) -> Self {
        Self {
            index_name: index_name.into(),
            extended_id_suffix,
            primary_sort_info,
            local_identity_tag_names: vec![],
            string_hash_tags: BTreeSet::new(),
            max_index_size: 0,
            metadata_property_collection: false,
            compression: CompressionType::Lz4,
        }
    }

    pub fn with_local_identity(mut self, tags: &[&str]) -> Self {
        self.local_identity_tag_names = tags.iter().map(|t| t.to_string()).collect(); self
    }
    pub fn with_string_hash_tags(mut self, tags: &[&str]) -> Self {
        self.string_hash_tags = tags.iter().map(|t| t.to_string()).collect(); self
    }
    pub fn with_max_index_size(mut self, n: i32) -> Self {
        self.max_index_size = n; self
    }
    pub fn with_metadata_properties(mut self) -> Self {
        self.metadata_property_collection = true; self
    }
    pub fn with_compression(mut self, c: CompressionType) -> Self {
        self.compression = c; self
    }

    pub fn string_hash_codes(&self) -> HashSet<TagHash> {
        self.string_hash_tags.iter().map(|t| tag_hash_code(t)).collect()
    }

    /// 存储键：IndexId ++ 后缀字节
    pub fn extended_id(&self, index_id: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(index_id.len() + 1);
        key.extend_from_slice(index_id);
        key.push(self.extended_id_suffix);
        key
    }
}

// ── 类型映射 ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct IndexTypeMapping {
    pub type_id:   TypeId,
    pub type_name: String,
    indexes:       HashMap<String, IndexConfig>,
}

impl IndexTypeMapping {
    pub fn new(type_id: TypeId, type_name: &str) -> Self {
        Self { type_id, type_name: type_name.into(), indexes: HashMap::new() }
    }

    pub fn with_index(mut self, config: IndexConfig) -> Self {
        self.indexes.insert(config.index_name.clone(), config); self
    }

    pub fn index(&self, index_name: &str) -> Result<&IndexConfig> {
        self.indexes.get(index_name)
            .ok_or_else(|| QueryError::IndexConfigNotFound(self.type_id, index_name.into()))
    }

    pub fn indexes(&self) -> impl Iterator<Item = &IndexConfig> {
        self.indexes.values()
    }
}

#[derive(Debug, Clone, Default)]
pub struct IndexTypeMappingCollection {
    mappings: HashMap<TypeId, IndexTypeMapping>,
}

impl IndexTypeMappingCollection {
    pub fn new() -> Self { Self::default() }

    pub fn with_mapping(mut self, mapping: IndexTypeMapping) -> Self {
        self.mappings.insert(mapping.type_id, mapping); self
    }

    pub fn mapping(&self, type_id: TypeId) -> Result<&IndexTypeMapping> {
        self.mappings.get(&type_id)
            .ok_or_else(|| QueryError::IndexConfigNotFound(type_id, "<any>".into()))
    }

    pub fn index(&self, type_id: TypeId, index_name: &str) -> Result<&IndexConfig> {
        self.mapping(type_id)?.index(index_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_type::{DataType, SortOrder};

    #[test]
    fn lookup_by_type_and_name() {
        let cfg = IndexConfig::new("recent", 2, PrimarySortInfo::by_item_id(vec![SortOrder::desc(DataType::Int32)]))
            .with_max_index_size(100);
        let mappings = IndexTypeMappingCollection::new()
            .with_mapping(IndexTypeMapping::new(7, "Photos").with_index(cfg));
        assert_eq!(mappings.index(7, "recent").unwrap().max_index_size, 100);
        assert!(matches!(mappings.index(7, "nope"), Err(QueryError::IndexConfigNotFound(7, _))));
        assert!(mappings.index(8, "recent").is_err());
    }

    #[test]
    fn extended_id_appends_suffix() {
        let cfg = IndexConfig::new("x", 9, PrimarySortInfo::by_item_id(vec![SortOrder::asc(DataType::Byte)]));
        assert_eq!(cfg.extended_id(b"ab"), vec![b'a', b'b', 9]);
    }
}
