//! 落盘索引格式（写入端）
//!
//! ```text
//! version        (u8)               当前为 2
//! metadata       u16 len + bytes    或属性集合：u16 count × (string, u16 len + bytes)
//! virtual_count  (i32 LE)           version ≥ 2
//! total_count    (i32 LE)
//! item × total_count:
//!   item_id      u16 len + bytes    长度不可为 0
//!   tag_count    (u8)
//!   tag × tag_count:
//!     tag_hash   (i32 LE)
//!     value      u16 len + bytes
//! ```

use std::collections::BTreeMap;

use crate::codec::PrimitiveWriter;
use crate::common::{QueryError, Result};
use crate::comparer::{sort_items, ItemComparer};
use crate::config::IndexConfig;
use crate::item::{write_properties, ResultItem};
use crate::lookup::tag_hash_code;

pub const INDEX_FORMAT_VERSION: u8 = 2;

/// 待写入的一个索引
#[derive(Debug, Clone, Default)]
pub struct StoredIndex {
    pub metadata:            Option<Vec<u8>>,
    pub metadata_properties: Option<BTreeMap<String, Vec<u8>>>,
    pub virtual_count:       i32,
    pub items:               Vec<ResultItem>,
}

impl StoredIndex {
    pub fn new(items: Vec<ResultItem>) -> Self {
        Self { items, ..Default::default() }
    }
    pub fn with_metadata(mut self, metadata: Vec<u8>) -> Self {
        self.metadata = Some(metadata); self
    }
    pub fn with_metadata_property(mut self, name: &str, value: Vec<u8>) -> Self {
        self.metadata_properties.get_or_insert_with(BTreeMap::new).insert(name.into(), value); self
    }
    pub fn with_virtual_count(mut self, n: i32) -> Self {
        self.virtual_count = n; self
    }
}

/// 按索引配置排序、截断并编码
pub struct IndexWriter<'a> {
    config: &'a IndexConfig,
}

impl<'a> IndexWriter<'a> {
    pub fn new(config: &'a IndexConfig) -> Self { Self { config } }

    pub fn encode(&self, index: StoredIndex) -> Result<Vec<u8>> {
        let cmp = ItemComparer::new(self.config.primary_sort_info.clone());
        let mut items = sort_items(index.items, &cmp)?;
        if self.config.max_index_size > 0 {
            items.truncate(self.config.max_index_size as usize);
        }
        let total = i32::try_from(items.len())
            .map_err(|_| QueryError::InvalidData(format!("too many items: {}", items.len())))?;

        let mut w = PrimitiveWriter::new();
        w.write_u8(INDEX_FORMAT_VERSION)?;
        if self.config.metadata_property_collection {
            write_properties(&mut w, &index.metadata_properties.unwrap_or_default())?;
        } else {
            w.write_bytes(index.metadata.as_deref().unwrap_or_default())?;
        }
        w.write_i32(index.virtual_count.max(total))?;
        w.write_i32(total)?;

        for item in &items {
            if item.item_id.is_empty() {
                return Err(QueryError::InvalidData("invalid ItemId: empty".into()));
            }
            w.write_bytes(&item.item_id)?;
            let tag_count = u8::try_from(item.tags.len())
                .map_err(|_| QueryError::InvalidData(format!("too many tags: {}", item.tags.len())))?;
            w.write_u8(tag_count)?;
            for (name, value) in &item.tags {
                w.write_i32(tag_hash_code(name))?;
                w.write_bytes(value)?;
            }
        }
        Ok(w.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PrimitiveReader;
    use crate::field_type::{DataType, PrimarySortInfo, SortOrder};

    fn config() -> IndexConfig {
        IndexConfig::new("recent", 1, PrimarySortInfo::by_item_id(vec![SortOrder::desc(DataType::Int32)]))
            .with_max_index_size(2)
    }

    #[test]
    fn items_are_sorted_and_capped() {
        let items = [3i32, 9, 5].iter().map(|i| ResultItem::new(b"", &i.to_le_bytes())).collect();
        let data = IndexWriter::new(&config()).encode(StoredIndex::new(items).with_virtual_count(1)).unwrap();

        let mut r = PrimitiveReader::new(&data);
        assert_eq!(r.read_u8().unwrap(), INDEX_FORMAT_VERSION);
        assert!(r.read_bytes().unwrap().is_empty());
        // virtual count 不小于落盘条目数
        assert_eq!(r.read_i32().unwrap(), 2);
        assert_eq!(r.read_i32().unwrap(), 2);
        assert_eq!(r.read_bytes().unwrap(), 9i32.to_le_bytes());
        assert_eq!(r.read_u8().unwrap(), 0);
        assert_eq!(r.read_bytes().unwrap(), 5i32.to_le_bytes());
        assert_eq!(r.read_u8().unwrap(), 0);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn empty_item_id_is_rejected() {
        let items = vec![ResultItem::new(b"", b"")];
        assert!(matches!(
            IndexWriter::new(&config()).encode(StoredIndex::new(items)),
            Err(QueryError::InvalidData(_))
        ));
    }
}
