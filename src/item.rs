//! 结果条目与索引头

use std::collections::BTreeMap;

use crate::codec::{PrimitiveReader, PrimitiveWriter, Wire};
use crate::common::{is_item_id_field, IndexId, ItemId, Result};

/// 一个结果条目：所属索引、ItemId、按名称索引的标签
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultItem {
    pub index_id: IndexId,
    pub item_id:  ItemId,
    pub tags:     BTreeMap<String, Vec<u8>>,
}

impl ResultItem {
    pub fn new(index_id: &[u8], item_id: &[u8]) -> Self {
        Self { index_id: index_id.to_vec(), item_id: item_id.to_vec(), tags: BTreeMap::new() }
    }

    pub fn with_tag(mut self, name: &str, value: impl Into<Vec<u8>>) -> Self {
        self.tags.insert(name.into(), value.into()); self
    }

    pub fn tag(&self, name: &str) -> Option<&[u8]> {
        self.tags.get(name).map(Vec::as_slice)
    }

    /// 字段取值：非标签或保留名 `ItemId` 取 ItemId，否则取同名标签
    pub fn field_value(&self, field_name: &str, is_tag: bool) -> Option<&[u8]> {
        if !is_tag || is_item_id_field(field_name) {
            Some(&self.item_id)
        } else {
            self.tag(field_name)
        }
    }
}

impl Wire for ResultItem {
    fn write_to(&self, w: &mut PrimitiveWriter) -> Result<()> {
        w.write_bytes(&self.index_id)?;
        w.write_bytes(&self.item_id)?;
        w.write_count(self.tags.len())?;
        for (name, value) in &self.tags {
            w.write_string(name)?;
            w.write_bytes(value)?;
        }
        Ok(())
    }
    fn read_from(r: &mut PrimitiveReader<'_>) -> Result<Self> {
        let index_id = r.read_bytes()?;
        let item_id  = r.read_bytes()?;
        let n = r.read_count()?;
        let mut tags = BTreeMap::new();
        for _ in 0..n {
            let name = r.read_string()?;
            tags.insert(name, r.read_bytes()?);
        }
        Ok(Self { index_id, item_id, tags })
    }
}

// ── IndexHeader ───────────────────────────────────────────────────────────────

/// 每个索引随结果返回的头信息
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexHeader {
    pub metadata:            Option<Vec<u8>>,
    pub metadata_properties: Option<BTreeMap<String, Vec<u8>>>,
    pub virtual_count:       i32,
}

impl Wire for IndexHeader {
    fn write_to(&self, w: &mut PrimitiveWriter) -> Result<()> {
        w.write_opt_bytes(self.metadata.as_deref())?;
        w.write_bool(self.metadata_properties.is_some())?;
        if let Some(props) = &self.metadata_properties {
            write_properties(w, props)?;
        }
        w.write_i32(self.virtual_count)
    }
    fn read_from(r: &mut PrimitiveReader<'_>) -> Result<Self> {
        let metadata = r.read_opt_bytes()?;
        let metadata_properties = if r.read_bool()? { Some(read_properties(r)?) } else { None };
        Ok(Self { metadata, metadata_properties, virtual_count: r.read_i32()? })
    }
}

/// 元数据属性集合：`u16 个数` × `(名称, 值)`
pub fn write_properties(w: &mut PrimitiveWriter, props: &BTreeMap<String, Vec<u8>>) -> Result<()> {
    let n = u16::try_from(props.len()).map_err(|_| {
        crate::common::QueryError::InvalidData(format!("too many metadata properties: {}", props.len()))
    })?;
    w.write_u16(n)?;
    for (name, value) in props {
        w.write_string(name)?;
        w.write_bytes(value)?;
    }
    Ok(())
}

pub fn read_properties(r: &mut PrimitiveReader<'_>) -> Result<BTreeMap<String, Vec<u8>>> {
    let n = r.read_u16()?;
    let mut props = BTreeMap::new();
    for _ in 0..n {
        let name = r.read_string()?;
        props.insert(name, r.read_bytes()?);
    }
    Ok(props)
}
