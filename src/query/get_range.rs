//! 单索引区间查询：排序后从第 offset 条起取 item_num 条

use crate::codec::{
    read_list, read_option, read_versioned, write_list, write_option, write_versioned,
    PrimitiveReader, PrimitiveWriter, Versioned,
};
use crate::common::{PrimaryId, QueryError, Result};
use crate::condition::IndexCondition;
use crate::field_type::TagSort;
use crate::filter::Filter;
use crate::item::{IndexHeader, ResultItem};

use super::IndexSelection;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GetRangeQuery {
    pub selection: IndexSelection,
    /// 从 1 开始
    pub offset:    i32,
    pub item_num:  i32,
}

impl GetRangeQuery {
    pub fn new(target_index_name: &str, index_id: &[u8], offset: i32, item_num: i32) -> Self {
        Self { selection: IndexSelection::new(target_index_name, index_id), offset, item_num }
    }

    pub fn with_filter(mut self, f: Filter) -> Self { self.selection.filter = Some(f); self }
    pub fn with_tag_sort(mut self, ts: TagSort) -> Self { self.selection.tag_sort = Some(ts); self }
    pub fn with_index_condition(mut self, c: IndexCondition) -> Self { self.selection.index_condition = Some(c); self }
    pub fn with_metadata(mut self) -> Self { self.selection.get_metadata = true; self }
    pub fn with_primary_id(mut self, id: PrimaryId) -> Self { self.selection.primary_id = Some(id); self }

    pub fn validate(&self) -> Result<()> {
        self.selection.validate()?;
        if self.offset < 1 || self.item_num < 1 {
            return Err(QueryError::InvalidQuery("offset and item_num must be positive".into()));
        }
        Ok(())
    }

    /// 解码到区间末尾即可
    pub fn max_extract_count(&self) -> i32 {
        (self.offset - 1).saturating_add(self.item_num)
    }

    pub fn take_range(&self, mut items: Vec<ResultItem>) -> Vec<ResultItem> {
        let start = ((self.offset.max(1) - 1) as usize).min(items.len());
        items.truncate(start.saturating_add(self.item_num.max(0) as usize));
        items.drain(..start);
        items
    }
}

#[derive(Debug, Clone, Copy)]
pub enum GetRangeQueryField { Selection, Offset, ItemNum }

impl Versioned for GetRangeQuery {
    type Field = GetRangeQueryField;
    const TYPE_NAME: &'static str = "GetRangeQuery";
    const CURRENT_VERSION: u8 = 1;
    const SCHEMA: &'static [(u8, GetRangeQueryField)] = &[
        (1, GetRangeQueryField::Selection),
        (1, GetRangeQueryField::Offset),
        (1, GetRangeQueryField::ItemNum),
    ];

    fn write_field(&self, field: GetRangeQueryField, w: &mut PrimitiveWriter) -> Result<()> {
        match field {
            GetRangeQueryField::Selection => write_versioned(&self.selection, IndexSelection::CURRENT_VERSION, w),
            GetRangeQueryField::Offset    => w.write_i32(self.offset),
            GetRangeQueryField::ItemNum   => w.write_i32(self.item_num),
        }
    }

    fn read_field(&mut self, field: GetRangeQueryField, r: &mut PrimitiveReader<'_>) -> Result<()> {
        match field {
            GetRangeQueryField::Selection => self.selection = read_versioned(r)?,
            GetRangeQueryField::Offset    => self.offset = r.read_i32()?,
            GetRangeQueryField::ItemNum   => self.item_num = r.read_i32()?,
        }
        Ok(())
    }
}

// ── 结果 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct GetRangeQueryResult {
    pub index_exists:   bool,
    /// 索引中的条目总数；索引不存在时为 -1
    pub index_size:     i32,
    pub result_items:   Vec<ResultItem>,
    pub exception_info: Option<String>,
    pub virtual_count:  i32,
    pub index_cap:      i32,
    pub header:         Option<IndexHeader>,
}

impl Default for GetRangeQueryResult {
    fn default() -> Self {
        Self {
            index_exists:   false,
            index_size:     -1,
            result_items:   vec![],
            exception_info: None,
            virtual_count:  -1,
            index_cap:      0,
            header:         None,
        }
    }
}

impl GetRangeQueryResult {
    pub fn failed(exception: String) -> Self {
        Self { exception_info: Some(exception), ..Default::default() }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum GetRangeResultField {
    IndexExists, IndexSize, ResultItems, ExceptionInfo,
    VirtualCount,
    IndexCap,
    Header,
}

impl Versioned for GetRangeQueryResult {
    type Field = GetRangeResultField;
    const TYPE_NAME: &'static str = "GetRangeQueryResult";
    const CURRENT_VERSION: u8 = 4;
    const SCHEMA: &'static [(u8, GetRangeResultField)] = &[
        (1, GetRangeResultField::IndexExists),
        (1, GetRangeResultField::IndexSize),
        (1, GetRangeResultField::ResultItems),
        (1, GetRangeResultField::ExceptionInfo),
        (2, GetRangeResultField::VirtualCount),
        (3, GetRangeResultField::IndexCap),
        (4, GetRangeResultField::Header),
    ];

    fn write_field(&self, field: GetRangeResultField, w: &mut PrimitiveWriter) -> Result<()> {
        match field {
            GetRangeResultField::IndexExists   => w.write_bool(self.index_exists),
            GetRangeResultField::IndexSize     => w.write_i32(self.index_size),
            GetRangeResultField::ResultItems   => write_list(w, &self.result_items),
            GetRangeResultField::ExceptionInfo => w.write_opt_string(self.exception_info.as_deref()),
            GetRangeResultField::VirtualCount  => w.write_i32(self.virtual_count),
            GetRangeResultField::IndexCap      => w.write_i32(self.index_cap),
            GetRangeResultField::Header        => write_option(w, self.header.as_ref()),
        }
    }

    fn read_field(&mut self, field: GetRangeResultField, r: &mut PrimitiveReader<'_>) -> Result<()> {
        match field {
            GetRangeResultField::IndexExists   => self.index_exists = r.read_bool()?,
            GetRangeResultField::IndexSize     => self.index_size = r.read_i32()?,
            GetRangeResultField::ResultItems   => self.result_items = read_list(r)?,
            GetRangeResultField::ExceptionInfo => self.exception_info = r.read_opt_string()?,
            GetRangeResultField::VirtualCount  => self.virtual_count = r.read_i32()?,
            GetRangeResultField::IndexCap      => self.index_cap = r.read_i32()?,
            GetRangeResultField::Header        => self.header = read_option(r)?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{deserialize, serialize};

    fn items(n: u8) -> Vec<ResultItem> { (0..n).map(|i| ResultItem::new(b"ix", &[i])).collect() }

    #[test]
    fn range_is_clipped_to_items() {
        let q = GetRangeQuery::new("recent", b"ix", 3, 4);
        assert_eq!(q.max_extract_count(), 6);
        let got: Vec<u8> = q.take_range(items(10)).iter().map(|i| i.item_id[0]).collect();
        assert_eq!(got, vec![2, 3, 4, 5]);
        assert_eq!(q.take_range(items(4)).len(), 2);
        assert!(q.take_range(items(2)).is_empty());
    }

    #[test]
    fn non_positive_range_is_rejected() {
        assert!(GetRangeQuery::new("recent", b"ix", 0, 4).validate().is_err());
        assert!(GetRangeQuery::new("recent", b"ix", 1, 0).validate().is_err());
        assert!(GetRangeQuery::new("recent", b"ix", 1, 1).validate().is_ok());
    }

    #[test]
    fn query_survives_the_wire() {
        let q = GetRangeQuery::new("recent", b"ix", 2, 5).with_primary_id(12);
        let back: GetRangeQuery = deserialize(&serialize(&q).unwrap()).unwrap();
        assert_eq!(back, q);
    }
}
