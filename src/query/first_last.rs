//! 单索引首尾页查询：一次取回排序后的前 N 条和后 M 条

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
pub struct FirstLastQuery {
    pub selection:       IndexSelection,
    pub first_page_size: i32,
    pub last_page_size:  i32,
}

impl FirstLastQuery {
    pub fn new(target_index_name: &str, index_id: &[u8], first_page_size: i32, last_page_size: i32) -> Self {
        Self { selection: IndexSelection::new(target_index_name, index_id), first_page_size, last_page_size }
    }

    pub fn with_filter(mut self, f: Filter) -> Self { self.selection.filter = Some(f); self }
    pub fn with_tag_sort(mut self, ts: TagSort) -> Self { self.selection.tag_sort = Some(ts); self }
    pub fn with_index_condition(mut self, c: IndexCondition) -> Self { self.selection.index_condition = Some(c); self }
    pub fn with_metadata(mut self) -> Self { self.selection.get_metadata = true; self }
    pub fn with_primary_id(mut self, id: PrimaryId) -> Self { self.selection.primary_id = Some(id); self }

    pub fn validate(&self) -> Result<()> {
        self.selection.validate()?;
        if self.first_page_size < 1 && self.last_page_size < 1 {
            return Err(QueryError::InvalidQuery("first or last page size must be positive".into()));
        }
        Ok(())
    }

    /// 只要首页时解码可以提前截断；要尾页则必须读完整个索引
    pub fn max_extract_count(&self) -> i32 {
        if self.first_page_size > 0 && self.last_page_size < 1 { self.first_page_size } else { 0 }
    }

    /// 首尾两页重叠时全部放进首页
    pub fn split_pages(&self, mut items: Vec<ResultItem>) -> (Vec<ResultItem>, Vec<ResultItem>) {
        let first = self.first_page_size.max(0) as usize;
        let last = self.last_page_size.max(0) as usize;
        if first + last <= items.len() {
            let tail = items.split_off(items.len() - last);
            items.truncate(first);
            (items, tail)
        } else {
            (items, vec![])
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FirstLastQueryField { Selection, FirstPageSize, LastPageSize }

impl Versioned for FirstLastQuery {
    type Field = FirstLastQueryField;
    const TYPE_NAME: &'static str = "FirstLastQuery";
    const CURRENT_VERSION: u8 = 1;
    const SCHEMA: &'static [(u8, FirstLastQueryField)] = &[
        (1, FirstLastQueryField::Selection),
        (1, FirstLastQueryField::FirstPageSize),
        (1, FirstLastQueryField::LastPageSize),
    ];

    fn write_field(&self, field: FirstLastQueryField, w: &mut PrimitiveWriter) -> Result<()> {
        match field {
            FirstLastQueryField::Selection     => write_versioned(&self.selection, IndexSelection::CURRENT_VERSION, w),
            FirstLastQueryField::FirstPageSize => w.write_i32(self.first_page_size),
            FirstLastQueryField::LastPageSize  => w.write_i32(self.last_page_size),
        }
    }

    fn read_field(&mut self, field: FirstLastQueryField, r: &mut PrimitiveReader<'_>) -> Result<()> {
        match field {
            FirstLastQueryField::Selection     => self.selection = read_versioned(r)?,
            FirstLastQueryField::FirstPageSize => self.first_page_size = r.read_i32()?,
            FirstLastQueryField::LastPageSize  => self.last_page_size = r.read_i32()?,
        }
        Ok(())
    }
}

// ── 结果 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct FirstLastQueryResult {
    pub index_exists:    bool,
    /// 索引中的条目总数；索引不存在时为 -1
    pub index_size:      i32,
    pub first_page:      Vec<ResultItem>,
    pub last_page:       Vec<ResultItem>,
    pub exception_info:  Option<String>,
    pub virtual_count:   i32,
    pub index_cap:       i32,
    pub header:          Option<IndexHeader>,
}

impl Default for FirstLastQueryResult {
    fn default() -> Self {
        Self {
            index_exists:   false,
            index_size:     -1,
            first_page:     vec![],
            last_page:      vec![],
            exception_info: None,
            virtual_count:  -1,
            index_cap:      0,
            header:         None,
        }
    }
}

impl FirstLastQueryResult {
    pub fn failed(exception: String) -> Self {
        Self { exception_info: Some(exception), ..Default::default() }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FirstLastResultField {
    IndexExists, IndexSize, FirstPage, LastPage, ExceptionInfo,
    VirtualCount,
    IndexCap,
    Header,
}

impl Versioned for FirstLastQueryResult {
    type Field = FirstLastResultField;
    const TYPE_NAME: &'static str = "FirstLastQueryResult";
    const CURRENT_VERSION: u8 = 4;
    const SCHEMA: &'static [(u8, FirstLastResultField)] = &[
        (1, FirstLastResultField::IndexExists),
        (1, FirstLastResultField::IndexSize),
        (1, FirstLastResultField::FirstPage),
        (1, FirstLastResultField::LastPage),
        (1, FirstLastResultField::ExceptionInfo),
        (2, FirstLastResultField::VirtualCount),
        (3, FirstLastResultField::IndexCap),
        (4, FirstLastResultField::Header),
    ];

    fn write_field(&self, field: FirstLastResultField, w: &mut PrimitiveWriter) -> Result<()> {
        match field {
            FirstLastResultField::IndexExists   => w.write_bool(self.index_exists),
            FirstLastResultField::IndexSize     => w.write_i32(self.index_size),
            FirstLastResultField::FirstPage     => write_list(w, &self.first_page),
            FirstLastResultField::LastPage      => write_list(w, &self.last_page),
            FirstLastResultField::ExceptionInfo => w.write_opt_string(self.exception_info.as_deref()),
            FirstLastResultField::VirtualCount  => w.write_i32(self.virtual_count),
            FirstLastResultField::IndexCap      => w.write_i32(self.index_cap),
            FirstLastResultField::Header        => write_option(w, self.header.as_ref()),
        }
    }

    fn read_field(&mut self, field: FirstLastResultField, r: &mut PrimitiveReader<'_>) -> Result<()> {
        match field {
            FirstLastResultField::IndexExists   => self.index_exists = r.read_bool()?,
            FirstLastResultField::IndexSize     => self.index_size = r.read_i32()?,
            FirstLastResultField::FirstPage     => self.first_page = read_list(r)?,
            FirstLastResultField::LastPage      => self.last_page = read_list(r)?,
            FirstLastResultField::ExceptionInfo => self.exception_info = r.read_opt_string()?,
            FirstLastResultField::VirtualCount  => self.virtual_count = r.read_i32()?,
            FirstLastResultField::IndexCap      => self.index_cap = r.read_i32()?,
            FirstLastResultField::Header        => self.header = read_option(r)?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{deserialize, serialize, serialize_at};

    fn items(n: u8) -> Vec<ResultItem> { (0..n).map(|i| ResultItem::new(b"ix", &[i])).collect() }

    fn ids(items: &[ResultItem]) -> Vec<u8> { items.iter().map(|i| i.item_id[0]).collect() }

    #[test]
    fn pages_split_or_collapse() {
        let q = FirstLastQuery::new("recent", b"ix", 2, 3);
        let (first, last) = q.split_pages(items(10));
        assert_eq!((ids(&first), ids(&last)), (vec![0, 1], vec![7, 8, 9]));

        let (first, last) = q.split_pages(items(4));
        assert_eq!(ids(&first), vec![0, 1, 2, 3]);
        assert!(last.is_empty());

        let only_last = FirstLastQuery::new("recent", b"ix", 0, 2);
        assert_eq!(ids(&only_last.split_pages(items(5)).1), vec![3, 4]);
    }

    #[test]
    fn extract_limit_only_for_first_page() {
        assert_eq!(FirstLastQuery::new("r", b"ix", 5, 0).max_extract_count(), 5);
        assert_eq!(FirstLastQuery::new("r", b"ix", 5, 1).max_extract_count(), 0);
        assert!(FirstLastQuery::new("r", b"ix", 0, 0).validate().is_err());
        assert!(FirstLastQuery::new("r", b"", 1, 0).validate().is_err());
    }

    #[test]
    fn query_and_result_survive_the_wire() {
        let q = FirstLastQuery::new("recent", b"ix", 2, 1).with_metadata().with_primary_id(77);
        let back: FirstLastQuery = deserialize(&serialize(&q).unwrap()).unwrap();
        assert_eq!(back, q);
        assert_eq!(back.selection.primary_id(), 77);

        let r = FirstLastQueryResult {
            index_exists: true,
            index_size:   3,
            first_page:   items(2),
            index_cap:    50,
            header:       Some(IndexHeader { virtual_count: 9, ..Default::default() }),
            ..Default::default()
        };
        let v2: FirstLastQueryResult = deserialize(&serialize_at(&r, 2).unwrap()).unwrap();
        assert_eq!(v2.index_cap, 0);
        assert!(v2.header.is_none());
        assert_eq!(ids(&v2.first_page), vec![0, 1]);
        let cur: FirstLastQueryResult = deserialize(&serialize(&r).unwrap()).unwrap();
        assert_eq!(cur, r);
    }
}
