//! 多索引区间查询
//!
//! 过滤、边界、配额、分组与合并都与 [`PagedIndexQuery`] 相同，只是返回窗口
//! 由 `(offset, span)` 给出而不是页号。内层查询的分页字段不参与处理。

use crate::assembler::{self, ResultWindow};
use crate::codec::{read_versioned, write_versioned, PrimitiveReader, PrimitiveWriter, Versioned};
use crate::common::{IndexId, PartitionId, PrimaryId, QueryError, Result};
use crate::merge;
use crate::partitioner::{PartitionGroup, SplitInfo, SplittableQuery};

use super::paged::{PagedIndexQuery, PagedIndexQueryResult};

/// 区间查询与分页查询共用结果类型
pub type SpanQueryResult = PagedIndexQueryResult;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpanQuery {
    pub query:  PagedIndexQuery,
    /// 从 1 开始；`span` 为 0 时忽略
    pub offset: i32,
    /// 0 表示返回全部
    pub span:   i32,
}

impl SpanQuery {
    pub fn new(target_index_name: &str, index_id_list: Vec<IndexId>, offset: i32, span: i32) -> Self {
        Self::from_query(PagedIndexQuery::new(target_index_name, index_id_list), offset, span)
    }

    /// 沿用一个已构造好的查询的条件，清掉它的分页字段
    pub fn from_query(query: PagedIndexQuery, offset: i32, span: i32) -> Self {
        Self { query: query.with_page(0, 0), offset, span }
    }

    pub fn validate(&self) -> Result<()> {
        if self.span < 0 {
            return Err(QueryError::InvalidQuery(format!("negative span {}", self.span)));
        }
        if self.offset < 1 && self.span != 0 {
            return Err(QueryError::InvalidQuery("offset must be positive unless span is 0".into()));
        }
        Ok(())
    }

    pub fn window(&self) -> ResultWindow { ResultWindow::span(self.offset, self.span) }

    pub fn merge_results(&self, partials: Vec<Option<SpanQueryResult>>) -> Result<SpanQueryResult> {
        self.validate()?;
        let window = self.window();
        let partial_count = partials.len();
        let merged = merge::aggregate_paged(
            partials,
            window.max_merge_count() as usize,
            self.query.get_pageable_item_count,
        )?;
        Ok(assembler::finalize_paged(&self.query, window, merged, partial_count))
    }
}

impl SplittableQuery for SpanQuery {
    fn index_ids(&self) -> &[IndexId] { self.query.index_ids() }
    fn primary_ids(&self) -> Option<&[PrimaryId]> { self.query.primary_ids() }
    fn partition(&self) -> Option<PartitionId> { self.query.partition() }

    fn sub_query(&self, group: &PartitionGroup, info: &SplitInfo) -> Self {
        Self { query: self.query.sub_query(group, info), offset: self.offset, span: self.span }
    }

    fn exclude_data(&mut self) { self.query.exclude_data(); }
}

#[derive(Debug, Clone, Copy)]
pub enum SpanQueryField { Query, Offset, Span }

impl Versioned for SpanQuery {
    type Field = SpanQueryField;
    const TYPE_NAME: &'static str = "SpanQuery";
    const CURRENT_VERSION: u8 = 1;
    const SCHEMA: &'static [(u8, SpanQueryField)] = &[
        (1, SpanQueryField::Query),
        (1, SpanQueryField::Offset),
        (1, SpanQueryField::Span),
    ];

    fn write_field(&self, field: SpanQueryField, w: &mut PrimitiveWriter) -> Result<()> {
        match field {
            SpanQueryField::Query  => write_versioned(&self.query, PagedIndexQuery::CURRENT_VERSION, w),
            SpanQueryField::Offset => w.write_i32(self.offset),
            SpanQueryField::Span   => w.write_i32(self.span),
        }
    }

    fn read_field(&mut self, field: SpanQueryField, r: &mut PrimitiveReader<'_>) -> Result<()> {
        match field {
            SpanQueryField::Query  => self.query = read_versioned(r)?,
            SpanQueryField::Offset => self.offset = r.read_i32()?,
            SpanQueryField::Span   => self.span = r.read_i32()?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{deserialize, serialize};
    use crate::partitioner::split;

    fn ids(v: &[i32]) -> Vec<IndexId> { v.iter().map(|i| i.to_le_bytes().to_vec()).collect() }

    #[test]
    fn offset_rules() {
        assert!(SpanQuery::new("x", ids(&[1]), 0, 0).validate().is_ok());
        assert!(SpanQuery::new("x", ids(&[1]), 0, 3).validate().is_err());
        assert!(SpanQuery::new("x", ids(&[1]), 2, -1).validate().is_err());
        assert_eq!(SpanQuery::new("x", ids(&[1]), 4, 5).window().max_merge_count(), 8);
    }

    #[test]
    fn from_query_clears_paging() {
        let s = SpanQuery::from_query(PagedIndexQuery::new("x", ids(&[1])).with_page(3, 10), 2, 2);
        assert_eq!((s.query.page_num, s.query.page_size), (0, 0));
    }

    #[test]
    fn split_keeps_window_and_flags_client_side() {
        let s = SpanQuery::new("x", ids(&[1, 2, 3]), 2, 3);
        let subs = split(&s, 2).unwrap();
        assert_eq!(subs.len(), 2);
        assert!(subs.iter().all(|q| q.offset == 2 && q.span == 3 && q.query.client_side_paging));

        let mut sub = subs[0].clone();
        sub.query.num_partitions = 1;
        sub.query.partition = None;
        let mut back: SpanQuery = deserialize(&serialize(&sub).unwrap()).unwrap();
        back.query.num_partitions = 1;
        assert_eq!(back, sub);
    }
}
