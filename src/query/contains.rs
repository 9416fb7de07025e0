//! 多索引包含查询：给定一组 ItemId，判断各索引中存在哪些

use std::collections::BTreeMap;

use crate::codec::{
    read_byte_list, read_list, read_option, write_byte_list, write_list, write_option,
    PrimitiveReader, PrimitiveWriter, Versioned, Wire,
};
use crate::common::{IndexId, ItemId, PartitionId, PrimaryId, Result};
use crate::filter::Filter;
use crate::item::{IndexHeader, ResultItem};
use crate::merge;
use crate::partitioner::{PartitionGroup, SplitInfo, SplittableQuery};

use super::{
    primary_id_at, read_params_map, read_primary_ids, write_params_map, write_primary_ids,
    EffectiveIndexParams, IndexIdParams,
};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContainsQuery {
    pub target_index_name: String,
    pub index_id_list:     Vec<IndexId>,
    /// 在每个索引中查找的条目
    pub item_ids:          Vec<ItemId>,
    pub exclude_data:      bool,
    pub get_index_header:  bool,
    pub primary_id_list:   Option<Vec<PrimaryId>>,
    pub filter:            Option<Filter>,
    pub index_id_params:   BTreeMap<IndexId, IndexIdParams>,

    pub partition:         Option<PartitionId>,
}

impl ContainsQuery {
    pub fn new(target_index_name: &str, index_id_list: Vec<IndexId>, item_ids: Vec<ItemId>) -> Self {
        Self { target_index_name: target_index_name.into(), index_id_list, item_ids, ..Default::default() }
    }

    pub fn with_filter(mut self, f: Filter) -> Self { self.filter = Some(f); self }
    pub fn with_index_header(mut self) -> Self { self.get_index_header = true; self }
    pub fn with_primary_ids(mut self, ids: Vec<PrimaryId>) -> Self { self.primary_id_list = Some(ids); self }
    pub fn with_index_params(mut self, index_id: &[u8], p: IndexIdParams) -> Self {
        self.index_id_params.insert(index_id.to_vec(), p); self
    }

    pub fn resolve_params(&self, index_id: &[u8]) -> EffectiveIndexParams {
        EffectiveIndexParams::resolve(self.index_id_params.get(index_id), 0, self.filter.as_ref())
    }

    pub fn primary_id_at(&self, pos: usize) -> PrimaryId {
        primary_id_at(&self.index_id_list, self.primary_id_list.as_deref(), pos)
    }

    pub fn merge_results(&self, partials: Vec<Option<ContainsQueryResult>>) -> ContainsQueryResult {
        merge::aggregate_contains(partials)
    }
}

impl SplittableQuery for ContainsQuery {
    fn index_ids(&self) -> &[IndexId] { &self.index_id_list }
    fn primary_ids(&self) -> Option<&[PrimaryId]> { self.primary_id_list.as_deref() }
    fn partition(&self) -> Option<PartitionId> { self.partition }

    fn sub_query(&self, group: &PartitionGroup, _info: &SplitInfo) -> Self {
        let index_id_params = group.index_ids.iter()
            .map(|id| (id.clone(), self.resolve_params(id).into_params()))
            .collect();
        Self {
            index_id_list:   group.index_ids.clone(),
            primary_id_list: group.primary_ids.clone(),
            index_id_params,
            partition:       Some(group.partition),
            ..self.clone()
        }
    }

    fn exclude_data(&mut self) { self.exclude_data = true; }
}

#[derive(Debug, Clone, Copy)]
pub enum ContainsQueryField {
    TargetIndexName, IndexIdList, ItemIds, ExcludeData, GetIndexHeader, PrimaryIdList,
    Filter, IndexIdParams,
}

impl Versioned for ContainsQuery {
    type Field = ContainsQueryField;
    const TYPE_NAME: &'static str = "ContainsQuery";
    const CURRENT_VERSION: u8 = 2;
    const SCHEMA: &'static [(u8, ContainsQueryField)] = &[
        (1, ContainsQueryField::TargetIndexName),
        (1, ContainsQueryField::IndexIdList),
        (1, ContainsQueryField::ItemIds),
        (1, ContainsQueryField::ExcludeData),
        (1, ContainsQueryField::GetIndexHeader),
        (1, ContainsQueryField::PrimaryIdList),
        (2, ContainsQueryField::Filter),
        (2, ContainsQueryField::IndexIdParams),
    ];

    fn write_field(&self, field: ContainsQueryField, w: &mut PrimitiveWriter) -> Result<()> {
        match field {
            ContainsQueryField::TargetIndexName => w.write_string(&self.target_index_name),
            ContainsQueryField::IndexIdList     => write_byte_list(w, &self.index_id_list),
            ContainsQueryField::ItemIds         => write_byte_list(w, &self.item_ids),
            ContainsQueryField::ExcludeData     => w.write_bool(self.exclude_data),
            ContainsQueryField::GetIndexHeader  => w.write_bool(self.get_index_header),
            ContainsQueryField::PrimaryIdList   => write_primary_ids(w, self.primary_id_list.as_deref()),
            ContainsQueryField::Filter          => write_option(w, self.filter.as_ref()),
            ContainsQueryField::IndexIdParams   => write_params_map(w, &self.index_id_params),
        }
    }

    fn read_field(&mut self, field: ContainsQueryField, r: &mut PrimitiveReader<'_>) -> Result<()> {
        match field {
            ContainsQueryField::TargetIndexName => self.target_index_name = r.read_string()?,
            ContainsQueryField::IndexIdList     => self.index_id_list = read_byte_list(r)?,
            ContainsQueryField::ItemIds         => self.item_ids = read_byte_list(r)?,
            ContainsQueryField::ExcludeData     => self.exclude_data = r.read_bool()?,
            ContainsQueryField::GetIndexHeader  => self.get_index_header = r.read_bool()?,
            ContainsQueryField::PrimaryIdList   => self.primary_id_list = read_primary_ids(r)?,
            ContainsQueryField::Filter          => self.filter = read_option(r)?,
            ContainsQueryField::IndexIdParams   => self.index_id_params = read_params_map(r)?,
        }
        Ok(())
    }
}

// ── 结果 ──────────────────────────────────────────────────────────────────────

/// 单个索引的判定结果
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContainsIndexResult {
    pub index_id:     IndexId,
    pub index_exists: bool,
    /// 索引中的条目总数
    pub index_size:   i32,
    pub index_cap:    i32,
    /// 请求的 ItemId 中存在且通过过滤的条目
    pub items:        Vec<ResultItem>,
    pub header:       Option<IndexHeader>,
}

impl ContainsIndexResult {
    pub fn missing(index_id: &[u8]) -> Self {
        Self { index_id: index_id.to_vec(), ..Default::default() }
    }

    pub fn contains(&self, item_id: &[u8]) -> bool {
        self.items.iter().any(|i| i.item_id == item_id)
    }
}

impl Wire for ContainsIndexResult {
    fn write_to(&self, w: &mut PrimitiveWriter) -> Result<()> {
        w.write_bytes(&self.index_id)?;
        w.write_bool(self.index_exists)?;
        w.write_i32(self.index_size)?;
        w.write_i32(self.index_cap)?;
        write_list(w, &self.items)?;
        write_option(w, self.header.as_ref())
    }
    fn read_from(r: &mut PrimitiveReader<'_>) -> Result<Self> {
        Ok(Self {
            index_id:     r.read_bytes()?,
            index_exists: r.read_bool()?,
            index_size:   r.read_i32()?,
            index_cap:    r.read_i32()?,
            items:        read_list(r)?,
            header:       read_option(r)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContainsQueryResult {
    pub entries:        Vec<ContainsIndexResult>,
    pub exception_info: Option<String>,
}

impl ContainsQueryResult {
    pub fn failed(exception: String) -> Self {
        Self { exception_info: Some(exception), ..Default::default() }
    }

    pub fn entry(&self, index_id: &[u8]) -> Option<&ContainsIndexResult> {
        self.entries.iter().find(|e| e.index_id == index_id)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ContainsResultField { Entries, ExceptionInfo }

impl Versioned for ContainsQueryResult {
    type Field = ContainsResultField;
    const TYPE_NAME: &'static str = "ContainsQueryResult";
    const CURRENT_VERSION: u8 = 1;
    const SCHEMA: &'static [(u8, ContainsResultField)] = &[
        (1, ContainsResultField::Entries),
        (1, ContainsResultField::ExceptionInfo),
    ];

    fn write_field(&self, field: ContainsResultField, w: &mut PrimitiveWriter) -> Result<()> {
        match field {
            ContainsResultField::Entries       => write_list(w, &self.entries),
            ContainsResultField::ExceptionInfo => w.write_opt_string(self.exception_info.as_deref()),
        }
    }

    fn read_field(&mut self, field: ContainsResultField, r: &mut PrimitiveReader<'_>) -> Result<()> {
        match field {
            ContainsResultField::Entries       => self.entries = read_list(r)?,
            ContainsResultField::ExceptionInfo => self.exception_info = r.read_opt_string()?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{deserialize, serialize};
    use crate::partitioner::split;

    #[test]
    fn merge_concatenates_partials() {
        let q = ContainsQuery::new("inbox", vec![b"a".to_vec(), b"b".to_vec()], vec![b"m1".to_vec()]);
        let a = ContainsQueryResult {
            entries: vec![ContainsIndexResult { index_exists: true, ..ContainsIndexResult::missing(b"a") }],
            exception_info: None,
        };
        let b = ContainsQueryResult {
            entries: vec![ContainsIndexResult::missing(b"b")],
            exception_info: Some("b slow".into()),
        };
        let out = q.merge_results(vec![Some(a), None, Some(b)]);
        assert_eq!(out.entries.len(), 2);
        assert!(out.entry(b"a").unwrap().index_exists);
        assert!(!out.entry(b"b").unwrap().index_exists);
        assert_eq!(out.exception_info.as_deref(), Some("b slow "));
    }

    #[test]
    fn sub_queries_keep_item_ids() {
        let q = ContainsQuery::new("inbox", vec![vec![1], vec![2]], vec![b"m1".to_vec(), b"m2".to_vec()]);
        let subs = split(&q, 2).unwrap();
        assert_eq!(subs.len(), 2);
        assert!(subs.iter().all(|s| s.item_ids == q.item_ids));
    }

    #[test]
    fn result_round_trips() {
        let r = ContainsQueryResult {
            entries: vec![ContainsIndexResult {
                index_exists: true,
                index_size:   3,
                items:        vec![ResultItem::new(b"a", b"m1").with_tag("k", vec![1])],
                header:       Some(IndexHeader { virtual_count: 3, ..Default::default() }),
                ..ContainsIndexResult::missing(b"a")
            }],
            exception_info: None,
        };
        let back: ContainsQueryResult = deserialize(&serialize(&r).unwrap()).unwrap();
        assert_eq!(back, r);
    }
}
