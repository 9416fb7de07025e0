//! 多索引交集查询

use std::collections::BTreeMap;

use crate::codec::{
    read_byte_list, read_list, read_option, read_opt_versioned, write_byte_list, write_list,
    write_option, write_opt_versioned, PrimitiveReader, PrimitiveWriter, Versioned,
};
use crate::common::{IndexId, PartitionId, PrimaryId, Result};
use crate::condition::IndexCondition;
use crate::field_type::{PrimarySortInfo, SortOrder};
use crate::filter::Filter;
use crate::group::{read_strings, write_strings};
use crate::item::ResultItem;
use crate::merge;
use crate::partitioner::{PartitionGroup, SplitInfo, SplittableQuery};

use super::{
    primary_id_at, read_headers, read_params_map, read_primary_ids, write_headers,
    write_params_map, write_primary_ids, EffectiveIndexParams, IndexHeaders, IndexIdParams,
};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IntersectionQuery {
    pub target_index_name:      String,
    pub index_id_list:          Vec<IndexId>,
    pub exclude_data:           bool,
    pub get_index_header:       bool,
    pub primary_id_list:        Option<Vec<PrimaryId>>,
    pub filter:                 Option<Filter>,
    pub index_id_params:        BTreeMap<IndexId, IndexIdParams>,
    /// 全局上限；0 表示不限。只在最后一轮两两求交时生效
    pub max_result_items:       i32,
    pub is_single_cluster_query: bool,
    pub index_condition:        Option<IndexCondition>,

    // 路由信息，不上线
    pub partition:              Option<PartitionId>,
}

impl IntersectionQuery {
    pub fn new(target_index_name: &str, index_id_list: Vec<IndexId>) -> Self {
        Self { target_index_name: target_index_name.into(), index_id_list, ..Default::default() }
    }

    pub fn with_max_result_items(mut self, n: i32) -> Self { self.max_result_items = n; self }
    pub fn with_filter(mut self, f: Filter) -> Self { self.filter = Some(f); self }
    pub fn with_index_condition(mut self, c: IndexCondition) -> Self { self.index_condition = Some(c); self }
    pub fn with_index_header(mut self) -> Self { self.get_index_header = true; self }
    pub fn with_primary_ids(mut self, ids: Vec<PrimaryId>) -> Self { self.primary_id_list = Some(ids); self }
    pub fn with_index_params(mut self, index_id: &[u8], p: IndexIdParams) -> Self {
        self.index_id_params.insert(index_id.to_vec(), p); self
    }

    /// 交集不截断单个索引，max_items 恒为 0
    pub fn resolve_params(&self, index_id: &[u8]) -> EffectiveIndexParams {
        EffectiveIndexParams::resolve(self.index_id_params.get(index_id), 0, self.filter.as_ref())
    }

    pub fn primary_id_at(&self, pos: usize) -> PrimaryId {
        primary_id_at(&self.index_id_list, self.primary_id_list.as_deref(), pos)
    }

    pub fn merge_results(&self, partials: Vec<Option<IntersectionQueryResult>>) -> Result<IntersectionQueryResult> {
        merge::aggregate_intersection(partials, self.max_result_items)
    }
}

impl SplittableQuery for IntersectionQuery {
    fn index_ids(&self) -> &[IndexId] { &self.index_id_list }
    fn primary_ids(&self) -> Option<&[PrimaryId]> { self.primary_id_list.as_deref() }
    fn partition(&self) -> Option<PartitionId> { self.partition }

    fn sub_query(&self, group: &PartitionGroup, info: &SplitInfo) -> Self {
        let index_id_params = group.index_ids.iter()
            .map(|id| (id.clone(), self.resolve_params(id).into_params()))
            .collect();
        Self {
            index_id_list:           group.index_ids.clone(),
            primary_id_list:         group.primary_ids.clone(),
            index_id_params,
            is_single_cluster_query: info.used_partitions == 1,
            partition:               Some(group.partition),
            ..self.clone()
        }
    }

    fn exclude_data(&mut self) { self.exclude_data = true; }
}

#[derive(Debug, Clone, Copy)]
pub enum IntersectionQueryField {
    TargetIndexName, IndexIdList, ExcludeData, GetIndexHeader,
    PrimaryIdList, Filter, IndexIdParams,
    MaxResultItems, IsSingleClusterQuery,
    IndexCondition,
}

impl Versioned for IntersectionQuery {
    type Field = IntersectionQueryField;
    const TYPE_NAME: &'static str = "IntersectionQuery";
    const CURRENT_VERSION: u8 = 4;
    const SCHEMA: &'static [(u8, IntersectionQueryField)] = &[
        (1, IntersectionQueryField::TargetIndexName),
        (1, IntersectionQueryField::IndexIdList),
        (1, IntersectionQueryField::ExcludeData),
        (1, IntersectionQueryField::GetIndexHeader),
        (2, IntersectionQueryField::PrimaryIdList),
        (2, IntersectionQueryField::Filter),
        (2, IntersectionQueryField::IndexIdParams),
        (3, IntersectionQueryField::MaxResultItems),
        (3, IntersectionQueryField::IsSingleClusterQuery),
        (4, IntersectionQueryField::IndexCondition),
    ];

    fn write_field(&self, field: IntersectionQueryField, w: &mut PrimitiveWriter) -> Result<()> {
        match field {
            IntersectionQueryField::TargetIndexName      => w.write_string(&self.target_index_name),
            IntersectionQueryField::IndexIdList          => write_byte_list(w, &self.index_id_list),
            IntersectionQueryField::ExcludeData          => w.write_bool(self.exclude_data),
            IntersectionQueryField::GetIndexHeader       => w.write_bool(self.get_index_header),
            IntersectionQueryField::PrimaryIdList        => write_primary_ids(w, self.primary_id_list.as_deref()),
            IntersectionQueryField::Filter               => write_option(w, self.filter.as_ref()),
            IntersectionQueryField::IndexIdParams        => write_params_map(w, &self.index_id_params),
            IntersectionQueryField::MaxResultItems       => w.write_i32(self.max_result_items),
            IntersectionQueryField::IsSingleClusterQuery => w.write_bool(self.is_single_cluster_query),
            IntersectionQueryField::IndexCondition       => write_opt_versioned(w, self.index_condition.as_ref()),
        }
    }

    fn read_field(&mut self, field: IntersectionQueryField, r: &mut PrimitiveReader<'_>) -> Result<()> {
        match field {
            IntersectionQueryField::TargetIndexName      => self.target_index_name = r.read_string()?,
            IntersectionQueryField::IndexIdList          => self.index_id_list = read_byte_list(r)?,
            IntersectionQueryField::ExcludeData          => self.exclude_data = r.read_bool()?,
            IntersectionQueryField::GetIndexHeader       => self.get_index_header = r.read_bool()?,
            IntersectionQueryField::PrimaryIdList        => self.primary_id_list = read_primary_ids(r)?,
            IntersectionQueryField::Filter               => self.filter = read_option(r)?,
            IntersectionQueryField::IndexIdParams        => self.index_id_params = read_params_map(r)?,
            IntersectionQueryField::MaxResultItems       => self.max_result_items = r.read_i32()?,
            IntersectionQueryField::IsSingleClusterQuery => self.is_single_cluster_query = r.read_bool()?,
            IntersectionQueryField::IndexCondition       => self.index_condition = read_opt_versioned(r)?,
        }
        Ok(())
    }
}

// ── IntersectionQueryResult ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IntersectionQueryResult {
    pub result_items:             Vec<ResultItem>,
    pub index_headers:            Option<IndexHeaders>,
    pub is_tag_primary_sort:      bool,
    pub sort_field_name:          String,
    pub sort_orders:              Vec<SortOrder>,
    pub local_identity_tag_names: Vec<String>,
    pub exception_info:           Option<String>,
}

impl IntersectionQueryResult {
    pub fn failed(exception: String) -> Self {
        Self { exception_info: Some(exception), ..Default::default() }
    }

    pub fn set_sort_info(&mut self, sort: &PrimarySortInfo) {
        self.is_tag_primary_sort = sort.is_tag;
        self.sort_field_name     = sort.field_name.clone();
        self.sort_orders         = sort.sort_orders.clone();
    }

    pub fn sort_info(&self) -> PrimarySortInfo {
        PrimarySortInfo {
            field_name:  self.sort_field_name.clone(),
            is_tag:      self.is_tag_primary_sort,
            sort_orders: self.sort_orders.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum IntersectionResultField {
    ResultItems, IndexHeaders, IsTagPrimarySort, SortFieldName, SortOrders, LocalIdentityTagNames, ExceptionInfo,
}

impl Versioned for IntersectionQueryResult {
    type Field = IntersectionResultField;
    const TYPE_NAME: &'static str = "IntersectionQueryResult";
    const CURRENT_VERSION: u8 = 1;
    const SCHEMA: &'static [(u8, IntersectionResultField)] = &[
        (1, IntersectionResultField::ResultItems),
        (1, IntersectionResultField::IndexHeaders),
        (1, IntersectionResultField::IsTagPrimarySort),
        (1, IntersectionResultField::SortFieldName),
        (1, IntersectionResultField::SortOrders),
        (1, IntersectionResultField::LocalIdentityTagNames),
        (1, IntersectionResultField::ExceptionInfo),
    ];

    fn write_field(&self, field: IntersectionResultField, w: &mut PrimitiveWriter) -> Result<()> {
        match field {
            IntersectionResultField::ResultItems           => write_list(w, &self.result_items),
            IntersectionResultField::IndexHeaders          => write_headers(w, self.index_headers.as_ref()),
            IntersectionResultField::IsTagPrimarySort      => w.write_bool(self.is_tag_primary_sort),
            IntersectionResultField::SortFieldName         => w.write_string(&self.sort_field_name),
            IntersectionResultField::SortOrders            => write_list(w, &self.sort_orders),
            IntersectionResultField::LocalIdentityTagNames => write_strings(w, &self.local_identity_tag_names),
            IntersectionResultField::ExceptionInfo         => w.write_opt_string(self.exception_info.as_deref()),
        }
    }

    fn read_field(&mut self, field: IntersectionResultField, r: &mut PrimitiveReader<'_>) -> Result<()> {
        match field {
            IntersectionResultField::ResultItems           => self.result_items = read_list(r)?,
            IntersectionResultField::IndexHeaders          => self.index_headers = read_headers(r)?,
            IntersectionResultField::IsTagPrimarySort      => self.is_tag_primary_sort = r.read_bool()?,
            IntersectionResultField::SortFieldName         => self.sort_field_name = r.read_string()?,
            IntersectionResultField::SortOrders            => self.sort_orders = read_list(r)?,
            IntersectionResultField::LocalIdentityTagNames => self.local_identity_tag_names = read_strings(r)?,
            IntersectionResultField::ExceptionInfo         => self.exception_info = r.read_opt_string()?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{deserialize, serialize, serialize_at};
    use crate::partitioner::split;

    fn ids(v: &[i32]) -> Vec<IndexId> { v.iter().map(|i| i.to_le_bytes().to_vec()).collect() }

    #[test]
    fn single_partition_split_is_marked() {
        let q = IntersectionQuery::new("tags", ids(&[2, 4, 6])).with_max_result_items(10);
        let subs = split(&q, 2).unwrap();
        assert_eq!(subs.len(), 1);
        assert!(subs[0].is_single_cluster_query);

        let spread = split(&IntersectionQuery::new("tags", ids(&[1, 2])), 2).unwrap();
        assert!(spread.iter().all(|s| !s.is_single_cluster_query));
    }

    #[test]
    fn version_two_peer_sees_no_cap_fields() {
        let q = IntersectionQuery::new("tags", ids(&[1])).with_max_result_items(3).with_index_header();
        let v2: IntersectionQuery = deserialize(&serialize_at(&q, 2).unwrap()).unwrap();
        assert_eq!(v2.max_result_items, 0);
        assert!(v2.get_index_header);
        let back: IntersectionQuery = deserialize(&serialize(&q).unwrap()).unwrap();
        assert_eq!(back, q);
    }
}
