//! 多索引分页查询

use std::collections::BTreeMap;

use crate::assembler::{self, ResultWindow};
use crate::codec::{
    read_list, read_option, read_opt_versioned, write_list, write_option, write_opt_versioned,
    PrimitiveReader, PrimitiveWriter, Versioned,
};
use crate::common::{IndexId, PartitionId, PrimaryId, Result};
use crate::condition::{CapCondition, IndexCondition};
use crate::field_type::{PrimarySortInfo, SortOrder, TagSort};
use crate::filter::Filter;
use crate::group::{GroupBy, GroupByResult};
use crate::item::ResultItem;
use crate::merge;
use crate::partitioner::{PartitionGroup, SplitInfo, SplittableQuery};

use super::{
    primary_id_at, read_headers, read_params_map, read_primary_ids, write_headers,
    write_params_map, write_primary_ids, EffectiveIndexParams, IndexHeaderType, IndexHeaders,
    IndexIdParams,
};

// ── PagedIndexQuery ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PagedIndexQuery {
    pub target_index_name:       String,
    pub index_id_list:           Vec<IndexId>,
    pub tag_sort:                Option<TagSort>,
    pub page_size:               i32,
    /// 从 1 开始；0 表示不分页
    pub page_num:                i32,
    /// 每个索引的默认条目上限；0 表示不限
    pub max_items:               i32,
    pub exclude_data:            bool,
    pub get_pageable_item_count: bool,
    pub primary_id_list:         Option<Vec<PrimaryId>>,
    pub filter:                  Option<Filter>,
    pub index_id_params:         BTreeMap<IndexId, IndexIdParams>,
    pub client_side_paging:      bool,
    pub index_condition:         Option<IndexCondition>,
    pub cap_condition:           Option<CapCondition>,
    pub index_header_type:       IndexHeaderType,
    pub group_by:                Option<GroupBy>,

    // 路由信息，不上线
    pub partition:               Option<PartitionId>,
    pub num_partitions:          u32,
}

impl PagedIndexQuery {
    pub fn new(target_index_name: &str, index_id_list: Vec<IndexId>) -> Self {
        Self {
            target_index_name: target_index_name.into(),
            index_id_list,
            num_partitions: 1,
            ..Default::default()
        }
    }

    pub fn with_page(mut self, page_num: i32, page_size: i32) -> Self {
        self.page_num = page_num; self.page_size = page_size; self
    }
    pub fn with_max_items(mut self, n: i32) -> Self { self.max_items = n; self }
    pub fn with_tag_sort(mut self, ts: TagSort) -> Self { self.tag_sort = Some(ts); self }
    pub fn with_filter(mut self, f: Filter) -> Self { self.filter = Some(f); self }
    pub fn with_index_condition(mut self, c: IndexCondition) -> Self { self.index_condition = Some(c); self }
    pub fn with_cap_condition(mut self, c: CapCondition) -> Self { self.cap_condition = Some(c); self }
    pub fn with_group_by(mut self, g: GroupBy) -> Self { self.group_by = Some(g); self }
    pub fn with_header_type(mut self, t: IndexHeaderType) -> Self { self.index_header_type = t; self }
    pub fn with_primary_ids(mut self, ids: Vec<PrimaryId>) -> Self { self.primary_id_list = Some(ids); self }
    pub fn with_pageable_item_count(mut self) -> Self { self.get_pageable_item_count = true; self }
    pub fn with_index_params(mut self, index_id: &[u8], p: IndexIdParams) -> Self {
        self.index_id_params.insert(index_id.to_vec(), p); self
    }

    /// 页号或页大小不为正时视为不分页
    pub fn window(&self) -> ResultWindow { ResultWindow::page(self.page_num, self.page_size) }

    /// 合并上限：不分页时不限，否则取到当前页末尾
    pub fn max_merge_count(&self) -> i32 { self.window().max_merge_count() }

    pub fn resolve_params(&self, index_id: &[u8]) -> EffectiveIndexParams {
        EffectiveIndexParams::resolve(self.index_id_params.get(index_id), self.max_items, self.filter.as_ref())
    }

    pub fn primary_id_at(&self, pos: usize) -> PrimaryId {
        primary_id_at(&self.index_id_list, self.primary_id_list.as_deref(), pos)
    }

    /// 客户端合并各分区的部分结果并完成分页
    pub fn merge_results(&self, partials: Vec<Option<PagedIndexQueryResult>>) -> Result<PagedIndexQueryResult> {
        let partial_count = partials.len();
        let merged = merge::aggregate_paged(
            partials,
            self.max_merge_count().max(0) as usize,
            self.get_pageable_item_count,
        )?;
        Ok(assembler::finalize_paged(self, self.window(), merged, partial_count))
    }
}

impl SplittableQuery for PagedIndexQuery {
    fn index_ids(&self) -> &[IndexId] { &self.index_id_list }
    fn primary_ids(&self) -> Option<&[PrimaryId]> { self.primary_id_list.as_deref() }
    fn partition(&self) -> Option<PartitionId> { self.partition }

    fn sub_query(&self, group: &PartitionGroup, info: &SplitInfo) -> Self {
        let index_id_params = group.index_ids.iter()
            .map(|id| (id.clone(), self.resolve_params(id).into_params()))
            .collect();
        Self {
            index_id_list:      group.index_ids.clone(),
            primary_id_list:    group.primary_ids.clone(),
            index_id_params,
            client_side_paging: info.needs_client_side_processing(),
            partition:          Some(group.partition),
            num_partitions:     info.num_partitions,
            ..self.clone()
        }
    }

    fn exclude_data(&mut self) { self.exclude_data = true; }
}

#[derive(Debug, Clone, Copy)]
pub enum PagedQueryField {
    TargetIndexName, IndexIdList, TagSort, PageSize, PageNum, MaxItems, ExcludeData,
    GetPageableItemCount,
    PrimaryIdList,
    Filter,
    IndexIdParams,
    ClientSidePaging,
    IndexCondition,
    CapCondition,
    IndexHeaderType,
    GroupBy,
}

impl Versioned for PagedIndexQuery {
    type Field = PagedQueryField;
    const TYPE_NAME: &'static str = "PagedIndexQuery";
    const CURRENT_VERSION: u8 = 10;
    const SCHEMA: &'static [(u8, PagedQueryField)] = &[
        (1,  PagedQueryField::TargetIndexName),
        (1,  PagedQueryField::IndexIdList),
        (1,  PagedQueryField::TagSort),
        (1,  PagedQueryField::PageSize),
        (1,  PagedQueryField::PageNum),
        (1,  PagedQueryField::MaxItems),
        (1,  PagedQueryField::ExcludeData),
        (2,  PagedQueryField::GetPageableItemCount),
        (3,  PagedQueryField::PrimaryIdList),
        (4,  PagedQueryField::Filter),
        (5,  PagedQueryField::IndexIdParams),
        (6,  PagedQueryField::ClientSidePaging),
        (7,  PagedQueryField::IndexCondition),
        (8,  PagedQueryField::CapCondition),
        (9,  PagedQueryField::IndexHeaderType),
        (10, PagedQueryField::GroupBy),
    ];

    fn write_field(&self, field: PagedQueryField, w: &mut PrimitiveWriter) -> Result<()> {
        match field {
            PagedQueryField::TargetIndexName      => w.write_string(&self.target_index_name),
            PagedQueryField::IndexIdList          => crate::codec::write_byte_list(w, &self.index_id_list),
            PagedQueryField::TagSort              => write_option(w, self.tag_sort.as_ref()),
            PagedQueryField::PageSize             => w.write_i32(self.page_size),
            PagedQueryField::PageNum              => w.write_i32(self.page_num),
            PagedQueryField::MaxItems             => w.write_i32(self.max_items),
            PagedQueryField::ExcludeData          => w.write_bool(self.exclude_data),
            PagedQueryField::GetPageableItemCount => w.write_bool(self.get_pageable_item_count),
            PagedQueryField::PrimaryIdList        => write_primary_ids(w, self.primary_id_list.as_deref()),
            PagedQueryField::Filter               => write_option(w, self.filter.as_ref()),
            PagedQueryField::IndexIdParams        => write_params_map(w, &self.index_id_params),
            PagedQueryField::ClientSidePaging     => w.write_bool(self.client_side_paging),
            PagedQueryField::IndexCondition       => write_opt_versioned(w, self.index_condition.as_ref()),
            PagedQueryField::CapCondition         => write_opt_versioned(w, self.cap_condition.as_ref()),
            PagedQueryField::IndexHeaderType      => w.write_u8(self.index_header_type.code()),
            PagedQueryField::GroupBy              => write_opt_versioned(w, self.group_by.as_ref()),
        }
    }

    fn read_field(&mut self, field: PagedQueryField, r: &mut PrimitiveReader<'_>) -> Result<()> {
        match field {
            PagedQueryField::TargetIndexName      => self.target_index_name = r.read_string()?,
            PagedQueryField::IndexIdList          => self.index_id_list = crate::codec::read_byte_list(r)?,
            PagedQueryField::TagSort              => self.tag_sort = read_option(r)?,
            PagedQueryField::PageSize             => self.page_size = r.read_i32()?,
            PagedQueryField::PageNum              => self.page_num = r.read_i32()?,
            PagedQueryField::MaxItems             => self.max_items = r.read_i32()?,
            PagedQueryField::ExcludeData          => self.exclude_data = r.read_bool()?,
            PagedQueryField::GetPageableItemCount => self.get_pageable_item_count = r.read_bool()?,
            PagedQueryField::PrimaryIdList        => self.primary_id_list = read_primary_ids(r)?,
            PagedQueryField::Filter               => self.filter = read_option(r)?,
            PagedQueryField::IndexIdParams        => self.index_id_params = read_params_map(r)?,
            PagedQueryField::ClientSidePaging     => self.client_side_paging = r.read_bool()?,
            PagedQueryField::IndexCondition       => self.index_condition = read_opt_versioned(r)?,
            PagedQueryField::CapCondition         => self.cap_condition = read_opt_versioned(r)?,
            PagedQueryField::IndexHeaderType      => self.index_header_type = IndexHeaderType::from_code(r.read_u8()?)?,
            PagedQueryField::GroupBy              => self.group_by = read_opt_versioned(r)?,
        }
        Ok(())
    }
}

// ── PagedIndexQueryResult ─────────────────────────────────────────────────────

/// 早于该版本的分区在服务端分页逻辑上有缺陷，客户端需按旧规则补做分页
pub const CORRECT_SERVER_SIDE_PAGING_VERSION: u8 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct PagedIndexQueryResult {
    pub result_items:                    Vec<ResultItem>,
    pub index_headers:                   Option<IndexHeaders>,
    pub total_count:                     i32,
    pub is_tag_primary_sort:             bool,
    pub sort_field_name:                 String,
    pub sort_orders:                     Vec<SortOrder>,
    pub exception_info:                  Option<String>,
    pub additional_available_item_count: i32,
    pub index_cap:                       i32,
    pub group_by_result:                 Option<GroupByResult>,
    /// 对端序列化所用的版本；本地构造时为当前版本
    pub wire_version:                    u8,
}

impl Default for PagedIndexQueryResult {
    fn default() -> Self {
        Self {
            result_items:                    vec![],
            index_headers:                   None,
            total_count:                     0,
            is_tag_primary_sort:             false,
            sort_field_name:                 String::new(),
            sort_orders:                     vec![],
            exception_info:                  None,
            additional_available_item_count: 0,
            index_cap:                       0,
            group_by_result:                 None,
            wire_version:                    Self::CURRENT_VERSION,
        }
    }
}

impl PagedIndexQueryResult {
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

    /// 结果条目数（分组时为分组数）
    pub fn count(&self) -> usize {
        self.result_items.len() + self.group_by_result.as_ref().map_or(0, GroupByResult::len)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum PagedResultField {
    ResultItems, IndexHeaders, TotalCount, IsTagPrimarySort, SortFieldName, SortOrders, ExceptionInfo,
    AdditionalAvailableItemCount, IndexCap,
    GroupByResult,
}

impl Versioned for PagedIndexQueryResult {
    type Field = PagedResultField;
    const TYPE_NAME: &'static str = "PagedIndexQueryResult";
    const CURRENT_VERSION: u8 = 3;
    const SCHEMA: &'static [(u8, PagedResultField)] = &[
        (1, PagedResultField::ResultItems),
        (1, PagedResultField::IndexHeaders),
        (1, PagedResultField::TotalCount),
        (1, PagedResultField::IsTagPrimarySort),
        (1, PagedResultField::SortFieldName),
        (1, PagedResultField::SortOrders),
        (1, PagedResultField::ExceptionInfo),
        (2, PagedResultField::AdditionalAvailableItemCount),
        (2, PagedResultField::IndexCap),
        (3, PagedResultField::GroupByResult),
    ];

    fn write_field(&self, field: PagedResultField, w: &mut PrimitiveWriter) -> Result<()> {
        match field {
            PagedResultField::ResultItems      => write_list(w, &self.result_items),
            PagedResultField::IndexHeaders     => write_headers(w, self.index_headers.as_ref()),
            PagedResultField::TotalCount       => w.write_i32(self.total_count),
            PagedResultField::IsTagPrimarySort => w.write_bool(self.is_tag_primary_sort),
            PagedResultField::SortFieldName    => w.write_string(&self.sort_field_name),
            PagedResultField::SortOrders       => write_list(w, &self.sort_orders),
            PagedResultField::ExceptionInfo    => w.write_opt_string(self.exception_info.as_deref()),
            PagedResultField::AdditionalAvailableItemCount => w.write_i32(self.additional_available_item_count),
            PagedResultField::IndexCap         => w.write_i32(self.index_cap),
            PagedResultField::GroupByResult    => write_option(w, self.group_by_result.as_ref()),
        }
    }

    fn read_field(&mut self, field: PagedResultField, r: &mut PrimitiveReader<'_>) -> Result<()> {
        match field {
            PagedResultField::ResultItems      => self.result_items = read_list(r)?,
            PagedResultField::IndexHeaders     => self.index_headers = read_headers(r)?,
            PagedResultField::TotalCount       => self.total_count = r.read_i32()?,
            PagedResultField::IsTagPrimarySort => self.is_tag_primary_sort = r.read_bool()?,
            PagedResultField::SortFieldName    => self.sort_field_name = r.read_string()?,
            PagedResultField::SortOrders       => self.sort_orders = read_list(r)?,
            PagedResultField::ExceptionInfo    => self.exception_info = r.read_opt_string()?,
            PagedResultField::AdditionalAvailableItemCount => self.additional_available_item_count = r.read_i32()?,
            PagedResultField::IndexCap         => self.index_cap = r.read_i32()?,
            PagedResultField::GroupByResult    => self.group_by_result = read_option(r)?,
        }
        Ok(())
    }

    fn on_read(&mut self, version: u8) { self.wire_version = version; }
}
