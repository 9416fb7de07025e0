//! 分区端查询处理：取索引字节 → 解码 → 分区内合并 → 头信息
//!
//! 每个子查询只涉及本分区的 IndexId。处理失败不向上抛出，而是记录日志并
//! 返回携带异常文本的空结果，由客户端合并时拼接。

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::assembler::ResultWindow;
use crate::common::{PartitionId, PrimaryId, Result, TypeId};
use crate::comparer::{sort_items, ItemComparer};
use crate::condition::{CapTracker, IndexCondition};
use crate::config::{IndexConfig, IndexTypeMappingCollection};
use crate::decoder::{decode_header, decode_index, DecodeContext, DecodedIndex};
use crate::field_type::PrimarySortInfo;
use crate::filter::Filter;
use crate::group::{GroupBy, GroupByResult};
use crate::index_format::{IndexWriter, StoredIndex};
use crate::item::{IndexHeader, ResultItem};
use crate::lookup::LookupServices;
use crate::merge::{merge_group_results, merge_item_lists, Intersector};
use crate::query::contains::{ContainsIndexResult, ContainsQuery, ContainsQueryResult};
use crate::query::first_last::{FirstLastQuery, FirstLastQueryResult};
use crate::query::get_range::{GetRangeQuery, GetRangeQueryResult};
use crate::query::intersection::{IntersectionQuery, IntersectionQueryResult};
use crate::query::paged::{PagedIndexQuery, PagedIndexQueryResult};
use crate::query::span::{SpanQuery, SpanQueryResult};
use crate::query::{IndexHeaderType, IndexHeaders, IndexSelection};
use crate::store::IndexStore;

/// 单个分区的查询处理器
#[derive(Clone)]
pub struct PartitionProcessor {
    partition: PartitionId,
    store:     IndexStore,
    mappings:  Arc<IndexTypeMappingCollection>,
    services:  LookupServices,
}

impl PartitionProcessor {
    pub fn new(
        partition: PartitionId,
        store:     IndexStore,
        mappings:  Arc<IndexTypeMappingCollection>,
        services:  LookupServices,
    ) -> Self {
        Self { partition, store, mappings, services }
    }

    pub fn partition(&self) -> PartitionId { self.partition }

    // ── 写入 ──────────────────────────────────────────────────────────────────

    pub fn save_index(
        &self,
        type_id:    TypeId,
        primary_id: PrimaryId,
        index_name: &str,
        index_id:   &[u8],
        index:      StoredIndex,
    ) -> Result<()> {
        let config = self.mappings.index(type_id, index_name)?;
        let encoded = IndexWriter::new(config).encode(index)?;
        self.store.save(type_id, primary_id, config, index_id, &encoded)
    }

    pub fn delete_index(&self, type_id: TypeId, primary_id: PrimaryId, index_name: &str, index_id: &[u8]) -> Result<bool> {
        let config = self.mappings.index(type_id, index_name)?;
        self.store.remove(type_id, primary_id, config, index_id)
    }

    /// 只读索引头
    pub fn read_header(
        &self,
        type_id:    TypeId,
        primary_id: PrimaryId,
        index_name: &str,
        index_id:   &[u8],
    ) -> Result<Option<IndexHeader>> {
        let config = self.mappings.index(type_id, index_name)?;
        let Some(data) = self.store.load(type_id, primary_id, config, index_id)? else {
            return Ok(None);
        };
        let ctx = DecodeContext::new(index_id, type_id, config).header_only();
        Ok(Some(decode_header(&data, &ctx)?.header()))
    }

    /// 统计一个索引中某字段各取值的条目数
    pub fn distinct_values(
        &self,
        type_id:    TypeId,
        primary_id: PrimaryId,
        index_name: &str,
        index_id:   &[u8],
        field_name: &str,
        filter:     Option<Filter>,
    ) -> Result<BTreeMap<Vec<u8>, i32>> {
        let config = self.mappings.index(type_id, index_name)?;
        let Some(data) = self.store.load(type_id, primary_id, config, index_id)? else {
            return Ok(BTreeMap::new());
        };
        let ctx = DecodeContext::new(index_id, type_id, config)
            .with_filter(filter)
            .with_distinct_field(field_name);
        Ok(decode_index(&data, &ctx, &self.services, None)?.distinct_values.unwrap_or_default())
    }

    fn load_and_decode(
        &self,
        type_id:    TypeId,
        primary_id: PrimaryId,
        config:     &IndexConfig,
        ctx:        &DecodeContext,
        caps:       Option<&mut CapTracker>,
    ) -> Result<Option<DecodedIndex>> {
        let Some(data) = self.store.load(type_id, primary_id, config, &ctx.index_id)? else {
            return Ok(None);
        };
        let decoded = decode_index(&data, ctx, &self.services, caps)?;
        tracing::trace!(
            partition = self.partition,
            total     = decoded.total_count,
            read      = decoded.read_item_count,
            kept      = decoded.count(),
            "decoded index",
        );
        Ok(Some(decoded))
    }

    // ── 分页查询 ──────────────────────────────────────────────────────────────

    pub fn process_paged(&self, type_id: TypeId, query: &PagedIndexQuery) -> PagedIndexQueryResult {
        self.try_paged(type_id, query).unwrap_or_else(|e| {
            tracing::error!(type_id, partition = self.partition, index = %query.target_index_name, error = %e, "paged query failed");
            PagedIndexQueryResult::failed(e.to_string())
        })
    }

    // ── 区间查询 ──────────────────────────────────────────────────────────────

    pub fn process_span(&self, type_id: TypeId, query: &SpanQuery) -> SpanQueryResult {
        query.validate()
            .and_then(|_| self.run_windowed(type_id, &query.query, query.window()))
            .unwrap_or_else(|e| {
                tracing::error!(type_id, partition = self.partition, index = %query.query.target_index_name, error = %e, "span query failed");
                SpanQueryResult::failed(e.to_string())
            })
    }

    fn try_paged(&self, type_id: TypeId, query: &PagedIndexQuery) -> Result<PagedIndexQueryResult> {
        self.run_windowed(type_id, query, query.window())
    }

    /// 分页与区间查询共用：解码、分区内合并，未要求客户端截取时就地截取窗口
    fn run_windowed(&self, type_id: TypeId, query: &PagedIndexQuery, window: ResultWindow) -> Result<PagedIndexQueryResult> {
        let config = self.mappings.index(type_id, &query.target_index_name)?;
        let native = &config.primary_sort_info;
        let sort = query.tag_sort.as_ref().map_or_else(|| native.clone(), |ts| ts.to_sort_info());
        // 查询排序与落盘排序不同：边界只能当作过滤，解码不能提前截断
        let resort = sort != *native;
        let cmp = ItemComparer::new(sort.clone());
        let max_merge = window.max_merge_count();
        let max_merge_len = max_merge.max(0) as usize;

        let mut result = PagedIndexQueryResult { index_cap: config.max_index_size, ..Default::default() };
        result.set_sort_info(&sort);

        let mut tracker = query.cap_condition.as_ref().map(CapTracker::new);
        let mut condition = query.index_condition.clone();
        let mut items: Vec<ResultItem> = Vec::new();
        let mut groups = query.group_by.as_ref().map(|_| GroupByResult::new());
        let mut headers: IndexHeaders = BTreeMap::new();
        let last = query.index_id_list.len().saturating_sub(1);

        for (pos, index_id) in query.index_id_list.iter().enumerate() {
            let params = query.resolve_params(index_id);
            let max_extract = if resort {
                0
            } else {
                compute_max_extract_count(params.max_items, query.get_pageable_item_count, params.filter.is_some(), max_merge)
            };

            let mut ctx = DecodeContext::new(index_id, type_id, config)
                .with_max_items(max_extract)
                .with_cap(query.cap_condition.clone())
                .with_group_by(query.group_by.clone());
            let mut filter = params.filter;
            if let Some(cond) = condition.as_ref().filter(|c| !c.is_empty()) {
                if resort {
                    filter = and_filter(filter, cond.as_filter(&sort)?);
                } else {
                    ctx = ctx.with_boundaries(cond.boundaries(native)?);
                }
            }
            let ctx = ctx.with_filter(filter);

            let Some(decoded) = self.load_and_decode(type_id, query.primary_id_at(pos), config, &ctx, tracker.as_mut())? else {
                continue;
            };
            result.total_count = result.total_count.saturating_add(decoded.total_count);
            result.additional_available_item_count =
                result.additional_available_item_count.saturating_add(decoded.count() as i32);
            if query.index_header_type != IndexHeaderType::None {
                headers.insert(index_id.clone(), decoded.header());
            }

            match groups.take() {
                Some(acc) => {
                    let mut decoded_groups = decoded.group_by_result.unwrap_or_default();
                    if resort {
                        decoded_groups = regroup(decoded_groups, &cmp)?;
                    }
                    groups = Some(merge_group_results(acc, decoded_groups, max_merge_len, &cmp)?);
                }
                None => {
                    let list = if resort { sort_items(decoded.items, &cmp)? } else { decoded.items };
                    items = merge_item_lists(items, list, max_merge_len, &cmp)?;
                }
            }

            // 已取满：后续索引只需解码排在当前末尾之前的条目
            let can_tighten = !resort && query.cap_condition.is_none() && groups.is_none();
            if can_tighten && pos != last && items.len() == max_merge_len {
                if let Some(boundary) = items.last().and_then(|i| cmp.sort_key(i)).map(<[u8]>::to_vec) {
                    condition = Some(tighten(condition.take(), &sort, &cmp, boundary)?);
                }
            }
        }

        if !query.client_side_paging && !window.is_all() {
            match groups.take() {
                Some(g) => {
                    let (start, end) = window.bounds(g.len());
                    groups = Some(g.page(start, end));
                }
                None => {
                    let (start, end) = window.bounds(items.len());
                    items.truncate(end);
                    items.drain(..start);
                }
            }
        }

        result.index_headers = match query.index_header_type {
            IndexHeaderType::None                => None,
            IndexHeaderType::AllIndexIds         => Some(headers),
            IndexHeaderType::ResultItemsIndexIds => {
                let ids: Vec<&[u8]> = match &groups {
                    Some(g) => g.index_ids().collect(),
                    None    => items.iter().map(|i| i.index_id.as_slice()).collect(),
                };
                crate::assembler::restrict_headers(headers, ids).or_else(|| Some(BTreeMap::new()))
            }
        };

        if query.exclude_data {
            let keep = merge_fields(&sort, query.group_by.as_ref());
            items.iter_mut().for_each(|i| strip_tags(i, &keep));
            if let Some(g) = groups.as_mut() {
                *g = strip_group_tags(std::mem::take(g), &keep);
            }
        }

        result.result_items = items;
        result.group_by_result = groups;
        tracing::debug!(
            partition = self.partition,
            index_ids = query.index_id_list.len(),
            ?window,
            total     = result.total_count,
            returned  = result.count(),
            "multi-index query processed",
        );
        Ok(result)
    }

    // ── 交集查询 ──────────────────────────────────────────────────────────────

    pub fn process_intersection(&self, type_id: TypeId, query: &IntersectionQuery) -> IntersectionQueryResult {
        self.try_intersection(type_id, query).unwrap_or_else(|e| {
            tracing::error!(type_id, partition = self.partition, index = %query.target_index_name, error = %e, "intersection query failed");
            IntersectionQueryResult::failed(e.to_string())
        })
    }

    fn try_intersection(&self, type_id: TypeId, query: &IntersectionQuery) -> Result<IntersectionQueryResult> {
        let config = self.mappings.index(type_id, &query.target_index_name)?;
        let sort = &config.primary_sort_info;
        let mut result = IntersectionQueryResult {
            local_identity_tag_names: config.local_identity_tag_names.clone(),
            ..Default::default()
        };
        result.set_sort_info(sort);

        let boundaries = match query.index_condition.as_ref().filter(|c| !c.is_empty()) {
            Some(c) => c.boundaries(sort)?,
            None    => Default::default(),
        };
        let mut lists = Vec::with_capacity(query.index_id_list.len());
        let mut headers: IndexHeaders = BTreeMap::new();
        for (pos, index_id) in query.index_id_list.iter().enumerate() {
            let params = query.resolve_params(index_id);
            let ctx = DecodeContext::new(index_id, type_id, config)
                .with_filter(params.filter)
                .with_boundaries(boundaries.clone());
            let decoded = match self.load_and_decode(type_id, query.primary_id_at(pos), config, &ctx, None)? {
                Some(d) if !d.items.is_empty() => d,
                // 任一索引为空，交集必为空
                _ => return Ok(result),
            };
            if query.get_index_header {
                headers.insert(index_id.clone(), decoded.header());
            }
            lists.push(decoded.items);
        }

        let cap = if query.is_single_cluster_query { query.max_result_items.max(0) as usize } else { 0 };
        let intersector = Intersector::new(ItemComparer::new(sort.clone()), config.local_identity_tag_names.clone());
        let mut items = intersector.intersect_all(lists, cap)?;

        if query.exclude_data {
            let mut keep = merge_fields(sort, None);
            keep.extend(config.local_identity_tag_names.iter().cloned());
            items.iter_mut().for_each(|i| strip_tags(i, &keep));
        }
        if query.get_index_header && !items.is_empty() {
            result.index_headers = Some(headers);
        }
        result.result_items = items;
        Ok(result)
    }

    // ── 包含查询 ──────────────────────────────────────────────────────────────

    pub fn process_contains(&self, type_id: TypeId, query: &ContainsQuery) -> ContainsQueryResult {
        self.try_contains(type_id, query).unwrap_or_else(|e| {
            tracing::error!(type_id, partition = self.partition, index = %query.target_index_name, error = %e, "contains query failed");
            ContainsQueryResult::failed(e.to_string())
        })
    }

    fn try_contains(&self, type_id: TypeId, query: &ContainsQuery) -> Result<ContainsQueryResult> {
        let config = self.mappings.index(type_id, &query.target_index_name)?;
        let wanted: HashSet<&[u8]> = query.item_ids.iter().map(Vec::as_slice).collect();
        let mut result = ContainsQueryResult::default();

        for (pos, index_id) in query.index_id_list.iter().enumerate() {
            let params = query.resolve_params(index_id);
            let ctx = DecodeContext::new(index_id, type_id, config).with_filter(params.filter);
            let Some(decoded) = self.load_and_decode(type_id, query.primary_id_at(pos), config, &ctx, None)? else {
                result.entries.push(ContainsIndexResult::missing(index_id));
                continue;
            };
            let header = query.get_index_header.then(|| decoded.header());
            let mut items: Vec<ResultItem> = decoded.items.into_iter()
                .filter(|i| wanted.contains(i.item_id.as_slice()))
                .collect();
            if query.exclude_data {
                items.iter_mut().for_each(|i| i.tags.clear());
            }
            result.entries.push(ContainsIndexResult {
                index_id:     index_id.clone(),
                index_exists: true,
                index_size:   decoded.total_count,
                index_cap:    config.max_index_size,
                items,
                header,
            });
        }
        Ok(result)
    }

    // ── 单索引查询 ────────────────────────────────────────────────────────────

    /// 解码单个索引并按查询排序；返回索引上限与解码结果（索引不存在时为 None）
    fn read_single(&self, type_id: TypeId, sel: &IndexSelection, max_items: i32) -> Result<(i32, Option<DecodedIndex>)> {
        let config = self.mappings.index(type_id, &sel.target_index_name)?;
        let native = &config.primary_sort_info;
        let sort = sel.tag_sort.as_ref().map_or_else(|| native.clone(), |ts| ts.to_sort_info());
        let resort = sort != *native;

        let mut ctx = DecodeContext::new(&sel.index_id, type_id, config)
            .with_max_items(if resort { 0 } else { max_items });
        let mut filter = sel.filter.clone();
        if let Some(cond) = sel.index_condition.as_ref().filter(|c| !c.is_empty()) {
            if resort {
                filter = and_filter(filter, cond.as_filter(&sort)?);
            } else {
                ctx = ctx.with_boundaries(cond.boundaries(native)?);
            }
        }
        let ctx = ctx.with_filter(filter);

        let Some(mut decoded) = self.load_and_decode(type_id, sel.primary_id(), config, &ctx, None)? else {
            return Ok((config.max_index_size, None));
        };
        if resort {
            decoded.items = sort_items(std::mem::take(&mut decoded.items), &ItemComparer::new(sort))?;
        }
        if sel.exclude_data {
            decoded.items.iter_mut().for_each(|i| i.tags.clear());
        }
        Ok((config.max_index_size, Some(decoded)))
    }

    pub fn process_first_last(&self, type_id: TypeId, query: &FirstLastQuery) -> FirstLastQueryResult {
        self.try_first_last(type_id, query).unwrap_or_else(|e| {
            tracing::error!(type_id, partition = self.partition, index = %query.selection.target_index_name, error = %e, "first/last query failed");
            FirstLastQueryResult::failed(e.to_string())
        })
    }

    fn try_first_last(&self, type_id: TypeId, query: &FirstLastQuery) -> Result<FirstLastQueryResult> {
        query.validate()?;
        let (index_cap, decoded) = self.read_single(type_id, &query.selection, query.max_extract_count())?;
        let mut result = FirstLastQueryResult { index_cap, ..Default::default() };
        let Some(mut decoded) = decoded else { return Ok(result) };

        result.index_exists = true;
        result.index_size = decoded.total_count;
        result.virtual_count = decoded.virtual_count();
        if query.selection.get_metadata {
            result.header = Some(decoded.header());
        }
        (result.first_page, result.last_page) = query.split_pages(std::mem::take(&mut decoded.items));
        Ok(result)
    }

    pub fn process_get_range(&self, type_id: TypeId, query: &GetRangeQuery) -> GetRangeQueryResult {
        self.try_get_range(type_id, query).unwrap_or_else(|e| {
            tracing::error!(type_id, partition = self.partition, index = %query.selection.target_index_name, error = %e, "get range query failed");
            GetRangeQueryResult::failed(e.to_string())
        })
    }

    fn try_get_range(&self, type_id: TypeId, query: &GetRangeQuery) -> Result<GetRangeQueryResult> {
        query.validate()?;
        let (index_cap, decoded) = self.read_single(type_id, &query.selection, query.max_extract_count())?;
        let mut result = GetRangeQueryResult { index_cap, ..Default::default() };
        let Some(mut decoded) = decoded else { return Ok(result) };

        result.index_exists = true;
        result.index_size = decoded.total_count;
        result.virtual_count = decoded.virtual_count();
        if query.selection.get_metadata {
            result.header = Some(decoded.header());
        }
        result.result_items = query.take_range(std::mem::take(&mut decoded.items));
        Ok(result)
    }
}

// ── 辅助 ──────────────────────────────────────────────────────────────────────

/// 单个索引最多解码多少条：显式上限优先；要求可分页计数且有过滤时不限；否则取合并上限
pub fn compute_max_extract_count(max_items: i32, get_pageable_item_count: bool, has_filter: bool, max_merge_count: i32) -> i32 {
    if max_items > 0 {
        max_items
    } else if get_pageable_item_count && has_filter {
        i32::MAX
    } else {
        max_merge_count
    }
}

fn and_filter(a: Option<Filter>, b: Option<Filter>) -> Option<Filter> {
    match (a, b) {
        (Some(a), Some(b)) => Some(Filter::And(vec![a, b])),
        (a, b)             => a.or(b),
    }
}

/// 只收紧不放宽；由元数据属性给出的远端边界无法比较，保持不变
fn tighten(
    condition: Option<IndexCondition>,
    sort:      &PrimarySortInfo,
    cmp:       &ItemComparer,
    boundary:  Vec<u8>,
) -> Result<IndexCondition> {
    let current = condition.unwrap_or_default();
    let descending = sort.leading().is_some_and(|o| o.sort_by.is_descending());
    let (value, property) = if descending {
        (&current.inclusive_min_value, &current.inclusive_min_property)
    } else {
        (&current.inclusive_max_value, &current.inclusive_max_property)
    };
    if property.is_some() && value.is_none() {
        return Ok(current);
    }
    if let Some(v) = value {
        if cmp.compare_keys(Some(boundary.as_slice()), Some(v.as_slice()))? != Ordering::Less {
            return Ok(current);
        }
    }
    Ok(current.tightened(sort, boundary))
}

/// 按查询排序重建分组
fn regroup(groups: GroupByResult, cmp: &ItemComparer) -> Result<GroupByResult> {
    let mut out = GroupByResult::new();
    for bag in groups.into_bags() {
        for item in bag.items {
            out.add_item(bag.composite_key.clone(), item, cmp)?;
        }
    }
    Ok(out)
}

/// 客户端合并仍需要的标签
fn merge_fields(sort: &PrimarySortInfo, group_by: Option<&GroupBy>) -> Vec<String> {
    let mut keep = Vec::new();
    if sort.is_tag {
        keep.push(sort.field_name.clone());
    }
    if let Some(g) = group_by {
        keep.extend(g.group_by_field_names.iter().cloned());
        keep.extend(g.non_group_by_field_names.iter().cloned());
        if !g.field_name.is_empty() {
            keep.push(g.field_name.clone());
        }
    }
    keep
}

fn strip_tags(item: &mut ResultItem, keep: &[String]) {
    item.tags.retain(|name, _| keep.iter().any(|k| k == name));
}

fn strip_group_tags(groups: GroupByResult, keep: &[String]) -> GroupByResult {
    let bags = groups.into_bags().into_iter()
        .map(|mut bag| {
            bag.items.iter_mut().for_each(|i| strip_tags(i, keep));
            bag
        })
        .collect();
    GroupByResult::from_sorted_bags(bags)
}
