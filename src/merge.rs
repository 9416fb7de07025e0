//! 合并引擎：交集、有界归并、分组袋归并与跨分区聚合
//!
//! 所有算法都假设输入已按同一排序规则有序，不做校验。

use std::cmp::Ordering;

use crate::comparer::{lower_bound, ItemComparer};
use crate::common::Result;
use crate::group::{compare_bags, GroupByResult};
use crate::item::ResultItem;
use crate::query::contains::ContainsQueryResult;
use crate::query::intersection::IntersectionQueryResult;
use crate::query::paged::PagedIndexQueryResult;
use crate::query::{append_exception, merge_headers};

// ── 交集 ──────────────────────────────────────────────────────────────────────

/// 两两求交。按 ItemId 排序且没有本地身份标签时走双指针；
/// 否则排序键相等并不代表同一条目，需要再比对身份
#[derive(Debug, Clone)]
pub struct Intersector {
    cmp:            ItemComparer,
    local_identity: Vec<String>,
}

impl Intersector {
    pub fn new(cmp: ItemComparer, local_identity: Vec<String>) -> Self {
        Self { cmp, local_identity }
    }

    fn by_identity(&self) -> bool {
        self.cmp.sort_info().is_tag || !self.local_identity.is_empty()
    }

    /// 求交两个有序列表，结果取自较小的一侧。
    /// `max_items` 只在 `is_last` 时生效：中间轮截断会让后续交集漏掉匹配
    pub fn intersect(
        &self,
        left:      Vec<ResultItem>,
        right:     Vec<ResultItem>,
        max_items: usize,
        is_last:   bool,
    ) -> Result<Vec<ResultItem>> {
        let (small, large) = if right.len() < left.len() { (right, left) } else { (left, right) };
        let cap = if is_last && max_items > 0 { max_items } else { usize::MAX };
        if self.by_identity() {
            self.intersect_by_identity(small, &large, cap)
        } else {
            self.intersect_sorted(small, &large, cap)
        }
    }

    /// 依次求交全部列表，上限只作用于最后一轮
    pub fn intersect_all(&self, lists: Vec<Vec<ResultItem>>, max_items: usize) -> Result<Vec<ResultItem>> {
        let passes = lists.len().saturating_sub(1);
        let mut iter = lists.into_iter();
        let Some(mut acc) = iter.next() else { return Ok(vec![]) };
        if passes == 0 && max_items > 0 {
            acc.truncate(max_items);
        }
        for (pass, next) in iter.enumerate() {
            if acc.is_empty() {
                break;
            }
            acc = self.intersect(acc, next, max_items, pass + 1 == passes)?;
        }
        Ok(acc)
    }

    fn intersect_sorted(&self, left: Vec<ResultItem>, right: &[ResultItem], cap: usize) -> Result<Vec<ResultItem>> {
        let mut out = Vec::with_capacity(left.len().min(right.len()));
        let mut j = 0;
        for item in left {
            if out.len() >= cap || j >= right.len() {
                break;
            }
            loop {
                match self.cmp.compare(&item, &right[j])? {
                    Ordering::Equal => {
                        out.push(item);
                        j += 1;
                        break;
                    }
                    Ordering::Greater => {
                        j += 1;
                        if j >= right.len() {
                            break;
                        }
                    }
                    Ordering::Less => break,
                }
            }
        }
        Ok(out)
    }

    fn intersect_by_identity(&self, small: Vec<ResultItem>, large: &[ResultItem], cap: usize) -> Result<Vec<ResultItem>> {
        let mut out = Vec::new();
        for item in small {
            if out.len() >= cap {
                break;
            }
            let key = self.cmp.sort_key(&item);
            let start = lower_bound(large, &key, |x, k| self.cmp.compare_keys(self.cmp.sort_key(x), *k))?;
            let mut hit = false;
            for candidate in &large[start..] {
                if self.cmp.compare_keys(self.cmp.sort_key(candidate), key)? != Ordering::Equal {
                    break;
                }
                if self.same_identity(&item, candidate) {
                    hit = true;
                    break;
                }
            }
            if hit {
                out.push(item);
            }
        }
        Ok(out)
    }

    fn same_identity(&self, a: &ResultItem, b: &ResultItem) -> bool {
        if self.local_identity.is_empty() {
            a.item_id == b.item_id
        } else {
            self.local_identity.iter().all(|t| a.tag(t) == b.tag(t))
        }
    }
}

// ── 有界归并 ──────────────────────────────────────────────────────────────────

/// 二路归并，合并长度达到 `max` 即停止；头部相等时先取 `a`
pub fn merge_item_lists(
    a:   Vec<ResultItem>,
    b:   Vec<ResultItem>,
    max: usize,
    cmp: &ItemComparer,
) -> Result<Vec<ResultItem>> {
    let cap = (a.len() + b.len()).min(max);
    if b.is_empty() || a.is_empty() {
        let mut rest = if a.is_empty() { b } else { a };
        rest.truncate(cap);
        return Ok(rest);
    }

    let mut out = Vec::with_capacity(cap);
    let mut a = a.into_iter().peekable();
    let mut b = b.into_iter().peekable();
    while out.len() < cap {
        let take_a = match (a.peek(), b.peek()) {
            (Some(x), Some(y)) => cmp.compare(x, y)? != Ordering::Greater,
            (Some(_), None)    => true,
            (None, Some(_))    => false,
            (None, None)       => break,
        };
        let next = if take_a { a.next() } else { b.next() };
        out.extend(next);
    }
    Ok(out)
}

/// 与条目归并相同，单位换成整袋；两侧同键的袋合并为一个
pub fn merge_group_results(
    a:   GroupByResult,
    b:   GroupByResult,
    max: usize,
    cmp: &ItemComparer,
) -> Result<GroupByResult> {
    if b.is_empty() || a.is_empty() {
        let rest = if a.is_empty() { b } else { a };
        return Ok(rest.page(0, max));
    }

    let mut out = GroupByResult::new();
    let mut a = a.into_bags().into_iter().peekable();
    let mut b = b.into_bags().into_iter().peekable();
    loop {
        let take_a = match (a.peek(), b.peek()) {
            (Some(x), Some(y)) => compare_bags(cmp, x, y)? != Ordering::Greater,
            (Some(_), None)    => true,
            (None, Some(_))    => false,
            (None, None)       => break,
        };
        let Some(bag) = (if take_a { a.next() } else { b.next() }) else { break };
        if !out.contains_key(&bag.composite_key) && out.len() >= max {
            break;
        }
        out.add_bag(bag, cmp)?;
    }
    Ok(out)
}

// ── 跨分区聚合 ────────────────────────────────────────────────────────────────

/// 分页查询的部分结果合并：计数相加、头信息按键合并、异常文本拼接、条目有界归并。
/// 缺失的分区跳过
pub fn aggregate_paged(
    partials:                Vec<Option<PagedIndexQueryResult>>,
    max_merge_count:         usize,
    get_pageable_item_count: bool,
) -> Result<PagedIndexQueryResult> {
    let mut out = PagedIndexQueryResult::default();
    let mut wire_version: Option<u8> = None;
    let mut cmp: Option<ItemComparer> = None;
    let mut answered = 0usize;

    for partial in partials.into_iter().flatten() {
        answered += 1;
        wire_version = Some(wire_version.map_or(partial.wire_version, |v| v.min(partial.wire_version)));

        out.total_count = out.total_count.saturating_add(partial.total_count);
        if get_pageable_item_count {
            out.additional_available_item_count = out.additional_available_item_count
                .saturating_add(partial.additional_available_item_count);
        }
        if cmp.is_none() && !partial.sort_orders.is_empty() {
            out.set_sort_info(&partial.sort_info());
            out.index_cap = partial.index_cap;
            cmp = Some(ItemComparer::new(partial.sort_info()));
        }
        merge_headers(&mut out.index_headers, partial.index_headers);
        append_exception(&mut out.exception_info, partial.exception_info.as_deref());

        let Some(cmp) = cmp.as_ref() else { continue };
        if !partial.result_items.is_empty() {
            let items = std::mem::take(&mut out.result_items);
            out.result_items = merge_item_lists(items, partial.result_items, max_merge_count, cmp)?;
        }
        if let Some(groups) = partial.group_by_result {
            out.group_by_result = Some(match out.group_by_result.take() {
                Some(acc) => merge_group_results(acc, groups, max_merge_count, cmp)?,
                None      => groups.page(0, max_merge_count),
            });
        }
    }

    out.wire_version = wire_version.unwrap_or(0);
    tracing::debug!(
        answered,
        total_count = out.total_count,
        merged      = out.count(),
        "aggregated paged results",
    );
    Ok(out)
}

/// 交集查询的部分结果合并。任一分区缺失或为空则整体为空，只保留已累积的异常文本
pub fn aggregate_intersection(
    partials:         Vec<Option<IntersectionQueryResult>>,
    max_result_items: i32,
) -> Result<IntersectionQueryResult> {
    if partials.len() == 1 {
        if let Some(Some(only)) = partials.into_iter().next() {
            return Ok(only);
        }
        return Ok(IntersectionQueryResult::default());
    }

    let mut out = IntersectionQueryResult::default();
    let mut lists = Vec::with_capacity(partials.len());
    for (i, partial) in partials.into_iter().enumerate() {
        let Some(partial) = partial else {
            tracing::warn!(partial = i, "intersection partial missing, result is empty");
            return Ok(IntersectionQueryResult { exception_info: out.exception_info, ..Default::default() });
        };
        append_exception(&mut out.exception_info, partial.exception_info.as_deref());
        if partial.result_items.is_empty() {
            return Ok(IntersectionQueryResult { exception_info: out.exception_info, ..Default::default() });
        }
        if lists.is_empty() {
            out.set_sort_info(&partial.sort_info());
            out.local_identity_tag_names = partial.local_identity_tag_names.clone();
        }
        merge_headers(&mut out.index_headers, partial.index_headers);
        lists.push(partial.result_items);
    }

    let intersector = Intersector::new(ItemComparer::new(out.sort_info()), out.local_identity_tag_names.clone());
    out.result_items = intersector.intersect_all(lists, max_result_items.max(0) as usize)?;
    if out.result_items.is_empty() {
        out.index_headers = None;
    }
    Ok(out)
}

/// 包含查询的部分结果直接拼接
pub fn aggregate_contains(partials: Vec<Option<ContainsQueryResult>>) -> ContainsQueryResult {
    let mut out = ContainsQueryResult::default();
    for partial in partials.into_iter().flatten() {
        out.entries.extend(partial.entries);
        append_exception(&mut out.exception_info, partial.exception_info.as_deref());
    }
    out
}
