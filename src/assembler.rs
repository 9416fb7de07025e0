//! 结果组装：结果窗口、客户端截取与头信息裁剪

use std::collections::BTreeMap;

use crate::partitioner::SplitInfo;
use crate::query::paged::{PagedIndexQuery, PagedIndexQueryResult, CORRECT_SERVER_SIDE_PAGING_VERSION};
use crate::query::{IndexHeaderType, IndexHeaders};

// ── 结果窗口 ──────────────────────────────────────────────────────────────────

/// 合并后返回给调用方的区间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultWindow {
    All,
    /// 第 `num` 页（从 1 开始），每页 `size` 条
    Page { num: i32, size: i32 },
    /// 从第 `offset` 条（从 1 开始）起取 `span` 条
    Span { offset: i32, span: i32 },
}

impl ResultWindow {
    /// `num` 或 `size` 不为正时不分页
    pub fn page(num: i32, size: i32) -> Self {
        if num <= 0 || size <= 0 { Self::All } else { Self::Page { num, size } }
    }

    /// `span` 为 0 时返回全部
    pub fn span(offset: i32, span: i32) -> Self {
        if span == 0 { Self::All } else { Self::Span { offset, span } }
    }

    pub fn is_all(&self) -> bool { matches!(self, Self::All) }

    /// 归并时最多保留的条目（或分组）数
    pub fn max_merge_count(&self) -> i32 {
        match *self {
            Self::All                   => i32::MAX,
            Self::Page { num, size }    => num.saturating_mul(size).max(0),
            Self::Span { offset, span } => (offset.max(1) - 1).saturating_add(span).max(0),
        }
    }

    /// 在长度为 `len` 的列表中的 `[start, end)`
    pub fn bounds(&self, len: usize) -> (usize, usize) {
        match *self {
            Self::All                   => (0, len),
            Self::Page { num, size }    => page_slice(num, size, len),
            Self::Span { offset, span } => {
                let start = ((offset.max(1) - 1) as usize).min(len);
                (start, start.saturating_add(span.max(0) as usize).min(len))
            }
        }
    }
}

/// 第 `page_num` 页（从 1 开始）在长度为 `len` 的列表中的区间
pub fn page_slice(page_num: i32, page_size: i32, len: usize) -> (usize, usize) {
    let start = (page_num.max(1) as i64 - 1) * page_size.max(0) as i64;
    let end = page_num.max(1) as i64 * page_size.max(0) as i64;
    let start = (start.max(0) as usize).min(len);
    let end = (end.max(0) as usize).min(len);
    (start, end.max(start))
}

/// 是否需要在客户端截取结果窗口。
///
/// 旧版本分区回传的 `client_side_paging` 不可信：只要拆到了多个分区就截取
pub fn should_page_client_side(
    result_version:     u8,
    num_partitions:     u32,
    client_side_paging: bool,
    window:             ResultWindow,
) -> bool {
    if window.is_all() {
        return false;
    }
    if result_version < CORRECT_SERVER_SIDE_PAGING_VERSION {
        num_partitions > 1
    } else {
        client_side_paging
    }
}

/// 只保留 `index_ids` 中出现过的头信息；结果为空时返回 None
pub fn restrict_headers<'a>(
    headers:   IndexHeaders,
    index_ids: impl IntoIterator<Item = &'a [u8]>,
) -> Option<IndexHeaders> {
    let mut kept = BTreeMap::new();
    let mut headers = headers;
    for id in index_ids {
        if let Some(h) = headers.remove(id) {
            kept.insert(id.to_vec(), h);
        }
    }
    if kept.is_empty() { None } else { Some(kept) }
}

/// 合并结果的最后一步：按需截取结果窗口并裁剪头信息
pub fn finalize_paged(
    query:         &PagedIndexQuery,
    window:        ResultWindow,
    mut merged:    PagedIndexQueryResult,
    partial_count: usize,
) -> PagedIndexQueryResult {
    let client_side_paging = query.client_side_paging
        || SplitInfo {
            num_partitions:  query.num_partitions,
            used_partitions: partial_count,
            index_id_count:  query.index_id_list.len(),
        }.needs_client_side_processing();

    if !should_page_client_side(merged.wire_version, query.num_partitions, client_side_paging, window) {
        return merged;
    }

    if query.group_by.is_none() {
        let (start, end) = window.bounds(merged.result_items.len());
        merged.result_items.truncate(end);
        merged.result_items.drain(..start);
    } else if let Some(groups) = merged.group_by_result.take() {
        let (start, end) = window.bounds(groups.len());
        merged.group_by_result = Some(groups.page(start, end));
    }

    if partial_count != 1 && query.index_header_type == IndexHeaderType::ResultItemsIndexIds {
        if let Some(headers) = merged.index_headers.take() {
            merged.index_headers = match &merged.group_by_result {
                Some(groups) if query.group_by.is_some() => restrict_headers(headers, groups.index_ids()),
                _ => restrict_headers(headers, merged.result_items.iter().map(|i| i.index_id.as_slice())),
            };
        }
    }

    tracing::debug!(
        ?window,
        returned = merged.count(),
        "client side window applied",
    );
    merged
}
