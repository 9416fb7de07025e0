//! 端到端：写入索引 → 拆分 → 各分区处理 → 合并 → 组装

use std::collections::BTreeSet;

use index_query_engine::condition::IndexCondition;
use index_query_engine::config::{IndexConfig, IndexTypeMapping, IndexTypeMappingCollection};
use index_query_engine::field_type::{DataType, PrimarySortInfo, SortOrder, TagSort, Value};
use index_query_engine::filter::{Condition, Filter, Operation};
use index_query_engine::group::GroupBy;
use index_query_engine::index_format::StoredIndex;
use index_query_engine::item::ResultItem;
use index_query_engine::query::contains::ContainsQuery;
use index_query_engine::query::intersection::IntersectionQuery;
use index_query_engine::query::paged::PagedIndexQuery;
use index_query_engine::query::IndexHeaderType;
use index_query_engine::{IndexId, LocalClusterEngine, PrimaryId, TypeId};
use proptest::prelude::*;

const PHOTOS: TypeId = 7;
const COLORS: [&str; 3] = ["red", "green", "blue"];

fn mappings() -> IndexTypeMappingCollection {
    let by_score = IndexConfig::new("by_score", 1, PrimarySortInfo::by_tag("score", vec![SortOrder::desc(DataType::Int32)]))
        .with_string_hash_tags(&["color"]);
    let by_id = IndexConfig::new("by_id", 2, PrimarySortInfo::by_item_id(vec![SortOrder::asc(DataType::Int32)]));
    let by_sku = IndexConfig::new("by_sku", 3, PrimarySortInfo::by_item_id(vec![SortOrder::asc(DataType::Int32)]))
        .with_local_identity(&["sku"]);
    IndexTypeMappingCollection::new().with_mapping(
        IndexTypeMapping::new(PHOTOS, "photos").with_index(by_score).with_index(by_id).with_index(by_sku),
    )
}

/// 分数在 0..1000 上两两不同
fn score(item: i32) -> i32 { item * 7919 % 1000 }

fn color(item: i32) -> &'static str { COLORS[(item % 3) as usize] }

fn index_id(k: i32) -> IndexId { (100 + k).to_le_bytes().to_vec() }

fn members(k: i32) -> Vec<i32> { (0..5).map(|j| k * 10 + j).collect() }

fn photo(item: i32) -> ResultItem {
    ResultItem::new(b"", &item.to_le_bytes())
        .with_tag("score", Value::Int32(score(item)).to_bytes())
        .with_tag("color", color(item))
}

fn seeded(num_partitions: u32) -> LocalClusterEngine {
    let engine = LocalClusterEngine::new(num_partitions, mappings()).unwrap();
    for k in 0..8 {
        let items = members(k).into_iter().map(photo).collect();
        engine.save_index(PHOTOS, "by_score", &index_id(k), StoredIndex::new(items)).unwrap();
    }
    engine
}

fn ids(items: &[ResultItem]) -> Vec<i32> {
    items.iter().map(|i| i32::from_le_bytes(i.item_id[..4].try_into().unwrap())).collect()
}

fn expected_page(indexes: &[i32], page: i32, size: i32) -> Vec<i32> {
    let mut all: Vec<i32> = indexes.iter().flat_map(|&k| members(k)).collect();
    all.sort_by_key(|&i| std::cmp::Reverse(score(i)));
    all.into_iter().skip(((page - 1) * size) as usize).take(size as usize).collect()
}

fn paged(indexes: &[i32], page: i32, size: i32) -> PagedIndexQuery {
    PagedIndexQuery::new("by_score", indexes.iter().map(|&k| index_id(k)).collect()).with_page(page, size)
}

// ── 分页 ──────────────────────────────────────────────────────────────────────

#[test]
fn paged_query_matches_global_order() {
    let engine = seeded(3);
    let all: Vec<i32> = (0..8).collect();
    for page in 1..=4 {
        let r = engine.execute_paged(PHOTOS, &paged(&all, page, 7)).unwrap();
        assert!(r.exception_info.is_none());
        assert_eq!(ids(&r.result_items), expected_page(&all, page, 7), "page {page}");
        assert_eq!(r.total_count, 40);
        assert!(r.is_tag_primary_sort);
        assert_eq!(r.sort_field_name, "score");
    }
}

#[test]
fn string_hash_tags_are_expanded() {
    let engine = seeded(2);
    let r = engine.execute_paged(PHOTOS, &paged(&[0, 1], 1, 3)).unwrap();
    for item in &r.result_items {
        let id = i32::from_le_bytes(item.item_id[..4].try_into().unwrap());
        assert_eq!(item.tag("color"), Some(color(id).as_bytes()));
    }
}

#[test]
fn filter_and_pageable_count() {
    let engine = seeded(4);
    let red = Filter::Condition(Condition::new("color", Operation::Equals, b"red".to_vec(), DataType::String));
    let q = paged(&[0, 1, 2, 3], 1, 100).with_filter(red).with_pageable_item_count();
    let r = engine.execute_paged(PHOTOS, &q).unwrap();
    let expected: BTreeSet<i32> = (0..4).flat_map(members).filter(|&i| color(i) == "red").collect();
    assert_eq!(ids(&r.result_items).into_iter().collect::<BTreeSet<_>>(), expected);
    assert_eq!(r.additional_available_item_count, expected.len() as i32);
    assert_eq!(r.total_count, 20);
}

#[test]
fn index_condition_bounds_the_sort_field() {
    let engine = seeded(3);
    let cond = IndexCondition::between(Some(Value::Int32(300).to_bytes()), Some(Value::Int32(600).to_bytes()));
    let q = PagedIndexQuery::new("by_score", (0..8).map(index_id).collect()).with_index_condition(cond);
    let r = engine.execute_paged(PHOTOS, &q).unwrap();
    let got = ids(&r.result_items);
    assert!(!got.is_empty());
    assert!(got.iter().all(|&i| (300..=600).contains(&score(i))));
    assert_eq!(got.len(), (0..80).filter(|&i| (300..=600).contains(&score(i))).count());
}

#[test]
fn tag_sort_overrides_native_order() {
    let engine = seeded(2);
    let q = paged(&[0, 3, 5], 1, 4).with_tag_sort(TagSort::new("ItemId", SortOrder::asc(DataType::Int32)));
    let r = engine.execute_paged(PHOTOS, &q).unwrap();
    assert_eq!(ids(&r.result_items), vec![0, 1, 2, 3]);
    assert!(!r.is_tag_primary_sort);
}

#[test]
fn group_by_color_across_partitions() {
    let engine = seeded(3);
    let q = PagedIndexQuery::new("by_score", (0..6).map(index_id).collect())
        .with_group_by(GroupBy::by_fields(&["color"]));
    let r = engine.execute_paged(PHOTOS, &q).unwrap();
    let groups = r.group_by_result.unwrap();
    assert_eq!(groups.len(), 3);
    assert_eq!(groups.item_count(), 30);
    for bag in groups.bags() {
        let scores: Vec<i32> = ids(&bag.items).into_iter().map(score).collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
        assert!(bag.items.iter().all(|i| i.tag("color") == Some(&bag.composite_key[..])));
    }
    let firsts: Vec<i32> = groups.bags().iter().map(|b| score(ids(&b.items)[0])).collect();
    assert!(firsts.windows(2).all(|w| w[0] >= w[1]));
}

/// 分组各自落在指定分区：20 全红，21 全绿，22 全蓝，23 绿 13、红 15。
/// 21 与 23 同在分区 1
fn seeded_groups() -> (LocalClusterEngine, Vec<IndexId>, Vec<PrimaryId>) {
    let engine = LocalClusterEngine::new(3, mappings()).unwrap();
    let layout: [(i32, PrimaryId, &[i32]); 4] = [(20, 0, &[0, 3, 6]), (21, 1, &[1, 4, 7]), (22, 2, &[2, 5, 8]), (23, 4, &[13, 15])];
    for (k, primary, list) in layout {
        let items = list.iter().copied().map(photo).collect();
        engine.save_index_at(PHOTOS, primary, "by_score", &index_id(k), StoredIndex::new(items)).unwrap();
    }
    (engine, layout.iter().map(|l| index_id(l.0)).collect(), layout.iter().map(|l| l.1).collect())
}

#[test]
fn grouped_pages_merge_bags_across_partitions() {
    let (engine, list, primaries) = seeded_groups();
    let grouped = |page, size| {
        PagedIndexQuery::new("by_score", list.clone())
            .with_primary_ids(primaries.clone())
            .with_group_by(GroupBy::by_fields(&["color"]))
            .with_header_type(IndexHeaderType::ResultItemsIndexIds)
            .with_page(page, size)
    };

    let r = engine.execute_paged(PHOTOS, &grouped(1, 2)).unwrap();
    assert!(r.exception_info.is_none());
    assert_eq!(r.total_count, 11);
    let groups = r.group_by_result.unwrap();
    assert_eq!(groups.len(), 2);
    let bags: Vec<Vec<i32>> = groups.bags().iter().map(|b| ids(&b.items)).collect();
    // 绿袋由分区 1 的两个索引合成，按分数降序
    assert_eq!(bags, vec![vec![13, 1, 4, 7], vec![2, 5, 8]]);
    for bag in groups.bags() {
        let members = ids(&bag.items);
        assert!(members.iter().all(|&i| color(i) == color(members[0])));
        assert!(members.windows(2).all(|w| score(w[0]) > score(w[1])));
    }
    let headers: BTreeSet<IndexId> = r.index_headers.unwrap().into_keys().collect();
    assert_eq!(headers, [21, 22, 23].into_iter().map(index_id).collect::<BTreeSet<_>>());

    // 第二页只剩红袋，分区 0 与分区 1 的红色条目合为一袋
    let r = engine.execute_paged(PHOTOS, &grouped(2, 2)).unwrap();
    let groups = r.group_by_result.unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(ids(&groups.bags()[0].items), vec![15, 3, 6, 0]);
    let headers: BTreeSet<IndexId> = r.index_headers.unwrap().into_keys().collect();
    assert_eq!(headers, [20, 23].into_iter().map(index_id).collect::<BTreeSet<_>>());

    let r = engine.execute_paged(PHOTOS, &grouped(3, 2)).unwrap();
    assert!(r.group_by_result.map_or(true, |g| g.is_empty()));
}

#[test]
fn result_headers_follow_the_page() {
    let engine = seeded(3);
    let all: Vec<i32> = (0..8).collect();
    let q = paged(&all, 1, 2).with_header_type(IndexHeaderType::ResultItemsIndexIds);
    let r = engine.execute_paged(PHOTOS, &q).unwrap();
    let on_page: BTreeSet<IndexId> = r.result_items.iter().map(|i| i.index_id.clone()).collect();
    let headers: BTreeSet<IndexId> = r.index_headers.unwrap().into_keys().collect();
    assert_eq!(headers, on_page);
}

#[test]
fn old_peers_still_page_correctly() {
    let engine = seeded(3).with_reply_version(1);
    let all: Vec<i32> = (0..8).collect();
    let r = engine.execute_paged(PHOTOS, &paged(&all, 2, 5)).unwrap();
    assert_eq!(ids(&r.result_items), expected_page(&all, 2, 5));
    // v1 回复没有 IndexCap 字段
    assert_eq!(r.index_cap, 0);
}

#[test]
fn missing_partition_is_skipped_for_paging() {
    let engine = seeded(2);
    let all: Vec<i32> = (0..8).collect();
    engine.set_offline(engine.partition_for(&index_id(1)), true);
    let r = engine.execute_paged(PHOTOS, &paged(&all, 1, 50)).unwrap();
    let alive: Vec<i32> = all.iter().copied().filter(|&k| engine.partition_for(&index_id(k)) != engine.partition_for(&index_id(1))).collect();
    assert_eq!(ids(&r.result_items), expected_page(&alive, 1, 50));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn paging_is_independent_of_partition_count(
        chosen in proptest::sample::subsequence((0..8).collect::<Vec<i32>>(), 1..8),
        n in 1u32..6,
        page in 1i32..5,
        size in 1i32..7,
    ) {
        let engine = seeded(n);
        let r = engine.execute_paged(PHOTOS, &paged(&chosen, page, size)).unwrap();
        prop_assert_eq!(ids(&r.result_items), expected_page(&chosen, page, size));
        prop_assert_eq!(r.total_count, chosen.len() as i32 * 5);
    }
}

// ── 交集 ──────────────────────────────────────────────────────────────────────

fn seeded_sets(num_partitions: u32) -> LocalClusterEngine {
    let engine = LocalClusterEngine::new(num_partitions, mappings()).unwrap();
    let sets: [&[i32]; 4] = [&[1, 2, 3, 4, 5, 6, 8], &[2, 4, 6, 8, 10], &[0, 2, 4, 6, 7, 8], &[4, 6, 8, 9]];
    for (k, set) in sets.iter().enumerate() {
        let items = set.iter().map(|i| ResultItem::new(b"", &i.to_le_bytes())).collect();
        engine.save_index(PHOTOS, "by_id", &index_id(k as i32), StoredIndex::new(items)).unwrap();
    }
    engine
}

#[test]
fn intersection_across_partitions() {
    for n in 1..=4 {
        let engine = seeded_sets(n);
        let q = IntersectionQuery::new("by_id", (0..4).map(index_id).collect());
        let r = engine.execute_intersection(PHOTOS, &q).unwrap();
        assert_eq!(ids(&r.result_items), vec![4, 6, 8], "partitions {n}");

        let capped = engine.execute_intersection(PHOTOS, &q.clone().with_max_result_items(2)).unwrap();
        assert_eq!(ids(&capped.result_items), vec![4, 6], "partitions {n}");
    }
}

#[test]
fn intersection_with_missing_index_is_empty() {
    let engine = seeded_sets(3);
    let mut list: Vec<IndexId> = (0..3).map(index_id).collect();
    list.push(index_id(42));
    let r = engine.execute_intersection(PHOTOS, &IntersectionQuery::new("by_id", list)).unwrap();
    assert!(r.result_items.is_empty());
    assert!(r.index_headers.is_none());
}

#[test]
fn intersection_with_offline_partition_is_empty() {
    let engine = seeded_sets(2);
    engine.set_offline(1, true);
    let r = engine.execute_intersection(PHOTOS, &IntersectionQuery::new("by_id", (0..4).map(index_id).collect())).unwrap();
    assert!(r.result_items.is_empty());
}

// ── 包含 ──────────────────────────────────────────────────────────────────────

#[test]
fn contains_reports_every_index() {
    let engine = seeded_sets(3);
    let wanted = vec![2i32.to_le_bytes().to_vec(), 9i32.to_le_bytes().to_vec()];
    let list: Vec<IndexId> = vec![index_id(0), index_id(3), index_id(42)];
    let r = engine.execute_contains(PHOTOS, &ContainsQuery::new("by_id", list, wanted)).unwrap();
    assert_eq!(r.entries.len(), 3);

    let first = r.entry(&index_id(0)).unwrap();
    assert!(first.index_exists && first.contains(&2i32.to_le_bytes()) && !first.contains(&9i32.to_le_bytes()));
    let last = r.entry(&index_id(3)).unwrap();
    assert!(last.contains(&9i32.to_le_bytes()) && !last.contains(&2i32.to_le_bytes()));
    assert_eq!(last.index_size, 4);
    assert!(!r.entry(&index_id(42)).unwrap().index_exists);
}

// ── 指定 PrimaryId ────────────────────────────────────────────────────────────

/// 30 在分区 0、31 在分区 1；条目 2 的 ItemId 相同但 sku 不同
fn seeded_skus() -> LocalClusterEngine {
    let engine = LocalClusterEngine::new(2, mappings()).unwrap();
    let layout: [(i32, PrimaryId, [&str; 3]); 2] = [(30, 0, ["a", "b", "c"]), (31, 1, ["a", "x", "c"])];
    for (k, primary, skus) in layout {
        let items = skus.iter().enumerate()
            .map(|(i, sku)| ResultItem::new(b"", &(i as i32 + 1).to_le_bytes()).with_tag("sku", *sku))
            .collect();
        engine.save_index_at(PHOTOS, primary, "by_sku", &index_id(k), StoredIndex::new(items)).unwrap();
    }
    engine
}

#[test]
fn intersection_matches_on_local_identity() {
    let engine = seeded_skus();
    let q = IntersectionQuery::new("by_sku", vec![index_id(30), index_id(31)]).with_primary_ids(vec![0, 1]);
    let r = engine.execute_intersection(PHOTOS, &q).unwrap();
    assert!(r.exception_info.is_none());
    assert_eq!(ids(&r.result_items), vec![1, 3]);
    assert_eq!(r.local_identity_tag_names, vec!["sku".to_string()]);
}

#[test]
fn contains_follows_supplied_primary_ids() {
    let engine = seeded_skus();
    let wanted = vec![2i32.to_le_bytes().to_vec(), 7i32.to_le_bytes().to_vec()];
    let q = ContainsQuery::new("by_sku", vec![index_id(30), index_id(31)], wanted).with_primary_ids(vec![0, 1]);
    let r = engine.execute_contains(PHOTOS, &q).unwrap();
    for k in [30, 31] {
        let entry = r.entry(&index_id(k)).unwrap();
        assert!(entry.index_exists, "index {k}");
        assert!(entry.contains(&2i32.to_le_bytes()) && !entry.contains(&7i32.to_le_bytes()));
        assert_eq!(entry.index_size, 3);
    }
}
