//! # index-query-engine 使用案例
//!
//! 1. 声明索引类型与排序
//! 2. 启动 4 分区本地集群并写入索引
//! 3. 跨分区分页查询（带过滤、边界、TagSort）
//! 4. 分组查询
//! 5. 交集与包含查询
//! 6. 区间与单索引首尾页查询

use index_query_engine::{
    condition::{CapCondition, FilterCap, IndexCondition},
    config::{IndexConfig, IndexTypeMapping, IndexTypeMappingCollection},
    field_type::{DataType, PrimarySortInfo, SortOrder, TagSort, Value},
    filter::{Condition, Filter, Operation},
    group::GroupBy,
    index_format::StoredIndex,
    item::ResultItem,
    query::{
        contains::ContainsQuery, first_last::FirstLastQuery, intersection::IntersectionQuery,
        paged::PagedIndexQuery, span::SpanQuery, IndexHeaderType,
    },
    LocalClusterEngine, Result,
};

const ORDERS: i16 = 1;

fn order(id: i32, amount: i32, status: &str) -> ResultItem {
    ResultItem::new(b"", &id.to_le_bytes())
        .with_tag("amount", Value::Int32(amount).to_bytes())
        .with_tag("status", status)
}

fn show(items: &[ResultItem]) -> String {
    items.iter()
        .map(|i| {
            let id = i32::from_le_bytes(i.item_id[..4].try_into().unwrap_or_default());
            let amount = i.tag("amount").map_or(0, |a| i32::from_le_bytes(a.try_into().unwrap_or_default()));
            format!("#{id}({amount})")
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn main() -> Result<()> {
    println!("═══════════════════════════════════════════════════════════");
    println!("   index-query-engine 演示                                  ");
    println!("═══════════════════════════════════════════════════════════\n");

    // =========================================================================
    // 1. 索引类型：按金额降序 / 按订单号升序
    // =========================================================================
    println!("【1】声明索引类型 `orders` ...");
    let by_amount = IndexConfig::new("by_amount", 1, PrimarySortInfo::by_tag("amount", vec![SortOrder::desc(DataType::Int32)]))
        .with_string_hash_tags(&["status"])
        .with_max_index_size(1000);
    let by_id = IndexConfig::new("by_id", 2, PrimarySortInfo::by_item_id(vec![SortOrder::asc(DataType::Int32)]));
    let mappings = IndexTypeMappingCollection::new()
        .with_mapping(IndexTypeMapping::new(ORDERS, "orders").with_index(by_amount).with_index(by_id));
    println!("    ✓ by_amount (amount DESC), by_id (ItemId ASC)\n");

    // =========================================================================
    // 2. 启动集群，每个用户一个索引
    // =========================================================================
    println!("【2】启动 4 分区集群并写入 6 个用户的订单索引 ...");
    let engine = LocalClusterEngine::new(4, mappings)?;
    let statuses = ["paid", "shipped", "refunded"];
    let users: Vec<Vec<u8>> = (1..=6).map(|u: i32| (1000 + u).to_le_bytes().to_vec()).collect();
    for (u, user) in users.iter().enumerate() {
        let orders: Vec<ResultItem> = (0..8)
            .map(|j| {
                let id = (u as i32) * 100 + j;
                order(id, (id * 37) % 500, statuses[(j % 3) as usize])
            })
            .collect();
        let ids: Vec<i32> = orders.iter().map(|o| i32::from_le_bytes(o.item_id[..4].try_into().unwrap_or_default())).collect();
        engine.save_index(ORDERS, "by_amount", user, StoredIndex::new(orders))?;
        let by_id_items = ids.iter().filter(|id| *id % 2 == 0).map(|id| ResultItem::new(b"", &id.to_le_bytes())).collect();
        engine.save_index(ORDERS, "by_id", user, StoredIndex::new(by_id_items))?;
        println!("    user {} → partition {}", 1001 + u, engine.partition_for(user));
    }
    println!();

    // =========================================================================
    // 3. 分页查询
    // =========================================================================
    println!("【3】跨分区分页：金额最高的订单，每页 5 条 ...");
    for page in 1..=2 {
        let q = PagedIndexQuery::new("by_amount", users.clone())
            .with_page(page, 5)
            .with_header_type(IndexHeaderType::ResultItemsIndexIds);
        let r = engine.execute_paged(ORDERS, &q)?;
        println!("    page {page}: {}  (total={}, headers={})",
            show(&r.result_items), r.total_count, r.index_headers.map_or(0, |h| h.len()));
    }

    let paid = Filter::Condition(Condition::new("status", Operation::Equals, b"paid".to_vec(), DataType::String));
    let q = PagedIndexQuery::new("by_amount", users.clone())
        .with_page(1, 5)
        .with_filter(paid)
        .with_pageable_item_count()
        .with_index_condition(IndexCondition::between(Some(Value::Int32(100).to_bytes()), Some(Value::Int32(400).to_bytes())));
    let r = engine.execute_paged(ORDERS, &q)?;
    println!("    paid, 100 ≤ amount ≤ 400: {}  (pageable={})", show(&r.result_items), r.additional_available_item_count);

    let q = PagedIndexQuery::new("by_amount", users.clone())
        .with_page(1, 5)
        .with_tag_sort(TagSort::new("ItemId", SortOrder::asc(DataType::Int32)));
    println!("    按订单号排序: {}", show(&engine.execute_paged(ORDERS, &q)?.result_items));

    let cap = CapCondition::new("status").with_cap(b"refunded".to_vec(), FilterCap::new(1));
    let q = PagedIndexQuery::new("by_amount", users.clone()).with_page(1, 10).with_cap_condition(cap);
    println!("    每分区最多 1 个 refunded: {}\n", show(&engine.execute_paged(ORDERS, &q)?.result_items));

    // =========================================================================
    // 4. 分组
    // =========================================================================
    println!("【4】按状态分组 ...");
    let q = PagedIndexQuery::new("by_amount", users.clone()).with_group_by(GroupBy::by_fields(&["status"]));
    if let Some(groups) = engine.execute_paged(ORDERS, &q)?.group_by_result {
        for bag in groups.bags() {
            println!("    {:<9} {} 条, 最高 {}", String::from_utf8_lossy(&bag.composite_key), bag.items.len(), show(&bag.items[..1]));
        }
    }
    println!();

    // =========================================================================
    // 5. 交集与包含
    // =========================================================================
    println!("【5】交集与包含 ...");
    let r = engine.execute_intersection(ORDERS, &IntersectionQuery::new("by_id", users[..2].to_vec()))?;
    println!("    user 1001 ∩ 1002 (by_id): {} 条", r.result_items.len());

    let wanted = vec![0i32.to_le_bytes().to_vec(), 102i32.to_le_bytes().to_vec()];
    let r = engine.execute_contains(ORDERS, &ContainsQuery::new("by_amount", users[..2].to_vec(), wanted))?;
    for e in &r.entries {
        println!("    index {:?}: exists={} size={} hits={}", e.index_id, e.index_exists, e.index_size, show(&e.items));
    }

    // =========================================================================
    // 6. 区间与首尾页
    // =========================================================================
    println!("\n【6】区间与首尾页 ...");
    let r = engine.execute_span(ORDERS, &SpanQuery::new("by_amount", users.clone(), 3, 4))?;
    println!("    第 3 名起 4 条: {}", show(&r.result_items));

    let r = engine.execute_first_last(ORDERS, &FirstLastQuery::new("by_amount", &users[0], 2, 2).with_metadata())?;
    println!("    user 1001 最高 {} / 最低 {}  (size={})", show(&r.first_page), show(&r.last_page), r.index_size);

    println!("\n✓ 演示完成");
    Ok(())
}
