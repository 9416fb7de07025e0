//! # index-query-engine
//!
//! 分布式二级索引查询引擎：一次查询覆盖分散在 N 个分区上的一组索引，
//! 按 IndexId 路由到所属分区，各分区解码自己的有序条目列表（过滤、边界
//! 裁剪、配额、分组），客户端再把各分区的部分结果合并成最终答案
//! （交集、并集分页或区间、分组、包含判定），同时保持全局上限和排序。
//! 单索引的首尾页与区间查询直接路由到唯一的所属分区，不经合并。
//!
//! ## 整体架构
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   LocalClusterEngine                         │
//! │                                                              │
//! │  Query ──► partitioner::split ──► 子查询 × 分区               │
//! │                                      │  (序列化往返)          │
//! │                                      ▼                       │
//! │               PartitionProcessor (每分区一个)                 │
//! │               ├─ IndexStore ── BinaryStore (64-shard)         │
//! │               │     └─ envelope (flags|len|lz4|crc32)         │
//! │               ├─ decoder   (Enter/Exit 边界、Filter、Cap、分组) │
//! │               └─ merge     (分区内有界归并 / 交集)             │
//! │                                      │  (序列化往返)          │
//! │                                      ▼                       │
//! │  merge::aggregate_* ──► assembler::finalize_paged ──► 结果    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! 所有线上类型都以「版本 + 最低可读版本 + 长度 + 字段」编码，字段表按引入
//! 版本声明一次，由 `codec` 中的通用例程读写；旧版本读取方跳过不认识的字段。

// ── 基础 ──────────────────────────────────────────────────────────────────────
pub mod common;
pub mod field_type;
pub mod codec;
pub mod comparer;
pub mod lookup;

// ── 数据模型 ──────────────────────────────────────────────────────────────────
pub mod item;
pub mod filter;
pub mod condition;
pub mod group;
pub mod config;

// ── 分区端 ────────────────────────────────────────────────────────────────────
pub mod index_format;
pub mod decoder;
pub mod store;
pub mod processor;

// ── 查询、合并与组装 ──────────────────────────────────────────────────────────
pub mod partitioner;
pub mod query;
pub mod merge;
pub mod assembler;
pub mod engine;

pub use common::{IndexId, ItemId, PartitionId, PrimaryId, QueryError, Result, TypeId};
pub use engine::LocalClusterEngine;
