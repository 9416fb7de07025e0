//! 单进程集群引擎
//!
//! 把拆分、分区处理、合并、组装串起来。子查询下发与部分结果回传都走一次
//! 序列化往返，等同于跨进程传输；分区可标记为离线以模拟缺失的部分结果。

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use crate::codec::{deserialize, serialize, serialize_at, Versioned};
use crate::common::{PartitionId, PrimaryId, QueryError, Result, TypeId};
use crate::config::IndexTypeMappingCollection;
use crate::index_format::StoredIndex;
use crate::item::IndexHeader;
use crate::lookup::{LookupServices, StringHashCollection, TagHashCollection};
use crate::partitioner::{generate_primary_id, partition_of, split, SplittableQuery};
use crate::processor::PartitionProcessor;
use crate::query::contains::{ContainsQuery, ContainsQueryResult};
use crate::query::first_last::{FirstLastQuery, FirstLastQueryResult};
use crate::query::get_range::{GetRangeQuery, GetRangeQueryResult};
use crate::query::intersection::{IntersectionQuery, IntersectionQueryResult};
use crate::query::paged::{PagedIndexQuery, PagedIndexQueryResult};
use crate::query::span::{SpanQuery, SpanQueryResult};
use crate::store::{IndexStore, MemoryBinaryStore};

/// 固定分区数的本地集群
pub struct LocalClusterEngine {
    partitions:    Vec<PartitionProcessor>,
    mappings:      Arc<IndexTypeMappingCollection>,
    tags:          Arc<TagHashCollection>,
    strings:       Arc<StringHashCollection>,
    offline:       RwLock<HashSet<PartitionId>>,
    /// 分区以旧版本序列化回复（兼容性验证）
    reply_version: Option<u8>,
}

impl LocalClusterEngine {
    /// 每个分区一个独立的内存存储
    pub fn new(num_partitions: u32, mappings: IndexTypeMappingCollection) -> Result<Self> {
        if num_partitions == 0 {
            return Err(QueryError::InvalidQuery("num_partitions must be > 0".into()));
        }
        let mappings = Arc::new(mappings);
        let (services, tags, strings) = LookupServices::in_memory();
        let partitions = (0..num_partitions)
            .map(|p| {
                let store = IndexStore::new(Arc::new(MemoryBinaryStore::new()));
                PartitionProcessor::new(p, store, mappings.clone(), services.clone())
            })
            .collect();
        tracing::info!(num_partitions, "local cluster started");
        Ok(Self {
            partitions,
            mappings,
            tags,
            strings,
            offline: RwLock::new(HashSet::new()),
            reply_version: None,
        })
    }

    pub fn with_reply_version(mut self, version: u8) -> Self {
        self.reply_version = Some(version);
        self
    }

    pub fn num_partitions(&self) -> u32 { self.partitions.len() as u32 }

    pub fn partition_for(&self, index_id: &[u8]) -> PartitionId {
        partition_of(generate_primary_id(index_id), self.num_partitions())
    }

    pub fn set_offline(&self, partition: PartitionId, offline: bool) {
        let mut set = self.offline.write().unwrap();
        if offline {
            set.insert(partition);
        } else {
            set.remove(&partition);
        }
    }

    fn is_offline(&self, partition: PartitionId) -> bool {
        self.offline.read().unwrap().contains(&partition)
    }

    fn processor(&self, partition: PartitionId) -> Result<&PartitionProcessor> {
        self.partitions.get(partition as usize)
            .ok_or_else(|| QueryError::InvalidQuery(format!("no partition {partition}")))
    }

    // ── 写入 ──────────────────────────────────────────────────────────────────

    /// 保存索引：登记标签名、展开为字符串哈希的标签值，按 IndexId 路由
    pub fn save_index(&self, type_id: TypeId, index_name: &str, index_id: &[u8], index: StoredIndex) -> Result<()> {
        self.save_index_at(type_id, generate_primary_id(index_id), index_name, index_id, index)
    }

    /// 以调用方给出的 PrimaryId 保存（查询时须同样提供 PrimaryId 列表）
    pub fn save_index_at(
        &self,
        type_id:    TypeId,
        primary_id: PrimaryId,
        index_name: &str,
        index_id:   &[u8],
        mut index:  StoredIndex,
    ) -> Result<()> {
        let config = self.mappings.index(type_id, index_name)?;
        for item in &mut index.items {
            for (name, value) in item.tags.iter_mut() {
                self.tags.register(type_id, name);
                if config.string_hash_tags.contains(name) {
                    *value = self.strings.intern(type_id, value).to_vec();
                }
            }
        }
        let partition = partition_of(primary_id, self.num_partitions());
        self.processor(partition)?.save_index(type_id, primary_id, index_name, index_id, index)
    }

    pub fn delete_index(&self, type_id: TypeId, index_name: &str, index_id: &[u8]) -> Result<bool> {
        let primary_id = generate_primary_id(index_id);
        let partition = partition_of(primary_id, self.num_partitions());
        self.processor(partition)?.delete_index(type_id, primary_id, index_name, index_id)
    }

    pub fn read_header(&self, type_id: TypeId, index_name: &str, index_id: &[u8]) -> Result<Option<IndexHeader>> {
        let primary_id = generate_primary_id(index_id);
        let partition = partition_of(primary_id, self.num_partitions());
        self.processor(partition)?.read_header(type_id, primary_id, index_name, index_id)
    }

    // ── 查询 ──────────────────────────────────────────────────────────────────

    pub fn execute_paged(&self, type_id: TypeId, query: &PagedIndexQuery) -> Result<PagedIndexQueryResult> {
        let query = PagedIndexQuery { num_partitions: self.num_partitions(), ..query.clone() };
        let partials = self.dispatch(&query, |p, q| p.process_paged(type_id, q))?;
        query.merge_results(partials)
    }

    pub fn execute_intersection(&self, type_id: TypeId, query: &IntersectionQuery) -> Result<IntersectionQueryResult> {
        let partials = self.dispatch(query, |p, q| p.process_intersection(type_id, q))?;
        query.merge_results(partials)
    }

    pub fn execute_contains(&self, type_id: TypeId, query: &ContainsQuery) -> Result<ContainsQueryResult> {
        let partials = self.dispatch(query, |p, q| p.process_contains(type_id, q))?;
        Ok(query.merge_results(partials))
    }

    pub fn execute_span(&self, type_id: TypeId, query: &SpanQuery) -> Result<SpanQueryResult> {
        query.validate()?;
        let mut query = query.clone();
        query.query.num_partitions = self.num_partitions();
        let partials = self.dispatch(&query, |p, q| p.process_span(type_id, q))?;
        query.merge_results(partials)
    }

    /// 单索引查询只落到一个分区，不做合并
    pub fn execute_first_last(&self, type_id: TypeId, query: &FirstLastQuery) -> Result<FirstLastQueryResult> {
        let partition = partition_of(query.selection.primary_id(), self.num_partitions());
        self.call(partition, query, |p, q| p.process_first_last(type_id, q))?
            .ok_or(QueryError::PartitionUnavailable(partition))
    }

    pub fn execute_get_range(&self, type_id: TypeId, query: &GetRangeQuery) -> Result<GetRangeQueryResult> {
        let partition = partition_of(query.selection.primary_id(), self.num_partitions());
        self.call(partition, query, |p, q| p.process_get_range(type_id, q))?
            .ok_or(QueryError::PartitionUnavailable(partition))
    }

    /// 拆分后逐个分区执行；离线分区的部分结果为 None
    fn dispatch<Q, R>(&self, query: &Q, run: impl Fn(&PartitionProcessor, &Q) -> R) -> Result<Vec<Option<R>>>
    where
        Q: SplittableQuery + Versioned,
        R: Versioned,
    {
        split(query, self.num_partitions())?
            .into_iter()
            .map(|sub| self.call(sub.partition().unwrap_or_default(), &sub, &run))
            .collect()
    }

    /// 子查询下发与回复各走一次序列化往返；分区离线时返回 None
    fn call<Q, R>(&self, partition: PartitionId, query: &Q, run: impl Fn(&PartitionProcessor, &Q) -> R) -> Result<Option<R>>
    where
        Q: Versioned,
        R: Versioned,
    {
        if self.is_offline(partition) {
            tracing::warn!(partition, query = Q::TYPE_NAME, "partition offline, partial result missing");
            return Ok(None);
        }
        let received: Q = deserialize(&serialize(query)?)?;
        let reply = run(self.processor(partition)?, &received);
        let bytes = match self.reply_version {
            Some(v) => serialize_at(&reply, v.min(R::CURRENT_VERSION))?,
            None    => serialize(&reply)?,
        };
        Ok(Some(deserialize(&bytes)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IndexConfig, IndexTypeMapping};
    use crate::field_type::{DataType, PrimarySortInfo, SortOrder, Value};
    use crate::item::ResultItem;

    fn engine(n: u32) -> LocalClusterEngine {
        let cfg = IndexConfig::new("by_rank", 1, PrimarySortInfo::by_tag("rank", vec![SortOrder::asc(DataType::Int32)]))
            .with_string_hash_tags(&["title"]);
        let mappings = IndexTypeMappingCollection::new()
            .with_mapping(IndexTypeMapping::new(1, "docs").with_index(cfg));
        LocalClusterEngine::new(n, mappings).unwrap()
    }

    fn doc(id: u8, rank: i32, title: &str) -> ResultItem {
        ResultItem::new(b"", &[id]).with_tag("rank", Value::Int32(rank).to_bytes()).with_tag("title", title)
    }

    #[test]
    fn zero_partitions_rejected() {
        assert!(LocalClusterEngine::new(0, IndexTypeMappingCollection::new()).is_err());
    }

    #[test]
    fn string_hash_tags_round_trip_through_save() {
        let e = engine(3);
        e.save_index(1, "by_rank", &[4], StoredIndex::new(vec![doc(1, 2, "a long title")])).unwrap();
        let r = e.execute_paged(1, &PagedIndexQuery::new("by_rank", vec![vec![4]])).unwrap();
        assert_eq!(r.result_items[0].tag("title"), Some(&b"a long title"[..]));
        assert_eq!(r.result_items[0].index_id, vec![4]);
    }

    #[test]
    fn offline_partition_is_skipped() {
        let e = engine(2);
        e.save_index(1, "by_rank", &[2], StoredIndex::new(vec![doc(1, 1, "x")])).unwrap();
        e.save_index(1, "by_rank", &[3], StoredIndex::new(vec![doc(2, 2, "y")])).unwrap();
        e.set_offline(e.partition_for(&[3]), true);
        let r = e.execute_paged(1, &PagedIndexQuery::new("by_rank", vec![vec![2], vec![3]])).unwrap();
        assert_eq!(r.result_items.len(), 1);
        assert_eq!(r.total_count, 1);
    }

    #[test]
    fn delete_and_header() {
        let e = engine(2);
        e.save_index(1, "by_rank", &[5], StoredIndex::new(vec![doc(1, 1, "x")]).with_virtual_count(10)).unwrap();
        assert_eq!(e.read_header(1, "by_rank", &[5]).unwrap().unwrap().virtual_count, 10);
        assert!(e.delete_index(1, "by_rank", &[5]).unwrap());
        assert!(e.read_header(1, "by_rank", &[5]).unwrap().is_none());
    }

    #[test]
    fn span_merges_then_slices_across_partitions() {
        let e = engine(3);
        for (k, ix) in [2u8, 3, 4].into_iter().enumerate() {
            let docs = (0..3).map(|j| doc((k * 3 + j) as u8, (j * 3 + k) as i32, "t")).collect();
            e.save_index(1, "by_rank", &[ix], StoredIndex::new(docs)).unwrap();
        }
        let q = SpanQuery::new("by_rank", vec![vec![2], vec![3], vec![4]], 3, 4);
        let r = e.execute_span(1, &q).unwrap();
        let got: Vec<u8> = r.result_items.iter().map(|i| i.item_id[0]).collect();
        assert_eq!(got, vec![6, 1, 4, 7]);
        assert_eq!(r.total_count, 9);

        assert!(e.execute_span(1, &SpanQuery::new("by_rank", vec![vec![2]], 0, 1)).is_err());
    }

    #[test]
    fn single_index_queries_route_to_one_partition() {
        let e = engine(2);
        let docs = vec![doc(1, 5, "x"), doc(2, 1, "y"), doc(3, 3, "z")];
        e.save_index(1, "by_rank", &[5], StoredIndex::new(docs)).unwrap();

        let fl = e.execute_first_last(1, &FirstLastQuery::new("by_rank", &[5], 1, 1)).unwrap();
        assert_eq!(fl.first_page[0].item_id, vec![2]);
        assert_eq!(fl.first_page[0].tag("title"), Some(&b"y"[..]));
        assert_eq!(fl.last_page[0].item_id, vec![1]);

        let gr = e.execute_get_range(1, &GetRangeQuery::new("by_rank", &[5], 2, 1)).unwrap();
        assert_eq!(gr.result_items[0].item_id, vec![3]);
        assert_eq!(gr.index_size, 3);

        e.set_offline(e.partition_for(&[5]), true);
        assert!(matches!(
            e.execute_first_last(1, &FirstLastQuery::new("by_rank", &[5], 1, 1)),
            Err(QueryError::PartitionUnavailable(_))
        ));
    }
}
