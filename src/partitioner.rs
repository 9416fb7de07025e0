//! 分区路由：IndexId → PrimaryId → 分区，按分区拆分查询

use std::collections::BTreeMap;

use byteorder::{ByteOrder, LittleEndian};

use crate::common::{IndexId, PartitionId, PrimaryId, QueryError, Result};

// ── PrimaryId ─────────────────────────────────────────────────────────────────

/// 空 id → 1；≥ 4 字节取前 4 字节小端 i32 的绝对值；否则取首字节
///
/// `i32::MIN` 的绝对值饱和为 `i32::MAX`。
pub fn generate_primary_id(index_id: &[u8]) -> PrimaryId {
    match index_id.len() {
        0     => 1,
        1..=3 => index_id[0] as PrimaryId,
        _     => LittleEndian::read_i32(&index_id[..4]).saturating_abs(),
    }
}

pub fn partition_of(primary_id: PrimaryId, num_partitions: u32) -> PartitionId {
    (primary_id as i64).rem_euclid(num_partitions as i64) as PartitionId
}

// ── 拆分 ──────────────────────────────────────────────────────────────────────

/// 落在同一分区的 IndexId，保持输入顺序
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionGroup {
    pub partition:   PartitionId,
    /// 在原查询 IndexId 列表中的位置
    pub positions:   Vec<usize>,
    pub index_ids:   Vec<IndexId>,
    /// 仅当调用方提供了等长的 PrimaryId 列表时存在
    pub primary_ids: Option<Vec<PrimaryId>>,
}

/// 拆分的整体信息，子查询据此设置客户端处理标志
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitInfo {
    pub num_partitions:  u32,
    pub used_partitions: usize,
    pub index_id_count:  usize,
}

impl SplitInfo {
    /// 多个分区各自返回了部分结果，需要客户端再做子集处理
    pub fn needs_client_side_processing(&self) -> bool {
        self.num_partitions > 1 && self.index_id_count > 1 && self.used_partitions > 1
    }
}

/// 按分区分组；PrimaryId 要么全部取自调用方列表（须与 IndexId 等长），要么全部计算
pub fn split_index_ids(
    index_ids:      &[IndexId],
    primary_ids:    Option<&[PrimaryId]>,
    num_partitions: u32,
) -> Result<Vec<PartitionGroup>> {
    if num_partitions == 0 {
        return Err(QueryError::InvalidQuery("number of partitions must be positive".into()));
    }
    let supplied = primary_ids.filter(|p| p.len() == index_ids.len());

    let mut groups: BTreeMap<PartitionId, PartitionGroup> = BTreeMap::new();
    for (pos, id) in index_ids.iter().enumerate() {
        let primary = match supplied {
            Some(list) => list[pos],
            None       => generate_primary_id(id),
        };
        let partition = partition_of(primary, num_partitions);
        let group = groups.entry(partition).or_insert_with(|| PartitionGroup {
            partition,
            positions:   vec![],
            index_ids:   vec![],
            primary_ids: supplied.map(|_| vec![]),
        });
        group.positions.push(pos);
        group.index_ids.push(id.clone());
        if let Some(p) = group.primary_ids.as_mut() {
            p.push(primary);
        }
    }
    Ok(groups.into_values().collect())
}

/// 可按分区拆分的多索引查询
pub trait SplittableQuery: Sized {
    fn index_ids(&self) -> &[IndexId];
    fn primary_ids(&self) -> Option<&[PrimaryId]>;
    /// 拆分后子查询的目标分区；未拆分的查询为 None
    fn partition(&self) -> Option<PartitionId>;

    /// 只含 `group` 中 IndexId 的独立子查询；每个 IndexId 的有效参数在此一次解析完毕
    fn sub_query(&self, group: &PartitionGroup, info: &SplitInfo) -> Self;

    /// 本地分区之外的子查询不需要回传数据
    fn exclude_data(&mut self) {}
}

/// 拆分为按分区号升序排列的子查询
pub fn split<Q: SplittableQuery>(query: &Q, num_partitions: u32) -> Result<Vec<Q>> {
    let groups = split_index_ids(query.index_ids(), query.primary_ids(), num_partitions)?;
    let info = SplitInfo {
        num_partitions,
        used_partitions: groups.len(),
        index_id_count:  query.index_ids().len(),
    };
    tracing::debug!(
        num_partitions,
        used_partitions = info.used_partitions,
        index_ids = info.index_id_count,
        "split query",
    );
    Ok(groups.iter().map(|g| query.sub_query(g, &info)).collect())
}

/// 拆分并单独取出本地分区的子查询；其余子查询标记为不回传数据
pub fn split_with_local<Q: SplittableQuery>(
    query:           &Q,
    num_partitions:  u32,
    local_partition: PartitionId,
) -> Result<(Option<Q>, Vec<(PartitionId, Q)>)> {
    let groups = split_index_ids(query.index_ids(), query.primary_ids(), num_partitions)?;
    let info = SplitInfo {
        num_partitions,
        used_partitions: groups.len(),
        index_id_count:  query.index_ids().len(),
    };
    let mut local = None;
    let mut remote = Vec::with_capacity(groups.len());
    for g in &groups {
        let mut sub = query.sub_query(g, &info);
        if g.partition == local_partition {
            local = Some(sub);
        } else {
            sub.exclude_data();
            remote.push((g.partition, sub));
        }
    }
    Ok((local, remote))
}
