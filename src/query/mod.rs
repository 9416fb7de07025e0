//! 查询与部分结果类型
//!
//! - [`paged`]：多索引分页查询（并集 + 排序合并 + 分页 / 分组）
//! - [`intersection`]：多索引交集
//! - [`contains`]：多索引包含判定
//! - [`span`]：多索引区间查询（与分页相同的合并，按 offset / span 截取）
//! - [`first_last`]、[`get_range`]：单索引的首尾页与区间读取

pub mod contains;
pub mod first_last;
pub mod get_range;
pub mod intersection;
pub mod paged;
pub mod span;

use std::collections::BTreeMap;

use crate::codec::{
    read_opt_versioned, read_option, write_opt_versioned, write_option, PrimitiveReader,
    PrimitiveWriter, Versioned, Wire,
};
use crate::common::{IndexId, PrimaryId, QueryError, Result};
use crate::condition::IndexCondition;
use crate::field_type::TagSort;
use crate::filter::Filter;
use crate::item::IndexHeader;

/// 结果中附带哪些索引的头信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexHeaderType {
    #[default]
    None,
    /// 仅最终结果条目所属的索引
    ResultItemsIndexIds,
    AllIndexIds,
}

impl IndexHeaderType {
    pub fn code(self) -> u8 {
        match self {
            Self::None                => 0,
            Self::ResultItemsIndexIds => 1,
            Self::AllIndexIds         => 2,
        }
    }
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::None),
            1 => Ok(Self::ResultItemsIndexIds),
            2 => Ok(Self::AllIndexIds),
            _ => Err(QueryError::InvalidData(format!("unknown index header type {code}"))),
        }
    }
}

// ── 每个 IndexId 的参数 ───────────────────────────────────────────────────────

/// 调用方给出的单个 IndexId 覆盖项；None 表示沿用查询级默认值
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndexIdParams {
    pub max_items: Option<i32>,
    pub filter:    Option<Filter>,
}

impl IndexIdParams {
    pub fn with_max_items(mut self, n: i32) -> Self { self.max_items = Some(n); self }
    pub fn with_filter(mut self, f: Filter) -> Self { self.filter = Some(f); self }
}

/// 解析后的有效参数：每个字段都有确定值
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EffectiveIndexParams {
    pub max_items: i32,
    pub filter:    Option<Filter>,
}

impl EffectiveIndexParams {
    pub fn resolve(overrides: Option<&IndexIdParams>, max_items: i32, filter: Option<&Filter>) -> Self {
        Self {
            max_items: overrides.and_then(|p| p.max_items).unwrap_or(max_items),
            filter:    overrides.and_then(|p| p.filter.clone()).or_else(|| filter.cloned()),
        }
    }

    /// 作为完整覆盖项下发，接收方无需再回退
    pub fn into_params(self) -> IndexIdParams {
        IndexIdParams { max_items: Some(self.max_items), filter: self.filter }
    }
}

impl Wire for IndexIdParams {
    fn write_to(&self, w: &mut PrimitiveWriter) -> Result<()> {
        w.write_bool(self.max_items.is_some())?;
        if let Some(n) = self.max_items {
            w.write_i32(n)?;
        }
        write_option(w, self.filter.as_ref())
    }
    fn read_from(r: &mut PrimitiveReader<'_>) -> Result<Self> {
        let max_items = if r.read_bool()? { Some(r.read_i32()?) } else { None };
        Ok(Self { max_items, filter: read_option(r)? })
    }
}

// ── 单索引查询的公共部分 ──────────────────────────────────────────────────────

/// 单索引查询要读哪个索引、怎样过滤与排序
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndexSelection {
    pub target_index_name: String,
    pub index_id:          IndexId,
    /// 调用方指定的 PrimaryId；None 时由 IndexId 计算
    pub primary_id:        Option<PrimaryId>,
    /// 去掉条目标签，只返回 ItemId
    pub exclude_data:      bool,
    /// 附带索引头（元数据、virtual count）
    pub get_metadata:      bool,
    pub filter:            Option<Filter>,
    pub tag_sort:          Option<TagSort>,
    pub index_condition:   Option<IndexCondition>,
}

impl IndexSelection {
    pub fn new(target_index_name: &str, index_id: &[u8]) -> Self {
        Self { target_index_name: target_index_name.into(), index_id: index_id.to_vec(), ..Default::default() }
    }

    pub fn primary_id(&self) -> PrimaryId {
        self.primary_id.unwrap_or_else(|| crate::partitioner::generate_primary_id(&self.index_id))
    }

    pub fn validate(&self) -> Result<()> {
        if self.index_id.is_empty() {
            return Err(QueryError::InvalidQuery("no IndexId on single-index query".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub enum IndexSelectionField {
    TargetIndexName, IndexId, PrimaryId, ExcludeData, GetMetadata, Filter, TagSort, IndexCondition,
}

impl Versioned for IndexSelection {
    type Field = IndexSelectionField;
    const TYPE_NAME: &'static str = "IndexSelection";
    const CURRENT_VERSION: u8 = 1;
    const SCHEMA: &'static [(u8, IndexSelectionField)] = &[
        (1, IndexSelectionField::TargetIndexName),
        (1, IndexSelectionField::IndexId),
        (1, IndexSelectionField::PrimaryId),
        (1, IndexSelectionField::ExcludeData),
        (1, IndexSelectionField::GetMetadata),
        (1, IndexSelectionField::Filter),
        (1, IndexSelectionField::TagSort),
        (1, IndexSelectionField::IndexCondition),
    ];

    fn write_field(&self, field: IndexSelectionField, w: &mut PrimitiveWriter) -> Result<()> {
        match field {
            IndexSelectionField::TargetIndexName => w.write_string(&self.target_index_name),
            IndexSelectionField::IndexId         => w.write_bytes(&self.index_id),
            IndexSelectionField::PrimaryId       => {
                w.write_bool(self.primary_id.is_some())?;
                self.primary_id.map_or(Ok(()), |p| w.write_i32(p))
            }
            IndexSelectionField::ExcludeData     => w.write_bool(self.exclude_data),
            IndexSelectionField::GetMetadata     => w.write_bool(self.get_metadata),
            IndexSelectionField::Filter          => write_option(w, self.filter.as_ref()),
            IndexSelectionField::TagSort         => write_option(w, self.tag_sort.as_ref()),
            IndexSelectionField::IndexCondition  => write_opt_versioned(w, self.index_condition.as_ref()),
        }
    }

    fn read_field(&mut self, field: IndexSelectionField, r: &mut PrimitiveReader<'_>) -> Result<()> {
        match field {
            IndexSelectionField::TargetIndexName => self.target_index_name = r.read_string()?,
            IndexSelectionField::IndexId         => self.index_id = r.read_bytes()?,
            IndexSelectionField::PrimaryId       => {
                self.primary_id = if r.read_bool()? { Some(r.read_i32()?) } else { None };
            }
            IndexSelectionField::ExcludeData     => self.exclude_data = r.read_bool()?,
            IndexSelectionField::GetMetadata     => self.get_metadata = r.read_bool()?,
            IndexSelectionField::Filter          => self.filter = read_option(r)?,
            IndexSelectionField::TagSort         => self.tag_sort = read_option(r)?,
            IndexSelectionField::IndexCondition  => self.index_condition = read_opt_versioned(r)?,
        }
        Ok(())
    }
}

// ── 共享的线上辅助 ────────────────────────────────────────────────────────────

pub(crate) fn write_params_map(w: &mut PrimitiveWriter, map: &BTreeMap<IndexId, IndexIdParams>) -> Result<()> {
    w.write_count(map.len())?;
    for (id, p) in map {
        w.write_bytes(id)?;
        p.write_to(w)?;
    }
    Ok(())
}

pub(crate) fn read_params_map(r: &mut PrimitiveReader<'_>) -> Result<BTreeMap<IndexId, IndexIdParams>> {
    let n = r.read_count()?;
    let mut map = BTreeMap::new();
    for _ in 0..n {
        let id = r.read_bytes()?;
        map.insert(id, IndexIdParams::read_from(r)?);
    }
    Ok(map)
}

pub(crate) fn write_primary_ids(w: &mut PrimitiveWriter, ids: Option<&[PrimaryId]>) -> Result<()> {
    w.write_bool(ids.is_some())?;
    if let Some(ids) = ids {
        w.write_count(ids.len())?;
        ids.iter().try_for_each(|&id| w.write_i32(id))?;
    }
    Ok(())
}

pub(crate) fn read_primary_ids(r: &mut PrimitiveReader<'_>) -> Result<Option<Vec<PrimaryId>>> {
    if !r.read_bool()? {
        return Ok(None);
    }
    let n = r.read_count()?;
    (0..n).map(|_| r.read_i32()).collect::<Result<Vec<_>>>().map(Some)
}

pub type IndexHeaders = BTreeMap<IndexId, IndexHeader>;

pub(crate) fn write_headers(w: &mut PrimitiveWriter, headers: Option<&IndexHeaders>) -> Result<()> {
    w.write_bool(headers.is_some())?;
    if let Some(headers) = headers {
        w.write_count(headers.len())?;
        for (id, h) in headers {
            w.write_bytes(id)?;
            h.write_to(w)?;
        }
    }
    Ok(())
}

pub(crate) fn read_headers(r: &mut PrimitiveReader<'_>) -> Result<Option<IndexHeaders>> {
    if !r.read_bool()? {
        return Ok(None);
    }
    let n = r.read_count()?;
    let mut headers = BTreeMap::new();
    for _ in 0..n {
        let id = r.read_bytes()?;
        headers.insert(id, IndexHeader::read_from(r)?);
    }
    Ok(Some(headers))
}

/// 合并头信息：同一 IndexId 保留先到的
pub(crate) fn merge_headers(into: &mut Option<IndexHeaders>, from: Option<IndexHeaders>) {
    if let Some(from) = from {
        let target = into.get_or_insert_with(BTreeMap::new);
        for (id, h) in from {
            target.entry(id).or_insert(h);
        }
    }
}

/// 异常文本逐个追加，各自以一个空格结尾
pub(crate) fn append_exception(into: &mut Option<String>, text: Option<&str>) {
    if let Some(text) = text.filter(|t| !t.is_empty()) {
        let s = into.get_or_insert_with(String::new);
        s.push_str(text);
        s.push(' ');
    }
}

/// 查询中第 `pos` 个 IndexId 的 PrimaryId：有调用方列表时取列表值，否则计算
pub(crate) fn primary_id_at(ids: &[IndexId], supplied: Option<&[PrimaryId]>, pos: usize) -> PrimaryId {
    match supplied {
        Some(list) if list.len() == ids.len() => list[pos],
        _ => crate::partitioner::generate_primary_id(&ids[pos]),
    }
}
