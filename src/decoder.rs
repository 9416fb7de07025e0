//! 分区内索引解码器
//!
//! 顺序扫描一个落盘索引（格式见 [`crate::index_format`]），在扫描过程中应用
//! Enter / Exit 边界、过滤器、分桶配额和分组，产出一份有序的部分结果。
//!
//! 按 ItemId 排序的索引在解码标签之前就能判定边界，Enter 之前的条目只跳过
//! 标签字节；按标签排序的索引必须先解码标签才能拿到排序键。

use std::collections::{BTreeMap, HashSet};

use crate::codec::PrimitiveReader;
use crate::common::{IndexId, QueryError, Result, TagHash, TypeId};
use crate::comparer::ItemComparer;
use crate::condition::{Boundaries, CapCondition, CapTracker};
use crate::config::IndexConfig;
use crate::field_type::PrimarySortInfo;
use crate::filter::{passes, Condition, Filter};
use crate::group::{GroupBy, GroupByResult};
use crate::index_format::INDEX_FORMAT_VERSION;
use crate::item::{read_properties, IndexHeader, ResultItem};
use crate::lookup::LookupServices;

// ── DecodeContext ─────────────────────────────────────────────────────────────

/// 一次解码的全部输入；解码过程中不修改
#[derive(Debug, Clone)]
pub struct DecodeContext {
    pub index_id:         IndexId,
    pub type_id:          TypeId,
    /// 索引落盘时的排序
    pub sort:             PrimarySortInfo,
    /// 结果条目（或分组）上限；0 表示不限
    pub max_items:        i32,
    pub filter:           Option<Filter>,
    pub boundaries:       Boundaries,
    pub cap:              Option<CapCondition>,
    pub group_by:         Option<GroupBy>,
    /// 统计该字段各取值出现次数（`ItemId` 或标签名）
    pub distinct_field:   Option<String>,
    pub string_hash_tags: HashSet<TagHash>,
    pub metadata_property_collection: bool,
    pub header_only:      bool,
}

impl DecodeContext {
    pub fn new(index_id: &[u8], type_id: TypeId, config: &IndexConfig) -> Self {
        Self {
            index_id:         index_id.to_vec(),
            type_id,
            sort:             config.primary_sort_info.clone(),
            max_items:        0,
            filter:           None,
            boundaries:       Boundaries::default(),
            cap:              None,
            group_by:         None,
            distinct_field:   None,
            string_hash_tags: config.string_hash_codes(),
            metadata_property_collection: config.metadata_property_collection,
            header_only:      false,
        }
    }

    pub fn with_max_items(mut self, n: i32) -> Self { self.max_items = n; self }
    pub fn with_filter(mut self, f: Option<Filter>) -> Self { self.filter = f; self }
    pub fn with_boundaries(mut self, b: Boundaries) -> Self { self.boundaries = b; self }
    pub fn with_cap(mut self, c: Option<CapCondition>) -> Self { self.cap = c; self }
    pub fn with_group_by(mut self, g: Option<GroupBy>) -> Self { self.group_by = g; self }
    pub fn with_distinct_field(mut self, f: &str) -> Self { self.distinct_field = Some(f.into()); self }
    pub fn header_only(mut self) -> Self { self.header_only = true; self }
}

// ── DecodedIndex ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct DecodedIndex {
    pub index_id:            IndexId,
    pub metadata:            Option<Vec<u8>>,
    pub metadata_properties: Option<BTreeMap<String, Vec<u8>>>,
    virtual_count:           i32,
    pub total_count:         i32,
    /// 扫描过的线上条目数
    pub read_item_count:     i32,
    /// 标签被解码的条目数
    pub materialized_count:  i32,
    pub items:               Vec<ResultItem>,
    pub group_by_result:     Option<GroupByResult>,
    pub distinct_values:     Option<BTreeMap<Vec<u8>, i32>>,
}

impl DecodedIndex {
    pub fn virtual_count(&self) -> i32 { self.virtual_count }

    /// 不低于已知的总条目数
    pub fn set_virtual_count(&mut self, n: i32) {
        self.virtual_count = n.max(self.total_count);
    }

    /// 结果中的条目数（分组时为分组数）
    pub fn count(&self) -> usize {
        self.items.len() + self.group_by_result.as_ref().map_or(0, GroupByResult::len)
    }

    pub fn header(&self) -> IndexHeader {
        IndexHeader {
            metadata:            self.metadata.clone(),
            metadata_properties: self.metadata_properties.clone(),
            virtual_count:       self.virtual_count,
        }
    }
}

// ── 解码 ──────────────────────────────────────────────────────────────────────

enum Step { Skip, Take, Stop }

struct Decoder<'a> {
    ctx:      &'a DecodeContext,
    services: &'a LookupServices,
    tracker:  Option<&'a mut CapTracker>,
    cmp:      ItemComparer,
    filter:   Option<Filter>,
    enter:    Option<Condition>,
    exit:     Option<Condition>,
    out:      DecodedIndex,
}

/// 解码一个索引
///
/// `caps` 为跨多个索引共享的配额余量；为 None 而上下文带有配额条件时，
/// 本次解码使用独立的余量。
pub fn decode_index(
    data:     &[u8],
    ctx:      &DecodeContext,
    services: &LookupServices,
    caps:     Option<&mut CapTracker>,
) -> Result<DecodedIndex> {
    let mut r = PrimitiveReader::new(data);
    let mut out = read_header(&mut r, ctx)?;
    if ctx.header_only {
        return Ok(out);
    }
    if ctx.distinct_field.is_some() {
        out.distinct_values = Some(BTreeMap::new());
    }
    if ctx.group_by.is_some() {
        out.group_by_result = Some(GroupByResult::new());
    }

    let props = out.metadata_properties.clone();
    let mut filter = ctx.filter.clone();
    if let Some(f) = filter.as_mut() {
        f.resolve_metadata(props.as_ref());
    }

    let mut owned_tracker = None;
    let tracker = match (caps, &ctx.cap) {
        (Some(t), _)    => Some(t),
        (None, Some(c)) => Some(owned_tracker.insert(CapTracker::new(c))),
        (None, None)    => None,
    };

    let mut decoder = Decoder {
        ctx,
        services,
        tracker,
        cmp:    ItemComparer::new(ctx.sort.clone()),
        filter,
        enter:  resolve_boundary(&ctx.boundaries.enter, props.as_ref()),
        exit:   resolve_boundary(&ctx.boundaries.exit, props.as_ref()),
        out,
    };
    decoder.scan(&mut r)?;
    Ok(decoder.out)
}

/// 只读头部：元数据、virtual count、total count
pub fn decode_header(data: &[u8], ctx: &DecodeContext) -> Result<DecodedIndex> {
    read_header(&mut PrimitiveReader::new(data), ctx)
}

fn read_header(r: &mut PrimitiveReader<'_>, ctx: &DecodeContext) -> Result<DecodedIndex> {
    let version = r.read_u8()?;
    if version == 0 || version > INDEX_FORMAT_VERSION {
        return Err(QueryError::UnsupportedVersion {
            type_name: "StoredIndex", found: version, current: INDEX_FORMAT_VERSION,
        });
    }

    let mut out = DecodedIndex { index_id: ctx.index_id.clone(), ..Default::default() };
    if ctx.metadata_property_collection {
        out.metadata_properties = Some(read_properties(r)?);
    } else {
        let m = r.read_bytes()?;
        out.metadata = (!m.is_empty()).then_some(m);
    }
    let stored_virtual = if version >= 2 { Some(r.read_i32()?) } else { None };
    out.total_count = r.read_i32()?;
    if out.total_count < 0 {
        return Err(QueryError::InvalidData(format!("negative total count {}", out.total_count)));
    }
    out.set_virtual_count(stored_virtual.unwrap_or(out.total_count));
    Ok(out)
}

/// 引用了索引里不存在的元数据属性的边界视为无边界
fn resolve_boundary(
    cond:  &Option<Condition>,
    props: Option<&BTreeMap<String, Vec<u8>>>,
) -> Option<Condition> {
    let mut c = cond.clone()?;
    c.resolve(props);
    c.value.is_some().then_some(c)
}

impl Decoder<'_> {
    fn scan(&mut self, r: &mut PrimitiveReader<'_>) -> Result<()> {
        let total = self.out.total_count as usize;
        let wanted = if self.ctx.max_items > 0 {
            (self.ctx.max_items as usize).min(total)
        } else {
            total
        };
        let mut enter_passed = self.enter.is_none();
        let mut scanned = 0usize;

        while self.out.count() < wanted && scanned < total {
            let item_id = r.read_bytes()?;
            scanned += 1;
            if item_id.is_empty() {
                return Err(QueryError::InvalidData(format!(
                    "invalid ItemId: empty id at position {} of index {:?}", scanned - 1, self.ctx.index_id,
                )));
            }
            let mut item = ResultItem { index_id: self.ctx.index_id.clone(), item_id, tags: BTreeMap::new() };

            if self.ctx.sort.is_tag {
                self.read_tags(r, &mut item)?;
                if item.tag(&self.ctx.sort.field_name).is_none() {
                    return Err(QueryError::SortTagNotFound(self.ctx.sort.field_name.clone()));
                }
                match self.step(&item, &mut enter_passed)? {
                    Step::Skip => continue,
                    Step::Stop => break,
                    Step::Take => self.accept(item)?,
                }
            } else {
                match self.step(&item, &mut enter_passed)? {
                    Step::Skip => skip_tags(r)?,
                    Step::Stop => break,
                    Step::Take => {
                        self.read_tags(r, &mut item)?;
                        self.accept(item)?;
                    }
                }
            }
        }
        self.out.read_item_count = scanned as i32;
        Ok(())
    }

    fn step(&self, item: &ResultItem, enter_passed: &mut bool) -> Result<Step> {
        if !*enter_passed {
            if let Some(enter) = &self.enter {
                if !enter.matches(item)? {
                    return Ok(Step::Skip);
                }
            }
        }
        if let Some(exit) = &self.exit {
            if !exit.matches(item)? {
                return Ok(Step::Stop);
            }
        }
        *enter_passed = true;
        Ok(Step::Take)
    }

    fn read_tags(&mut self, r: &mut PrimitiveReader<'_>, item: &mut ResultItem) -> Result<()> {
        let type_id = self.ctx.type_id;
        let n = r.read_u8()?;
        for _ in 0..n {
            let hash = r.read_i32()?;
            let mut value = r.read_bytes()?;
            if self.ctx.string_hash_tags.contains(&hash) {
                let code: [u8; 4] = value.as_slice().try_into().map_err(|_| {
                    QueryError::InvalidData(format!("string hash tag {hash} has {} bytes", value.len()))
                })?;
                let code = i32::from_le_bytes(code);
                value = self.services.strings.string_bytes(type_id, code)
                    .ok_or(QueryError::StringHashNotFound(type_id, code))?;
            }
            match self.services.tags.tag_name(type_id, hash) {
                Some(name) => { item.tags.insert(name, value); }
                None => tracing::warn!(type_id, tag_hash = hash, "unknown tag hash, tag dropped"),
            }
        }

        self.out.materialized_count += 1;
        if let (Some(field), Some(tally)) = (&self.ctx.distinct_field, self.out.distinct_values.as_mut()) {
            if let Some(v) = item.field_value(field, true) {
                *tally.entry(v.to_vec()).or_insert(0) += 1;
            }
        }
        Ok(())
    }

    fn accept(&mut self, item: ResultItem) -> Result<()> {
        let admitted = match (&self.ctx.cap, self.tracker.as_deref_mut()) {
            (Some(cap), Some(tracker)) => cap.admit(&item, self.filter.as_ref(), tracker)?,
            _                          => passes(self.filter.as_ref(), &item)?,
        };
        if !admitted {
            return Ok(());
        }
        match (&self.ctx.group_by, self.out.group_by_result.as_mut()) {
            (Some(g), Some(groups)) => groups.add_item(g.composite_key(&item), item, &self.cmp),
            _ => { self.out.items.push(item); Ok(()) }
        }
    }
}

fn skip_tags(r: &mut PrimitiveReader<'_>) -> Result<()> {
    let n = r.read_u8()?;
    for _ in 0..n {
        r.skip(4)?;
        r.skip_bytes()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PrimitiveWriter;
    use crate::condition::{FilterCap, IndexCondition};
    use crate::field_type::{DataType, SortOrder, Value};
    use crate::filter::Operation;
    use crate::index_format::{IndexWriter, StoredIndex};
    use crate::lookup::{LookupServices, TagHashCollection};
    use std::sync::Arc;

    const TYPE: TypeId = 1;

    fn services(tags: &[&str]) -> (LookupServices, Arc<crate::lookup::StringHashCollection>) {
        let (svc, registry, strings) = LookupServices::in_memory();
        for t in tags {
            registry.register(TYPE, t);
        }
        (svc, strings)
    }

    fn int(v: i32) -> Vec<u8> { Value::Int32(v).to_bytes() }

    fn id_sorted() -> IndexConfig {
        IndexConfig::new("byid", 1, PrimarySortInfo::by_item_id(vec![SortOrder::asc(DataType::Int32)]))
    }

    fn score_sorted() -> IndexConfig {
        IndexConfig::new("byscore", 2, PrimarySortInfo::by_tag("score", vec![SortOrder::desc(DataType::Int32)]))
    }

    fn item(id: i32, score: i32, color: &str) -> ResultItem {
        ResultItem::new(b"ix", &int(id)).with_tag("score", int(score)).with_tag("color", color.as_bytes().to_vec())
    }

    fn encode(config: &IndexConfig, items: Vec<ResultItem>) -> Vec<u8> {
        IndexWriter::new(config).encode(StoredIndex::new(items)).unwrap()
    }

    fn ids(items: &[ResultItem]) -> Vec<i32> {
        items.iter().map(|i| i32::from_le_bytes(i.item_id.as_slice().try_into().unwrap())).collect()
    }

    #[test]
    fn boundaries_skip_before_enter_and_stop_at_exit() {
        let cfg = id_sorted();
        let data = encode(&cfg, (1..=5).map(|i| item(i * 10, i, "red")).collect());
        let (svc, _) = services(&["score", "color"]);
        let b = IndexCondition::between(Some(int(20)), Some(int(40)))
            .boundaries(&cfg.primary_sort_info).unwrap();
        let ctx = DecodeContext::new(b"ix", TYPE, &cfg).with_boundaries(b);

        let out = decode_index(&data, &ctx, &svc, None).unwrap();
        assert_eq!(ids(&out.items), vec![20, 30, 40]);
        // 10 的标签被跳过，50 读到 id 即终止
        assert_eq!(out.materialized_count, 3);
        assert_eq!(out.read_item_count, 5);
        assert_eq!(out.items[0].tag("score"), Some(&int(2)[..]));
    }

    #[test]
    fn max_items_bounds_the_scan() {
        let cfg = id_sorted();
        let data = encode(&cfg, (1..=10).map(|i| item(i, i, "red")).collect());
        let (svc, _) = services(&["score", "color"]);
        let not_three = Filter::Condition(Condition::new("ItemId", Operation::NotEquals, int(3), DataType::Int32));
        let ctx = DecodeContext::new(b"ix", TYPE, &cfg).with_max_items(3).with_filter(Some(not_three));

        let out = decode_index(&data, &ctx, &svc, None).unwrap();
        assert_eq!(ids(&out.items), vec![1, 2, 4]);
        assert_eq!(out.read_item_count, 4);
        assert_eq!(out.total_count, 10);
    }

    #[test]
    fn tag_sorted_index_applies_descending_boundaries() {
        let cfg = score_sorted();
        let data = encode(&cfg, (1..=6).map(|i| item(i, i * 10, "red")).collect());
        let (svc, _) = services(&["score", "color"]);
        let b = IndexCondition::between(Some(int(20)), Some(int(45)))
            .boundaries(&cfg.primary_sort_info).unwrap();
        let ctx = DecodeContext::new(b"ix", TYPE, &cfg).with_boundaries(b);

        let out = decode_index(&data, &ctx, &svc, None).unwrap();
        // 降序：60、50 未进入；40、30、20 接纳；10 处终止
        assert_eq!(ids(&out.items), vec![4, 3, 2]);
        assert_eq!(out.read_item_count, 6);
        assert_eq!(out.materialized_count, 6);
    }

    #[test]
    fn missing_sort_tag_is_fatal() {
        let cfg = score_sorted();
        let id_cfg = id_sorted();
        // 以 ItemId 排序写出，再以标签排序读取
        let data = encode(&id_cfg, vec![ResultItem::new(b"ix", &int(1)).with_tag("color", b"x".to_vec())]);
        let (svc, _) = services(&["color"]);
        let ctx = DecodeContext::new(b"ix", TYPE, &cfg);
        assert!(matches!(decode_index(&data, &ctx, &svc, None), Err(QueryError::SortTagNotFound(_))));
    }

    #[test]
    fn zero_length_item_id_is_invalid_data() {
        let mut w = PrimitiveWriter::new();
        w.write_u8(INDEX_FORMAT_VERSION).unwrap();
        w.write_bytes(&[]).unwrap();
        w.write_i32(1).unwrap();
        w.write_i32(1).unwrap();
        w.write_bytes(&[]).unwrap();
        w.write_u8(0).unwrap();
        let data = w.into_inner();
        let (svc, _) = services(&[]);
        let ctx = DecodeContext::new(b"ix", TYPE, &id_sorted());
        assert!(matches!(decode_index(&data, &ctx, &svc, None), Err(QueryError::InvalidData(_))));
    }

    #[test]
    fn caps_are_shared_across_decodes() {
        let cfg = id_sorted();
        let data = encode(&cfg, (1..=4).map(|i| item(i, i, if i % 2 == 0 { "red" } else { "blue" })).collect());
        let (svc, _) = services(&["score", "color"]);
        let cap = CapCondition::new("color").with_cap(b"red".to_vec(), FilterCap::new(1)).ignoring_non_capped();
        let ctx = DecodeContext::new(b"ix", TYPE, &cfg).with_cap(Some(cap.clone()));

        let mut tracker = CapTracker::new(&cap);
        let first = decode_index(&data, &ctx, &svc, Some(&mut tracker)).unwrap();
        assert_eq!(ids(&first.items), vec![2]);
        let second = decode_index(&data, &ctx, &svc, Some(&mut tracker)).unwrap();
        assert!(second.items.is_empty());
        // 独立余量
        assert_eq!(ids(&decode_index(&data, &ctx, &svc, None).unwrap().items), vec![2]);
    }

    #[test]
    fn group_by_counts_groups_against_max_items() {
        let cfg = score_sorted();
        let colors = ["red", "blue", "red", "green", "blue"];
        let items = colors.iter().enumerate().map(|(i, c)| item(i as i32, 100 - i as i32, c)).collect();
        let data = encode(&cfg, items);
        let (svc, _) = services(&["score", "color"]);
        let ctx = DecodeContext::new(b"ix", TYPE, &cfg)
            .with_group_by(Some(GroupBy::by_fields(&["color"])))
            .with_max_items(3)
            .with_distinct_field("color");

        let out = decode_index(&data, &ctx, &svc, None).unwrap();
        let groups = out.group_by_result.as_ref().unwrap();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups.bags()[0].composite_key, b"red".to_vec());
        assert_eq!(groups.bags()[0].items.len(), 2);
        assert!(out.items.is_empty());
        // red, blue, red, green 四项之后已有三组
        assert_eq!(out.read_item_count, 4);
        let tally = out.distinct_values.unwrap();
        assert_eq!(tally.get(&b"red".to_vec()), Some(&2));
        assert_eq!(tally.get(&b"green".to_vec()), Some(&1));
    }

    #[test]
    fn header_only_reads_counts_and_properties() {
        let cfg = id_sorted().with_metadata_properties();
        let data = IndexWriter::new(&cfg)
            .encode(StoredIndex::new(vec![item(1, 1, "a"), item(2, 2, "b")])
                .with_metadata_property("limit", int(1))
                .with_virtual_count(50))
            .unwrap();
        let ctx = DecodeContext::new(b"ix", TYPE, &cfg).header_only();
        let (svc, _) = services(&["score", "color"]);

        let out = decode_index(&data, &ctx, &svc, None).unwrap();
        assert_eq!(out.total_count, 2);
        assert_eq!(out.virtual_count(), 50);
        assert!(out.items.is_empty());
        assert_eq!(out.header().metadata_properties.unwrap().get("limit"), Some(&int(1)));
        assert_eq!(decode_header(&data, &ctx).unwrap().total_count, 2);

        let mut clamped = out;
        clamped.set_virtual_count(1);
        assert_eq!(clamped.virtual_count(), 2);
    }

    #[test]
    fn metadata_filter_resolves_against_index_properties() {
        let cfg = id_sorted().with_metadata_properties();
        let data = IndexWriter::new(&cfg)
            .encode(StoredIndex::new((1..=5).map(|i| item(i, i, "a")).collect())
                .with_metadata_property("limit", int(3)))
            .unwrap();
        let (svc, _) = services(&["score", "color"]);
        let f = Filter::Condition(Condition::on_metadata("score", Operation::LessThanEquals, "limit", DataType::Int32));
        let ctx = DecodeContext::new(b"ix", TYPE, &cfg).with_filter(Some(f));
        assert_eq!(ids(&decode_index(&data, &ctx, &svc, None).unwrap().items), vec![1, 2, 3]);
    }

    #[test]
    fn string_hash_tags_expand_through_lookup() {
        let cfg = id_sorted().with_string_hash_tags(&["title"]);
        let (svc, strings) = services(&["title"]);
        let code = strings.intern(TYPE, b"a rather long title");
        let data = encode(&cfg, vec![ResultItem::new(b"ix", &int(1)).with_tag("title", code.to_vec())]);
        let ctx = DecodeContext::new(b"ix", TYPE, &cfg);
        let out = decode_index(&data, &ctx, &svc, None).unwrap();
        assert_eq!(out.items[0].tag("title"), Some(&b"a rather long title"[..]));
    }

    #[test]
    fn unknown_tags_are_dropped() {
        let cfg = id_sorted();
        let data = encode(&cfg, vec![item(1, 1, "red")]);
        let svc = LookupServices::new(
            Arc::new(TagHashCollection::new()),
            Arc::new(crate::lookup::StringHashCollection::new()),
        );
        let out = decode_index(&data, &DecodeContext::new(b"ix", TYPE, &cfg), &svc, None).unwrap();
        assert!(out.items[0].tags.is_empty());
    }
}
