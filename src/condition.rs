//! 排序边界条件（IndexCondition）与分桶配额（CapCondition）

use std::collections::{BTreeMap, HashMap};

use crate::codec::{read_option, write_option, PrimitiveReader, PrimitiveWriter, Versioned, Wire};
use crate::common::{QueryError, Result};
use crate::field_type::PrimarySortInfo;
use crate::filter::{passes, Condition, Filter, Operation};
use crate::item::ResultItem;

// ── IndexCondition ────────────────────────────────────────────────────────────

/// 主排序字段上的闭区间 [min, max]；边界值可直接给出或取自索引元数据属性
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexCondition {
    pub inclusive_max_value:    Option<Vec<u8>>,
    pub inclusive_min_value:    Option<Vec<u8>>,
    pub inclusive_max_property: Option<String>,
    pub inclusive_min_property: Option<String>,
}

/// 由 IndexCondition 推导出的进入 / 退出条件
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Boundaries {
    /// 首个满足 Enter 的条目之前的条目全部跳过
    pub enter: Option<Condition>,
    /// 进入之后首个不满足 Exit 的条目处终止扫描
    pub exit:  Option<Condition>,
}

impl IndexCondition {
    pub fn between(min: Option<Vec<u8>>, max: Option<Vec<u8>>) -> Self {
        Self { inclusive_min_value: min, inclusive_max_value: max, ..Default::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.inclusive_max_value.is_none() && self.inclusive_min_value.is_none()
            && self.inclusive_max_property.is_none() && self.inclusive_min_property.is_none()
    }

    fn bound(
        &self,
        sort:     &PrimarySortInfo,
        op:       Operation,
        value:    &Option<Vec<u8>>,
        property: &Option<String>,
    ) -> Result<Option<Condition>> {
        if value.is_none() && property.is_none() {
            return Ok(None);
        }
        let leading = sort.leading()
            .ok_or_else(|| QueryError::InvalidQuery("index condition on empty sort order".into()))?;
        Ok(Some(Condition {
            field_name:        sort.field_name.clone(),
            is_tag:            sort.is_tag,
            operation:         op,
            value:             value.clone(),
            data_type:         leading.data_type,
            metadata_property: if value.is_some() { None } else { property.clone() },
        }))
    }

    /// 降序：Enter = field ≤ max，Exit = field ≥ min；升序相反
    pub fn boundaries(&self, sort: &PrimarySortInfo) -> Result<Boundaries> {
        let max = self.bound(sort, Operation::LessThanEquals, &self.inclusive_max_value, &self.inclusive_max_property)?;
        let min = self.bound(sort, Operation::GreaterThanEquals, &self.inclusive_min_value, &self.inclusive_min_property)?;
        let descending = sort.leading().is_some_and(|o| o.sort_by.is_descending());
        Ok(if descending {
            Boundaries { enter: max, exit: min }
        } else {
            Boundaries { enter: min, exit: max }
        })
    }

    /// 排序字段与索引原生排序不一致时，边界退化为普通过滤
    pub fn as_filter(&self, sort: &PrimarySortInfo) -> Result<Option<Filter>> {
        let b = self.boundaries(sort)?;
        let conds: Vec<Filter> = [b.enter, b.exit].into_iter().flatten().map(Filter::Condition).collect();
        Ok(match conds.len() {
            0 => None,
            _ => Some(Filter::And(conds)),
        })
    }

    /// 收紧远端边界：降序收紧 min，升序收紧 max
    pub fn tightened(&self, sort: &PrimarySortInfo, boundary: Vec<u8>) -> Self {
        let mut next = self.clone();
        let descending = sort.leading().is_some_and(|o| o.sort_by.is_descending());
        if descending {
            next.inclusive_min_value    = Some(boundary);
            next.inclusive_min_property = None;
        } else {
            next.inclusive_max_value    = Some(boundary);
            next.inclusive_max_property = None;
        }
        next
    }
}

#[derive(Debug, Clone, Copy)]
pub enum IndexConditionField { MaxValue, MinValue, MaxProperty, MinProperty }

impl Versioned for IndexCondition {
    type Field = IndexConditionField;
    const TYPE_NAME: &'static str = "IndexCondition";
    const CURRENT_VERSION: u8 = 2;
    const SCHEMA: &'static [(u8, IndexConditionField)] = &[
        (1, IndexConditionField::MaxValue),
        (1, IndexConditionField::MinValue),
        (2, IndexConditionField::MaxProperty),
        (2, IndexConditionField::MinProperty),
    ];

    fn write_field(&self, field: IndexConditionField, w: &mut PrimitiveWriter) -> Result<()> {
        match field {
            IndexConditionField::MaxValue    => w.write_opt_bytes(self.inclusive_max_value.as_deref()),
            IndexConditionField::MinValue    => w.write_opt_bytes(self.inclusive_min_value.as_deref()),
            IndexConditionField::MaxProperty => w.write_opt_string(self.inclusive_max_property.as_deref()),
            IndexConditionField::MinProperty => w.write_opt_string(self.inclusive_min_property.as_deref()),
        }
    }
    fn read_field(&mut self, field: IndexConditionField, r: &mut PrimitiveReader<'_>) -> Result<()> {
        match field {
            IndexConditionField::MaxValue    => self.inclusive_max_value = r.read_opt_bytes()?,
            IndexConditionField::MinValue    => self.inclusive_min_value = r.read_opt_bytes()?,
            IndexConditionField::MaxProperty => self.inclusive_max_property = r.read_opt_string()?,
            IndexConditionField::MinProperty => self.inclusive_min_property = r.read_opt_string()?,
        }
        Ok(())
    }
}

// ── CapCondition ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct FilterCap {
    pub cap:               i32,
    pub filter:            Option<Filter>,
    /// true 时使用查询级过滤器而非本桶的过滤器
    pub use_parent_filter: bool,
}

impl FilterCap {
    pub fn new(cap: i32) -> Self { Self { cap, filter: None, use_parent_filter: true } }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self.use_parent_filter = false;
        self
    }
}

impl Wire for FilterCap {
    fn write_to(&self, w: &mut PrimitiveWriter) -> Result<()> {
        w.write_i32(self.cap)?;
        write_option(w, self.filter.as_ref())?;
        w.write_bool(self.use_parent_filter)
    }
    fn read_from(r: &mut PrimitiveReader<'_>) -> Result<Self> {
        Ok(Self { cap: r.read_i32()?, filter: read_option(r)?, use_parent_filter: r.read_bool()? })
    }
}

/// 按某个标签值分桶，每桶最多接纳 `cap` 个条目
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CapCondition {
    pub field_name:              String,
    pub filter_caps:             BTreeMap<Vec<u8>, FilterCap>,
    /// true 时没有配额定义的桶里的条目一律丢弃
    pub ignore_non_capped_items: bool,
}

impl CapCondition {
    pub fn new(field_name: &str) -> Self {
        Self { field_name: field_name.into(), ..Default::default() }
    }

    pub fn with_cap(mut self, value: impl Into<Vec<u8>>, cap: FilterCap) -> Self {
        self.filter_caps.insert(value.into(), cap); self
    }

    pub fn ignoring_non_capped(mut self) -> Self {
        self.ignore_non_capped_items = true; self
    }

    /// 条目能否进入结果；进入有配额的桶时扣减剩余配额
    pub fn admit(
        &self,
        item:    &ResultItem,
        parent:  Option<&Filter>,
        tracker: &mut CapTracker,
    ) -> Result<bool> {
        let bucket = item.tag(&self.field_name);
        match bucket.and_then(|v| self.filter_caps.get(v).map(|fc| (v, fc))) {
            Some((value, fc)) => {
                if tracker.remaining(value) <= 0 {
                    return Ok(false);
                }
                let filter = if fc.use_parent_filter { parent } else { fc.filter.as_ref() };
                if passes(filter, item)? {
                    tracker.take(value);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            None => Ok(!self.ignore_non_capped_items && passes(parent, item)?),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum CapConditionField { FieldName, FilterCaps, IgnoreNonCapped }

impl Versioned for CapCondition {
    type Field = CapConditionField;
    const TYPE_NAME: &'static str = "CapCondition";
    const CURRENT_VERSION: u8 = 2;
    const SCHEMA: &'static [(u8, CapConditionField)] = &[
        (1, CapConditionField::FieldName),
        (1, CapConditionField::FilterCaps),
        (2, CapConditionField::IgnoreNonCapped),
    ];

    fn write_field(&self, field: CapConditionField, w: &mut PrimitiveWriter) -> Result<()> {
        match field {
            CapConditionField::FieldName => w.write_string(&self.field_name),
            CapConditionField::FilterCaps => {
                w.write_count(self.filter_caps.len())?;
                for (value, cap) in &self.filter_caps {
                    w.write_bytes(value)?;
                    cap.write_to(w)?;
                }
                Ok(())
            }
            CapConditionField::IgnoreNonCapped => w.write_bool(self.ignore_non_capped_items),
        }
    }
    fn read_field(&mut self, field: CapConditionField, r: &mut PrimitiveReader<'_>) -> Result<()> {
        match field {
            CapConditionField::FieldName => self.field_name = r.read_string()?,
            CapConditionField::FilterCaps => {
                let n = r.read_count()?;
                for _ in 0..n {
                    let value = r.read_bytes()?;
                    self.filter_caps.insert(value, FilterCap::read_from(r)?);
                }
            }
            CapConditionField::IgnoreNonCapped => self.ignore_non_capped_items = r.read_bool()?,
        }
        Ok(())
    }
}

/// 一次分区查询内共享的剩余配额；CapCondition 本身保持不可变
#[derive(Debug, Clone, Default)]
pub struct CapTracker {
    remaining: HashMap<Vec<u8>, i32>,
}

impl CapTracker {
    pub fn new(cap: &CapCondition) -> Self {
        let remaining = cap.filter_caps.iter().map(|(v, fc)| (v.clone(), fc.cap)).collect();
        Self { remaining }
    }

    pub fn remaining(&self, value: &[u8]) -> i32 {
        self.remaining.get(value).copied().unwrap_or(0)
    }

    fn take(&mut self, value: &[u8]) {
        if let Some(left) = self.remaining.get_mut(value) {
            *left -= 1;
        }
    }
}
