//! 分组：复合分组键、条目袋（ResultItemBag）与有序分组结果

use std::collections::{BTreeSet, HashSet};

use crate::codec::{read_byte_list, read_list, write_byte_list, write_list, PrimitiveReader, PrimitiveWriter, Versioned, Wire};
use crate::common::{is_item_id_field, Result};
use crate::comparer::{insert_sorted, upper_bound, ItemComparer};
use crate::item::ResultItem;

// ── GroupBy ───────────────────────────────────────────────────────────────────

/// 分组规则
///
/// `field_name` 为空时，所有条目按 `group_by_field_names` 分组；否则条目的
/// `field_name` 值落在 `field_value_set` 内时按 `group_by_field_names`，其余按
/// `non_group_by_field_names` 分组。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupBy {
    pub group_by_field_names:     Vec<String>,
    pub field_name:               String,
    pub field_value_set:          BTreeSet<Vec<u8>>,
    pub non_group_by_field_names: Vec<String>,
}

impl GroupBy {
    pub fn by_fields(fields: &[&str]) -> Self {
        Self { group_by_field_names: fields.iter().map(|f| f.to_string()).collect(), ..Default::default() }
    }

    pub fn with_selector(mut self, field_name: &str, values: impl IntoIterator<Item = Vec<u8>>, others: &[&str]) -> Self {
        self.field_name = field_name.into();
        self.field_value_set = values.into_iter().collect();
        self.non_group_by_field_names = others.iter().map(|f| f.to_string()).collect();
        self
    }

    /// 复合键：依次拼接各非空字段的值；`ItemId` 取条目自身 id，缺失标签不贡献字节
    pub fn composite_key(&self, item: &ResultItem) -> Vec<u8> {
        let fields = if self.field_name.is_empty() {
            &self.group_by_field_names
        } else {
            let selected = field_value(item, &self.field_name)
                .is_some_and(|v| self.field_value_set.contains(v));
            if selected { &self.group_by_field_names } else { &self.non_group_by_field_names }
        };

        let mut key = Vec::new();
        for name in fields.iter().filter(|n| !n.is_empty()) {
            if let Some(v) = field_value(item, name) {
                key.extend_from_slice(v);
            }
        }
        key
    }
}

fn field_value<'i>(item: &'i ResultItem, name: &str) -> Option<&'i [u8]> {
    if is_item_id_field(name) { Some(&item.item_id) } else { item.tag(name) }
}

#[derive(Debug, Clone, Copy)]
pub enum GroupByField { FieldNames, FieldName, FieldValueSet, NonGroupByFieldNames }

impl Versioned for GroupBy {
    type Field = GroupByField;
    const TYPE_NAME: &'static str = "GroupBy";
    const CURRENT_VERSION: u8 = 1;
    const SCHEMA: &'static [(u8, GroupByField)] = &[
        (1, GroupByField::FieldNames),
        (1, GroupByField::FieldName),
        (1, GroupByField::FieldValueSet),
        (1, GroupByField::NonGroupByFieldNames),
    ];

    fn write_field(&self, field: GroupByField, w: &mut PrimitiveWriter) -> Result<()> {
        match field {
            GroupByField::FieldNames => write_strings(w, &self.group_by_field_names),
            GroupByField::FieldName  => w.write_string(&self.field_name),
            GroupByField::FieldValueSet => {
                let values: Vec<Vec<u8>> = self.field_value_set.iter().cloned().collect();
                write_byte_list(w, &values)
            }
            GroupByField::NonGroupByFieldNames => write_strings(w, &self.non_group_by_field_names),
        }
    }
    fn read_field(&mut self, field: GroupByField, r: &mut PrimitiveReader<'_>) -> Result<()> {
        match field {
            GroupByField::FieldNames           => self.group_by_field_names = read_strings(r)?,
            GroupByField::FieldName            => self.field_name = r.read_string()?,
            GroupByField::FieldValueSet        => self.field_value_set = read_byte_list(r)?.into_iter().collect(),
            GroupByField::NonGroupByFieldNames => self.non_group_by_field_names = read_strings(r)?,
        }
        Ok(())
    }
}

pub(crate) fn write_strings(w: &mut PrimitiveWriter, v: &[String]) -> Result<()> {
    w.write_count(v.len())?;
    v.iter().try_for_each(|s| w.write_string(s))
}

pub(crate) fn read_strings(r: &mut PrimitiveReader<'_>) -> Result<Vec<String>> {
    let n = r.read_count()?;
    (0..n).map(|_| r.read_string()).collect()
}

// ── ResultItemBag ─────────────────────────────────────────────────────────────

/// 同一分组键下的条目，按排序规则有序
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultItemBag {
    pub composite_key: Vec<u8>,
    pub items:         Vec<ResultItem>,
}

impl ResultItemBag {
    pub fn new(composite_key: Vec<u8>) -> Self { Self { composite_key, items: Vec::new() } }

    pub fn first(&self) -> Option<&ResultItem> { self.items.first() }

    pub fn add(&mut self, item: ResultItem, cmp: &ItemComparer) -> Result<()> {
        insert_sorted(&mut self.items, item, |a, b| cmp.compare(a, b))
    }
}

impl Wire for ResultItemBag {
    fn write_to(&self, w: &mut PrimitiveWriter) -> Result<()> {
        w.write_bytes(&self.composite_key)?;
        write_list(w, &self.items)
    }
    fn read_from(r: &mut PrimitiveReader<'_>) -> Result<Self> {
        Ok(Self { composite_key: r.read_bytes()?, items: read_list(r)? })
    }
}

pub(crate) fn compare_bags(cmp: &ItemComparer, a: &ResultItemBag, b: &ResultItemBag) -> Result<std::cmp::Ordering> {
    cmp.compare_keys(
        a.first().and_then(|i| cmp.sort_key(i)),
        b.first().and_then(|i| cmp.sort_key(i)),
    )
}

// ── GroupByResult ─────────────────────────────────────────────────────────────

/// 分组结果：袋按各自首个条目排序
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupByResult {
    bags: Vec<ResultItemBag>,
    keys: HashSet<Vec<u8>>,
}

impl GroupByResult {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.bags.len() }
    pub fn is_empty(&self) -> bool { self.bags.is_empty() }
    pub fn bags(&self) -> &[ResultItemBag] { &self.bags }
    pub fn into_bags(self) -> Vec<ResultItemBag> { self.bags }
    pub fn item_count(&self) -> usize { self.bags.iter().map(|b| b.items.len()).sum() }

    pub fn contains_key(&self, key: &[u8]) -> bool { self.keys.contains(key) }

    fn take_bag(&mut self, key: &[u8]) -> Option<ResultItemBag> {
        if !self.keys.remove(key) {
            return None;
        }
        let pos = self.bags.iter().position(|b| b.composite_key == key)?;
        Some(self.bags.remove(pos))
    }

    fn place(&mut self, bag: ResultItemBag, cmp: &ItemComparer) -> Result<()> {
        let pos = upper_bound(&self.bags, &bag, |a, b| compare_bags(cmp, a, b))?;
        self.keys.insert(bag.composite_key.clone());
        self.bags.insert(pos, bag);
        Ok(())
    }

    /// 条目加入其分组；袋的首个条目可能改变，因此先取出再按序放回
    pub fn add_item(&mut self, key: Vec<u8>, item: ResultItem, cmp: &ItemComparer) -> Result<()> {
        let mut bag = self.take_bag(&key).unwrap_or_else(|| ResultItemBag::new(key));
        bag.add(item, cmp)?;
        self.place(bag, cmp)
    }

    /// 整袋加入；同键的袋合并
    pub fn add_bag(&mut self, bag: ResultItemBag, cmp: &ItemComparer) -> Result<()> {
        match self.take_bag(&bag.composite_key) {
            Some(mut existing) => {
                for item in bag.items {
                    existing.add(item, cmp)?;
                }
                self.place(existing, cmp)
            }
            None => self.place(bag, cmp),
        }
    }

    /// 已有序的袋直接构造（线上读取）
    pub fn from_sorted_bags(bags: Vec<ResultItemBag>) -> Self {
        let keys = bags.iter().map(|b| b.composite_key.clone()).collect();
        Self { bags, keys }
    }

    /// 按页截取袋
    pub fn page(self, start: usize, end: usize) -> Self {
        let bags = self.bags.into_iter().skip(start).take(end.saturating_sub(start)).collect();
        Self::from_sorted_bags(bags)
    }

    pub fn index_ids(&self) -> impl Iterator<Item = &[u8]> {
        self.bags.iter().flat_map(|b| b.items.iter().map(|i| i.index_id.as_slice()))
    }
}

impl Wire for GroupByResult {
    fn write_to(&self, w: &mut PrimitiveWriter) -> Result<()> {
        write_list(w, &self.bags)
    }
    fn read_from(r: &mut PrimitiveReader<'_>) -> Result<Self> {
        Ok(Self::from_sorted_bags(read_list(r)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_type::{DataType, PrimarySortInfo, SortOrder, Value};

    fn item(id: &str, color: &str, score: i32) -> ResultItem {
        ResultItem::new(b"ix", id.as_bytes())
            .with_tag("color", color.as_bytes().to_vec())
            .with_tag("score", Value::Int32(score).to_bytes())
    }

    fn by_score_desc() -> ItemComparer {
        ItemComparer::new(PrimarySortInfo::by_tag("score", vec![SortOrder::desc(DataType::Int32)]))
    }

    #[test]
    fn composite_key_uses_selector_sets() {
        let g = GroupBy::by_fields(&["color", "ItemId"])
            .with_selector("color", [b"red".to_vec()], &["score"]);
        assert_eq!(g.composite_key(&item("a", "red", 1)), b"reda".to_vec());
        assert_eq!(g.composite_key(&item("b", "blue", 1)), Value::Int32(1).to_bytes());

        let plain = GroupBy::by_fields(&["color", "", "missing"]);
        assert_eq!(plain.composite_key(&item("a", "red", 1)), b"red".to_vec());
    }

    #[test]
    fn bags_stay_ordered_by_their_first_item() {
        let cmp = by_score_desc();
        let g = GroupBy::by_fields(&["color"]);
        let mut result = GroupByResult::new();
        for it in [item("a", "red", 5), item("b", "blue", 7), item("c", "red", 9)] {
            result.add_item(g.composite_key(&it), it, &cmp).unwrap();
        }
        // red 袋首项变为 9，排到 blue(7) 之前
        let keys: Vec<&[u8]> = result.bags().iter().map(|b| b.composite_key.as_slice()).collect();
        assert_eq!(keys, vec![&b"red"[..], &b"blue"[..]]);
        assert_eq!(result.bags()[0].items.len(), 2);
        assert_eq!(result.item_count(), 3);
    }

    #[test]
    fn adding_a_bag_with_existing_key_merges() {
        let cmp = by_score_desc();
        let mut result = GroupByResult::new();
        let mut bag = ResultItemBag::new(b"red".to_vec());
        bag.add(item("a", "red", 1), &cmp).unwrap();
        result.add_bag(bag.clone(), &cmp).unwrap();
        let mut more = ResultItemBag::new(b"red".to_vec());
        more.add(item("b", "red", 3), &cmp).unwrap();
        result.add_bag(more, &cmp).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.bags()[0].items[0].item_id, b"b".to_vec());
        assert!(result.contains_key(b"red"));
    }
}
