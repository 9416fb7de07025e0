//! 类型化比较器：按声明的值类型与方向比较两段原始字节
//!
//! 复合排序键按 SortOrder 顺序逐字段比较，两侧各自维护读取游标；
//! 降序字段交换操作数。比较失败时带完整上下文记录日志后返回错误。

use std::cmp::Ordering;

use byteorder::{ByteOrder, LittleEndian};

use crate::common::{QueryError, Result, TagHash};
use crate::field_type::{DataType, PrimarySortInfo, SortOrder};
use crate::item::ResultItem;

// ── 单字段比较 ────────────────────────────────────────────────────────────────

fn take<'b>(buf: &'b [u8], cursor: &mut usize, n: usize) -> Result<&'b [u8]> {
    let end = cursor.checked_add(n).filter(|&e| e <= buf.len()).ok_or_else(|| {
        QueryError::Comparer(format!(
            "need {n} bytes at offset {cursor}, buffer has {}", buf.len(),
        ))
    })?;
    let s = &buf[*cursor..end];
    *cursor = end;
    Ok(s)
}

fn take_str<'b>(buf: &'b [u8], cursor: &mut usize) -> Result<&'b str> {
    let rest = buf.get(*cursor..).unwrap_or_default();
    let s = std::str::from_utf8(rest)
        .map_err(|e| QueryError::Comparer(format!("invalid utf-8 at offset {cursor}: {e}")))?;
    *cursor = buf.len();
    Ok(s)
}

/// NaN 与 NaN 相等，且小于任何数值
fn cmp_f64(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true)   => Ordering::Equal,
        (true, false)  => Ordering::Less,
        (false, true)  => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// 从各自游标处解码一个 `data_type` 值并比较（升序语义），游标前移
pub fn compare_field(
    data_type: DataType,
    a:         &[u8],
    ca:        &mut usize,
    b:         &[u8],
    cb:        &mut usize,
) -> Result<Ordering> {
    Ok(match data_type {
        DataType::UInt16 =>
            LittleEndian::read_u16(take(a, ca, 2)?).cmp(&LittleEndian::read_u16(take(b, cb, 2)?)),
        DataType::Int16 =>
            LittleEndian::read_i16(take(a, ca, 2)?).cmp(&LittleEndian::read_i16(take(b, cb, 2)?)),
        DataType::UInt32 =>
            LittleEndian::read_u32(take(a, ca, 4)?).cmp(&LittleEndian::read_u32(take(b, cb, 4)?)),
        DataType::Int32 | DataType::SmallDateTime =>
            LittleEndian::read_i32(take(a, ca, 4)?).cmp(&LittleEndian::read_i32(take(b, cb, 4)?)),
        DataType::UInt64 =>
            LittleEndian::read_u64(take(a, ca, 8)?).cmp(&LittleEndian::read_u64(take(b, cb, 8)?)),
        DataType::Int64 | DataType::DateTime =>
            LittleEndian::read_i64(take(a, ca, 8)?).cmp(&LittleEndian::read_i64(take(b, cb, 8)?)),
        DataType::Byte =>
            take(a, ca, 1)?[0].cmp(&take(b, cb, 1)?[0]),
        DataType::Float => cmp_f64(
            LittleEndian::read_f32(take(a, ca, 4)?) as f64,
            LittleEndian::read_f32(take(b, cb, 4)?) as f64,
        ),
        DataType::Double => cmp_f64(
            LittleEndian::read_f64(take(a, ca, 8)?),
            LittleEndian::read_f64(take(b, cb, 8)?),
        ),
        DataType::String => take_str(a, ca)?.cmp(take_str(b, cb)?),
    })
}

/// 单字段、从偏移 0 开始的升序比较（过滤条件使用）
pub fn compare_values(data_type: DataType, a: &[u8], b: &[u8]) -> Result<Ordering> {
    compare_field(data_type, a, &mut 0, b, &mut 0)
}

/// 诊断输出：4 字节按 i32 展示，其余按字节列表；缺失为 "Null Buffer"
pub fn readable_bytes(buf: Option<&[u8]>) -> String {
    match buf {
        None                    => "Null Buffer".into(),
        Some(b) if b.len() == 4 => LittleEndian::read_i32(b).to_string(),
        Some(b)                 => format!("{b:?}"),
    }
}

// ── IndexComparer：复合排序键 ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct IndexComparer {
    sort_orders: Vec<SortOrder>,
    /// 仅用于诊断日志
    tag_hash:    Option<TagHash>,
}

impl IndexComparer {
    pub fn new(sort_orders: Vec<SortOrder>) -> Self {
        Self { sort_orders, tag_hash: None }
    }

    pub fn with_tag_hash(mut self, tag_hash: TagHash) -> Self {
        self.tag_hash = Some(tag_hash); self
    }

    pub fn sort_orders(&self) -> &[SortOrder] { &self.sort_orders }

    pub fn compare(&self, a: Option<&[u8]>, b: Option<&[u8]>) -> Result<Ordering> {
        let leading = self.sort_orders.first()
            .ok_or_else(|| QueryError::Comparer("empty sort order list".into()))?;

        let (a_bytes, b_bytes) = match (a, b) {
            (None, None)         => return Ok(Ordering::Equal),
            (None, Some(_))      => return Ok(directed(Ordering::Less, *leading)),
            (Some(_), None)      => return Ok(directed(Ordering::Greater, *leading)),
            (Some(x), Some(y))   => (x, y),
        };

        let (mut ca, mut cb) = (0usize, 0usize);
        match self.compare_fields(a_bytes, &mut ca, b_bytes, &mut cb) {
            Ok(ord) => Ok(ord),
            Err(e) => {
                tracing::error!(
                    buffer1      = %readable_bytes(a),
                    buffer2      = %readable_bytes(b),
                    start_index1 = ca,
                    start_index2 = cb,
                    tag_hash     = ?self.tag_hash,
                    sort_orders  = ?self.sort_orders,
                    error        = %e,
                    "index comparer failed",
                );
                Err(e)
            }
        }
    }

    fn compare_fields(&self, a: &[u8], ca: &mut usize, b: &[u8], cb: &mut usize) -> Result<Ordering> {
        for order in &self.sort_orders {
            let ord = if order.sort_by.is_descending() {
                compare_field(order.data_type, b, cb, a, ca)?
            } else {
                compare_field(order.data_type, a, ca, b, cb)?
            };
            if ord != Ordering::Equal {
                return Ok(ord);
            }
        }
        Ok(Ordering::Equal)
    }
}

fn directed(ord: Ordering, order: SortOrder) -> Ordering {
    if order.sort_by.is_descending() { ord.reverse() } else { ord }
}

// ── ItemComparer：按排序字段比较条目 ──────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ItemComparer {
    sort:  PrimarySortInfo,
    inner: IndexComparer,
}

impl ItemComparer {
    pub fn new(sort: PrimarySortInfo) -> Self {
        let mut inner = IndexComparer::new(sort.sort_orders.clone());
        if sort.is_tag {
            inner = inner.with_tag_hash(crate::lookup::tag_hash_code(&sort.field_name));
        }
        Self { sort, inner }
    }

    pub fn sort_info(&self) -> &PrimarySortInfo { &self.sort }

    /// 条目的排序键：ItemId 或排序标签的值
    pub fn sort_key<'i>(&self, item: &'i ResultItem) -> Option<&'i [u8]> {
        item.field_value(&self.sort.field_name, self.sort.is_tag)
    }

    pub fn compare(&self, a: &ResultItem, b: &ResultItem) -> Result<Ordering> {
        self.inner.compare(self.sort_key(a), self.sort_key(b))
    }

    pub fn compare_keys(&self, a: Option<&[u8]>, b: Option<&[u8]>) -> Result<Ordering> {
        self.inner.compare(a, b)
    }
}

// ── 有序插入 ──────────────────────────────────────────────────────────────────

/// 第一个严格大于 `probe` 的位置（相等元素之后），用于稳定的有序插入
pub fn upper_bound<T>(
    sorted: &[T],
    probe:  &T,
    cmp:    impl Fn(&T, &T) -> Result<Ordering>,
) -> Result<usize> {
    let (mut lo, mut hi) = (0usize, sorted.len());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if cmp(&sorted[mid], probe)? == Ordering::Greater {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    Ok(lo)
}

/// 第一个不小于 `probe` 的位置
pub fn lower_bound<T, P: ?Sized>(
    sorted: &[T],
    probe:  &P,
    cmp:    impl Fn(&T, &P) -> Result<Ordering>,
) -> Result<usize> {
    let (mut lo, mut hi) = (0usize, sorted.len());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if cmp(&sorted[mid], probe)? == Ordering::Less {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    Ok(lo)
}

pub fn insert_sorted<T>(
    sorted: &mut Vec<T>,
    value:  T,
    cmp:    impl Fn(&T, &T) -> Result<Ordering>,
) -> Result<()> {
    let pos = upper_bound(sorted, &value, cmp)?;
    sorted.insert(pos, value);
    Ok(())
}

/// 按比较器对整个列表做稳定排序
pub fn sort_items(items: Vec<ResultItem>, cmp: &ItemComparer) -> Result<Vec<ResultItem>> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        insert_sorted(&mut out, item, |a, b| cmp.compare(a, b))?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_type::{SortBy, Value};
    use proptest::prelude::*;

    fn cmp(orders: Vec<SortOrder>, a: &[u8], b: &[u8]) -> Ordering {
        IndexComparer::new(orders).compare(Some(a), Some(b)).unwrap()
    }

    #[test]
    fn signed_values_compare_numerically_not_bytewise() {
        let minus_one = Value::Int32(-1).to_bytes();
        let two       = Value::Int32(2).to_bytes();
        assert_eq!(cmp(vec![SortOrder::asc(DataType::Int32)], &minus_one, &two), Ordering::Less);
        assert_eq!(cmp(vec![SortOrder::desc(DataType::Int32)], &minus_one, &two), Ordering::Greater);
    }

    #[test]
    fn composite_key_stops_at_first_difference() {
        let orders = vec![SortOrder::asc(DataType::Int16), SortOrder::desc(DataType::Int64)];
        let key = |x: i16, y: i64| [Value::Int16(x).to_bytes(), Value::Int64(y).to_bytes()].concat();
        assert_eq!(cmp(orders.clone(), &key(1, 5), &key(2, 0)), Ordering::Less);
        // 第一字段相等，第二字段降序
        assert_eq!(cmp(orders.clone(), &key(1, 5), &key(1, 9)), Ordering::Greater);
        assert_eq!(cmp(orders, &key(3, 3), &key(3, 3)), Ordering::Equal);
    }

    #[test]
    fn null_placement_follows_leading_direction() {
        let asc  = IndexComparer::new(vec![SortOrder::asc(DataType::Byte)]);
        let desc = IndexComparer::new(vec![SortOrder::desc(DataType::Byte)]);
        assert_eq!(asc.compare(None, Some(&[1])).unwrap(), Ordering::Less);
        assert_eq!(desc.compare(None, Some(&[1])).unwrap(), Ordering::Greater);
        assert_eq!(asc.compare(None, None).unwrap(), Ordering::Equal);
    }

    #[test]
    fn floats_put_nan_first() {
        let nan = Value::Double(f64::NAN).to_bytes();
        let one = Value::Double(1.0).to_bytes();
        let orders = vec![SortOrder::asc(DataType::Double)];
        assert_eq!(cmp(orders.clone(), &nan, &one), Ordering::Less);
        assert_eq!(cmp(orders, &nan, &nan), Ordering::Equal);
        assert_eq!(
            cmp(vec![SortOrder::asc(DataType::Float)], &Value::Float(-0.5).to_bytes(), &Value::Float(0.25).to_bytes()),
            Ordering::Less,
        );
    }

    #[test]
    fn strings_compare_ordinally_over_whole_span() {
        let orders = vec![SortOrder::asc(DataType::String)];
        assert_eq!(cmp(orders.clone(), b"b", b"aa"), Ordering::Greater);
        assert_eq!(cmp(orders, b"ab", b"abc"), Ordering::Less);
    }

    #[test]
    fn truncated_and_empty_orders_are_errors() {
        let c = IndexComparer::new(vec![SortOrder::asc(DataType::Int64)]);
        assert!(matches!(c.compare(Some(&[1, 2]), Some(&[0; 8])), Err(QueryError::Comparer(_))));
        let empty = IndexComparer::new(vec![]);
        assert!(empty.compare(Some(&[1]), Some(&[2])).is_err());
        assert!(IndexComparer::new(vec![SortOrder::asc(DataType::String)])
            .compare(Some(&[0xFF]), Some(b"a"))
            .is_err());
    }

    #[test]
    fn readable_bytes_formats_by_width() {
        assert_eq!(readable_bytes(None), "Null Buffer");
        assert_eq!(readable_bytes(Some(&7i32.to_le_bytes())), "7");
        assert_eq!(readable_bytes(Some(&[1, 2])), "[1, 2]");
    }

    #[test]
    fn upper_bound_keeps_equal_elements_stable() {
        let v = vec![1, 2, 2, 3];
        let c = |a: &i32, b: &i32| Ok(a.cmp(b));
        assert_eq!(upper_bound(&v, &2, c).unwrap(), 3);
        assert_eq!(lower_bound(&v, &2, c).unwrap(), 1);
    }

    proptest! {
        #[test]
        fn int64_comparer_agrees_with_native_order(a in any::<i64>(), b in any::<i64>(), desc in any::<bool>()) {
            let sort_by = if desc { SortBy::Descending } else { SortBy::Ascending };
            let got = cmp(vec![SortOrder::new(DataType::Int64, sort_by)],
                          &a.to_le_bytes(), &b.to_le_bytes());
            let want = if desc { b.cmp(&a) } else { a.cmp(&b) };
            prop_assert_eq!(got, want);
        }

        #[test]
        fn uint16_comparer_is_antisymmetric(a in any::<u16>(), b in any::<u16>()) {
            let orders = vec![SortOrder::asc(DataType::UInt16)];
            let ab = cmp(orders.clone(), &a.to_le_bytes(), &b.to_le_bytes());
            let ba = cmp(orders, &b.to_le_bytes(), &a.to_le_bytes());
            prop_assert_eq!(ab, ba.reverse());
        }
    }
}
