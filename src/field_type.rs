//! 排序字段的值类型、排序方向与排序描述

use crate::codec::{PrimitiveReader, PrimitiveWriter, Wire};
use crate::common::{is_item_id_field, QueryError, Result};

/// 索引排序字段的值类型；定宽类型均为小端编码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    UInt16, Int16,
    UInt32, Int32,
    UInt64, Int64,
    /// 以 i32 存储的分钟级时间
    SmallDateTime,
    /// 以 i64 存储的 tick
    DateTime,
    Byte,
    Float, Double,
    /// UTF-8，占用字段剩余的全部字节
    String,
}

impl DataType {
    /// 固定字节宽度；变长类型返回 None
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            Self::Byte                                  => Some(1),
            Self::UInt16 | Self::Int16                  => Some(2),
            Self::UInt32 | Self::Int32 | Self::Float    => Some(4),
            Self::SmallDateTime                         => Some(4),
            Self::UInt64 | Self::Int64 | Self::Double   => Some(8),
            Self::DateTime                              => Some(8),
            Self::String                                => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::UInt16        => 0,
            Self::Int16         => 1,
            Self::UInt32        => 2,
            Self::Int32         => 3,
            Self::UInt64        => 4,
            Self::Int64         => 5,
            Self::String        => 6,
            Self::Byte          => 7,
            Self::SmallDateTime => 8,
            Self::DateTime      => 9,
            Self::Float         => 10,
            Self::Double        => 11,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0  => Self::UInt16,
            1  => Self::Int16,
            2  => Self::UInt32,
            3  => Self::Int32,
            4  => Self::UInt64,
            5  => Self::Int64,
            6  => Self::String,
            7  => Self::Byte,
            8  => Self::SmallDateTime,
            9  => Self::DateTime,
            10 => Self::Float,
            11 => Self::Double,
            _  => return Err(QueryError::InvalidData(format!("unknown data type code {code}"))),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortBy { Ascending, Descending }

impl SortBy {
    pub fn is_descending(self) -> bool { self == Self::Descending }
}

// ── SortOrder / TagSort / PrimarySortInfo ─────────────────────────────────────

/// 复合排序键中的一个字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SortOrder {
    pub data_type: DataType,
    pub sort_by:   SortBy,
}

impl SortOrder {
    pub fn new(data_type: DataType, sort_by: SortBy) -> Self { Self { data_type, sort_by } }
    pub fn asc(data_type: DataType)  -> Self { Self::new(data_type, SortBy::Ascending) }
    pub fn desc(data_type: DataType) -> Self { Self::new(data_type, SortBy::Descending) }
}

/// 查询端对索引原生排序的覆盖
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSort {
    pub tag_name:   String,
    pub is_tag:     bool,
    pub sort_order: SortOrder,
}

impl TagSort {
    pub fn new(tag_name: &str, sort_order: SortOrder) -> Self {
        Self { tag_name: tag_name.into(), is_tag: !is_item_id_field(tag_name), sort_order }
    }

    pub fn to_sort_info(&self) -> PrimarySortInfo {
        PrimarySortInfo {
            field_name:  self.tag_name.clone(),
            is_tag:      self.is_tag,
            sort_orders: vec![self.sort_order],
        }
    }
}

/// 索引的排序描述：按哪个字段、用哪些 SortOrder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimarySortInfo {
    pub field_name:  String,
    /// false 表示按 ItemId 排序
    pub is_tag:      bool,
    pub sort_orders: Vec<SortOrder>,
}

impl PrimarySortInfo {
    pub fn by_item_id(sort_orders: Vec<SortOrder>) -> Self {
        Self { field_name: crate::common::ITEM_ID_FIELD.into(), is_tag: false, sort_orders }
    }
    pub fn by_tag(tag_name: &str, sort_orders: Vec<SortOrder>) -> Self {
        Self { field_name: tag_name.into(), is_tag: true, sort_orders }
    }

    /// 首个排序字段的方向决定 null 的位置以及边界条件的 Enter/Exit 方向
    pub fn leading(&self) -> Option<SortOrder> { self.sort_orders.first().copied() }
}

// ── Value ─────────────────────────────────────────────────────────────────────

/// 类型化值（构造编码、诊断输出）
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    UInt16(u16),
    Int16(i16),
    UInt32(u32),
    Int32(i32),
    UInt64(u64),
    Int64(i64),
    SmallDateTime(i32),
    DateTime(i64),
    Byte(u8),
    Float(f32),
    Double(f64),
    String(String),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Self::UInt16(_)        => DataType::UInt16,
            Self::Int16(_)         => DataType::Int16,
            Self::UInt32(_)        => DataType::UInt32,
            Self::Int32(_)         => DataType::Int32,
            Self::UInt64(_)        => DataType::UInt64,
            Self::Int64(_)         => DataType::Int64,
            Self::SmallDateTime(_) => DataType::SmallDateTime,
            Self::DateTime(_)      => DataType::DateTime,
            Self::Byte(_)          => DataType::Byte,
            Self::Float(_)         => DataType::Float,
            Self::Double(_)        => DataType::Double,
            Self::String(_)        => DataType::String,
        }
    }

    /// 线上（小端）字节编码
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::UInt16(v)        => v.to_le_bytes().to_vec(),
            Self::Int16(v)         => v.to_le_bytes().to_vec(),
            Self::UInt32(v)        => v.to_le_bytes().to_vec(),
            Self::Int32(v)         => v.to_le_bytes().to_vec(),
            Self::UInt64(v)        => v.to_le_bytes().to_vec(),
            Self::Int64(v)         => v.to_le_bytes().to_vec(),
            Self::SmallDateTime(v) => v.to_le_bytes().to_vec(),
            Self::DateTime(v)      => v.to_le_bytes().to_vec(),
            Self::Byte(v)          => vec![*v],
            Self::Float(v)         => v.to_le_bytes().to_vec(),
            Self::Double(v)        => v.to_le_bytes().to_vec(),
            Self::String(s)        => s.as_bytes().to_vec(),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UInt16(v)        => write!(f, "{v}"),
            Self::Int16(v)         => write!(f, "{v}"),
            Self::UInt32(v)        => write!(f, "{v}"),
            Self::Int32(v)         => write!(f, "{v}"),
            Self::UInt64(v)        => write!(f, "{v}"),
            Self::Int64(v)         => write!(f, "{v}"),
            Self::SmallDateTime(v) => write!(f, "{v}"),
            Self::DateTime(v)      => write!(f, "{v}"),
            Self::Byte(v)          => write!(f, "{v}"),
            Self::Float(v)         => write!(f, "{v}"),
            Self::Double(v)        => write!(f, "{v}"),
            Self::String(s)        => write!(f, "{s}"),
        }
    }
}

// ── 线上格式 ──────────────────────────────────────────────────────────────────

impl Wire for SortOrder {
    fn write_to(&self, w: &mut PrimitiveWriter) -> Result<()> {
        w.write_u8(self.data_type.code())?;
        w.write_bool(self.sort_by.is_descending())
    }
    fn read_from(r: &mut PrimitiveReader<'_>) -> Result<Self> {
        let data_type = DataType::from_code(r.read_u8()?)?;
        let sort_by = if r.read_bool()? { SortBy::Descending } else { SortBy::Ascending };
        Ok(Self { data_type, sort_by })
    }
}

impl Wire for TagSort {
    fn write_to(&self, w: &mut PrimitiveWriter) -> Result<()> {
        w.write_string(&self.tag_name)?;
        w.write_bool(self.is_tag)?;
        self.sort_order.write_to(w)
    }
    fn read_from(r: &mut PrimitiveReader<'_>) -> Result<Self> {
        Ok(Self {
            tag_name:   r.read_string()?,
            is_tag:     r.read_bool()?,
            sort_order: SortOrder::read_from(r)?,
        })
    }
}
