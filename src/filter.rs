//! 条目过滤谓词树

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::codec::{read_list, write_list, PrimitiveReader, PrimitiveWriter, Wire};
use crate::common::{is_item_id_field, QueryError, Result};
use crate::comparer::compare_values;
use crate::field_type::DataType;
use crate::item::ResultItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanEquals,
    LessThan,
    LessThanEquals,
}

impl Operation {
    fn holds(self, ord: Ordering) -> bool {
        match self {
            Self::Equals            => ord == Ordering::Equal,
            Self::NotEquals         => ord != Ordering::Equal,
            Self::GreaterThan       => ord == Ordering::Greater,
            Self::GreaterThanEquals => ord != Ordering::Less,
            Self::LessThan          => ord == Ordering::Less,
            Self::LessThanEquals    => ord != Ordering::Greater,
        }
    }

    fn code(self) -> u8 {
        match self {
            Self::Equals            => 0,
            Self::NotEquals         => 1,
            Self::GreaterThan       => 2,
            Self::GreaterThanEquals => 3,
            Self::LessThan          => 4,
            Self::LessThanEquals    => 5,
        }
    }

    fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => Self::Equals,
            1 => Self::NotEquals,
            2 => Self::GreaterThan,
            3 => Self::GreaterThanEquals,
            4 => Self::LessThan,
            5 => Self::LessThanEquals,
            _ => return Err(QueryError::InvalidData(format!("unknown operation code {code}"))),
        })
    }
}

/// `field <op> value`；字段缺失或值未解析时不成立
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field_name:        String,
    pub is_tag:            bool,
    pub operation:         Operation,
    pub value:             Option<Vec<u8>>,
    pub data_type:         DataType,
    /// 非空时，比较值取自索引元数据属性集合中的同名属性
    pub metadata_property: Option<String>,
}

impl Condition {
    pub fn new(field_name: &str, operation: Operation, value: Vec<u8>, data_type: DataType) -> Self {
        Self {
            field_name: field_name.into(),
            is_tag: !is_item_id_field(field_name),
            operation,
            value: Some(value),
            data_type,
            metadata_property: None,
        }
    }

    /// 比较值来自索引元数据属性
    pub fn on_metadata(field_name: &str, operation: Operation, property: &str, data_type: DataType) -> Self {
        Self {
            field_name: field_name.into(),
            is_tag: !is_item_id_field(field_name),
            operation,
            value: None,
            data_type,
            metadata_property: Some(property.into()),
        }
    }

    pub fn matches(&self, item: &ResultItem) -> Result<bool> {
        let (Some(field), Some(value)) = (item.field_value(&self.field_name, self.is_tag), &self.value)
        else {
            return Ok(false);
        };
        Ok(self.operation.holds(compare_values(self.data_type, field, value)?))
    }

    pub(crate) fn resolve(&mut self, props: Option<&BTreeMap<String, Vec<u8>>>) {
        if let Some(name) = &self.metadata_property {
            self.value = props.and_then(|p| p.get(name)).cloned();
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Condition(Condition),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn matches(&self, item: &ResultItem) -> Result<bool> {
        match self {
            Self::Condition(c) => c.matches(item),
            Self::And(fs) => {
                for f in fs {
                    if !f.matches(item)? { return Ok(false); }
                }
                Ok(true)
            }
            Self::Or(fs) => {
                for f in fs {
                    if f.matches(item)? { return Ok(true); }
                }
                Ok(false)
            }
            Self::Not(f) => Ok(!f.matches(item)?),
        }
    }

    /// 以索引的元数据属性填充引用属性的条件值
    pub fn resolve_metadata(&mut self, props: Option<&BTreeMap<String, Vec<u8>>>) {
        match self {
            Self::Condition(c)       => c.resolve(props),
            Self::And(fs) | Self::Or(fs) => fs.iter_mut().for_each(|f| f.resolve_metadata(props)),
            Self::Not(f)             => f.resolve_metadata(props),
        }
    }

    pub fn has_metadata_refs(&self) -> bool {
        match self {
            Self::Condition(c)           => c.metadata_property.is_some(),
            Self::And(fs) | Self::Or(fs) => fs.iter().any(Filter::has_metadata_refs),
            Self::Not(f)                 => f.has_metadata_refs(),
        }
    }
}

/// 可选过滤器：None 恒通过
pub fn passes(filter: Option<&Filter>, item: &ResultItem) -> Result<bool> {
    filter.map_or(Ok(true), |f| f.matches(item))
}

// ── 线上格式 ──────────────────────────────────────────────────────────────────

const KIND_CONDITION: u8 = 0;
const KIND_AND:       u8 = 1;
const KIND_OR:        u8 = 2;
const KIND_NOT:       u8 = 3;

impl Wire for Condition {
    fn write_to(&self, w: &mut PrimitiveWriter) -> Result<()> {
        w.write_string(&self.field_name)?;
        w.write_bool(self.is_tag)?;
        w.write_u8(self.operation.code())?;
        w.write_opt_bytes(self.value.as_deref())?;
        w.write_u8(self.data_type.code())?;
        w.write_opt_string(self.metadata_property.as_deref())
    }
    fn read_from(r: &mut PrimitiveReader<'_>) -> Result<Self> {
        Ok(Self {
            field_name:        r.read_string()?,
            is_tag:            r.read_bool()?,
            operation:         Operation::from_code(r.read_u8()?)?,
            value:             r.read_opt_bytes()?,
            data_type:         DataType::from_code(r.read_u8()?)?,
            metadata_property: r.read_opt_string()?,
        })
    }
}

impl Wire for Filter {
    fn write_to(&self, w: &mut PrimitiveWriter) -> Result<()> {
        match self {
            Self::Condition(c) => { w.write_u8(KIND_CONDITION)?; c.write_to(w) }
            Self::And(fs)      => { w.write_u8(KIND_AND)?; write_list(w, fs) }
            Self::Or(fs)       => { w.write_u8(KIND_OR)?; write_list(w, fs) }
            Self::Not(f)       => { w.write_u8(KIND_NOT)?; f.write_to(w) }
        }
    }
    fn read_from(r: &mut PrimitiveReader<'_>) -> Result<Self> {
        match r.read_u8()? {
            KIND_CONDITION => Ok(Self::Condition(Condition::read_from(r)?)),
            KIND_AND       => Ok(Self::And(read_list(r)?)),
            KIND_OR        => Ok(Self::Or(read_list(r)?)),
            KIND_NOT       => Ok(Self::Not(Box::new(Filter::read_from(r)?))),
            k              => Err(QueryError::InvalidData(format!("unknown filter kind {k}"))),
        }
    }
}
