//! 线上二进制格式
//!
//! 所有定宽整数均为小端。变长字段统一为 `u16 长度 + 字节`，字符串为
//! `u16 长度 + UTF-8`，列表为 `i32 个数 + 元素`，可选值为 `bool + 值`。
//!
//! 带版本的类型（查询 / 结果）以对象头开头：
//!
//! ```text
//! ┌─────────┬─────────────┬───────────┬──────────────────────────┐
//! │ version │ min_version │ len (i32) │ fields (len 字节)         │
//! │   u8    │     u8      │           │ 引入版本 ≤ version 的字段 │
//! └─────────┴─────────────┴───────────┴──────────────────────────┘
//! ```
//!
//! 读取方只读自己认识的字段，随后跳到 `len` 标出的末尾，因此较新对端追加的
//! 字段对旧读取方透明；只有 `min_version` 高于读取方当前版本时才拒绝。
//! 每个类型只声明一张字段表（[`Versioned::SCHEMA`]），读写都由
//! [`write_versioned`] / [`read_versioned`] 这一组通用例程驱动。

pub mod envelope;

use std::io::{Cursor, Read};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::common::{QueryError, Result};

// ── PrimitiveWriter ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct PrimitiveWriter {
    buf: Vec<u8>,
}

impl PrimitiveWriter {
    pub fn new() -> Self { Self::default() }

    pub fn into_inner(self) -> Vec<u8> { self.buf }
    pub fn len(&self) -> usize { self.buf.len() }
    pub fn is_empty(&self) -> bool { self.buf.is_empty() }

    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.buf.write_u8(v)?; Ok(())
    }
    pub fn write_bool(&mut self, v: bool) -> Result<()> {
        self.write_u8(v as u8)
    }
    pub fn write_i16(&mut self, v: i16) -> Result<()> {
        self.buf.write_i16::<LittleEndian>(v)?; Ok(())
    }
    pub fn write_u16(&mut self, v: u16) -> Result<()> {
        self.buf.write_u16::<LittleEndian>(v)?; Ok(())
    }
    pub fn write_i32(&mut self, v: i32) -> Result<()> {
        self.buf.write_i32::<LittleEndian>(v)?; Ok(())
    }
    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        self.buf.write_u32::<LittleEndian>(v)?; Ok(())
    }
    pub fn write_i64(&mut self, v: i64) -> Result<()> {
        self.buf.write_i64::<LittleEndian>(v)?; Ok(())
    }

    /// 回填先前预留的 i32
    pub fn patch_i32(&mut self, at: usize, v: i32) -> Result<()> {
        let slot = self.buf.get_mut(at..at + 4)
            .ok_or_else(|| QueryError::InvalidData(format!("no i32 slot at offset {at}")))?;
        LittleEndian::write_i32(slot, v);
        Ok(())
    }

    pub fn write_raw(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    /// `u16 长度 + 字节`
    pub fn write_bytes(&mut self, v: &[u8]) -> Result<()> {
        let len = u16::try_from(v.len())
            .map_err(|_| QueryError::InvalidData(format!("field too long: {} bytes", v.len())))?;
        self.write_u16(len)?;
        self.write_raw(v);
        Ok(())
    }

    pub fn write_opt_bytes(&mut self, v: Option<&[u8]>) -> Result<()> {
        self.write_bool(v.is_some())?;
        match v {
            Some(b) => self.write_bytes(b),
            None    => Ok(()),
        }
    }

    pub fn write_string(&mut self, v: &str) -> Result<()> {
        self.write_bytes(v.as_bytes())
    }

    pub fn write_opt_string(&mut self, v: Option<&str>) -> Result<()> {
        self.write_opt_bytes(v.map(str::as_bytes))
    }

    pub fn write_count(&mut self, n: usize) -> Result<()> {
        let n = i32::try_from(n)
            .map_err(|_| QueryError::InvalidData(format!("list too long: {n}")))?;
        self.write_i32(n)
    }
}

// ── PrimitiveReader ───────────────────────────────────────────────────────────

pub struct PrimitiveReader<'a> {
    cur: Cursor<&'a [u8]>,
}

impl<'a> PrimitiveReader<'a> {
    pub fn new(data: &'a [u8]) -> Self { Self { cur: Cursor::new(data) } }

    pub fn position(&self) -> usize { self.cur.position() as usize }

    pub fn remaining(&self) -> usize {
        self.cur.get_ref().len().saturating_sub(self.position())
    }

    /// 尚未读取的字节（不移动游标）
    pub fn rest(&self) -> &'a [u8] {
        let data: &'a [u8] = *self.cur.get_ref();
        &data[self.position().min(data.len())..]
    }

    pub fn read_u8(&mut self) -> Result<u8> { Ok(self.cur.read_u8()?) }
    pub fn read_bool(&mut self) -> Result<bool> { Ok(self.read_u8()? != 0) }
    pub fn read_i16(&mut self) -> Result<i16> { Ok(self.cur.read_i16::<LittleEndian>()?) }
    pub fn read_u16(&mut self) -> Result<u16> { Ok(self.cur.read_u16::<LittleEndian>()?) }
    pub fn read_i32(&mut self) -> Result<i32> { Ok(self.cur.read_i32::<LittleEndian>()?) }
    pub fn read_u32(&mut self) -> Result<u32> { Ok(self.cur.read_u32::<LittleEndian>()?) }
    pub fn read_i64(&mut self) -> Result<i64> { Ok(self.cur.read_i64::<LittleEndian>()?) }

    pub fn read_raw(&mut self, len: usize) -> Result<Vec<u8>> {
        if len > self.remaining() {
            return Err(QueryError::Truncated(format!(
                "need {len} bytes at offset {}, {} left", self.position(), self.remaining(),
            )));
        }
        let mut v = vec![0u8; len];
        self.cur.read_exact(&mut v)?;
        Ok(v)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        if len > self.remaining() {
            return Err(QueryError::Truncated(format!(
                "cannot skip {len} bytes at offset {}", self.position(),
            )));
        }
        self.cur.set_position((self.position() + len) as u64);
        Ok(())
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u16()? as usize;
        self.read_raw(len)
    }

    /// 跳过一个 `u16 长度 + 字节` 字段
    pub fn skip_bytes(&mut self) -> Result<()> {
        let len = self.read_u16()? as usize;
        self.skip(len)
    }

    pub fn read_opt_bytes(&mut self) -> Result<Option<Vec<u8>>> {
        if self.read_bool()? { Ok(Some(self.read_bytes()?)) } else { Ok(None) }
    }

    pub fn read_string(&mut self) -> Result<String> {
        String::from_utf8(self.read_bytes()?)
            .map_err(|e| QueryError::InvalidData(format!("invalid utf-8 string: {e}")))
    }

    pub fn read_opt_string(&mut self) -> Result<Option<String>> {
        if self.read_bool()? { Ok(Some(self.read_string()?)) } else { Ok(None) }
    }

    pub fn read_count(&mut self) -> Result<usize> {
        let n = self.read_i32()?;
        usize::try_from(n).map_err(|_| QueryError::InvalidData(format!("negative count {n}")))
    }
}

// ── Wire：无版本的嵌套值 ───────────────────────────────────────────────────────

pub trait Wire: Sized {
    fn write_to(&self, w: &mut PrimitiveWriter) -> Result<()>;
    fn read_from(r: &mut PrimitiveReader<'_>) -> Result<Self>;
}

pub fn write_list<T: Wire>(w: &mut PrimitiveWriter, items: &[T]) -> Result<()> {
    w.write_count(items.len())?;
    items.iter().try_for_each(|it| it.write_to(w))
}

pub fn read_list<T: Wire>(r: &mut PrimitiveReader<'_>) -> Result<Vec<T>> {
    let n = r.read_count()?;
    // 上限由剩余字节数约束，避免损坏的计数触发巨量预分配
    let mut out = Vec::with_capacity(n.min(r.remaining()));
    for _ in 0..n {
        out.push(T::read_from(r)?);
    }
    Ok(out)
}

pub fn write_option<T: Wire>(w: &mut PrimitiveWriter, v: Option<&T>) -> Result<()> {
    w.write_bool(v.is_some())?;
    match v {
        Some(v) => v.write_to(w),
        None    => Ok(()),
    }
}

pub fn read_option<T: Wire>(r: &mut PrimitiveReader<'_>) -> Result<Option<T>> {
    if r.read_bool()? { Ok(Some(T::read_from(r)?)) } else { Ok(None) }
}

pub fn write_byte_list(w: &mut PrimitiveWriter, items: &[Vec<u8>]) -> Result<()> {
    w.write_count(items.len())?;
    items.iter().try_for_each(|it| w.write_bytes(it))
}

pub fn read_byte_list(r: &mut PrimitiveReader<'_>) -> Result<Vec<Vec<u8>>> {
    let n = r.read_count()?;
    let mut out = Vec::with_capacity(n.min(r.remaining()));
    for _ in 0..n {
        out.push(r.read_bytes()?);
    }
    Ok(out)
}

// ── Versioned：带版本字节与字段表的顶层值 ─────────────────────────────────────

pub trait Versioned: Default {
    /// 字段标识
    type Field: Copy + 'static;

    const TYPE_NAME: &'static str;
    const CURRENT_VERSION: u8;
    /// 能读懂本类型的最低读取方版本；不兼容的线上变更时提高
    const MIN_VERSION: u8 = 1;
    /// `(引入版本, 字段)`，按线上顺序排列
    const SCHEMA: &'static [(u8, Self::Field)];

    fn write_field(&self, field: Self::Field, w: &mut PrimitiveWriter) -> Result<()>;
    fn read_field(&mut self, field: Self::Field, r: &mut PrimitiveReader<'_>) -> Result<()>;

    /// 读取完成后回调；可记录对端使用的版本
    fn on_read(&mut self, _version: u8) {}
}

/// 对象头：版本、最低读取版本、字段区长度
pub const OBJECT_HEADER_LEN: usize = 1 + 1 + 4;

pub fn write_versioned<T: Versioned>(value: &T, version: u8, w: &mut PrimitiveWriter) -> Result<()> {
    if version == 0 || version > T::CURRENT_VERSION {
        return Err(QueryError::UnsupportedVersion {
            type_name: T::TYPE_NAME, found: version, current: T::CURRENT_VERSION,
        });
    }
    w.write_u8(version)?;
    w.write_u8(T::MIN_VERSION.min(version))?;
    let len_at = w.len();
    w.write_i32(0)?;
    let start = w.len();
    for &(introduced, field) in T::SCHEMA {
        if introduced <= version {
            value.write_field(field, w)?;
        }
    }
    let len = i32::try_from(w.len() - start)
        .map_err(|_| QueryError::InvalidData(format!("{} too large", T::TYPE_NAME)))?;
    w.patch_i32(len_at, len)
}

/// 读取一个带版本的对象。
///
/// 对端版本高于当前版本时按当前字段表读取，未知的尾部字段整体跳过。
pub fn read_versioned<T: Versioned>(r: &mut PrimitiveReader<'_>) -> Result<T> {
    let version = r.read_u8()?;
    let min_version = r.read_u8()?;
    if version == 0 || min_version > version || min_version > T::CURRENT_VERSION {
        return Err(QueryError::UnsupportedVersion {
            type_name: T::TYPE_NAME, found: version, current: T::CURRENT_VERSION,
        });
    }
    let len = r.read_i32()?;
    let len = usize::try_from(len)
        .map_err(|_| QueryError::InvalidData(format!("negative {} length {len}", T::TYPE_NAME)))?;
    if len > r.remaining() {
        return Err(QueryError::Truncated(format!(
            "{} needs {len} bytes at offset {}, {} left", T::TYPE_NAME, r.position(), r.remaining(),
        )));
    }
    let end = r.position() + len;

    let known = version.min(T::CURRENT_VERSION);
    let mut value = T::default();
    for &(introduced, field) in T::SCHEMA {
        if introduced <= known {
            value.read_field(field, r)?;
        }
    }
    if r.position() > end {
        return Err(QueryError::InvalidData(format!(
            "{} v{version} overran its length by {} bytes", T::TYPE_NAME, r.position() - end,
        )));
    }
    if version > T::CURRENT_VERSION {
        tracing::trace!(type_name = T::TYPE_NAME, version, skipped = end - r.position(), "skipping newer fields");
    }
    r.skip(end - r.position())?;
    value.on_read(version);
    Ok(value)
}

/// 以当前版本序列化
pub fn serialize<T: Versioned>(value: &T) -> Result<Vec<u8>> {
    serialize_at(value, T::CURRENT_VERSION)
}

/// 以指定（较旧）版本序列化，用于与旧节点互通
pub fn serialize_at<T: Versioned>(value: &T, version: u8) -> Result<Vec<u8>> {
    let mut w = PrimitiveWriter::new();
    write_versioned(value, version, &mut w)?;
    Ok(w.into_inner())
}

pub fn deserialize<T: Versioned>(data: &[u8]) -> Result<T> {
    read_versioned(&mut PrimitiveReader::new(data))
}

pub fn write_opt_versioned<T: Versioned>(w: &mut PrimitiveWriter, v: Option<&T>) -> Result<()> {
    w.write_bool(v.is_some())?;
    match v {
        Some(v) => write_versioned(v, T::CURRENT_VERSION, w),
        None    => Ok(()),
    }
}

pub fn read_opt_versioned<T: Versioned>(r: &mut PrimitiveReader<'_>) -> Result<Option<T>> {
    if r.read_bool()? { Ok(Some(read_versioned(r)?)) } else { Ok(None) }
}
