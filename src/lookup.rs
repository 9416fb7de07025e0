//! 注入式只读查找服务：标签名哈希、字符串哈希

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use xxhash_rust::xxh32::xxh32;

use crate::common::{TagHash, TypeId};

/// 标签名 → 线上哈希码
pub fn tag_hash_code(tag_name: &str) -> TagHash {
    xxh32(tag_name.as_bytes(), 0) as TagHash
}

pub trait TagHashLookup: Send + Sync {
    /// 线上哈希码 → 标签名；未注册返回 None
    fn tag_name(&self, type_id: TypeId, hash: TagHash) -> Option<String>;
}

pub trait StringHashLookup: Send + Sync {
    /// 字符串哈希值（4 字节）→ 原始字符串字节
    fn string_bytes(&self, type_id: TypeId, hash: i32) -> Option<Vec<u8>>;
}

// ── 内存实现 ──────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct TagHashCollection {
    names: RwLock<HashMap<(TypeId, TagHash), String>>,
}

impl TagHashCollection {
    pub fn new() -> Self { Self::default() }

    pub fn register(&self, type_id: TypeId, tag_name: &str) -> TagHash {
        let hash = tag_hash_code(tag_name);
        self.names.write().unwrap()
            .entry((type_id, hash))
            .or_insert_with(|| tag_name.to_string());
        hash
    }
}

impl TagHashLookup for TagHashCollection {
    fn tag_name(&self, type_id: TypeId, hash: TagHash) -> Option<String> {
        self.names.read().unwrap().get(&(type_id, hash)).cloned()
    }
}

/// 长字符串标签值以 4 字节哈希落盘，读取时展开
#[derive(Default)]
pub struct StringHashCollection {
    strings: RwLock<HashMap<(TypeId, i32), Vec<u8>>>,
}

impl StringHashCollection {
    pub fn new() -> Self { Self::default() }

    /// 登记字符串并返回落盘用的 4 字节哈希值
    pub fn intern(&self, type_id: TypeId, value: &[u8]) -> [u8; 4] {
        let hash = xxh32(value, 0) as i32;
        self.strings.write().unwrap()
            .entry((type_id, hash))
            .or_insert_with(|| value.to_vec());
        hash.to_le_bytes()
    }
}

impl StringHashLookup for StringHashCollection {
    fn string_bytes(&self, type_id: TypeId, hash: i32) -> Option<Vec<u8>> {
        self.strings.read().unwrap().get(&(type_id, hash)).cloned()
    }
}

/// 解码、处理时需要的服务句柄集合
#[derive(Clone)]
pub struct LookupServices {
    pub tags:    Arc<dyn TagHashLookup>,
    pub strings: Arc<dyn StringHashLookup>,
}

impl LookupServices {
    pub fn new(tags: Arc<dyn TagHashLookup>, strings: Arc<dyn StringHashLookup>) -> Self {
        Self { tags, strings }
    }

    /// 以内存集合构造，返回集合本身以便继续登记
    pub fn in_memory() -> (Self, Arc<TagHashCollection>, Arc<StringHashCollection>) {
        let tags    = Arc::new(TagHashCollection::new());
        let strings = Arc::new(StringHashCollection::new());
        (Self::new(tags.clone(), strings.clone()), tags, strings)
    }
}
