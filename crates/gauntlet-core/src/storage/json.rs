//! JSON object backends.
//!
//! [`EagerJson`] materializes the whole document; [`StreamingJson`] walks
//! array items through a `DeserializeSeed` so a multi-gigabyte dataset never
//! lives in memory at once. Both share the same on-disk format.

use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::{DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::errors::CoreResult;
use crate::storage::object::{item_key, ItemFlow, ObjectIo};

/// Whole-document backend for small catalog records.
#[derive(Debug, Clone, Copy, Default)]
pub struct EagerJson;

/// Constant-memory backend for large datasets.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamingJson;

impl ObjectIo for EagerJson {
    fn create(&self, path: &Path, value: &Value) -> CoreResult<()> {
        write_value(path, value)
    }

    fn read(&self, path: &Path) -> CoreResult<Value> {
        let file = fs::File::open(path)?;
        let value = serde_json::from_reader(io::BufReader::new(file))?;
        Ok(value)
    }

    fn read_keys(&self, path: &Path, keys: &[&str]) -> CoreResult<serde_json::Map<String, Value>> {
        let value = self.read(path)?;
        let mut out = serde_json::Map::new();
        if let Value::Object(map) = value {
            for (k, v) in map {
                if keys.contains(&k.as_str()) {
                    out.insert(k, v);
                }
            }
        }
        Ok(out)
    }

    fn count_items(&self, path: &Path, item_path: &str) -> CoreResult<usize> {
        let value = self.read(path)?;
        Ok(value
            .get(item_key(item_path))
            .and_then(Value::as_array)
            .map_or(0, Vec::len))
    }

    fn for_each_item(
        &self,
        path: &Path,
        item_path: &str,
        f: &mut dyn FnMut(usize, Value) -> ItemFlow,
    ) -> CoreResult<()> {
        let mut value = self.read(path)?;
        if let Some(Value::Array(items)) = value
            .as_object_mut()
            .and_then(|map| map.remove(item_key(item_path)))
        {
            for (index, item) in items.into_iter().enumerate() {
                if f(index, item) == ItemFlow::Stop {
                    break;
                }
            }
        }
        Ok(())
    }

    fn delete(&self, path: &Path) -> CoreResult<()> {
        remove_file(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn created_at(&self, path: &Path) -> CoreResult<DateTime<Utc>> {
        modified_at(path)
    }

    fn content_hash(&self, path: &Path) -> CoreResult<String> {
        sha256_hex(path)
    }

    fn list_by_ext(&self, dir: &Path, ext: &str) -> CoreResult<Vec<PathBuf>> {
        list_ext(dir, ext)
    }
}

impl ObjectIo for StreamingJson {
    fn create(&self, path: &Path, value: &Value) -> CoreResult<()> {
        write_value(path, value)
    }

    fn read(&self, path: &Path) -> CoreResult<Value> {
        EagerJson.read(path)
    }

    fn read_keys(&self, path: &Path, keys: &[&str]) -> CoreResult<serde_json::Map<String, Value>> {
        let file = fs::File::open(path)?;
        let mut de = serde_json::Deserializer::from_reader(io::BufReader::new(file));
        let out = SelectKeys { keys }.deserialize(&mut de)?;
        Ok(out)
    }

    fn count_items(&self, path: &Path, item_path: &str) -> CoreResult<usize> {
        let mut count = 0usize;
        self.for_each_item(path, item_path, &mut |_, _| {
            count += 1;
            ItemFlow::Continue
        })?;
        Ok(count)
    }

    fn for_each_item(
        &self,
        path: &Path,
        item_path: &str,
        f: &mut dyn FnMut(usize, Value) -> ItemFlow,
    ) -> CoreResult<()> {
        let file = fs::File::open(path)?;
        let mut de = serde_json::Deserializer::from_reader(io::BufReader::new(file));
        StreamItems {
            key: item_key(item_path),
            f: Some(f),
        }
        .deserialize(&mut de)?;
        de.end()?;
        Ok(())
    }

    fn delete(&self, path: &Path) -> CoreResult<()> {
        remove_file(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn created_at(&self, path: &Path) -> CoreResult<DateTime<Utc>> {
        modified_at(path)
    }

    fn content_hash(&self, path: &Path) -> CoreResult<String> {
        sha256_hex(path)
    }

    fn list_by_ext(&self, dir: &Path, ext: &str) -> CoreResult<Vec<PathBuf>> {
        list_ext(dir, ext)
    }
}

/// Streams the array under `key` through the callback and ignores every
/// other top-level value, so only one array element is decoded at a time.
struct StreamItems<'f> {
    key: &'f str,
    f: Option<&'f mut dyn FnMut(usize, Value) -> ItemFlow>,
}

impl<'de> DeserializeSeed<'de> for StreamItems<'_> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> Result<(), D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for StreamItems<'_> {
    type Value = ();

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "a JSON object with an array under {:?}", self.key)
    }

    fn visit_map<A>(mut self, mut map: A) -> Result<(), A::Error>
    where
        A: MapAccess<'de>,
    {
        while let Some(k) = map.next_key::<String>()? {
            if k == self.key {
                if let Some(cb) = self.f.take() {
                    map.next_value_seed(ItemSeq { f: cb })?;
                    continue;
                }
            }
            map.next_value::<IgnoredAny>()?;
        }
        Ok(())
    }
}

struct ItemSeq<'f> {
    f: &'f mut dyn FnMut(usize, Value) -> ItemFlow,
}

impl<'de> DeserializeSeed<'de> for ItemSeq<'_> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> Result<(), D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for ItemSeq<'_> {
    type Value = ();

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a JSON array")
    }

    fn visit_seq<A>(mut self, mut seq: A) -> Result<(), A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut index = 0usize;
        let mut stopped = false;
        loop {
            // After a Stop the remaining elements still have to be consumed
            // for the outer map to keep parsing, but they are not decoded.
            if stopped {
                if seq.next_element::<IgnoredAny>()?.is_none() {
                    break;
                }
                continue;
            }
            match seq.next_element::<Value>()? {
                Some(item) => {
                    if (self.f)(index, item) == ItemFlow::Stop {
                        stopped = true;
                    }
                    index += 1;
                }
                None => break,
            }
        }
        Ok(())
    }
}

/// Keeps only the requested top-level keys, skipping everything else
/// (including large arrays) without decoding it.
struct SelectKeys<'k> {
    keys: &'k [&'k str],
}

impl<'de> DeserializeSeed<'de> for SelectKeys<'_> {
    type Value = serde_json::Map<String, Value>;

    fn deserialize<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for SelectKeys<'_> {
    type Value = serde_json::Map<String, Value>;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a JSON object")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut out = serde_json::Map::new();
        while let Some(k) = map.next_key::<String>()? {
            if self.keys.contains(&k.as_str()) {
                let v = map.next_value::<Value>()?;
                out.insert(k, v);
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(out)
    }
}

fn write_value(path: &Path, value: &Value) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw)?;
    Ok(())
}

fn remove_file(path: &Path) -> CoreResult<()> {
    fs::remove_file(path)?;
    Ok(())
}

fn modified_at(path: &Path) -> CoreResult<DateTime<Utc>> {
    let meta = fs::metadata(path)?;
    let modified = meta.modified()?;
    Ok(DateTime::<Utc>::from(modified))
}

fn sha256_hex(path: &Path) -> CoreResult<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn list_ext(dir: &Path, ext: &str) -> CoreResult<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(ext) {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}
