use std::fmt;

use log::{debug, trace};

use super::registry::{ClassRegistry, DeclFlags};
use super::value::Value;
use super::Invocation;

/// Stream format version; bumped whenever the record layout changes.
pub const STATIC_STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub enum PersistError {
    UnexpectedEof,
    VersionMismatch { found: u32, expected: u32 },
    BadUtf8,
    BadTag(u32),
    Codec(String),
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistError::UnexpectedEof => write!(f, "truncated persistence stream"),
            PersistError::VersionMismatch { found, expected } => {
                write!(f, "stream version {} but {} expected", found, expected)
            }
            PersistError::BadUtf8 => write!(f, "malformed name in persistence stream"),
            PersistError::BadTag(t) => write!(f, "unknown value tag {}", t),
            PersistError::Codec(m) => write!(f, "snapshot codec: {}", m),
        }
    }
}

impl std::error::Error for PersistError {}

const TAG_NULL: u32 = 0;
const TAG_BOOL: u32 = 1;
const TAG_INT: u32 = 2;
const TAG_FLOAT: u32 = 3;
const TAG_STR: u32 = 4;

/// Serialize every persistable static field. Layout, all words
/// little-endian u32: version; per class a name record followed by
/// (field-name, tagged-value) pairs and a zero-word sentinel; a final
/// zero-word sentinel ends the stream.
pub fn save_statics(registry: &ClassRegistry) -> Vec<u8> {
    let mut out = Vec::new();
    write_word(&mut out, STATIC_STATE_VERSION);
    for (class_id, class) in registry.iter() {
        if registry.find(&class.name) != Some(class_id) {
            continue;
        }
        let statics: Vec<(&str, Value)> = class
            .fields
            .iter()
            .filter(|f| f.flags.contains(DeclFlags::STATIC))
            .filter_map(|f| {
                let value = registry.static_get(class_id, f.index)?;
                persistable(&value).then_some((f.name.as_str(), value))
            })
            .collect();
        if statics.is_empty() {
            continue;
        }
        write_name(&mut out, &class.name);
        for (name, value) in statics {
            write_name(&mut out, name);
            write_value(&mut out, &value);
        }
        write_word(&mut out, 0);
    }
    write_word(&mut out, 0);
    debug!("saved static state, {} bytes", out.len());
    out
}

/// Restore statics from a stream. The whole stream is parsed before
/// any field is written, so a bad version or a truncated stream leaves
/// the registry untouched. Classes and fields the current registry
/// does not know are skipped; values match by class name and field
/// name, never by position.
pub fn restore_statics(registry: &mut ClassRegistry, bytes: &[u8]) -> Result<(), PersistError> {
    let mut r = Reader { bytes, pos: 0 };
    let version = r.word()?;
    if version != STATIC_STATE_VERSION {
        return Err(PersistError::VersionMismatch {
            found: version,
            expected: STATIC_STATE_VERSION,
        });
    }
    let mut records: Vec<(String, Vec<(String, Value)>)> = Vec::new();
    loop {
        let len = r.word()?;
        if len == 0 {
            break;
        }
        let class_name = r.name(len)?;
        let mut fields = Vec::new();
        loop {
            let len = r.word()?;
            if len == 0 {
                break;
            }
            let field_name = r.name(len)?;
            fields.push((field_name, r.value()?));
        }
        records.push((class_name, fields));
    }

    for (class_name, fields) in records {
        let Some(class_id) = registry.find(&class_name) else {
            trace!("skipping statics of unknown class `{}`", class_name);
            continue;
        };
        for (field_name, value) in fields {
            match registry.field(class_id, &field_name) {
                Some((defining, field)) if field.flags.contains(DeclFlags::STATIC) => {
                    let index = field.index;
                    registry.static_set(defining, index, value);
                }
                _ => trace!(
                    "skipping unknown static `{}.{}`",
                    class_name,
                    field_name
                ),
            }
        }
    }
    Ok(())
}

/// Snapshot a suspended invocation. Heap-backed object and array
/// handles are not representable and fail the encode.
pub fn save_invocation(inv: &Invocation) -> Result<Vec<u8>, PersistError> {
    bincode::serde::encode_to_vec(inv, bincode::config::standard())
        .map_err(|e| PersistError::Codec(e.to_string()))
}

pub fn load_invocation(bytes: &[u8]) -> Result<Invocation, PersistError> {
    let (inv, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| PersistError::Codec(e.to_string()))?;
    Ok(inv)
}

fn persistable(v: &Value) -> bool {
    matches!(
        v,
        Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_)
    )
}

fn write_word(out: &mut Vec<u8>, w: u32) {
    out.extend_from_slice(&w.to_le_bytes());
}

fn write_name(out: &mut Vec<u8>, name: &str) {
    write_word(out, name.len() as u32);
    out.extend_from_slice(name.as_bytes());
}

fn write_value(out: &mut Vec<u8>, v: &Value) {
    match v {
        Value::Null => write_word(out, TAG_NULL),
        Value::Bool(b) => {
            write_word(out, TAG_BOOL);
            write_word(out, *b as u32);
        }
        Value::Int(n) => {
            write_word(out, TAG_INT);
            out.extend_from_slice(&n.to_le_bytes());
        }
        Value::Float(f) => {
            write_word(out, TAG_FLOAT);
            out.extend_from_slice(&f.to_le_bytes());
        }
        Value::Str(s) => {
            write_word(out, TAG_STR);
            write_name(out, s);
        }
        _ => write_word(out, TAG_NULL),
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take(&mut self, n: usize) -> Result<&[u8], PersistError> {
        let end = self.pos.checked_add(n).ok_or(PersistError::UnexpectedEof)?;
        if end > self.bytes.len() {
            return Err(PersistError::UnexpectedEof);
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn word(&mut self) -> Result<u32, PersistError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn name(&mut self, len: u32) -> Result<String, PersistError> {
        let b = self.take(len as usize)?;
        String::from_utf8(b.to_vec()).map_err(|_| PersistError::BadUtf8)
    }

    fn value(&mut self) -> Result<Value, PersistError> {
        match self.word()? {
            TAG_NULL => Ok(Value::Null),
            TAG_BOOL => Ok(Value::Bool(self.word()? != 0)),
            TAG_INT => {
                let b = self.take(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(b);
                Ok(Value::Int(i64::from_le_bytes(raw)))
            }
            TAG_FLOAT => {
                let b = self.take(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(b);
                Ok(Value::Float(f64::from_le_bytes(raw)))
            }
            TAG_STR => {
                let len = self.word()?;
                Ok(Value::Str(self.name(len)?))
            }
            tag => Err(PersistError::BadTag(tag)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ty::TypeDesc;

    fn registry_with_statics() -> (ClassRegistry, crate::engine::ClassId) {
        let mut r = ClassRegistry::new();
        let class = r.create("Counter", None, false, 0..0).unwrap();
        r.add_field(
            class,
            "hits",
            TypeDesc::int(),
            DeclFlags::PUBLIC | DeclFlags::STATIC,
            Some(Value::Int(0)),
            0..0,
        )
        .unwrap();
        r.add_field(
            class,
            "label",
            TypeDesc::str(),
            DeclFlags::PUBLIC | DeclFlags::STATIC,
            Some(Value::Str("boot".into())),
            0..0,
        )
        .unwrap();
        (r, class)
    }

    #[test]
    fn test_round_trip_by_name() {
        let (mut r, class) = registry_with_statics();
        r.static_set(class, 0, Value::Int(42));
        r.static_set(class, 1, Value::Str("warm".into()));
        let bytes = save_statics(&r);

        // a freshly-built registry with the same declarations
        let (mut fresh, fresh_class) = registry_with_statics();
        restore_statics(&mut fresh, &bytes).unwrap();
        assert_eq!(fresh.static_get(fresh_class, 0), Some(Value::Int(42)));
        assert_eq!(
            fresh.static_get(fresh_class, 1),
            Some(Value::Str("warm".into()))
        );
    }

    #[test]
    fn test_version_mismatch_mutates_nothing() {
        let (mut r, class) = registry_with_statics();
        r.static_set(class, 0, Value::Int(7));
        let mut bytes = save_statics(&r);
        bytes[0] = 0xEE;

        let (mut fresh, fresh_class) = registry_with_statics();
        let err = restore_statics(&mut fresh, &bytes).unwrap_err();
        assert!(matches!(err, PersistError::VersionMismatch { .. }));
        assert_eq!(fresh.static_get(fresh_class, 0), Some(Value::Int(0)));
    }

    #[test]
    fn test_truncated_stream_mutates_nothing() {
        let (mut r, class) = registry_with_statics();
        r.static_set(class, 0, Value::Int(7));
        let bytes = save_statics(&r);

        let (mut fresh, fresh_class) = registry_with_statics();
        let err = restore_statics(&mut fresh, &bytes[..bytes.len() - 3]).unwrap_err();
        assert_eq!(err, PersistError::UnexpectedEof);
        assert_eq!(fresh.static_get(fresh_class, 0), Some(Value::Int(0)));
    }

    #[test]
    fn test_unknown_class_and_field_skipped() {
        let (mut r, class) = registry_with_statics();
        r.static_set(class, 0, Value::Int(9));
        let bytes = save_statics(&r);

        // restore into a registry that knows neither the class nor one field
        let mut other = ClassRegistry::new();
        let known = other.create("Counter", None, false, 0..0).unwrap();
        other
            .add_field(
                known,
                "hits",
                TypeDesc::int(),
                DeclFlags::PUBLIC | DeclFlags::STATIC,
                Some(Value::Int(0)),
                0..0,
            )
            .unwrap();
        restore_statics(&mut other, &bytes).unwrap();
        assert_eq!(other.static_get(known, 0), Some(Value::Int(9)));

        let mut empty = ClassRegistry::new();
        restore_statics(&mut empty, &bytes).unwrap();
    }

    #[test]
    fn test_values_match_by_name_not_position() {
        let (mut r, class) = registry_with_statics();
        r.static_set(class, 0, Value::Int(5));
        r.static_set(class, 1, Value::Str("tag".into()));
        let bytes = save_statics(&r);

        // same fields declared in the opposite order
        let mut swapped = ClassRegistry::new();
        let c = swapped.create("Counter", None, false, 0..0).unwrap();
        swapped
            .add_field(
                c,
                "label",
                TypeDesc::str(),
                DeclFlags::PUBLIC | DeclFlags::STATIC,
                None,
                0..0,
            )
            .unwrap();
        swapped
            .add_field(
                c,
                "hits",
                TypeDesc::int(),
                DeclFlags::PUBLIC | DeclFlags::STATIC,
                None,
                0..0,
            )
            .unwrap();
        restore_statics(&mut swapped, &bytes).unwrap();
        assert_eq!(swapped.static_get(c, 0), Some(Value::Str("tag".into())));
        assert_eq!(swapped.static_get(c, 1), Some(Value::Int(5)));
    }
}
