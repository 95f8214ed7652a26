//! Key layout of the database tree.
//!
//! Keys are concatenations of segments. A segment is the raw bytes with
//! `0x00` escaped as `0x00 0xFF` and a `0x00 0x01` terminator. Segments are
//! prefix-free and sort like their raw bytes, so a key built from segments
//! sorts field by field and one namespace can never be a prefix of another.

use serde_json::Value;

use crate::error::{DbError, DbResult};

const ESCAPE: u8 = 0x00;
const ESCAPED_ZERO: u8 = 0xFF;
const TERMINATOR: u8 = 0x01;

/// Append `bytes` to `buf` as one segment.
pub fn segment(buf: &mut Vec<u8>, bytes: &[u8]) {
    for &b in bytes {
        if b == ESCAPE {
            buf.extend_from_slice(&[ESCAPE, ESCAPED_ZERO]);
        } else {
            buf.push(b);
        }
    }
    buf.extend_from_slice(&[ESCAPE, TERMINATOR]);
}

/// Split the leading segment off `input`.
///
/// Returns the unescaped bytes and the remaining input, or `None` if `input`
/// does not start with a complete segment.
pub fn read_segment(input: &[u8]) -> Option<(Vec<u8>, &[u8])> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < input.len() {
        if input[i] == ESCAPE {
            match *input.get(i + 1)? {
                ESCAPED_ZERO => out.push(ESCAPE),
                TERMINATOR => return Some((out, &input[i + 2..])),
                _ => return None,
            }
            i += 2;
        } else {
            out.push(input[i]);
            i += 1;
        }
    }
    None
}

fn key(parts: &[&[u8]]) -> Vec<u8> {
    let mut buf = Vec::new();
    for part in parts {
        segment(&mut buf, part);
    }
    buf
}

pub fn db_meta() -> Vec<u8> {
    key(&[b"db", b"meta"])
}

pub fn catalog_prefix() -> Vec<u8> {
    key(&[b"catalog"])
}

pub fn catalog(collection: &str) -> Vec<u8> {
    key(&[b"catalog", collection.as_bytes()])
}

/// Prefix of every document key of `collection`. The record id follows it.
pub fn doc_prefix(collection: &str) -> Vec<u8> {
    key(&[b"col", collection.as_bytes(), b"doc"])
}

pub fn doc(collection: &str, record_id: &[u8]) -> Vec<u8> {
    let mut buf = doc_prefix(collection);
    buf.extend_from_slice(record_id);
    buf
}

pub fn index_prefix(collection: &str) -> Vec<u8> {
    key(&[b"col", collection.as_bytes(), b"idx"])
}

fn index_key(collection: &str, fields: &[String], tag: &[u8]) -> Vec<u8> {
    let mut buf = index_prefix(collection);
    segment(&mut buf, &encode_fields(fields));
    segment(&mut buf, tag);
    buf
}

pub fn index_meta(collection: &str, fields: &[String]) -> Vec<u8> {
    index_key(collection, fields, b"meta")
}

/// Key of an index root pointer: 32 bytes, or empty for an empty index.
pub fn index_root(collection: &str, fields: &[String]) -> Vec<u8> {
    index_key(collection, fields, b"root")
}

pub fn encode_fields(fields: &[String]) -> Vec<u8> {
    let mut buf = Vec::new();
    for field in fields {
        segment(&mut buf, field.as_bytes());
    }
    buf
}

pub fn decode_fields(mut bytes: &[u8]) -> DbResult<Vec<String>> {
    let mut fields = Vec::new();
    while !bytes.is_empty() {
        let (field, rest) = read_segment(bytes)
            .ok_or_else(|| DbError::Decode("malformed index field list".into()))?;
        let field = String::from_utf8(field)
            .map_err(|_| DbError::Decode("index field name is not UTF-8".into()))?;
        fields.push(field);
        bytes = rest;
    }
    Ok(fields)
}

/// Index tree prefix for one tuple of field values. The record id follows it.
pub fn index_entry_prefix(values: &[&Value]) -> DbResult<Vec<u8>> {
    let mut buf = Vec::new();
    for value in values {
        let json = serde_json::to_vec(value)?;
        segment(&mut buf, &json);
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn seg(bytes: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        segment(&mut buf, bytes);
        buf
    }

    #[test]
    fn segment_roundtrip_with_zero_bytes() {
        let raw = [0u8, 1, 0, 0xFF, 0];
        let mut buf = seg(&raw);
        buf.extend_from_slice(b"tail");
        let (decoded, rest) = read_segment(&buf).unwrap();
        assert_eq!(decoded, raw);
        assert_eq!(rest, b"tail");
    }

    #[test]
    fn incomplete_segments_are_rejected() {
        assert!(read_segment(b"abc").is_none());
        assert!(read_segment(&[b'a', 0]).is_none());
        assert!(read_segment(&[0, 7]).is_none());
    }

    #[test]
    fn namespaces_do_not_overlap() {
        let docs = doc_prefix("users");
        let idx = index_prefix("users");
        assert!(!docs.starts_with(&idx) && !idx.starts_with(&docs));
        // "user" must not capture keys of "users".
        assert!(!doc("users", b"x").starts_with(&doc_prefix("user")));
        assert!(!catalog("users").starts_with(&catalog("user")));
    }

    #[test]
    fn field_lists_roundtrip() {
        let fields = vec!["created".to_string(), "model".to_string()];
        assert_eq!(decode_fields(&encode_fields(&fields)).unwrap(), fields);
        assert!(decode_fields(b"no terminator").is_err());
    }

    #[test]
    fn entry_prefixes_separate_values() {
        let one = index_entry_prefix(&[&json!("ab")]).unwrap();
        let two = index_entry_prefix(&[&json!("a"), &json!("b")]).unwrap();
        assert!(!one.starts_with(&two) && !two.starts_with(&one));
    }

    proptest! {
        #[test]
        fn segments_preserve_order(a in proptest::collection::vec(any::<u8>(), 0..16),
                                   b in proptest::collection::vec(any::<u8>(), 0..16)) {
            prop_assert_eq!(a.cmp(&b), seg(&a).cmp(&seg(&b)));
        }

        #[test]
        fn read_segment_inverts_segment(a in proptest::collection::vec(any::<u8>(), 0..32)) {
            let encoded = seg(&a);
            let (decoded, rest) = read_segment(&encoded).unwrap();
            prop_assert_eq!(decoded, a);
            prop_assert!(rest.is_empty());
        }
    }
}
