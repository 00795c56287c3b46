//! Template instantiation
//!
//! Applies one (path, value) override to a template document and returns a
//! new manifest. Intermediate path segments are created on demand; the final
//! segment is overwritten whatever it held before. Any `metadata.name` in the
//! result gets a random lowercase alphanumeric suffix so repeated
//! instantiations of one template never collide.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Map, Value};
use uuid::Uuid;

use tofan_common::yaml::decode_document;
use tofan_common::{Error, Result};

/// Separator between path segments. There is no escaping and no array indexing.
pub const PATH_DELIMITER: char = '.';

/// Length of the suffix appended to generated names
pub const NAME_SUFFIX_LEN: usize = 5;

const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Generate `len` random characters from `[a-z0-9]`
pub fn random_suffix<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect()
}

/// Entropy source for one (TestCase, dynamic field, value key) instantiation.
///
/// Seeded from a UUIDv5 of its inputs, so re-driving the same override after
/// a crash produces the same names and the upsert converges. `field_index` is
/// the field's position in the TestCase, which keeps two fields sharing a
/// path and key apart.
pub fn instance_rng(
    test_case_uid: &str,
    field_index: usize,
    path: &str,
    value_key: &str,
) -> StdRng {
    let seed = Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}\n{}\n{}\n{}", test_case_uid, field_index, path, value_key).as_bytes(),
    );
    let (high, low) = seed.as_u64_pair();
    StdRng::seed_from_u64(high ^ low.rotate_left(32))
}

fn segments(path: &str) -> Result<Vec<&str>> {
    if path.is_empty() {
        return Err(Error::path_not_found(path));
    }
    let parts: Vec<&str> = path.split(PATH_DELIMITER).collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(Error::path_not_found(path));
    }
    Ok(parts)
}

/// Assign `value` at `path` inside `doc`.
///
/// Missing intermediate segments, and intermediate segments holding a
/// non-object, are replaced by empty objects. Fails with `PathNotFound` for an
/// empty path, an empty segment, or a non-object root.
pub fn set_path(doc: &mut Value, path: &str, value: Value) -> Result<()> {
    let parts = segments(path)?;
    let Some((last, parents)) = parts.split_last() else {
        return Err(Error::path_not_found(path));
    };

    let mut current = doc
        .as_object_mut()
        .ok_or_else(|| Error::path_not_found(path))?;

    for segment in parents {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        current = slot
            .as_object_mut()
            .ok_or_else(|| Error::path_not_found(path))?;
    }

    current.insert(last.to_string(), value);
    Ok(())
}

/// Read the value at `path`, if every segment exists
pub fn get_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    segments(path)
        .ok()?
        .into_iter()
        .try_fold(doc, |node, segment| node.as_object()?.get(segment))
}

/// Suffix `metadata.name` in place when it is a string. Returns the new name.
pub fn suffix_name<R: Rng + ?Sized>(doc: &mut Value, rng: &mut R) -> Option<String> {
    let name = doc.pointer_mut("/metadata/name")?;
    let base = name.as_str()?;
    let unique = format!("{}-{}", base, random_suffix(rng, NAME_SUFFIX_LEN));
    *name = Value::String(unique.clone());
    Some(unique)
}

/// Instantiate a template with one override.
///
/// Both inputs are decoded generically (JSON, or YAML as a fallback). The
/// caller's bytes are never modified; a freshly encoded JSON manifest is
/// returned.
pub fn instantiate<R: Rng + ?Sized>(
    template: &[u8],
    path: &str,
    value: &[u8],
    rng: &mut R,
) -> Result<Vec<u8>> {
    let mut doc = decode_document(template, "template")?;
    let value = decode_document(value, "value")?;

    set_path(&mut doc, path, value)?;
    suffix_name(&mut doc, rng);

    serde_json::to_vec(&doc).map_err(|e| Error::decode("manifest", e.to_string()))
}
