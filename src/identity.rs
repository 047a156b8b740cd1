//! Content-addressed series identifiers
//!
//! A series identifier is the SHA-1 digest of a canonical JSON document
//! describing the metric descriptor, the instance and the merged intrinsic
//! labels. Keys are written in a fixed order so equal inputs always hash to
//! equal identifiers, however the series was discovered.
//!
//! ```text
//! {"desc":{"domain":60,"cluster":0,"item":4,"semantics":1,"type":3,"units":1048576},
//!  "inst":{"id":0,"name":null},"label":{"hostname":"a"}}
//! ```

use crate::labels::LabelSet;
use crate::types::Descriptor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use std::fmt;
use std::str::FromStr;

/// Length of a rendered identifier in bytes
pub const SERIES_ID_LEN: usize = 40;

/// A 40 character lowercase hex series identifier
///
/// Ordering is plain byte ordering, which the set algebra relies on.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesId([u8; SERIES_ID_LEN]);

impl SeriesId {
    /// Identifier text
    pub fn as_str(&self) -> &str {
        // Construction only admits ASCII hex digits
        std::str::from_utf8(&self.0).unwrap_or_default()
    }

    /// Raw identifier bytes
    pub fn as_bytes(&self) -> &[u8; SERIES_ID_LEN] {
        &self.0
    }

    fn from_digest(digest: &[u8]) -> Self {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut out = [0u8; SERIES_ID_LEN];
        for (i, byte) in digest.iter().take(SERIES_ID_LEN / 2).enumerate() {
            out[2 * i] = HEX[(byte >> 4) as usize];
            out[2 * i + 1] = HEX[(byte & 0xf) as usize];
        }
        SeriesId(out)
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeriesId({})", self.as_str())
    }
}

impl FromStr for SeriesId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != SERIES_ID_LEN {
            return Err(format!(
                "series identifier must be {} characters, got {}",
                SERIES_ID_LEN,
                bytes.len()
            ));
        }
        if !bytes.iter().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(b)) {
            return Err(format!("series identifier '{}' is not lowercase hex", s));
        }
        let mut out = [0u8; SERIES_ID_LEN];
        out.copy_from_slice(bytes);
        Ok(SeriesId(out))
    }
}

impl Serialize for SeriesId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SeriesId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The instance half of a series identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceRef<'a> {
    /// Numeric instance identifier
    pub id: u32,
    /// External instance name
    pub name: &'a str,
}

/// Canonical identity document for a series
pub fn identity_json(desc: &Descriptor, instance: Option<InstanceRef<'_>>, labels: &LabelSet) -> String {
    let pmid = desc.pmid;
    let mut doc = format!(
        "{{\"desc\":{{\"domain\":{},\"cluster\":{},\"item\":{},\"semantics\":{},",
        pmid.domain,
        pmid.cluster,
        pmid.item,
        desc.semantics.code()
    );
    if let Some(indom) = desc.indom {
        doc.push_str(&format!("\"serial\":{},", indom.serial));
    }
    doc.push_str(&format!(
        "\"type\":{},\"units\":{}}},",
        desc.value_type.code(),
        desc.units.packed()
    ));
    match instance {
        Some(inst) => doc.push_str(&format!(
            "\"inst\":{{\"id\":{},\"name\":{}}},",
            inst.id,
            serde_json::Value::String(inst.name.to_string())
        )),
        None => doc.push_str("\"inst\":{\"id\":0,\"name\":null},"),
    }
    doc.push_str("\"label\":");
    doc.push_str(&labels.canonical_json());
    doc.push('}');
    doc
}

/// Derive the identifier of the series for one metric instance
pub fn series_identifier(desc: &Descriptor, instance: Option<InstanceRef<'_>>, labels: &LabelSet) -> SeriesId {
    let mut hasher = Sha1::new();
    hasher.update(identity_json(desc, instance, labels).as_bytes());
    SeriesId::from_digest(&hasher.finalize())
}
