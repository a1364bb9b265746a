use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Files at or above this size are never recovered from a kernel.
pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// A file produced by executed code, recovered from the scratch directory.
///
/// `name` is scratch-relative with no directory component and `size` always
/// equals `data.len()`. On the wire `data` travels as standard base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileArtifact {
    pub name: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub size: u64,
}

impl FileArtifact {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self {
            name: name.into(),
            data,
            size,
        }
    }

    pub fn encoded_data(&self) -> String {
        STANDARD.encode(&self.data)
    }

    pub fn within_ceiling(&self) -> bool {
        self.size < MAX_FILE_SIZE
    }
}

/// True when `name` is a single plain path component.
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

mod base64_bytes {
    use super::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
