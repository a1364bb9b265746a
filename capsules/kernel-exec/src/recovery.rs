//! Scratch-directory snapshot and file collection cells.
//!
//! Binary file content cannot travel over the reply channels, so the collect
//! cell prints the new files as base64 JSON between two markers on stdout.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use outcome::{is_plain_file_name, FileArtifact, MAX_FILE_SIZE};
use serde::Deserialize;
use tracing::warn;

pub const SCRATCH_DIR: &str = "/mnt/data";
pub const FILES_MARKER_START: &str = "__OWUI_FILES_START__";
pub const FILES_MARKER_END: &str = "__OWUI_FILES_END__";

/// Creates the scratch directory and snapshots what is already there.
pub const SETUP_CELL: &str = "import os as _os\n\
_os.makedirs('/mnt/data', exist_ok=True)\n\
_owui_pre_files = set(_os.listdir('/mnt/data'))\n";

/// Diffs the scratch directory against the snapshot and prints the new
/// regular files under the size ceiling between the markers.
pub fn collect_cell() -> String {
    format!(
        "import os as _os, json as _json, base64 as _b64\n\
try:\n\
\x20   _owui_post_files = set(_os.listdir('{dir}'))\n\
\x20   _owui_new = []\n\
\x20   for _f in sorted(_owui_post_files - _owui_pre_files):\n\
\x20       _fp = _os.path.join('{dir}', _f)\n\
\x20       if _os.path.isfile(_fp) and _os.path.getsize(_fp) < {max}:\n\
\x20           with open(_fp, 'rb') as _fh:\n\
\x20               _owui_new.append({{'name': _f, 'data': _b64.b64encode(_fh.read()).decode(), 'size': _os.path.getsize(_fp)}})\n\
\x20   if _owui_new:\n\
\x20       print('{start}' + _json.dumps(_owui_new) + '{end}')\n\
except Exception:\n\
\x20   pass\n",
        dir = SCRATCH_DIR,
        max = MAX_FILE_SIZE,
        start = FILES_MARKER_START,
        end = FILES_MARKER_END,
    )
}

#[derive(Debug, Deserialize)]
struct FileRecord {
    name: String,
    data: String,
}

/// Extracts the file records the collect cell printed.
///
/// `None` when the start marker is absent or the payload cannot be parsed.
/// Individual records with an unsafe name, bad base64 or an oversized
/// payload are dropped.
pub fn parse_file_output(stdout: &str) -> Option<Vec<FileArtifact>> {
    let start = stdout.find(FILES_MARKER_START)? + FILES_MARKER_START.len();
    let Some(len) = stdout[start..].find(FILES_MARKER_END) else {
        warn!("Failed to parse file output: end marker missing");
        return None;
    };

    let records: Vec<FileRecord> = match serde_json::from_str(&stdout[start..start + len]) {
        Ok(records) => records,
        Err(err) => {
            warn!("Failed to parse file output: {}", err);
            return None;
        }
    };

    let files = records
        .into_iter()
        .filter_map(|record| {
            if !is_plain_file_name(&record.name) {
                warn!(file = %record.name, "dropping recovered file with unsafe name");
                return None;
            }
            let data = match STANDARD.decode(record.data.as_bytes()) {
                Ok(data) => data,
                Err(err) => {
                    warn!(file = %record.name, "dropping recovered file: {}", err);
                    return None;
                }
            };
            let file = FileArtifact::new(record.name, data);
            if !file.within_ceiling() {
                warn!(file = %file.name, size = file.size, "dropping oversized recovered file");
                return None;
            }
            Some(file)
        })
        .collect();

    Some(files)
}
