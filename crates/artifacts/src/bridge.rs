use crate::mime::content_type_for;
use crate::store::{FileStore, FileUpload};
use once_cell::sync::Lazy;
use outcome::FileArtifact;
use regex::{Captures, Regex};
use serde_json::json;
use std::collections::HashMap;
use tracing::{error, info, instrument};

/// `sandbox:/mnt/data/<name>`, bare or inside a markdown link.
static SANDBOX_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"sandbox:/mnt/data/([^\s\)\]"']+)"#).expect("sandbox reference pattern")
});

pub const UPLOAD_SOURCE: &str = "code_interpreter";

/// Conversation the files were produced in.
#[derive(Debug, Clone, Default)]
pub struct BridgeContext {
    pub chat_id: Option<String>,
}

/// Moves recovered files into a [`FileStore`] and hands back retrieval URLs.
pub struct ArtifactBridge<S: FileStore> {
    store: S,
    public_base_url: String,
}

impl<S: FileStore> ArtifactBridge<S> {
    pub fn new(store: S, public_base_url: impl Into<String>) -> Self {
        Self {
            store,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn download_url(&self, id: &str, name: &str) -> String {
        format!(
            "{}/api/v1/files/{}/content/{}",
            self.public_base_url, id, name
        )
    }

    /// Stores every file and maps its name to a retrieval URL. Files that fail
    /// are logged and left out of the map.
    #[instrument(skip(self, files), fields(count = files.len()))]
    pub fn persist_recovered_files(
        &self,
        files: &[FileArtifact],
        context: &BridgeContext,
        owner: &str,
    ) -> HashMap<String, String> {
        let mut urls = HashMap::new();

        for file in files {
            if file.name.is_empty() || file.data.is_empty() {
                continue;
            }

            let upload = FileUpload {
                owner: owner.to_string(),
                name: file.name.clone(),
                content_type: content_type_for(&file.name).to_string(),
                data: file.data.clone(),
                metadata: json!({
                    "source": UPLOAD_SOURCE,
                    "chat_id": context.chat_id.clone().unwrap_or_default(),
                }),
            };

            match self.store.store(upload) {
                Ok(stored) => {
                    let url = self.download_url(&stored.id, &file.name);
                    info!(
                        "Code interpreter file uploaded: {} -> {} (size={})",
                        file.name, url, stored.size
                    );
                    urls.insert(file.name.clone(), url);
                }
                Err(err) => {
                    error!(file = %file.name, "Failed to upload code interpreter file: {}", err);
                }
            }
        }

        urls
    }
}

/// Replaces each sandbox reference whose name is in `file_map` with the
/// mapped URL. Unknown names are left as they are.
pub fn rewrite_sandbox_references(text: &str, file_map: &HashMap<String, String>) -> String {
    if text.is_empty() || file_map.is_empty() {
        return text.to_string();
    }
    SANDBOX_REFERENCE
        .replace_all(text, |caps: &Captures| match file_map.get(&caps[1]) {
            Some(url) => url.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}
