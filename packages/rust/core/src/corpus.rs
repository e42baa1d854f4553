//! Page corpus on disk.
//!
//! The corpus is a flat directory: `<page_id>.md` holds a page's extracted
//! text and `<page_id>_timing.json` holds optional side-channel facts.
//! Either file may be missing for a given page.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use grove_shared::{GroveError, Result, SideChannelFacts};

/// Extension of page text documents.
pub const TEXT_EXTENSION: &str = "md";

/// Suffix appended to a page id to name its fact file.
pub const FACTS_SUFFIX: &str = "_timing.json";

/// One page as handed to phase-1 classification.
#[derive(Debug, Clone, PartialEq)]
pub struct PageDocument {
    pub page_id: String,
    pub text: String,
    /// Parsed side-channel facts, if a well-formed fact file exists.
    pub facts: Option<SideChannelFacts>,
    /// Raw fact file contents, kept for cache digests.
    pub facts_raw: Option<String>,
}

impl PageDocument {
    /// A page with text only.
    pub fn new(page_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            page_id: page_id.into(),
            text: text.into(),
            facts: None,
            facts_raw: None,
        }
    }

    /// Attach side-channel facts.
    pub fn with_facts(mut self, facts: SideChannelFacts) -> Self {
        self.facts = Some(facts);
        self
    }
}

/// Read access to a corpus directory.
#[derive(Debug, Clone)]
pub struct Corpus {
    dir: PathBuf,
}

impl Corpus {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn text_path(&self, page_id: &str) -> PathBuf {
        self.dir.join(format!("{page_id}.{TEXT_EXTENSION}"))
    }

    pub fn facts_path(&self, page_id: &str) -> PathBuf {
        self.dir.join(format!("{page_id}{FACTS_SUFFIX}"))
    }

    /// Raw text document for a page, `None` if it does not exist.
    pub fn read_text(&self, page_id: &str) -> Result<Option<String>> {
        read_optional(&self.text_path(page_id))
    }

    /// Raw fact file for a page, `None` if it does not exist.
    pub fn read_facts_raw(&self, page_id: &str) -> Result<Option<String>> {
        read_optional(&self.facts_path(page_id))
    }

    /// Load every text document in page order (sorted by file name), with
    /// side-channel facts attached where present.
    ///
    /// A malformed fact file is logged and left out of classification; facts
    /// are optional input.
    pub fn load_documents(&self) -> Result<Vec<PageDocument>> {
        if !self.dir.is_dir() {
            return Err(GroveError::not_found(format!(
                "corpus directory {}",
                self.dir.display()
            )));
        }

        let entries = std::fs::read_dir(&self.dir).map_err(|e| GroveError::io(&self.dir, e))?;

        let mut text_files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| GroveError::io(&self.dir, e))?;
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == TEXT_EXTENSION) {
                text_files.push(path);
            }
        }
        text_files.sort();

        let mut documents = Vec::with_capacity(text_files.len());
        for path in text_files {
            let Some(page_id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_owned)
            else {
                warn!(path = %path.display(), "skipping page with non UTF-8 name");
                continue;
            };

            let bytes = std::fs::read(&path).map_err(|e| GroveError::io(&path, e))?;
            let text = decode_lossy(&path, bytes);
            let facts_raw = self.read_facts_raw(&page_id)?;
            let facts = facts_raw.as_deref().and_then(|raw| {
                serde_json::from_str::<SideChannelFacts>(raw)
                    .map_err(|e| warn!(page_id = %page_id, error = %e, "ignoring malformed fact file"))
                    .ok()
            });

            documents.push(PageDocument {
                page_id,
                text,
                facts,
                facts_raw,
            });
        }

        debug!(dir = %self.dir.display(), pages = documents.len(), "corpus loaded");
        Ok(documents)
    }
}

/// SHA-256 over page ids, texts and raw fact files, in page order.
pub fn corpus_digest(documents: &[PageDocument]) -> String {
    let mut hasher = Sha256::new();
    for doc in documents {
        hasher.update(doc.page_id.as_bytes());
        hasher.update([0]);
        hasher.update(doc.text.as_bytes());
        hasher.update([0]);
        if let Some(raw) = &doc.facts_raw {
            hasher.update(raw.as_bytes());
        }
        hasher.update([0xff]);
    }
    format!("{:x}", hasher.finalize())
}

/// Invalid UTF-8 becomes U+FFFD so one badly extracted page cannot fail
/// the whole corpus.
fn decode_lossy(path: &Path, bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            warn!(path = %path.display(), error = %e.utf8_error(), "file is not valid UTF-8, decoding lossily");
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        }
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(decode_lossy(path, bytes))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(GroveError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn load_documents_orders_by_file_name() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "page_010.md", "ten");
        write(tmp.path(), "page_002.md", "two");
        write(tmp.path(), "notes.txt", "ignored");

        let docs = Corpus::new(tmp.path()).load_documents().unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.page_id.as_str()).collect();
        assert_eq!(ids, vec!["page_002", "page_010"]);
        assert_eq!(docs[0].text, "two");
    }

    #[test]
    fn load_documents_attaches_facts() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "page_006.md", "timing page");
        write(
            tmp.path(),
            "page_006_timing.json",
            r#"{"operating_mode":"Chain Mode","clock_domain":{"signal":"SCK","active_edge":"Rising"}}"#,
        );

        let docs = Corpus::new(tmp.path()).load_documents().unwrap();
        let facts = docs[0].facts.as_ref().expect("facts attached");
        assert_eq!(facts.operating_mode.as_deref(), Some("Chain Mode"));
        assert!(docs[0].facts_raw.is_some());
    }

    #[test]
    fn malformed_facts_are_ignored_but_hashed() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "page_001.md", "text");
        write(tmp.path(), "page_001_timing.json", "{not json");

        let docs = Corpus::new(tmp.path()).load_documents().unwrap();
        assert!(docs[0].facts.is_none());
        assert_eq!(docs[0].facts_raw.as_deref(), Some("{not json"));
    }

    #[test]
    fn invalid_utf8_page_does_not_stop_loading() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "page_001.md", "first");
        std::fs::write(tmp.path().join("page_002.md"), [0xff, 0xfe, b'o', b'k']).unwrap();
        write(tmp.path(), "page_003.md", "third");

        let docs = Corpus::new(tmp.path()).load_documents().unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.page_id.as_str()).collect();
        assert_eq!(ids, vec!["page_001", "page_002", "page_003"]);
        assert_eq!(docs[1].text, "\u{FFFD}\u{FFFD}ok");
        assert_eq!(docs[2].text, "third");
        assert_eq!(
            Corpus::new(tmp.path()).read_text("page_002").unwrap().as_deref(),
            Some("\u{FFFD}\u{FFFD}ok")
        );
    }

    #[test]
    fn missing_corpus_dir_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Corpus::new(tmp.path().join("nope")).load_documents().unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn read_optional_files() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "page_003.md", "body");
        let corpus = Corpus::new(tmp.path());
        assert_eq!(corpus.read_text("page_003").unwrap().as_deref(), Some("body"));
        assert_eq!(corpus.read_facts_raw("page_003").unwrap(), None);
        assert_eq!(corpus.read_text("page_999").unwrap(), None);
    }

    #[test]
    fn digest_changes_with_content() {
        let a = vec![PageDocument::new("page_001", "alpha")];
        let b = vec![PageDocument::new("page_001", "alpha!")];
        assert_eq!(corpus_digest(&a), corpus_digest(&a.clone()));
        assert_ne!(corpus_digest(&a), corpus_digest(&b));
        assert_eq!(corpus_digest(&a).len(), 64);
    }
}
