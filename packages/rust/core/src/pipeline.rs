//! End-to-end build pipeline: corpus → classified manifest → knowledge tree.
//!
//! Phase 1 is cached on the manifest file. Phase 2 either writes a fully
//! validated tree or nothing at all.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use grove_shared::{AppConfig, CacheKey, PageRecord, Result};

use crate::classify::{self, PageClassifier};
use crate::construct::{self, TreeConstructor};
use crate::corpus::{self, Corpus};
use crate::navigator::TreeNavigator;
use crate::store;

/// Configuration for [`build_knowledge_tree`].
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Directory holding the page text and fact files.
    pub corpus_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub tree_path: PathBuf,
    /// Re-run classification even if a manifest exists.
    pub force: bool,
    /// Run phase 1. When off, phase 2 reads the manifest from disk.
    pub classify: bool,
    /// Run phase 2.
    pub construct: bool,
    pub cache_key: CacheKey,
    pub max_page_chars: usize,
    pub relevance_threshold: u8,
}

impl From<&AppConfig> for BuildConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            corpus_dir: PathBuf::from(&config.paths.corpus_dir),
            manifest_path: config.paths.manifest_path(),
            tree_path: config.paths.tree_path(),
            force: false,
            classify: true,
            construct: true,
            cache_key: config.classification.cache_key,
            max_page_chars: config.classification.max_page_chars,
            relevance_threshold: config.classification.relevance_threshold,
        }
    }
}

/// Where the manifest used by the run came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestSource {
    /// An existing manifest was reused without classifying.
    Cached,
    /// Pages were classified in this run.
    Classified {
        pages: usize,
        failures: usize,
    },
    /// Phase 1 was not requested; the manifest was read from disk.
    Loaded,
    /// Neither phase needed a manifest.
    Unused,
}

/// What phase 2 did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeOutcome {
    Built {
        node_count: usize,
        configurations: usize,
    },
    /// No page survived the relevance filter, so no tree was produced.
    /// A tree from an earlier build, if any, is left on disk untouched.
    SkippedEmptyManifest { stale_tree_kept: bool },
    NotRequested,
}

/// Result of a pipeline run.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub manifest_source: ManifestSource,
    /// Number of records in the manifest.
    pub manifest_len: usize,
    pub tree: TreeOutcome,
    pub manifest_path: PathBuf,
    pub tree_path: PathBuf,
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait BuildProgress {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called before each page is sent to the classifier.
    fn page_classified(&self, page_id: &str, current: usize, total: usize);
    /// Called when the pipeline completes.
    fn done(&self, report: &BuildReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl BuildProgress for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn page_classified(&self, _page_id: &str, _current: usize, _total: usize) {}
    fn done(&self, _report: &BuildReport) {}
}

/// Run the build pipeline.
///
/// 1. Classification (skipped when a usable manifest is cached)
/// 2. Relevance filter + manifest persistence
/// 3. Tree construction, validation, and persistence
#[instrument(skip_all, fields(corpus = %config.corpus_dir.display(), force = config.force))]
pub fn build_knowledge_tree(
    config: &BuildConfig,
    classifier: &mut dyn PageClassifier,
    constructor: &mut dyn TreeConstructor,
    progress: &dyn BuildProgress,
) -> Result<BuildReport> {
    let start = Instant::now();

    // --- Phase 1: Classification ---
    let (manifest, manifest_source) = if config.classify {
        run_classification(config, classifier, progress)?
    } else if config.construct {
        progress.phase("Loading page manifest");
        (store::load_manifest(&config.manifest_path)?, ManifestSource::Loaded)
    } else {
        (Vec::new(), ManifestSource::Unused)
    };

    // --- Phase 2: Tree construction ---
    let tree = if config.construct {
        progress.phase("Constructing knowledge tree");
        match construct::construct_tree(constructor, &manifest)? {
            Some(tree) => {
                store::save_tree(&config.tree_path, &tree)?;
                let navigator = TreeNavigator::from_root(tree)?;
                TreeOutcome::Built {
                    node_count: navigator.root().node_count(),
                    configurations: navigator.list_configurations().len(),
                }
            }
            None => {
                let stale_tree_kept = config.tree_path.exists();
                if stale_tree_kept {
                    warn!(
                        path = %config.tree_path.display(),
                        "manifest is empty, previous knowledge tree left in place and now stale"
                    );
                }
                TreeOutcome::SkippedEmptyManifest { stale_tree_kept }
            }
        }
    } else {
        TreeOutcome::NotRequested
    };

    let report = BuildReport {
        manifest_source,
        manifest_len: manifest.len(),
        tree,
        manifest_path: config.manifest_path.clone(),
        tree_path: config.tree_path.clone(),
        elapsed: start.elapsed(),
    };

    progress.done(&report);

    info!(
        manifest = ?report.manifest_source,
        manifest_len = report.manifest_len,
        tree = ?report.tree,
        elapsed_ms = report.elapsed.as_millis(),
        "build pipeline complete"
    );

    Ok(report)
}

/// Phase 1 with the manifest cache in front of it.
fn run_classification(
    config: &BuildConfig,
    classifier: &mut dyn PageClassifier,
    progress: &dyn BuildProgress,
) -> Result<(Vec<PageRecord>, ManifestSource)> {
    let cached = !config.force && config.manifest_path.exists();

    if cached && config.cache_key == CacheKey::Existence {
        info!(path = %config.manifest_path.display(), "reusing cached manifest");
        progress.phase("Loading cached page manifest");
        return Ok((store::load_manifest(&config.manifest_path)?, ManifestSource::Cached));
    }

    progress.phase("Reading page corpus");
    let documents = Corpus::new(&config.corpus_dir).load_documents()?;
    let digest = match config.cache_key {
        CacheKey::ContentHash => Some(corpus::corpus_digest(&documents)),
        CacheKey::Existence => None,
    };

    if cached {
        let stored = store::load_digest(&config.manifest_path)?;
        if stored.is_some() && stored == digest {
            info!(path = %config.manifest_path.display(), "reusing cached manifest, corpus digest matches");
            progress.phase("Loading cached page manifest");
            return Ok((store::load_manifest(&config.manifest_path)?, ManifestSource::Cached));
        }
        info!("corpus digest changed, reclassifying");
    }

    progress.phase("Classifying pages");
    let run = classify::classify_pages(classifier, &documents, config.max_page_chars, progress);
    let source = ManifestSource::Classified {
        pages: run.records.len(),
        failures: run.failures,
    };

    let manifest = classify::filter_manifest(run.records, config.relevance_threshold);
    info!(
        kept = manifest.len(),
        threshold = config.relevance_threshold,
        "relevance filter applied"
    );

    store::save_manifest(&config.manifest_path, &manifest)?;
    if let Some(digest) = digest {
        store::save_digest(&config.manifest_path, &digest)?;
    }

    Ok((manifest, source))
}
