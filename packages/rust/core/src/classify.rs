//! Phase 1: per-page classification.
//!
//! Each page is prefixed with its side-channel facts (if any), capped to the
//! service's character budget, and handed to a [`PageClassifier`]. A failure on one page is recorded as
//! an irrelevant page and never aborts the batch.

use tracing::{debug, info, instrument, warn};

use grove_shared::{PageRecord, Result, SideChannelFacts};

use crate::corpus::PageDocument;
use crate::pipeline::BuildProgress;

/// Line announcing that a page carries extracted visual facts.
pub const FACTS_MARKER: &str = "TIMING DIAGRAM DATA AVAILABLE";

const FACTS_SEPARATOR: &str = "----------------------------------------";

/// The generative classification service: `(page_id, text) -> PageRecord`.
pub trait PageClassifier {
    fn classify(&mut self, page_id: &str, content: &str) -> Result<PageRecord>;
}

/// Outcome of classifying a batch of pages.
#[derive(Debug, Clone, Default)]
pub struct ClassificationRun {
    /// One record per input page, in input order.
    pub records: Vec<PageRecord>,
    /// Pages whose record was synthesized after a failure.
    pub failures: usize,
}

/// Keep at most the first `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Header block summarizing a page's side-channel facts.
pub fn facts_header(page_id: &str, facts: &SideChannelFacts) -> String {
    let mode = facts.operating_mode.as_deref().unwrap_or("unknown");
    let clock = facts.clock_domain.as_ref();
    let signal = clock.and_then(|c| c.signal.as_deref()).unwrap_or("unknown");
    let edge = clock
        .and_then(|c| c.active_edge.as_deref())
        .unwrap_or("unknown");

    format!(
        "=== VISUAL FACTS ({page_id}) ===\n\
         Operating Mode: {mode}\n\
         Clock Signal: {signal} ({edge})\n\
         {FACTS_MARKER}\n\
         {FACTS_SEPARATOR}\n"
    )
}

/// Content submitted to the classifier for one page: facts header (if
/// any) followed by the text, capped at `max_chars` as a whole.
pub fn classification_input(doc: &PageDocument, max_chars: usize) -> String {
    match &doc.facts {
        Some(facts) => {
            let combined = format!("{}{}", facts_header(&doc.page_id, facts), doc.text);
            truncate_chars(&combined, max_chars).to_string()
        }
        None => truncate_chars(&doc.text, max_chars).to_string(),
    }
}

/// Classify every page in order.
#[instrument(skip_all, fields(pages = documents.len()))]
pub fn classify_pages(
    classifier: &mut dyn PageClassifier,
    documents: &[PageDocument],
    max_chars: usize,
    progress: &dyn BuildProgress,
) -> ClassificationRun {
    let mut run = ClassificationRun {
        records: Vec::with_capacity(documents.len()),
        failures: 0,
    };
    let total = documents.len();

    for (i, doc) in documents.iter().enumerate() {
        progress.page_classified(&doc.page_id, i + 1, total);

        let content = classification_input(doc, max_chars);
        let outcome = classifier
            .classify(&doc.page_id, &content)
            .and_then(|record| record.validate().map(|()| record));

        match outcome {
            Ok(mut record) => {
                if record.page_id != doc.page_id {
                    warn!(
                        expected = %doc.page_id,
                        returned = %record.page_id,
                        "classifier returned a different page id, re-keying"
                    );
                    record.page_id = doc.page_id.clone();
                }
                debug!(
                    page_id = %record.page_id,
                    page_type = ?record.page_type,
                    score = record.relevance_score,
                    "page classified"
                );
                run.records.push(record);
            }
            Err(e) => {
                warn!(page_id = %doc.page_id, error = %e, "page classification failed");
                run.failures += 1;
                run.records.push(PageRecord::failed(&doc.page_id, &e.to_string()));
            }
        }
    }

    info!(
        classified = run.records.len(),
        failures = run.failures,
        "classification complete"
    );
    run
}

/// Records with `relevance_score >= threshold`, order preserved.
pub fn filter_manifest(records: Vec<PageRecord>, threshold: u8) -> Vec<PageRecord> {
    records
        .into_iter()
        .filter(|r| r.relevance_score >= threshold)
        .collect()
}
