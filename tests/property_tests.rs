//! Property-based tests for fingerprinting, scheduling and priority resolution.
//!
//! Uses proptest to verify invariants across random inputs:
//! - Chunk spans tile the text without gaps when there is no overlap
//! - SimHash is deterministic and flipping bits moves the distance exactly
//! - The higher-priority copy survives whichever copy arrives first
//! - The scheduler never runs a lower family before a higher one

// Property tests use unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::unwrap_used)]

use corpusgate::fingerprints::{chunk_spans, hamming_distance, simhash64};
use corpusgate::sources::{SourceConnector, VecSource};
use corpusgate::{
    DocId, Document, FingerprintConfig, GlobalFingerprintManager, PriorityConfig, SourceScheduler,
};
use proptest::prelude::*;

const FAMILIES: [&str; 3] = ["books", "wiki", "commoncrawl"];

fn priority() -> PriorityConfig {
    PriorityConfig::new(FAMILIES.iter().map(|f| (*f).to_string()).collect())
}

/// Sentences long enough to produce shingles and chunks.
fn sentence() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z]{3,9}", 12..40).prop_map(|words| words.join(" "))
}

proptest! {
    /// Property: without overlap, spans are contiguous and cover the whole text.
    #[test]
    fn prop_chunk_spans_tile_text(text in "\\PC{0,300}", size in 1usize..64) {
        let spans = chunk_spans(&text, size, 0);
        let mut cursor = 0;
        for (i, span) in spans.iter().enumerate() {
            prop_assert_eq!(span.index, i);
            prop_assert_eq!(span.start, cursor);
            prop_assert!(text[span.start..span.end].chars().count() <= size);
            cursor = span.end;
        }
        prop_assert_eq!(cursor, text.len());
    }

    /// Property: with overlap, every span still starts on a char boundary and
    /// the last one ends at the end of the text.
    #[test]
    fn prop_overlapping_spans_reach_the_end(
        text in "\\PC{1,200}",
        size in 2usize..32,
        overlap in 0usize..32,
    ) {
        let spans = chunk_spans(&text, size, overlap);
        prop_assert!(!spans.is_empty());
        for span in &spans {
            prop_assert!(text.is_char_boundary(span.start));
            prop_assert!(text.is_char_boundary(span.end));
            prop_assert!(span.start < span.end);
        }
        prop_assert_eq!(spans.last().map(|s| s.end), Some(text.len()));
    }

    /// Property: SimHash is a pure function of its input.
    #[test]
    fn prop_simhash_is_deterministic(text in sentence()) {
        prop_assert_eq!(simhash64(&text, 2000), simhash64(&text, 2000));
    }

    /// Property: flipping k distinct bits gives a Hamming distance of exactly k.
    #[test]
    fn prop_hamming_counts_flipped_bits(
        value in any::<u64>(),
        bits in prop::collection::btree_set(0u32..64, 0..8),
    ) {
        let flipped = bits.iter().fold(value, |acc, bit| acc ^ (1u64 << bit));
        let k = u32::try_from(bits.len()).unwrap();
        prop_assert_eq!(hamming_distance(value, flipped), k);
        prop_assert_eq!(hamming_distance(flipped, value), k);
    }

    /// Property: document ids are stable for the same source and content.
    #[test]
    fn prop_doc_id_is_stable(source in "[a-z]{1,12}", text in "\\PC{0,600}") {
        prop_assert_eq!(DocId::derive(&source, &text), DocId::derive(&source, &text));
    }

    /// Property: whichever copy is evaluated first, only the books copy keeps
    /// fingerprints once both have been evaluated.
    #[test]
    fn prop_higher_priority_copy_survives(text in sentence(), books_first in any::<bool>()) {
        let manager = GlobalFingerprintManager::in_memory(&FingerprintConfig::default()).unwrap();
        let book = Document::new("gutenberg", "books", text.clone());
        let web = Document::new("cc", "commoncrawl", text);

        let (first, second) = if books_first { (&book, &web) } else { (&web, &book) };
        manager.evaluate(first, &priority()).unwrap();
        manager.evaluate(second, &priority()).unwrap();

        prop_assert!(!manager.records_for_doc(&book.doc_id).unwrap().is_empty());
        prop_assert!(manager.records_for_doc(&web.doc_id).unwrap().is_empty());
    }

    /// Property: scheduled family ranks never decrease.
    #[test]
    fn prop_scheduler_orders_by_family(
        families in prop::collection::vec(prop::sample::select(FAMILIES.to_vec()), 1..12),
    ) {
        let priority = priority();
        let sources: Vec<Box<dyn SourceConnector>> = families
            .iter()
            .enumerate()
            .map(|(i, family)| {
                Box::new(VecSource::from_texts(format!("src-{i}"), *family, ["x"]))
                    as Box<dyn SourceConnector>
            })
            .collect();
        let ordered = SourceScheduler::new(priority.clone()).order(sources);
        let ranks: Vec<usize> = ordered
            .iter()
            .map(|s| priority.type_rank(s.document_type()))
            .collect();
        prop_assert!(ranks.windows(2).all(|w| w[0] <= w[1]));
        prop_assert_eq!(ordered.len(), families.len());
    }
}
