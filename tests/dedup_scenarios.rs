//! Global deduplication scenarios against the public fingerprint API.

#![allow(clippy::unwrap_used, clippy::panic)]

use corpusgate::fingerprints::{ChunkFingerprint, Fingerprints};
use corpusgate::services::pipeline::{StageRegistry, validate_stage_order};
use corpusgate::{
    Decision, Document, Error, FingerprintConfig, GlobalFingerprintManager, MatchedVia,
    PipelineOrchestrator, PriorityConfig, Stage, StageClass, Verdict,
};
use std::sync::Arc;

fn priority() -> PriorityConfig {
    PriorityConfig::new(vec!["books".into(), "wiki".into(), "commoncrawl".into()])
}

fn manager() -> GlobalFingerprintManager {
    GlobalFingerprintManager::in_memory(&FingerprintConfig::default()).unwrap()
}

/// Fingerprints with only a SimHash value.
fn simhash_only(value: u64) -> Fingerprints {
    Fingerprints {
        simhash: value,
        minhash: None,
        chunks: Vec::new(),
    }
}

#[test]
fn test_simhash_two_bits_apart_drops_lower_priority() {
    let m = manager();
    let d1 = Document::new("gutenberg", "books", "first edition");
    let d2 = Document::new("cc-2024", "commoncrawl", "scraped copy");
    let base = 0xA5A5_5A5A_0F0F_F0F0_u64;

    assert_eq!(
        m.evaluate_fingerprints(&d1, &simhash_only(base), &priority())
            .unwrap(),
        Verdict::Unique
    );
    let before: Vec<_> = m
        .records_for_doc(&d1.doc_id)
        .unwrap()
        .into_iter()
        .map(|r| r.fingerprint_id)
        .collect();

    let verdict = m
        .evaluate_fingerprints(&d2, &simhash_only(base ^ 0b1001), &priority())
        .unwrap();
    assert_eq!(
        verdict,
        Verdict::DuplicateOf {
            doc_id: d1.doc_id.clone(),
            source_name: "gutenberg".into(),
            matched_via: MatchedVia::SimHash { distance: 2 },
        }
    );

    let after: Vec<_> = m
        .records_for_doc(&d1.doc_id)
        .unwrap()
        .into_iter()
        .map(|r| r.fingerprint_id)
        .collect();
    assert_eq!(before, after);
    assert!(m.records_for_doc(&d2.doc_id).unwrap().is_empty());
}

#[test]
fn test_simhash_beyond_distance_is_not_a_match() {
    let m = manager();
    let d1 = Document::new("gutenberg", "books", "one");
    let d2 = Document::new("cc-2024", "commoncrawl", "two");
    m.evaluate_fingerprints(&d1, &simhash_only(0), &priority())
        .unwrap();
    let verdict = m
        .evaluate_fingerprints(&d2, &simhash_only(0b1111), &priority())
        .unwrap();
    assert_eq!(verdict, Verdict::Unique);
}

#[test]
fn test_minhash_below_threshold_keeps_both() {
    let config = FingerprintConfig::default().with_minhash_threshold(0.9);
    let m = GlobalFingerprintManager::in_memory(&config).unwrap();
    let a = Document::new("gutenberg", "books", "a");
    let b = Document::new("cc-2024", "commoncrawl", "b");

    // 109 of 128 slots agree: estimated similarity 0.85.
    let sig_a: Vec<u64> = (0..128).collect();
    let sig_b: Vec<u64> = (0..128).map(|i| if i < 109 { i } else { i + 1000 }).collect();
    let fp_a = Fingerprints {
        simhash: 0,
        minhash: Some(sig_a),
        chunks: Vec::new(),
    };
    let fp_b = Fingerprints {
        simhash: u64::MAX,
        minhash: Some(sig_b),
        chunks: Vec::new(),
    };

    assert_eq!(m.evaluate_fingerprints(&a, &fp_a, &priority()).unwrap(), Verdict::Unique);
    assert_eq!(m.evaluate_fingerprints(&b, &fp_b, &priority()).unwrap(), Verdict::Unique);
    assert!(!m.records_for_doc(&a.doc_id).unwrap().is_empty());
    assert!(!m.records_for_doc(&b.doc_id).unwrap().is_empty());
}

#[test]
fn test_chunk_only_overlap_is_partial() {
    let m = manager();
    let shared = ChunkFingerprint {
        chunk_index: 0,
        hash: "ab".repeat(32),
    };
    let first = Document::new("wiki-en", "wiki", "first");
    let second = Document::new("cc-2024", "commoncrawl", "second");
    let fp_first = Fingerprints {
        simhash: 0,
        minhash: None,
        chunks: vec![shared.clone()],
    };
    let fp_second = Fingerprints {
        simhash: u64::MAX,
        minhash: None,
        chunks: vec![
            ChunkFingerprint {
                chunk_index: 0,
                hash: "cd".repeat(32),
            },
            ChunkFingerprint {
                chunk_index: 1,
                ..shared
            },
        ],
    };

    m.evaluate_fingerprints(&first, &fp_first, &priority())
        .unwrap();
    let verdict = m
        .evaluate_fingerprints(&second, &fp_second, &priority())
        .unwrap();
    match verdict {
        Verdict::PartialOverlap {
            doc_id,
            matched_chunks,
        } => {
            assert_eq!(doc_id, first.doc_id);
            assert_eq!(matched_chunks.len(), 1);
            assert_eq!(matched_chunks[0].chunk_index, 1);
            assert_eq!(matched_chunks[0].chunk_id, Some(0));
        },
        other => panic!("expected PartialOverlap, got {other:?}"),
    }
    assert!(!m.records_for_doc(&second.doc_id).unwrap().is_empty());
}

#[test]
fn test_priority_invariant_in_priority_order() {
    let text = "Call me Ishmael. Some years ago, never mind how long precisely, having little \
        or no money in my purse, and nothing particular to interest me on shore.";
    let m = manager();
    let book = Document::new("gutenberg", "books", text);
    let web = Document::new("cc-2024", "commoncrawl", text);

    assert!(m.evaluate(&book, &priority()).unwrap().is_kept());
    assert!(!m.evaluate(&web, &priority()).unwrap().is_kept());
    assert!(!m.records_for_doc(&book.doc_id).unwrap().is_empty());
    assert!(m.records_for_doc(&web.doc_id).unwrap().is_empty());
}

#[test]
fn test_priority_invariant_when_lower_priority_arrives_first() {
    let text = "It is a truth universally acknowledged, that a single man in possession of a \
        good fortune, must be in want of a wife.";
    let m = manager();
    let web = Document::new("cc-2024", "commoncrawl", text);
    let book = Document::new("gutenberg", "books", text);

    assert_eq!(m.evaluate(&web, &priority()).unwrap(), Verdict::Unique);
    assert!(matches!(
        m.evaluate(&book, &priority()).unwrap(),
        Verdict::Supersedes { ref doc_ids, .. } if doc_ids == &vec![web.doc_id.clone()]
    ));
    // The kept copy is now the book; another scraped copy loses to it.
    let mirror = Document::new("cc-2025", "commoncrawl", text);
    assert!(matches!(
        m.evaluate(&mirror, &priority()).unwrap(),
        Verdict::DuplicateOf { ref doc_id, .. } if *doc_id == book.doc_id
    ));
}

struct Named(&'static str, StageClass);

impl Stage for Named {
    fn name(&self) -> &str {
        self.0
    }

    fn class(&self) -> StageClass {
        self.1
    }

    fn apply(&self, document: Document) -> corpusgate::Result<Decision> {
        Ok(Decision::Accept(document))
    }
}

#[test]
fn test_quality_before_dedup_is_rejected_at_startup() {
    let stages: Vec<Arc<dyn Stage>> = vec![
        Arc::new(Named("length_filter", StageClass::Quality)),
        Arc::new(Named("dedup", StageClass::Dedup)),
    ];
    assert!(matches!(PipelineOrchestrator::new(stages), Err(Error::Config(_))));
    assert!(
        validate_stage_order(&[("pii", StageClass::Pii), ("dedup", StageClass::Dedup)]).is_ok()
    );
}

#[test]
fn test_registry_rejects_bad_order_from_names() {
    let manager = Arc::new(manager());
    let mut registry = StageRegistry::with_builtins(manager, priority());
    registry.register(Arc::new(Named("length_filter", StageClass::Quality)));
    let stages = registry
        .build(&["length_filter".to_string(), "global_dedup".to_string()])
        .unwrap();
    assert!(matches!(PipelineOrchestrator::new(stages), Err(Error::Config(_))));
    assert!(matches!(
        registry.build(&["no_such_stage".to_string()]),
        Err(Error::Config(_))
    ));
}
