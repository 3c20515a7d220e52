use crate::history::{History, Turn};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Matches further away than this (cosine distance) are not injected
pub const SIMILARITY_THRESHOLD: f32 = 0.5;

/// Neighbors requested per user utterance
pub const DEFAULT_TOP_K: usize = 3;

const CONTEXT_PREFIX: &str = "You are a helpful assistant. Use the document to answer the user's question: ";

/// A neighbor returned by a similarity index
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalMatch {
    pub document: String,
    /// Cosine distance to the query, 0.0 meaning identical direction
    pub distance: f32,
}

impl RetrievalMatch {
    pub fn qualifies(&self, threshold: f32) -> bool {
        self.distance <= threshold
    }
}

/// Nearest-neighbor lookup over stored documents
#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    /// Up to `k` neighbors of `text`, nearest first
    async fn query(&self, text: &str, k: usize) -> anyhow::Result<Vec<RetrievalMatch>>;
}

/// Injects retrieved documents into the history as system context
#[derive(Clone)]
pub struct Augmenter {
    index: Arc<dyn SimilarityIndex>,
    top_k: usize,
    threshold: f32,
}

impl Augmenter {
    pub fn new(index: Arc<dyn SimilarityIndex>) -> Self {
        Self {
            index,
            top_k: DEFAULT_TOP_K,
            threshold: SIMILARITY_THRESHOLD,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Append one system turn per qualifying match. Returns how many were added.
    ///
    /// Index failures are logged and the turn goes ahead without context.
    pub async fn augment(&self, utterance: &str, history: &mut History) -> usize {
        let matches = match self.index.query(utterance, self.top_k).await {
            Ok(matches) => matches,
            Err(e) => {
                warn!(error = %e, "Retrieval failed, continuing without context");
                return 0;
            }
        };

        let mut added = 0;
        for m in matches.into_iter().filter(|m| m.qualifies(self.threshold)) {
            debug!(distance = m.distance, "Injecting retrieved document");
            history.push(context_turn(&m.document));
            added += 1;
        }
        added
    }
}

/// The system turn carrying a retrieved document
pub fn context_turn(document: &str) -> Turn {
    Turn::system(format!("{}{}", CONTEXT_PREFIX, document))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct FixedIndex(Vec<RetrievalMatch>);

    #[async_trait]
    impl SimilarityIndex for FixedIndex {
        async fn query(&self, _text: &str, k: usize) -> anyhow::Result<Vec<RetrievalMatch>> {
            Ok(self.0.iter().take(k).cloned().collect())
        }
    }

    struct BrokenIndex;

    #[async_trait]
    impl SimilarityIndex for BrokenIndex {
        async fn query(&self, _text: &str, _k: usize) -> anyhow::Result<Vec<RetrievalMatch>> {
            Err(anyhow!("index offline"))
        }
    }

    fn hit(document: &str, distance: f32) -> RetrievalMatch {
        RetrievalMatch {
            document: document.to_string(),
            distance,
        }
    }

    #[tokio::test]
    async fn test_only_close_matches_are_injected() {
        let augmenter = Augmenter::new(Arc::new(FixedIndex(vec![
            hit("close", 0.1),
            hit("boundary", 0.5),
            hit("far", 0.51),
        ])));
        let mut history = History::new();

        assert_eq!(augmenter.augment("question", &mut history).await, 2);
        assert_eq!(
            history.turns(),
            &[context_turn("close"), context_turn("boundary")]
        );
    }

    #[tokio::test]
    async fn test_no_qualifying_match_is_noop() {
        let augmenter = Augmenter::new(Arc::new(FixedIndex(vec![hit("far", 0.9)])));
        let mut history = History::from_turns(vec![Turn::user("earlier")]);

        assert_eq!(augmenter.augment("question", &mut history).await, 0);
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_top_k_limits_query() {
        let augmenter = Augmenter::new(Arc::new(FixedIndex(vec![
            hit("a", 0.1),
            hit("b", 0.2),
            hit("c", 0.3),
            hit("d", 0.4),
        ])));
        let mut history = History::new();
        assert_eq!(augmenter.augment("q", &mut history).await, DEFAULT_TOP_K);

        let narrow = augmenter.clone().with_top_k(1);
        let mut history = History::new();
        assert_eq!(narrow.augment("q", &mut history).await, 1);
    }

    #[tokio::test]
    async fn test_index_errors_are_skipped() {
        let augmenter = Augmenter::new(Arc::new(BrokenIndex));
        let mut history = History::new();

        assert_eq!(augmenter.augment("question", &mut history).await, 0);
        assert!(history.is_empty());
    }

    #[test]
    fn test_context_turn_text() {
        assert_eq!(
            context_turn("Rust is a language."),
            Turn::system("You are a helpful assistant. Use the document to answer the user's question: Rust is a language.")
        );
    }
}
