use crate::retrieval::{RetrievalMatch, SimilarityIndex};
use crate::terminal;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rig::embeddings::EmbeddingModel;
use ruvector_core::types::{DbOptions, HnswConfig};
use ruvector_core::{DistanceMetric, SearchQuery, VectorDB as RuVectorDB, VectorEntry};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;
use walkdir::WalkDir;

/// Upper bound on the size of a chunk, in characters
pub const MAX_CHUNK_CHARS: usize = 1500;

const BATCH_SIZE: usize = 32;

const KNOWLEDGE_EXTENSIONS: &[&str] = &["md", "markdown", "txt"];

/// A knowledge file loaded from disk
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub source: PathBuf,
    pub text: String,
}

/// Split markdown into chunks of at most [`MAX_CHUNK_CHARS`].
///
/// Each heading starts a new section. Within a section, paragraphs are packed
/// together until the bound would be exceeded. A single oversized paragraph is
/// cut at character boundaries.
pub fn chunk_markdown(text: &str) -> Vec<String> {
    let mut sections: Vec<String> = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if line.trim_start().starts_with('#') && !current.trim().is_empty() {
            sections.push(std::mem::take(&mut current));
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        sections.push(current);
    }

    let mut chunks = Vec::new();
    for section in sections {
        let mut chunk = String::new();

        for paragraph in section.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
            let needed = if chunk.is_empty() {
                paragraph.chars().count()
            } else {
                chunk.chars().count() + 2 + paragraph.chars().count()
            };

            if needed > MAX_CHUNK_CHARS && !chunk.is_empty() {
                chunks.push(std::mem::take(&mut chunk));
            }

            if paragraph.chars().count() > MAX_CHUNK_CHARS {
                let chars: Vec<char> = paragraph.chars().collect();
                for piece in chars.chunks(MAX_CHUNK_CHARS) {
                    chunks.push(piece.iter().collect());
                }
                continue;
            }

            if !chunk.is_empty() {
                chunk.push_str("\n\n");
            }
            chunk.push_str(paragraph);
        }

        if !chunk.trim().is_empty() {
            chunks.push(chunk);
        }
    }

    chunks
}

/// Load a knowledge file, or every `.md`/`.markdown`/`.txt` file under a directory
pub fn load_documents(path: &Path) -> Result<Vec<Document>> {
    if path.is_file() {
        let text = std::fs::read_to_string(path)?;
        return Ok(vec![Document {
            source: path.to_path_buf(),
            text,
        }]);
    }

    if !path.is_dir() {
        return Err(anyhow!("Knowledge path does not exist: {}", path.display()));
    }

    let mut documents = Vec::new();
    for entry in WalkDir::new(path)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if let Some(ext) = path.extension()
            && KNOWLEDGE_EXTENSIONS.contains(&ext.to_string_lossy().as_ref())
        {
            let text = std::fs::read_to_string(path)?;
            documents.push(Document {
                source: path.to_path_buf(),
                text,
            });
        }
    }

    Ok(documents)
}

/// Cosine distance `1 - cos(a, b)`; 1.0 when either vector is zero
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Chunk texts and their vectors, indexed by ruvector-core
pub struct ChunkStore {
    chunks: Vec<String>,
    vectors: Vec<Vec<f32>>,
    db: Mutex<RuVectorDB>,
}

impl ChunkStore {
    /// Build a fresh HNSW index at `storage_path`, replacing any previous one
    pub fn build(chunks: Vec<String>, vectors: Vec<Vec<f32>>, storage_path: &Path) -> Result<Self> {
        if chunks.len() != vectors.len() {
            return Err(anyhow!(
                "Got {} embeddings for {} chunks",
                vectors.len(),
                chunks.len()
            ));
        }
        let dimensions = vectors
            .first()
            .map(Vec::len)
            .ok_or_else(|| anyhow!("No chunks to index"))?;

        if let Some(parent) = storage_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if storage_path.exists() {
            std::fs::remove_file(storage_path)?;
        }

        let options = DbOptions {
            dimensions,
            distance_metric: DistanceMetric::Cosine,
            storage_path: storage_path.to_string_lossy().to_string(),
            hnsw_config: Some(HnswConfig {
                m: 16,
                ef_construction: 200,
                ef_search: 100,
                max_elements: chunks.len().max(16),
            }),
            quantization: None,
        };
        let db = RuVectorDB::new(options)?;

        for (idx, vector) in vectors.iter().enumerate() {
            db.insert(VectorEntry {
                id: Some(idx.to_string()),
                vector: vector.clone(),
                metadata: None,
            })?;
        }

        Ok(Self {
            chunks,
            vectors,
            db: Mutex::new(db),
        })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// The `k` nearest chunks to `query`, nearest first, with exact cosine distance
    pub fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<RetrievalMatch>> {
        let db = self
            .db
            .lock()
            .map_err(|_| anyhow!("Knowledge index lock poisoned"))?;
        let results = db.search(SearchQuery {
            vector: query.to_vec(),
            k,
            filter: None,
            ef_search: None,
        })?;

        let mut matches = Vec::with_capacity(results.len());
        for result in results {
            if let Ok(idx) = result.id.parse::<usize>()
                && idx < self.chunks.len()
            {
                matches.push(RetrievalMatch {
                    document: self.chunks[idx].clone(),
                    distance: cosine_distance(query, &self.vectors[idx]),
                });
            }
        }

        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(matches)
    }
}

/// Retrieval index over local knowledge files, embedded with a rig embedding model
pub struct KnowledgeIndex<E> {
    embedder: E,
    store: ChunkStore,
}

impl<E: EmbeddingModel> KnowledgeIndex<E> {
    /// Chunk `documents`, embed every chunk and index the vectors
    pub async fn build(embedder: E, documents: &[Document], storage_path: &Path) -> Result<Self> {
        let mut chunks: Vec<String> = Vec::new();
        for doc in documents {
            let doc_chunks = chunk_markdown(&doc.text);
            debug!(source = %doc.source.display(), chunks = doc_chunks.len(), "Chunked knowledge file");
            chunks.extend(doc_chunks);
        }

        if chunks.is_empty() {
            return Err(anyhow!("No knowledge text found to index"));
        }

        let pb = terminal::create_embedding_progress(chunks.len() as u64);
        pb.set_message("Generating embeddings...");
        let vectors = embed_all(&embedder, &chunks, &pb).await?;
        pb.finish_with_message(format!("Generated {} embeddings", chunks.len()));

        debug!(documents = documents.len(), chunks = chunks.len(), "Building knowledge index");
        let store = ChunkStore::build(chunks, vectors, storage_path)?;

        Ok(Self { embedder, store })
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }
}

async fn embed_all<E: EmbeddingModel>(
    embedder: &E,
    texts: &[String],
    pb: &indicatif::ProgressBar,
) -> Result<Vec<Vec<f32>>> {
    let mut all_embeddings = Vec::with_capacity(texts.len());

    for (batch_idx, batch) in texts.chunks(BATCH_SIZE).enumerate() {
        pb.set_message(format!(
            "Embedding batch {}/{}",
            batch_idx + 1,
            texts.len().div_ceil(BATCH_SIZE)
        ));

        let embeddings = embedder
            .embed_texts(batch.to_vec())
            .await
            .map_err(|e| anyhow!("Failed to generate embeddings: {}", e))?;

        for embedding in embeddings {
            all_embeddings.push(embedding.vec.iter().map(|&x| x as f32).collect());
            pb.inc(1);
        }
    }

    Ok(all_embeddings)
}

#[async_trait]
impl<E: EmbeddingModel + 'static> SimilarityIndex for KnowledgeIndex<E> {
    async fn query(&self, text: &str, k: usize) -> Result<Vec<RetrievalMatch>> {
        let embedding = self
            .embedder
            .embed_texts(vec![text.to_string()])
            .await
            .map_err(|e| anyhow!("Failed to generate query embedding: {}", e))?;

        let query: Vec<f32> = embedding
            .first()
            .ok_or_else(|| anyhow!("No embedding generated for query"))?
            .vec
            .iter()
            .map(|&x| x as f32)
            .collect();

        self.store.nearest(&query, k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_chunk_markdown_splits_on_headings() {
        let text = "# Intro\nRust is fast.\n\n## Ownership\nEach value has one owner.\n\n## Borrowing\nReferences borrow.\n";
        let chunks = chunk_markdown(text);

        assert_eq!(
            chunks,
            vec![
                "# Intro\nRust is fast.",
                "## Ownership\nEach value has one owner.",
                "## Borrowing\nReferences borrow.",
            ]
        );
    }

    #[test]
    fn test_chunk_markdown_bounds_chunk_size() {
        let paragraph = "word ".repeat(200);
        let text = format!("# Big\n\n{}\n\n{}\n\n{}", paragraph, paragraph, "x".repeat(MAX_CHUNK_CHARS * 2 + 10));
        let chunks = chunk_markdown(&text);

        assert!(chunks.len() >= 4);
        assert!(chunks.iter().all(|c| c.chars().count() <= MAX_CHUNK_CHARS));
        assert!(chunks.iter().all(|c| !c.trim().is_empty()));
    }

    #[test]
    fn test_chunk_markdown_drops_blank_input() {
        assert!(chunk_markdown("").is_empty());
        assert!(chunk_markdown("\n\n   \n").is_empty());
    }

    #[test]
    fn test_cosine_distance() {
        assert!(cosine_distance(&[1.0, 0.0], &[2.0, 0.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    #[test]
    fn test_load_documents_filters_extensions() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.md"), "# A").unwrap();
        std::fs::write(dir.path().join("b.txt"), "B").unwrap();
        std::fs::write(dir.path().join("c.rs"), "fn main() {}").unwrap();
        std::fs::create_dir(dir.path().join(".hidden")).unwrap();
        std::fs::write(dir.path().join(".hidden").join("d.md"), "D").unwrap();

        let documents = load_documents(dir.path()).unwrap();
        let texts: Vec<_> = documents.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(texts, vec!["# A", "B"]);

        let single = load_documents(&dir.path().join("c.rs")).unwrap();
        assert_eq!(single.len(), 1);

        assert!(load_documents(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_chunk_store_ranks_by_exact_distance() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::build(
            vec!["east".to_string(), "north".to_string(), "northeast".to_string()],
            vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![1.0, 1.0, 0.0]],
            &dir.path().join("knowledge.db"),
        )
        .unwrap();
        assert_eq!(store.len(), 3);

        let matches = store.nearest(&[1.0, 0.1, 0.0], 2).unwrap();
        assert_eq!(matches[0].document, "east");
        assert!(matches[0].distance < 0.01);
        for pair in matches.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[test]
    fn test_chunk_store_rejects_mismatched_input() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("knowledge.db");

        assert!(ChunkStore::build(vec!["a".to_string()], vec![], &path).is_err());
        assert!(ChunkStore::build(vec![], vec![], &path).is_err());
    }
}
