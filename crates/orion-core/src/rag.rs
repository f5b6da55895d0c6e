// RAG Ingest — splits documents into overlapping chunks, embeds and
// upserts them with deterministic ids, and assembles retrieval context.

use crate::error::{EngineError, EngineResult};
use crate::vector::{EmbeddingClient, VectorBackend};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

const CHUNK_TARGET_LEN: usize = 512;
const CHUNK_OVERLAP: usize = 50;
const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];
const DELETE_BATCH_MAX: usize = 500;

pub struct QueryHit {
    pub text: String,
    pub score: f64,
    pub metadata: Value,
}

/// Extension point for document formats. Each extractor returns one
/// string per contained document — for PDFs that means one per page, so
/// `ingest_file` mints one parent id per page rather than per file.
pub trait DocumentExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> EngineResult<Vec<String>>;
}

pub struct PlainTextExtractor;

impl DocumentExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> EngineResult<Vec<String>> {
        Ok(vec![std::fs::read_to_string(path)?])
    }
}

/// One document per PDF page, matching how the ingest pipeline treats
/// a multi-page PDF as several parent documents rather than one.
pub struct PdfExtractor;

impl DocumentExtractor for PdfExtractor {
    fn extract(&self, path: &Path) -> EngineResult<Vec<String>> {
        let pages = pdf_extract::extract_text_by_pages(path).map_err(|e| EngineError::Other(format!("pdf extraction failed: {e}")))?;
        Ok(pages.into_iter().filter(|p| !p.trim().is_empty()).collect())
    }
}

/// A `.docx` file is a zip archive; its text lives in
/// `word/document.xml` as a flat run of `<w:t>` elements. Returned as a
/// single document — unlike PDF, a docx carries no page boundaries in
/// the file format itself.
pub struct DocxExtractor;

impl DocumentExtractor for DocxExtractor {
    fn extract(&self, path: &Path) -> EngineResult<Vec<String>> {
        let file = std::fs::File::open(path)?;
        let mut archive = zip::ZipArchive::new(file).map_err(|e| EngineError::Other(format!("docx is not a valid zip archive: {e}")))?;
        let mut xml = String::new();
        {
            let mut entry = archive
                .by_name("word/document.xml")
                .map_err(|e| EngineError::Other(format!("docx missing word/document.xml: {e}")))?;
            std::io::Read::read_to_string(&mut entry, &mut xml)?;
        }
        let text = extract_docx_text(&xml);
        Ok(vec![text])
    }
}

/// Pulls the visible text out of `<w:t>` runs, ignoring every other tag.
fn extract_docx_text(xml: &str) -> String {
    static TAG_RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = TAG_RE.get_or_init(|| regex::Regex::new(r"<w:t[^>]*>(.*?)</w:t>").unwrap());
    re.captures_iter(xml)
        .map(|c| c[1].replace("&amp;", "&").replace("&lt;", "<").replace("&gt;", ">").replace("&quot;", "\"").replace("&apos;", "'"))
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct RagIngest {
    vectors: Arc<dyn VectorBackend>,
    embedder: Arc<EmbeddingClient>,
}

impl RagIngest {
    pub fn new(vectors: Arc<dyn VectorBackend>, embedder: Arc<EmbeddingClient>) -> Self {
        Self { vectors, embedder }
    }

    pub async fn ingest(&self, text: &str, source: &str, user_id: Uuid, metadata: Option<Value>) -> EngineResult<String> {
        if text.trim().is_empty() {
            return Ok(String::new());
        }

        let parent_id = Uuid::new_v4().to_string();
        let chunks = split_text(text);
        let total_chunks = chunks.len();

        for (i, chunk) in chunks.into_iter().enumerate() {
            let vector = self.embedder.embed(&chunk).await?;
            let mut chunk_metadata = serde_json::json!({
                "source": source,
                "user_id": user_id.to_string(),
                "parent_doc_id": parent_id,
                "total_chunks": total_chunks,
                "chunk_index": i,
                "text": chunk,
            });
            if let (Some(Value::Object(extra)), Value::Object(target)) = (&metadata, &mut chunk_metadata) {
                for (k, v) in extra {
                    target.insert(k.clone(), v.clone());
                }
            }
            self.vectors.upsert(&format!("{parent_id}_chunk_{i}"), vector, chunk_metadata).await?;
        }

        Ok(parent_id)
    }

    pub async fn ingest_file(&self, path: &Path, user_id: Uuid) -> EngineResult<Vec<String>> {
        let extractor: Box<dyn DocumentExtractor> = match path.extension().and_then(|e| e.to_str()) {
            Some("pdf") => Box::new(PdfExtractor),
            Some("docx") => Box::new(DocxExtractor),
            _ => Box::new(PlainTextExtractor),
        };

        let documents = extractor.extract(path)?;
        let source = path.to_string_lossy().to_string();
        let mut parent_ids = Vec::new();
        for doc in documents {
            let parent_id = self.ingest(&doc, &source, user_id, None).await?;
            if !parent_id.is_empty() {
                parent_ids.push(parent_id);
            }
        }
        Ok(parent_ids)
    }

    pub async fn query(&self, question: &str, user_id: Uuid, top_k: usize) -> EngineResult<Vec<QueryHit>> {
        let vector = self.embedder.embed(question).await?;
        let mut filter = HashMap::new();
        filter.insert("user_id".to_string(), user_id.to_string());
        let hits = self.vectors.search(&vector, top_k, Some(&filter)).await?;
        Ok(hits
            .into_iter()
            .map(|h| QueryHit { text: h.metadata.get("text").and_then(|v| v.as_str()).unwrap_or_default().to_string(), score: h.score, metadata: h.metadata })
            .collect())
    }

    pub async fn build_context(&self, question: &str, user_id: Uuid) -> EngineResult<String> {
        let hits = self.query(question, user_id, 5).await?;
        if hits.is_empty() {
            return Ok(String::new());
        }
        let blocks: Vec<String> = hits
            .iter()
            .enumerate()
            .map(|(i, hit)| {
                let source = hit.metadata.get("source").and_then(|v| v.as_str()).unwrap_or("unknown");
                let chunk_index = hit.metadata.get("chunk_index").and_then(|v| v.as_i64()).unwrap_or(0);
                format!("[{}] Source: {source} (chunk {chunk_index}) (relevance: {:.2})\n{}", i + 1, hit.score, hit.text)
            })
            .collect();
        Ok(blocks.join("\n\n---\n\n"))
    }

    pub async fn delete_document(&self, parent_id: &str) -> EngineResult<()> {
        let ids: Vec<String> = (0..DELETE_BATCH_MAX).map(|i| format!("{parent_id}_chunk_{i}")).collect();
        self.vectors.delete(&ids).await
    }
}

/// Recursive character splitter: try the first separator; if a piece
/// still exceeds the target length, recurse with the next separator.
fn split_text(text: &str) -> Vec<String> {
    let pieces = recursive_split(text, 0);
    merge_with_overlap(pieces)
}

fn recursive_split(text: &str, separator_index: usize) -> Vec<String> {
    if text.len() <= CHUNK_TARGET_LEN || separator_index >= SEPARATORS.len() {
        return vec![text.to_string()];
    }
    let sep = SEPARATORS[separator_index];
    let parts: Vec<&str> = text.split(sep).collect();
    if parts.len() == 1 {
        return recursive_split(text, separator_index + 1);
    }
    let mut out = Vec::new();
    for part in parts {
        if part.is_empty() {
            continue;
        }
        if part.len() > CHUNK_TARGET_LEN {
            out.extend(recursive_split(part, separator_index + 1));
        } else {
            out.push(part.to_string());
        }
    }
    if out.is_empty() {
        vec![text.to_string()]
    } else {
        out
    }
}

/// Coalesce small pieces up to the target length, carrying a trailing
/// overlap from the previous chunk into the next.
fn merge_with_overlap(pieces: Vec<String>) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for piece in pieces {
        if !current.is_empty() && current.len() + piece.len() + 1 > CHUNK_TARGET_LEN {
            chunks.push(current.clone());
            let tail: String = current.chars().rev().take(CHUNK_OVERLAP).collect::<Vec<_>>().into_iter().rev().collect();
            current = tail;
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&piece);
    }
    if !current.trim().is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::LocalVectorStore;

    fn ingest() -> RagIngest {
        let dir = std::env::temp_dir().join(format!("orion-rag-test-{}", Uuid::new_v4()));
        let vectors: Arc<dyn VectorBackend> = Arc::new(LocalVectorStore::new(dir));
        let embedder = Arc::new(EmbeddingClient::new("http://127.0.0.1:1", "nomic-embed-text", None));
        RagIngest::new(vectors, embedder)
    }

    #[test]
    fn split_text_respects_target_length_roughly() {
        let text = "word ".repeat(400);
        let chunks = split_text(&text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= CHUNK_TARGET_LEN + CHUNK_OVERLAP + 10);
        }
    }

    #[tokio::test]
    async fn ingest_of_blank_text_is_a_no_op() {
        let rag = ingest();
        let parent_id = rag.ingest("   \n  ", "note.txt", Uuid::new_v4(), None).await.unwrap();
        assert_eq!(parent_id, "");
    }

    #[tokio::test]
    async fn build_context_is_empty_with_no_hits() {
        let rag = ingest();
        let ctx = rag.build_context("anything", Uuid::new_v4()).await.unwrap();
        assert_eq!(ctx, "");
    }

    #[test]
    fn extract_docx_text_pulls_runs_and_unescapes_entities() {
        let xml = r#"<w:p><w:r><w:t>Hello &amp; welcome</w:t></w:r></w:p><w:p><w:r><w:t>second run</w:t></w:r></w:p>"#;
        assert_eq!(extract_docx_text(xml), "Hello & welcome second run");
    }

    #[tokio::test]
    async fn ingest_file_with_docx_extension_extracts_document_xml() {
        let path = std::env::temp_dir().join(format!("orion-test-{}.docx", Uuid::new_v4()));
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer.start_file::<_, ()>("word/document.xml", zip::write::FileOptions::default()).unwrap();
        std::io::Write::write_all(&mut writer, br#"<w:document><w:body><w:p><w:r><w:t>hello from docx</w:t></w:r></w:p></w:body></w:document>"#).unwrap();
        writer.finish().unwrap();

        let rag = ingest();
        let parent_ids = rag.ingest_file(&path, Uuid::new_v4()).await.unwrap();
        assert_eq!(parent_ids.len(), 1);
        std::fs::remove_file(&path).ok();
    }
}
