//! The lesson index: every curated lesson with its embedding, addressed by
//! position. Built once per pipeline run and read-only afterwards.

pub mod hasher;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::embed::{Embedder, Embedding, cosine_similarity, norm};
use crate::error::ValidationError;
use crate::store;

/// Average norm may drift this far from 1.0 before we complain.
const NORM_TOLERANCE: f32 = 1e-3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonIndex {
    pub model: String,
    pub source: Option<String>,
    pub content_hash: String,
    pub dimensions: usize,
    pub ids: Vec<u32>,
    pub texts: Vec<String>,
    pub embeddings: Vec<Embedding>,
}

pub struct BuildOptions<'a> {
    pub passage_prefix: &'a str,
    pub batch_size: usize,
    pub source: Option<String>,
}

impl Default for BuildOptions<'_> {
    fn default() -> Self {
        Self {
            passage_prefix: "",
            batch_size: 64,
            source: None,
        }
    }
}

/// One lesson per line; blank lines and `#` comments are skipped.
pub fn read_lessons(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading lessons from {}", path.display()))?;
    let lessons: Vec<String> = contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect();
    if lessons.is_empty() {
        bail!("{}: no lessons after removing blanks and comments", path.display());
    }
    Ok(lessons)
}

/// Embed every lesson. If any lesson still fails after the provider's
/// retries, all failures are reported together and no index is produced.
pub fn build_index(
    lessons: Vec<String>,
    embedder: &dyn Embedder,
    opts: &BuildOptions<'_>,
) -> Result<LessonIndex> {
    let content_hash = hasher::content_hash(&lessons);
    let mut embeddings = Vec::with_capacity(lessons.len());
    let mut failures = Vec::new();

    for (batch_no, batch) in lessons.chunks(opts.batch_size.max(1)).enumerate() {
        let prompts: Vec<String> = batch
            .iter()
            .map(|t| format!("{}{t}", opts.passage_prefix))
            .collect();
        let refs: Vec<&str> = prompts.iter().map(String::as_str).collect();
        for (offset, result) in embedder.embed_batch(&refs).into_iter().enumerate() {
            let id = batch_no * opts.batch_size.max(1) + offset;
            match result {
                Ok(emb) => embeddings.push(emb),
                Err(e) => {
                    warn!(lesson = id, error = %format!("{e:#}"), "lesson failed to embed");
                    failures.push(id);
                }
            }
        }
    }

    if !failures.is_empty() {
        bail!(
            "{} of {} lessons failed to embed (first: {:?}); index not written",
            failures.len(),
            lessons.len(),
            &failures[..failures.len().min(10)]
        );
    }

    let index = LessonIndex {
        model: embedder.model_name().to_string(),
        source: opts.source.clone(),
        content_hash,
        dimensions: embeddings.first().map_or(embedder.dimensions(), Vec::len),
        ids: (0..lessons.len() as u32).collect(),
        texts: lessons,
        embeddings,
    };
    index.validate()?;
    info!(
        lessons = index.len(),
        avg_norm = index.average_norm(),
        model = %index.model,
        "built lesson index"
    );
    Ok(index)
}

impl LessonIndex {
    pub fn load(path: &Path) -> Result<Self> {
        let index: Self = store::read_json(path)?;
        index
            .validate()
            .with_context(|| format!("validating index {}", path.display()))?;
        Ok(index)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        store::write_json(path, self, false)
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub fn embedding(&self, id: usize) -> &[f32] {
        &self.embeddings[id]
    }

    pub fn text(&self, id: usize) -> &str {
        &self.texts[id]
    }

    /// Shape checks. Parallel arrays must agree, ids must be positions, and
    /// every vector must have the declared dimension.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let n = self.texts.len();
        if self.ids.len() != n {
            return Err(ValidationError::LengthMismatch {
                what: "index ids",
                expected: n,
                actual: self.ids.len(),
            });
        }
        if self.embeddings.len() != n {
            return Err(ValidationError::LengthMismatch {
                what: "index embeddings",
                expected: n,
                actual: self.embeddings.len(),
            });
        }
        if let Some((position, &id)) = self
            .ids
            .iter()
            .enumerate()
            .find(|&(pos, &id)| id as usize != pos)
        {
            return Err(ValidationError::NonSequentialId { position, id });
        }
        for (index, emb) in self.embeddings.iter().enumerate() {
            if emb.len() != self.dimensions {
                return Err(ValidationError::DimensionMismatch {
                    index,
                    expected: self.dimensions,
                    actual: emb.len(),
                });
            }
        }
        let avg = self.average_norm();
        if n > 0 && (avg - 1.0).abs() > NORM_TOLERANCE {
            warn!(avg_norm = avg, "index embeddings are not unit length; cosine scores will be rescaled");
        }
        Ok(())
    }

    pub fn average_norm(&self) -> f32 {
        if self.embeddings.is_empty() {
            return 0.0;
        }
        self.embeddings.iter().map(|e| norm(e)).sum::<f32>() / self.embeddings.len() as f32
    }

    /// Cosine similarity of `query` to every lesson, by position.
    pub fn scores(&self, query: &[f32]) -> Vec<f32> {
        self.embeddings
            .iter()
            .map(|e| cosine_similarity(query, e))
            .collect()
    }

    /// The `k` most similar lessons, best first. Ties keep index order.
    pub fn top_k(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let mut ranked: Vec<(usize, f32)> = self.scores(query).into_iter().enumerate().collect();
        sort_by_score_desc(&mut ranked);
        ranked.truncate(k);
        ranked
    }
}

/// Stable descending sort on the score column.
pub fn sort_by_score_desc(items: &mut [(usize, f32)]) {
    items.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
}
