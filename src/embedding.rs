use std::time::Duration;

use tracing::warn;

use crate::{
    error::{Error, Result},
    index::l2_normalize,
};

/// Maps texts to fixed-dimension vectors.
///
/// Implementations must preserve order and return exactly one vector of
/// length [`Embedder::dimension`] per input text. The same embedder is used
/// for indexing and for queries.
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    fn embed(&self, batch: &[&str]) -> Result<Vec<Vec<f32>>>;
}

impl<E: Embedder + ?Sized> Embedder for &E {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn embed(&self, batch: &[&str]) -> Result<Vec<Vec<f32>>> {
        (**self).embed(batch)
    }
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn embed(&self, batch: &[&str]) -> Result<Vec<Vec<f32>>> {
        (**self).embed(batch)
    }
}

/// Embed `texts` in batches of at most `batch_size`, checking the output
/// shape of every call.
pub fn embed_batched<E: Embedder + ?Sized>(
    embedder: &E,
    texts: &[&str],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let dimension = embedder.dimension();
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let embedded = embedder.embed(batch)?;
        if embedded.len() != batch.len() {
            return Err(Error::Embedding(format!(
                "embedder returned {} vectors for {} texts",
                embedded.len(),
                batch.len()
            )));
        }
        if let Some(bad) = embedded.iter().find(|v| v.len() != dimension) {
            return Err(Error::DimensionMismatch {
                expected: dimension,
                actual: bad.len(),
            });
        }
        vectors.extend(embedded);
    }
    Ok(vectors)
}

const NGRAM_SIZES: std::ops::RangeInclusive<usize> = 3..=4;

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x00000100000001B3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Feature-hashing embedder over lowercase character n-grams.
///
/// Needs no model files and is fully deterministic, which makes it the
/// offline default for the binary and the embedder used in tests. Output
/// vectors are unit length (or all zeros for empty text).
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let chars: Vec<char> = text.to_lowercase().chars().collect();
        let mut buf = String::new();
        for n in NGRAM_SIZES {
            for window in chars.windows(n) {
                buf.clear();
                buf.extend(window);
                let h = fnv1a(buf.as_bytes());
                let bucket = (h % self.dimension as u64) as usize;
                let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
                vector[bucket] += sign;
            }
        }
        l2_normalize(&mut vector);
        vector
    }
}

impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, batch: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(batch.iter().map(|text| self.embed_one(text)).collect())
    }
}

/// Retries a failing embedder with linear backoff.
///
/// Only [`Error::Embedding`] and I/O failures are retried; shape errors
/// are returned immediately.
#[derive(Debug, Clone)]
pub struct RetryingEmbedder<E> {
    inner: E,
    max_retries: u32,
    backoff: Duration,
}

impl<E: Embedder> RetryingEmbedder<E> {
    pub fn new(inner: E, max_retries: u32, backoff: Duration) -> Self {
        Self {
            inner,
            max_retries,
            backoff,
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

impl<E: Embedder> Embedder for RetryingEmbedder<E> {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn embed(&self, batch: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 0;
        loop {
            match self.inner.embed(batch) {
                Ok(vectors) => return Ok(vectors),
                Err(e @ (Error::Embedding(_) | Error::Io(_)))
                    if attempt < self.max_retries =>
                {
                    attempt += 1;
                    warn!(attempt, max = self.max_retries, error = %e, "embedding failed, retrying");
                    std::thread::sleep(self.backoff * attempt);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
