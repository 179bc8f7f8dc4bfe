use std::io::Write;

use serde::Serialize;

use crate::{chunk_id::ChunkId, chunking::Chunk, error::Result};

/// A ranked search result, hydrated from the document store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// 1-based position in the result list.
    pub rank: usize,
    pub score: f32,
    pub chunk: Chunk,
}

/// Rank hydrated `(chunk, score)` pairs, dropping scores below `min_score`.
///
/// Input must already be in rank order.
pub fn rank_hits(
    scored: impl IntoIterator<Item = (Chunk, f32)>,
    min_score: Option<f32>,
) -> Vec<SearchHit> {
    scored
        .into_iter()
        .filter(|(_, score)| min_score.is_none_or(|min| *score >= min))
        .enumerate()
        .map(|(i, (chunk, score))| SearchHit {
            rank: i + 1,
            score,
            chunk,
        })
        .collect()
}

const PREVIEW_CHARS: usize = 160;

fn preview(text: &str) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}

/// Format results for terminal display.
pub fn format_human(out: &mut impl Write, hits: &[SearchHit]) -> Result<()> {
    if hits.is_empty() {
        writeln!(out, "No results found.")?;
        return Ok(());
    }

    for hit in hits {
        let chunk = &hit.chunk;
        writeln!(
            out,
            "{:>3}. [{:.3}] {}@{} #{}",
            hit.rank,
            hit.score,
            chunk.source_path,
            chunk.char_offset,
            &chunk.id[..chunk.id.len().min(ChunkId::SHORT_LEN)]
        )?;
        writeln!(out, "     {}", preview(&chunk.text))?;
    }
    writeln!(out, "\n{} result(s)", hits.len())?;
    Ok(())
}

#[derive(Serialize)]
struct JsonReport<'a> {
    query: &'a str,
    result_count: usize,
    results: &'a [SearchHit],
}

/// Format results as a single JSON document.
pub fn format_json(
    out: &mut impl Write,
    hits: &[SearchHit],
    query: &str,
) -> Result<()> {
    let report = JsonReport {
        query,
        result_count: hits.len(),
        results: hits,
    };
    serde_json::to_writer(&mut *out, &report)?;
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(path: &str, text: &str) -> Chunk {
        Chunk {
            id: ChunkId::new(path, 0).into_string(),
            text: text.to_string(),
            source_path: path.to_string(),
            char_offset: 0,
            length: text.chars().count(),
            doc_fingerprint: "fp".to_string(),
        }
    }

    #[test]
    fn min_score_filters_and_ranks() {
        let hits = rank_hits(
            vec![
                (chunk("a.md", "alpha"), 0.9),
                (chunk("b.md", "beta"), 0.3),
                (chunk("c.md", "gamma"), 0.1),
            ],
            Some(0.25),
        );
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].rank, 1);
        assert_eq!(hits[1].rank, 2);
        assert_eq!(hits[1].chunk.source_path, "b.md");
    }

    #[test]
    fn human_output() {
        let hits = rank_hits(vec![(chunk("rules/lcr.md", "Liquidity\ncoverage"), 0.5)], None);
        let mut out = Vec::new();
        format_human(&mut out, &hits).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("  1. [0.500] rules/lcr.md@0 #"));
        assert!(text.contains("     Liquidity coverage"));
        assert!(text.ends_with("1 result(s)\n"));
    }

    #[test]
    fn human_output_empty() {
        let mut out = Vec::new();
        format_human(&mut out, &[]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "No results found.\n");
    }

    #[test]
    fn long_text_is_truncated() {
        let long = "x".repeat(500);
        let p = preview(&long);
        assert_eq!(p.chars().count(), PREVIEW_CHARS + 3);
        assert!(p.ends_with("..."));
    }

    #[test]
    fn json_output_escapes_and_counts() {
        let hits = rank_hits(vec![(chunk("a.md", "say \"hi\""), 0.75)], None);
        let mut out = Vec::new();
        format_json(&mut out, &hits, "what \"is\" CET1?").unwrap();

        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["query"], "what \"is\" CET1?");
        assert_eq!(value["result_count"], 1);
        assert_eq!(value["results"][0]["rank"], 1);
        assert_eq!(value["results"][0]["chunk"]["text"], "say \"hi\"");
        assert_eq!(value["results"][0]["chunk"]["source_path"], "a.md");
    }
}
