use rayon::prelude::*;

use super::{
    SearchStrategy,
    slots::{VectorSlots, dot, squared_l2, top_k},
};

/// Below this many live vectors, scoring runs on the calling thread.
const PARALLEL_THRESHOLD: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    InnerProduct,
    /// Scored as negative squared distance so higher is always better.
    L2,
}

impl Metric {
    fn score(self, query: &[f32], vector: &[f32]) -> f32 {
        match self {
            Self::InnerProduct => dot(query, vector),
            Self::L2 => -squared_l2(query, vector),
        }
    }
}

/// Exact brute-force index.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    metric: Metric,
    slots: VectorSlots,
}

impl FlatIndex {
    pub fn new(dimension: usize, metric: Metric) -> Self {
        Self {
            metric,
            slots: VectorSlots::new(dimension),
        }
    }
}

impl SearchStrategy for FlatIndex {
    fn slots(&self) -> &VectorSlots {
        &self.slots
    }

    fn insert(&mut self, id: String, vector: &[f32]) {
        self.slots.insert(id, vector);
    }

    fn remove(&mut self, id: &str) -> bool {
        self.slots.remove(id)
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<(String, f32)> {
        let slots = &self.slots;
        let score = |slot: usize| {
            (
                slots.id(slot).to_string(),
                self.metric.score(query, slots.vector(slot)),
            )
        };

        let live: Vec<usize> = slots.live_slots().collect();
        let hits: Vec<(String, f32)> = if live.len() >= PARALLEL_THRESHOLD {
            live.par_iter().map(|&slot| score(slot)).collect()
        } else {
            live.iter().map(|&slot| score(slot)).collect()
        };

        top_k(hits, k)
    }

    fn clear(&mut self) {
        self.slots.clear();
    }

    fn compact(&mut self) {
        self.slots.compact();
    }
}
