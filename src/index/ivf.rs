//! Inverted-file index with flat (uncompressed) cells.
//!
//! Vectors are partitioned into `nlist` cells by k-means. A query scores
//! only the vectors in its `nprobe` nearest cells, trading recall for
//! speed. Until enough vectors exist to train the partition, search falls
//! back to an exact scan, so small corpora behave like a flat index.

use super::{
    SearchStrategy,
    slots::{VectorSlots, dot, squared_l2, top_k},
};

/// Training requires this many live vectors per requested cell.
const MIN_POINTS_PER_CELL: usize = 4;

const KMEANS_MAX_ITERATIONS: usize = 20;

#[derive(Debug, Clone)]
pub struct IvfIndex {
    slots: VectorSlots,
    /// Requested number of cells.
    nlist: usize,
    nprobe: usize,
    /// Row-major `cells * dimension`; empty while untrained.
    centroids: Vec<f32>,
    /// Slot numbers per cell. May reference tombstoned slots.
    lists: Vec<Vec<usize>>,
}

impl IvfIndex {
    pub fn new(dimension: usize, nlist: usize, nprobe: usize) -> Self {
        Self {
            slots: VectorSlots::new(dimension),
            nlist: nlist.max(1),
            nprobe: nprobe.max(1),
            centroids: Vec::new(),
            lists: Vec::new(),
        }
    }

    pub fn is_trained(&self) -> bool {
        !self.lists.is_empty()
    }

    pub fn nlist(&self) -> usize {
        self.nlist
    }

    #[cfg(test)]
    pub(crate) fn num_cells(&self) -> usize {
        self.lists.len()
    }

    /// Insert without assigning a cell or triggering training. Used while
    /// decoding, before [`IvfIndex::restore_centroids`].
    pub(crate) fn push_raw(&mut self, id: String, vector: &[f32]) {
        self.slots.insert(id, vector);
    }

    pub(crate) fn centroids(&self) -> &[f32] {
        &self.centroids
    }

    /// Install trained centroids (from disk) and reassign every live vector.
    pub(crate) fn restore_centroids(&mut self, centroids: Vec<f32>) {
        let cells = centroids.len() / self.slots.dimension().max(1);
        self.centroids = centroids;
        self.lists = vec![Vec::new(); cells];
        if cells == 0 {
            return;
        }
        let live: Vec<usize> = self.slots.live_slots().collect();
        for slot in live {
            let cell = self.nearest_cell(self.slots.vector(slot));
            self.lists[cell].push(slot);
        }
    }

    fn centroid(&self, cell: usize) -> &[f32] {
        let dim = self.slots.dimension();
        &self.centroids[cell * dim..(cell + 1) * dim]
    }

    fn nearest_cell(&self, vector: &[f32]) -> usize {
        (0..self.lists.len())
            .min_by(|&a, &b| {
                squared_l2(vector, self.centroid(a))
                    .total_cmp(&squared_l2(vector, self.centroid(b)))
            })
            .unwrap_or(0)
    }

    /// Train the partition with k-means over the live vectors.
    ///
    /// Deterministic: initial centroids are evenly spaced live vectors in
    /// ascending ID order. Does nothing if too few vectors are present.
    pub fn train(&mut self) {
        let mut live: Vec<usize> = self.slots.live_slots().collect();
        if live.len() < self.nlist * MIN_POINTS_PER_CELL {
            self.centroids.clear();
            self.lists.clear();
            return;
        }
        live.sort_by(|&a, &b| self.slots.id(a).cmp(self.slots.id(b)));

        let dim = self.slots.dimension();
        let cells = self.nlist;
        let stride = live.len() / cells;
        let mut centroids = Vec::with_capacity(cells * dim);
        for cell in 0..cells {
            centroids.extend_from_slice(self.slots.vector(live[cell * stride]));
        }

        let mut assignment = vec![usize::MAX; live.len()];
        for _ in 0..KMEANS_MAX_ITERATIONS {
            let mut changed = false;
            for (i, &slot) in live.iter().enumerate() {
                let vector = self.slots.vector(slot);
                let cell = (0..cells)
                    .min_by(|&a, &b| {
                        squared_l2(vector, &centroids[a * dim..(a + 1) * dim])
                            .total_cmp(&squared_l2(
                                vector,
                                &centroids[b * dim..(b + 1) * dim],
                            ))
                    })
                    .unwrap_or(0);
                if assignment[i] != cell {
                    assignment[i] = cell;
                    changed = true;
                }
            }
            if !changed {
                break;
            }

            let mut sums = vec![0.0f32; cells * dim];
            let mut counts = vec![0usize; cells];
            for (i, &slot) in live.iter().enumerate() {
                let cell = assignment[i];
                counts[cell] += 1;
                for (acc, x) in sums[cell * dim..(cell + 1) * dim]
                    .iter_mut()
                    .zip(self.slots.vector(slot))
                {
                    *acc += x;
                }
            }
            for cell in 0..cells {
                // Empty cells keep their previous centroid.
                if counts[cell] == 0 {
                    continue;
                }
                let n = counts[cell] as f32;
                for d in 0..dim {
                    centroids[cell * dim + d] = sums[cell * dim + d] / n;
                }
            }
        }

        self.restore_centroids(centroids);
    }
}

impl SearchStrategy for IvfIndex {
    fn slots(&self) -> &VectorSlots {
        &self.slots
    }

    fn insert(&mut self, id: String, vector: &[f32]) {
        let slot = self.slots.insert(id, vector);
        if self.is_trained() {
            let cell = self.nearest_cell(vector);
            self.lists[cell].push(slot);
        } else if self.slots.len() >= self.nlist * MIN_POINTS_PER_CELL {
            self.train();
        }
    }

    fn remove(&mut self, id: &str) -> bool {
        self.slots.remove(id)
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<(String, f32)> {
        let slots = &self.slots;
        let score =
            |slot: usize| (slots.id(slot).to_string(), dot(query, slots.vector(slot)));

        if !self.is_trained() {
            return top_k(slots.live_slots().map(score).collect(), k);
        }

        let mut cells: Vec<(usize, f32)> = (0..self.lists.len())
            .map(|cell| (cell, squared_l2(query, self.centroid(cell))))
            .collect();
        cells.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        let hits = cells
            .iter()
            .take(self.nprobe)
            .flat_map(|&(cell, _)| self.lists[cell].iter().copied())
            .filter(|&slot| slots.is_live(slot))
            .map(score)
            .collect();
        top_k(hits, k)
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.centroids.clear();
        self.lists.clear();
    }

    fn compact(&mut self) {
        self.slots.compact();
        self.train();
    }
}
