use std::{cmp::Ordering, collections::HashMap};

/// Append-only vector storage with logical deletion.
///
/// Vectors live in one flat row-major buffer: `data[slot * dimension..]`.
/// Removing an ID only clears its `live` bit; the row is reclaimed by
/// [`VectorSlots::compact`].
#[derive(Debug, Clone)]
pub(crate) struct VectorSlots {
    dimension: usize,
    ids: Vec<String>,
    data: Vec<f32>,
    live: Vec<bool>,
    slot_of: HashMap<String, usize>,
}

impl VectorSlots {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ids: Vec::new(),
            data: Vec::new(),
            live: Vec::new(),
            slot_of: HashMap::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Insert a vector, tombstoning any previous row for the same ID.
    /// Returns the new slot.
    pub fn insert(&mut self, id: String, vector: &[f32]) -> usize {
        debug_assert_eq!(vector.len(), self.dimension);
        let slot = self.ids.len();
        if let Some(old) = self.slot_of.insert(id.clone(), slot) {
            self.live[old] = false;
        }
        self.ids.push(id);
        self.data.extend_from_slice(vector);
        self.live.push(true);
        slot
    }

    /// Tombstone an ID. Returns whether it was live.
    pub fn remove(&mut self, id: &str) -> bool {
        match self.slot_of.remove(id) {
            Some(slot) => {
                self.live[slot] = false;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slot_of.contains_key(id)
    }

    pub fn id(&self, slot: usize) -> &str {
        &self.ids[slot]
    }

    pub fn vector(&self, slot: usize) -> &[f32] {
        let start = slot * self.dimension;
        &self.data[start..start + self.dimension]
    }

    pub fn is_live(&self, slot: usize) -> bool {
        self.live[slot]
    }

    /// Live slots in insertion order.
    pub fn live_slots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.ids.len()).filter(|&slot| self.live[slot])
    }

    pub fn live_ids(&self) -> impl Iterator<Item = &str> {
        self.slot_of.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.slot_of.len()
    }

    /// Rows held on disk/in memory for removed or replaced IDs.
    pub fn tombstones(&self) -> usize {
        self.ids.len() - self.slot_of.len()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.data.clear();
        self.live.clear();
        self.slot_of.clear();
    }

    /// Physically drop tombstoned rows. Slot numbers change.
    pub fn compact(&mut self) {
        if self.tombstones() == 0 {
            return;
        }
        let mut compacted = Self::new(self.dimension);
        for slot in self.live_slots() {
            compacted.insert(self.ids[slot].clone(), self.vector(slot));
        }
        *self = compacted;
    }
}

pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub(crate) fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Scale `v` to unit length in place. Zero vectors are left unchanged.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = dot(v, v).sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Order by score descending, then ID ascending.
pub(crate) fn rank_order(a: &(String, f32), b: &(String, f32)) -> Ordering {
    b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}

/// Keep the `k` best hits in rank order.
pub(crate) fn top_k(mut hits: Vec<(String, f32)>, k: usize) -> Vec<(String, f32)> {
    if k == 0 {
        return Vec::new();
    }
    if hits.len() > k {
        hits.select_nth_unstable_by(k - 1, rank_order);
        hits.truncate(k);
    }
    hits.sort_by(rank_order);
    hits
}
