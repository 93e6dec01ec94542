//! Growable sum tree for O(log N) proportional sampling.
//!
//! The tree stores priorities in leaves and partial sums in internal nodes.
//! Internal nodes are recomputed from their children on every update, so
//! sums never drift away from the leaves.

/// Sum tree over `f64` leaves.
#[derive(Debug, Clone)]
pub struct SumTree {
    /// Tree nodes: the first `capacity - 1` are internal, the rest are leaves.
    tree: Vec<f64>,
    /// Number of leaves (a power of two).
    capacity: usize,
}

impl SumTree {
    /// Create a tree with room for at least `capacity` leaves.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        Self {
            tree: vec![0.0; 2 * capacity - 1],
            capacity,
        }
    }

    fn leaf_index(&self, idx: usize) -> usize {
        self.capacity - 1 + idx
    }

    /// Set the priority of leaf `idx`, growing the tree if needed.
    pub fn update(&mut self, idx: usize, priority: f64) {
        if idx >= self.capacity {
            self.grow(idx + 1);
        }
        let mut current = self.leaf_index(idx);
        self.tree[current] = priority;

        while current > 0 {
            current = (current - 1) / 2;
            let left = 2 * current + 1;
            self.tree[current] = self.tree[left] + self.tree[left + 1];
        }
    }

    /// Priority stored at leaf `idx` (0 for unused leaves).
    pub fn leaf(&self, idx: usize) -> f64 {
        if idx >= self.capacity {
            return 0.0;
        }
        self.tree[self.leaf_index(idx)]
    }

    /// Find the leaf whose cumulative range covers `value` in `[0, total)`.
    ///
    /// Zero-priority leaves are never returned while `total() > 0`.
    pub fn get(&self, value: f64) -> (usize, f64) {
        let mut value = value.max(0.0);
        let mut idx = 0;

        while idx < self.capacity - 1 {
            let left = 2 * idx + 1;
            let right = left + 1;

            if value < self.tree[left] || self.tree[right] <= 0.0 {
                idx = left;
            } else {
                value -= self.tree[left];
                idx = right;
            }
        }

        let data_idx = idx - (self.capacity - 1);
        (data_idx, self.tree[idx])
    }

    /// Total priority mass.
    pub fn total(&self) -> f64 {
        self.tree[0]
    }

    /// Number of leaves.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.total() <= 0.0
    }

    /// Double the leaf count until `min_capacity` fits, keeping priorities.
    pub fn grow(&mut self, min_capacity: usize) {
        if min_capacity <= self.capacity {
            return;
        }
        let old_leaves: Vec<f64> = self.tree[(self.capacity - 1)..].to_vec();
        *self = Self::new(min_capacity);

        let offset = self.capacity - 1;
        self.tree[offset..offset + old_leaves.len()].copy_from_slice(&old_leaves);
        for node in (0..offset).rev() {
            let left = 2 * node + 1;
            self.tree[node] = self.tree[left] + self.tree[left + 1];
        }
    }
}
