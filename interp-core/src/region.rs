//! Active node region and its compaction map.
//!
//! Degrees of freedom are numbered densely over the active nodes only. Every
//! constraint the accumulator stores is expressed in these local indices, so
//! a region change invalidates previously accumulated rows.

/// Subset of support nodes participating in a solve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    /// Active global node indices, in increasing order.
    active: Vec<usize>,

    /// Global -> local lookup, `None` for nodes outside the region.
    local: Vec<Option<usize>>,
}

impl Region {
    /// Region containing every node.
    pub fn all(node_count: usize) -> Self {
        Self {
            active: (0..node_count).collect(),
            local: (0..node_count).map(Some).collect(),
        }
    }

    /// Region from a boolean selection over all nodes.
    pub fn from_mask(mask: &[bool]) -> Self {
        let mut active = Vec::with_capacity(mask.len());
        let mut local = vec![None; mask.len()];
        for (global, &selected) in mask.iter().enumerate() {
            if selected {
                local[global] = Some(active.len());
                active.push(global);
            }
        }
        Self { active, local }
    }

    /// Region from a predicate evaluated at every node coordinate.
    pub fn from_predicate<F>(nodes: &[[f64; 3]], predicate: F) -> Self
    where
        F: Fn(&[f64; 3]) -> bool,
    {
        let mask: Vec<bool> = nodes.iter().map(&predicate).collect();
        Self::from_mask(&mask)
    }

    /// Number of degrees of freedom (`nx`).
    pub fn nx(&self) -> usize {
        self.active.len()
    }

    /// Number of nodes on the underlying support.
    pub fn len_global(&self) -> usize {
        self.local.len()
    }

    /// Active global node indices in local order.
    pub fn active(&self) -> &[usize] {
        &self.active
    }

    /// Local index of a global node, if it is in the region.
    pub fn local(&self, global: usize) -> Option<usize> {
        self.local.get(global).copied().flatten()
    }

    /// Global index of a local degree of freedom.
    pub fn global(&self, local: usize) -> Option<usize> {
        self.active.get(local).copied()
    }

    /// Whether a global node is active.
    pub fn contains(&self, global: usize) -> bool {
        self.local(global).is_some()
    }

    /// Whether every support node is active.
    pub fn is_full(&self) -> bool {
        self.active.len() == self.local.len()
    }
}
