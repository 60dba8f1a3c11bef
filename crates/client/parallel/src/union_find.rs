//! Disjoint-set forest used to merge transactions that touch overlapping state.
//!
//! Nodes live in an arena and are referred to by [`NodeId`]. A forest is built for a single grouping pass and
//! dropped afterwards, so ids from one forest must never be used with another; doing so is reported as
//! [`UnionFindError::UnknownNode`] when the id is out of range.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnionFindError {
    #[error("Node {0:?} does not belong to this union-find")]
    UnknownNode(NodeId),
}

/// Union by rank with path compression.
#[derive(Debug, Default, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { parent: Vec::with_capacity(capacity), rank: Vec::with_capacity(capacity) }
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Adds a new singleton set.
    pub fn make_node(&mut self) -> NodeId {
        let id = self.parent.len();
        self.parent.push(id);
        self.rank.push(0);
        NodeId(id)
    }

    fn check(&self, node: NodeId) -> Result<usize, UnionFindError> {
        if node.0 < self.parent.len() {
            Ok(node.0)
        } else {
            Err(UnionFindError::UnknownNode(node))
        }
    }

    /// Returns the root of the set containing `node`, compressing the path on the way.
    pub fn find(&mut self, node: NodeId) -> Result<NodeId, UnionFindError> {
        let start = self.check(node)?;

        let mut root = start;
        while self.parent[root] != root {
            root = self.parent[root];
        }

        // Point every node on the path directly at the root.
        let mut current = start;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }

        Ok(NodeId(root))
    }

    /// Merges the sets of `a` and `b`. Returns `false` when they were already the same set.
    pub fn union(&mut self, a: NodeId, b: NodeId) -> Result<bool, UnionFindError> {
        let root_a = self.find(a)?.0;
        let root_b = self.find(b)?.0;
        if root_a == root_b {
            return Ok(false);
        }

        match self.rank[root_a].cmp(&self.rank[root_b]) {
            std::cmp::Ordering::Less => self.parent[root_a] = root_b,
            std::cmp::Ordering::Greater => self.parent[root_b] = root_a,
            std::cmp::Ordering::Equal => {
                self.parent[root_b] = root_a;
                self.rank[root_a] += 1;
            }
        }
        Ok(true)
    }

    /// Every node is unioned with itself.
    pub fn is_unioned_with(&mut self, a: NodeId, b: NodeId) -> Result<bool, UnionFindError> {
        Ok(self.find(a)? == self.find(b)?)
    }
}
