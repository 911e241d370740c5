use crate::block::BlockId;
use crate::function::FunctionBody;
use std::collections::{HashMap, HashSet, VecDeque};

/// Block-level control flow of one function body.
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    pub edges: HashMap<BlockId, Vec<BlockId>>,
    pub reverse_edges: HashMap<BlockId, Vec<BlockId>>,
    pub entry: BlockId,
}

impl ControlFlowGraph {
    pub fn from_function(body: &FunctionBody) -> Self {
        let mut edges = HashMap::new();
        let mut reverse_edges = HashMap::new();

        for (block_id, block) in &body.blocks {
            let successors = block.terminator.successors();
            edges.insert(*block_id, successors.clone());

            for succ in successors {
                reverse_edges
                    .entry(succ)
                    .or_insert_with(Vec::new)
                    .push(*block_id);
            }
        }

        Self {
            edges,
            reverse_edges,
            entry: body.entry_block,
        }
    }

    pub fn predecessors(&self, block: BlockId) -> &[BlockId] {
        self.reverse_edges
            .get(&block)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn successors(&self, block: BlockId) -> &[BlockId] {
        self.edges.get(&block).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.reachable_blocks().contains(&block)
    }

    pub fn reachable_blocks(&self) -> HashSet<BlockId> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(self.entry);

        while let Some(current) = queue.pop_front() {
            if visited.insert(current) {
                for &succ in self.successors(current) {
                    queue.push_back(succ);
                }
            }
        }

        visited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Terminator;

    #[test]
    fn test_reachability_follows_terminators() {
        let mut body = FunctionBody::new();
        let live = body.create_block();
        let dead = body.create_block();
        body.get_block_mut(body.entry_block)
            .unwrap()
            .set_terminator(Terminator::Jump(live));
        body.get_block_mut(live)
            .unwrap()
            .set_terminator(Terminator::Return(None));
        body.get_block_mut(dead)
            .unwrap()
            .set_terminator(Terminator::Jump(live));

        let cfg = ControlFlowGraph::from_function(&body);
        assert!(cfg.is_reachable(live));
        assert!(!cfg.is_reachable(dead));
        assert_eq!(cfg.predecessors(live).len(), 2);
        assert_eq!(cfg.successors(body.entry_block), &[live]);
    }
}
