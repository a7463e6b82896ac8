//! Block ordering for backends.
//!
//! A schedule is a permutation of the graph's blocks with the entry block
//! first. Backends lay blocks out in schedule order; the order never changes
//! what a pattern matches.

use std::collections::{BTreeSet, VecDeque};

use crate::bytecode::Instruction;

use super::{BlockId, Cfg};

pub trait Scheduler {
    fn schedule(&self, cfg: &Cfg) -> Vec<BlockId>;
}

/// Breadth-first from the entry, successors in instruction order. Blocks
/// the walk cannot reach are appended in id order.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscoveryOrder;

impl Scheduler for DiscoveryOrder {
    fn schedule(&self, cfg: &Cfg) -> Vec<BlockId> {
        let mut order = Vec::with_capacity(cfg.len());
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::new();

        seen.insert(cfg.entry());
        queue.push_back(cfg.entry());
        while let Some(id) = queue.pop_front() {
            order.push(id);
            for succ in cfg.successors(id) {
                if seen.insert(succ) {
                    queue.push_back(succ);
                }
            }
        }

        for id in cfg.block_ids() {
            if seen.insert(id) {
                order.push(id);
            }
        }
        order
    }
}

/// Places the target of a block's closing `jump` directly after it whenever
/// that target is still unplaced, so backends can fall through instead of
/// branching.
#[derive(Debug, Default, Clone, Copy)]
pub struct FallthroughOrder;

impl Scheduler for FallthroughOrder {
    fn schedule(&self, cfg: &Cfg) -> Vec<BlockId> {
        let discovery = DiscoveryOrder.schedule(cfg);
        let mut placed = BTreeSet::new();
        let mut order = Vec::with_capacity(discovery.len());

        for &seed in &discovery {
            let mut current = seed;
            while placed.insert(current) {
                order.push(current);
                let next = cfg
                    .block(current)
                    .and_then(|b| match b.terminator() {
                        Some(Instruction::Jump { target }) => cfg.block_for(*target),
                        _ => None,
                    });
                match next {
                    Some(next) => current = next,
                    None => break,
                }
            }
        }
        order
    }
}
