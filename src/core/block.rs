//! Blocks and the block graph.
//!
//! A block is a condition pool, a trial quota and an ordered list of
//! transition rules. The table is an adjacency map keyed by [`BlockId`]; back
//! edges and self loops are expected (staircases), dangling edges are not.

use crate::condition::ConditionTable;
use crate::error::ConfigError;
use crate::trial::TrialOutcome;
use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Block key. Experiment files may use strings or integers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RawBlockId", into = "String")]
pub struct BlockId(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawBlockId {
    Name(String),
    Index(i64),
}

impl From<RawBlockId> for BlockId {
    fn from(raw: RawBlockId) -> Self {
        match raw {
            RawBlockId::Name(s) => BlockId(s),
            RawBlockId::Index(i) => BlockId(i.to_string()),
        }
    }
}

impl From<BlockId> for String {
    fn from(id: BlockId) -> Self {
        id.0
    }
}

impl BlockId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BlockId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Re-run timed-out trials without counting them.
    #[serde(default)]
    pub timeout: bool,
}

/// "At least `min_count` trials in the window ended with `outcome`."
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomePredicate {
    pub outcome: TrialOutcome,
    #[serde(rename = "min")]
    pub min_count: u32,
}

impl OutcomePredicate {
    pub fn matches(&self, window: &BlockWindow) -> bool {
        window.count(self.outcome) >= self.min_count as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRule {
    /// `None` is the unconditional default; it must come last.
    #[serde(rename = "condition", default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<OutcomePredicate>,
    pub next: BlockId,
}

impl TransitionRule {
    pub fn when(outcome: TrialOutcome, min_count: u32, next: impl Into<BlockId>) -> Self {
        Self {
            predicate: Some(OutcomePredicate { outcome, min_count }),
            next: next.into(),
        }
    }

    pub fn otherwise(next: impl Into<BlockId>) -> Self {
        Self {
            predicate: None,
            next: next.into(),
        }
    }
}

/// A block as written in the experiment file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSpec {
    pub conditions: Vec<String>,
    pub length: u32,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(rename = "transition", default)]
    pub transitions: Vec<TransitionRule>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: BlockId,
    pub conditions: Vec<String>,
    pub length: u32,
    pub retry: RetryPolicy,
    pub transitions: Vec<TransitionRule>,
}

impl Block {
    /// No rules: the session ends once this block's quota is met.
    pub fn is_terminal(&self) -> bool {
        self.transitions.is_empty()
    }

    /// First matching rule, top to bottom. `None` for terminal blocks, or if
    /// no rule matches and there is no default.
    pub fn evaluate(&self, window: &BlockWindow) -> Option<(usize, &TransitionRule)> {
        self.transitions
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.predicate.map_or(true, |p| p.matches(window)))
    }

    pub fn successors(&self) -> impl Iterator<Item = &BlockId> {
        self.transitions.iter().map(|r| &r.next)
    }
}

/// Outcomes counted since the active block was entered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockWindow {
    outcomes: Vec<TrialOutcome>,
}

impl BlockWindow {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            outcomes: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, outcome: TrialOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn count(&self, outcome: TrialOutcome) -> usize {
        self.outcomes.iter().filter(|&&o| o == outcome).count()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn outcomes(&self) -> &[TrialOutcome] {
        &self.outcomes
    }

    pub fn clear(&mut self) {
        self.outcomes.clear();
    }
}

/// Validated block graph.
#[derive(Debug, Clone)]
pub struct BlockTable {
    blocks: HashMap<BlockId, Block>,
    start: BlockId,
}

impl BlockTable {
    /// Build and validate. `start` may be omitted only when there is exactly
    /// one block.
    pub fn build(
        specs: &HashMap<BlockId, BlockSpec>,
        start: Option<BlockId>,
        conditions: &ConditionTable,
    ) -> Result<Self, ConfigError> {
        if specs.is_empty() {
            return Err(ConfigError::NoBlocks);
        }
        let start = match start {
            Some(s) => s,
            None if specs.len() == 1 => specs.keys().next().cloned().ok_or(ConfigError::NoBlocks)?,
            None => return Err(ConfigError::MissingStartBlock),
        };
        if !specs.contains_key(&start) {
            return Err(ConfigError::UnknownStartBlock(start));
        }

        let mut ids: Vec<&BlockId> = specs.keys().collect();
        ids.sort();

        let mut blocks = HashMap::with_capacity(specs.len());
        for id in ids {
            let spec = &specs[id];
            let block = Block {
                id: id.clone(),
                conditions: spec.conditions.clone(),
                length: spec.length,
                retry: spec.retry,
                transitions: spec.transitions.clone(),
            };
            Self::validate_block(&block, specs, conditions)?;
            blocks.insert(id.clone(), block);
        }

        let table = Self { blocks, start };
        let reachable = table.reachable();
        let mut unreachable: Vec<&BlockId> = table.blocks.keys().filter(|id| !reachable.contains(*id)).collect();
        unreachable.sort();
        for id in unreachable {
            warn!(block = %id, "block is unreachable from the start block");
        }
        Ok(table)
    }

    fn validate_block(
        block: &Block,
        specs: &HashMap<BlockId, BlockSpec>,
        conditions: &ConditionTable,
    ) -> Result<(), ConfigError> {
        if block.conditions.is_empty() {
            return Err(ConfigError::EmptyPool(block.id.clone()));
        }
        if block.length == 0 {
            return Err(ConfigError::ZeroLength(block.id.clone()));
        }
        if let Some(missing) = block.conditions.iter().find(|c| !conditions.contains(c)) {
            return Err(ConfigError::UnknownCondition {
                block: block.id.clone(),
                condition: missing.clone(),
            });
        }
        let last = block.transitions.len().saturating_sub(1);
        for (index, rule) in block.transitions.iter().enumerate() {
            match rule.predicate {
                None if index != last => {
                    return Err(ConfigError::DefaultRuleNotLast {
                        block: block.id.clone(),
                        index,
                    })
                }
                Some(p) if p.outcome == TrialOutcome::Quit => {
                    return Err(ConfigError::QuitPredicate {
                        block: block.id.clone(),
                        index,
                    })
                }
                _ => {}
            }
            if !specs.contains_key(&rule.next) {
                return Err(ConfigError::UnknownNextBlock {
                    block: block.id.clone(),
                    next: rule.next.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn start(&self) -> &BlockId {
        &self.start
    }

    pub fn get(&self, id: &BlockId) -> Option<&Block> {
        self.blocks.get(id)
    }

    /// Lookup for ids this table already validated: the start block and rule
    /// targets. Panics on anything else.
    pub(crate) fn resolved(&self, id: &BlockId) -> &Block {
        &self.blocks[id]
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Block ids in sorted order.
    pub fn ids(&self) -> Vec<&BlockId> {
        let mut ids: Vec<&BlockId> = self.blocks.keys().collect();
        ids.sort();
        ids
    }

    /// Blocks reachable from the start block along transition edges.
    pub fn reachable(&self) -> HashSet<BlockId> {
        let mut seen = HashSet::new();
        let mut stack = vec![self.start.clone()];
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(block) = self.blocks.get(&id) {
                stack.extend(block.successors().filter(|n| !seen.contains(*n)).cloned());
            }
        }
        seen
    }
}
