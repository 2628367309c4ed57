// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tutka Payload Generators
 * Lazy payload tuple iterators with attack combinators
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::TemplateError;

/// Payload combination modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AttackType {
    /// Single cursor across every set
    #[default]
    BatteringRam,
    /// Sets zipped together, bounded by the shortest
    Pitchfork,
    /// Full cartesian product, generated lazily
    ClusterBomb,
}

/// A payload value source: inline list or file reference
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadSource {
    Inline(Vec<String>),
    File(String),
}

/// Declared payload sets, keyed by variable name. BTreeMap keeps the
/// iteration order deterministic across runs.
pub type PayloadDefs = BTreeMap<String, PayloadSource>;

/// Resolved payload sets: every source loaded into memory
#[derive(Debug, Clone, Default)]
pub struct PayloadSets {
    names: Vec<String>,
    values: Vec<Vec<String>>,
}

impl PayloadSets {
    pub fn resolve(defs: &PayloadDefs, template_id: &str) -> Result<Self, TemplateError> {
        let mut names = Vec::new();
        let mut values = Vec::new();
        for (name, source) in defs {
            let list = match source {
                PayloadSource::Inline(list) => list.clone(),
                PayloadSource::File(path) => std::fs::read_to_string(path)
                    .map_err(|e| TemplateError::InvalidPayload {
                        id: template_id.to_string(),
                        reason: format!("cannot read payload file {path}: {e}"),
                    })?
                    .lines()
                    .map(str::to_string)
                    .filter(|l| !l.is_empty())
                    .collect(),
            };
            if list.is_empty() {
                return Err(TemplateError::InvalidPayload {
                    id: template_id.to_string(),
                    reason: format!("payload set {name} is empty"),
                });
            }
            names.push(name.clone());
            values.push(list);
        }
        Ok(Self { names, values })
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Number of tuples the iterator will yield
    pub fn count(&self, attack: AttackType) -> usize {
        if self.is_empty() {
            return 0;
        }
        match attack {
            AttackType::BatteringRam | AttackType::Pitchfork => {
                self.values.iter().map(Vec::len).min().unwrap_or(0)
            }
            AttackType::ClusterBomb => self.values.iter().map(Vec::len).product(),
        }
    }

    /// Lazy, restartable iterator over payload tuples. The cartesian
    /// product is never materialized.
    pub fn iter(&self, attack: AttackType) -> PayloadIter<'_> {
        PayloadIter {
            sets: self,
            attack,
            cursor: vec![0; self.values.len()],
            done: self.is_empty(),
        }
    }
}

/// One tuple: variable name -> value
pub type PayloadTuple = Vec<(String, String)>;

pub struct PayloadIter<'a> {
    sets: &'a PayloadSets,
    attack: AttackType,
    cursor: Vec<usize>,
    done: bool,
}

impl PayloadIter<'_> {
    fn current(&self) -> PayloadTuple {
        self.sets
            .names
            .iter()
            .zip(&self.sets.values)
            .zip(&self.cursor)
            .map(|((name, values), &idx)| (name.clone(), values[idx].clone()))
            .collect()
    }
}

impl Iterator for PayloadIter<'_> {
    type Item = PayloadTuple;

    fn next(&mut self) -> Option<PayloadTuple> {
        if self.done {
            return None;
        }
        let tuple = self.current();
        match self.attack {
            // one shared cursor: advance every set together, stop at the
            // shortest
            AttackType::BatteringRam | AttackType::Pitchfork => {
                for idx in self.cursor.iter_mut() {
                    *idx += 1;
                }
                if self
                    .cursor
                    .iter()
                    .zip(&self.sets.values)
                    .any(|(&idx, values)| idx >= values.len())
                {
                    self.done = true;
                }
            }
            // odometer increment, rightmost set fastest
            AttackType::ClusterBomb => {
                let mut pos = self.cursor.len();
                loop {
                    if pos == 0 {
                        self.done = true;
                        break;
                    }
                    pos -= 1;
                    self.cursor[pos] += 1;
                    if self.cursor[pos] < self.sets.values[pos].len() {
                        break;
                    }
                    self.cursor[pos] = 0;
                }
            }
        }
        Some(tuple)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sets(pairs: &[(&str, &[&str])]) -> PayloadSets {
        let defs: PayloadDefs = pairs
            .iter()
            .map(|(name, values)| {
                (
                    name.to_string(),
                    PayloadSource::Inline(values.iter().map(|v| v.to_string()).collect()),
                )
            })
            .collect();
        PayloadSets::resolve(&defs, "test").unwrap()
    }

    #[test]
    fn test_pitchfork_zips() {
        let sets = sets(&[("user", &["a", "b", "c"]), ("pass", &["1", "2"])]);
        let tuples: Vec<_> = sets.iter(AttackType::Pitchfork).collect();
        assert_eq!(tuples.len(), 2);
        assert_eq!(tuples[0], vec![("pass".into(), "1".into()), ("user".into(), "a".into())]);
        assert_eq!(tuples[1], vec![("pass".into(), "2".into()), ("user".into(), "b".into())]);
    }

    #[test]
    fn test_clusterbomb_cartesian() {
        let sets = sets(&[("a", &["x", "y"]), ("b", &["1", "2", "3"])]);
        let tuples: Vec<_> = sets.iter(AttackType::ClusterBomb).collect();
        assert_eq!(tuples.len(), 6);
        assert_eq!(sets.count(AttackType::ClusterBomb), 6);
        // rightmost set advances fastest
        assert_eq!(tuples[0], vec![("a".into(), "x".into()), ("b".into(), "1".into())]);
        assert_eq!(tuples[1], vec![("a".into(), "x".into()), ("b".into(), "2".into())]);
        assert_eq!(tuples[3], vec![("a".into(), "y".into()), ("b".into(), "1".into())]);
    }

    #[test]
    fn test_batteringram_single_cursor() {
        let sets = sets(&[("v", &["1", "2", "3"])]);
        let tuples: Vec<_> = sets.iter(AttackType::BatteringRam).collect();
        assert_eq!(tuples.len(), 3);
        assert_eq!(sets.count(AttackType::BatteringRam), 3);
    }

    #[test]
    fn test_iterator_is_restartable() {
        let sets = sets(&[("a", &["x", "y"])]);
        let first: Vec<_> = sets.iter(AttackType::ClusterBomb).collect();
        let second: Vec<_> = sets.iter(AttackType::ClusterBomb).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_payload_set_rejected() {
        let mut defs = PayloadDefs::new();
        defs.insert("empty".into(), PayloadSource::Inline(vec![]));
        assert!(PayloadSets::resolve(&defs, "t").is_err());
    }

    #[test]
    fn test_no_payloads_yields_nothing() {
        let sets = PayloadSets::default();
        assert_eq!(sets.iter(AttackType::ClusterBomb).count(), 0);
    }
}
