//! Hyperparameter grids and random search over them.

use super::algorithm::{Algorithm, Hyperparameters};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::store::Entity;
use rand::seq::index;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparamset {
    #[serde(default)]
    pub id: i64,
    pub algorithm_id: i64,
    /// Candidate values per parameter name.
    pub hyperparameters: BTreeMap<String, Vec<Value>>,
    pub search_count: Option<usize>,
    pub search_percent: Option<f64>,
    /// Combos kept after searching.
    pub combo_count: usize,
    pub description: Option<String>,
}

impl Entity for Hyperparamset {
    const TABLE: &'static str = "hyperparamsets";
    const NAME: &'static str = "Hyperparamset";

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn keys(&self) -> Vec<(&'static str, Option<i64>)> {
        vec![("algorithm_id", Some(self.algorithm_id))]
    }
}

/// One cell of the grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparamcombo {
    #[serde(default)]
    pub id: i64,
    pub hyperparamset_id: i64,
    pub combination_index: usize,
    pub favorite: bool,
    pub hyperparameters: Hyperparameters,
}

impl Entity for Hyperparamcombo {
    const TABLE: &'static str = "hyperparamcombos";
    const NAME: &'static str = "Hyperparamcombo";

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn keys(&self) -> Vec<(&'static str, Option<i64>)> {
        vec![("hyperparamset_id", Some(self.hyperparamset_id))]
    }
}

/// Scalars become one-element candidate lists.
fn listify(value: Value) -> Vec<Value> {
    match value {
        Value::Array(values) => values,
        other => vec![other],
    }
}

/// Cartesian product over the parameters in key order; the last key varies fastest.
pub fn grid(hyperparameters: &BTreeMap<String, Vec<Value>>) -> Vec<Hyperparameters> {
    let mut combos = vec![Hyperparameters::new()];
    for (name, values) in hyperparameters {
        combos = combos
            .iter()
            .flat_map(|combo| {
                values.iter().map(move |value| {
                    let mut next = combo.clone();
                    next.insert(name.clone(), value.clone());
                    next
                })
            })
            .collect();
    }
    combos
}

impl Hyperparamset {
    /// Expand `hyperparameters` into combos, optionally keeping a random
    /// subset (`search_count` combos or a `search_percent` share).
    pub fn create(
        ctx: &Context,
        algorithm_id: i64,
        hyperparameters: BTreeMap<String, Value>,
        search_count: Option<usize>,
        search_percent: Option<f64>,
        description: Option<String>,
    ) -> Result<Self> {
        let _: Algorithm = ctx.store().get(algorithm_id)?;
        let hyperparameters: BTreeMap<String, Vec<Value>> =
            hyperparameters.into_iter().map(|(k, v)| (k, listify(v))).collect();
        if let Some((name, _)) = hyperparameters.iter().find(|(_, values)| values.is_empty()) {
            return Err(Error::config(format!("hyperparameter `{name}` has no candidate values")));
        }

        let all = grid(&hyperparameters);
        let keep = match (search_count, search_percent) {
            (Some(_), Some(_)) => {
                return Err(Error::config("search_count and search_percent are mutually exclusive"))
            }
            (Some(0), None) => return Err(Error::config("search_count must be >= 1")),
            (Some(count), None) if count >= all.len() => {
                tracing::info!(search_count = count, combos = all.len(), "search_count covers the whole grid; keeping every combo");
                all.len()
            }
            (Some(count), None) => count,
            (None, Some(pct)) if !(pct > 0.0 && pct <= 1.0) => {
                return Err(Error::config(format!("search_percent ({pct}) must be in (0, 1]")))
            }
            (None, Some(pct)) => ((all.len() as f64 * pct).ceil() as usize).max(1),
            (None, None) => all.len(),
        };

        let kept: Vec<Hyperparameters> = if keep < all.len() {
            let mut rng = ctx.rng()?;
            let mut picks = index::sample(&mut rng, all.len(), keep).into_vec();
            picks.sort_unstable();
            picks.into_iter().map(|i| all[i].clone()).collect()
        } else {
            all
        };

        let mut set = Hyperparamset {
            id: 0,
            algorithm_id,
            hyperparameters,
            search_count,
            search_percent,
            combo_count: kept.len(),
            description,
        };
        ctx.store().atomically(|tx| {
            tx.insert(&mut set)?;
            for (combination_index, hyperparameters) in kept.into_iter().enumerate() {
                tx.insert(&mut Hyperparamcombo {
                    id: 0,
                    hyperparamset_id: set.id,
                    combination_index,
                    favorite: false,
                    hyperparameters,
                })?;
            }
            Ok(())
        })?;
        tracing::info!(hyperparamset_id = set.id, combos = set.combo_count, "hyperparameter grid created");
        Ok(set)
    }

    pub fn combos(&self, ctx: &Context) -> Result<Vec<Hyperparamcombo>> {
        ctx.store().find(&[("hyperparamset_id", Some(self.id))])
    }
}
