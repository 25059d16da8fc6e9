use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::reaction::ReactionSummary;
use crate::core::config::BenchConfig;
use crate::core::domain::AnomalyVerdict;

pub mod checkpoint;
pub mod output;

/// Everything one benchmark invocation has accumulated. Serialized as-is to
/// `{mlip_name}_result.json`, which doubles as the checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkState {
    pub mlip_name: String,
    pub benchmark: String,
    pub session: Uuid,
    pub saved_at: String,
    #[serde(default)]
    pub finalized: bool,
    pub config: BenchConfig,
    /// Identifiers in completion order: the resume cursor.
    pub processed: Vec<String>,
    pub entries: BTreeMap<String, AnomalyVerdict>,
    #[serde(default)]
    pub reactions: BTreeMap<String, ReactionSummary>,
}

impl BenchmarkState {
    pub fn new(config: &BenchConfig) -> Self {
        Self {
            mlip_name: config.mlip_name.clone(),
            benchmark: config.benchmark.clone(),
            session: Uuid::new_v4(),
            saved_at: Utc::now().to_rfc3339(),
            finalized: false,
            config: config.clone(),
            processed: Vec::new(),
            entries: BTreeMap::new(),
            reactions: BTreeMap::new(),
        }
    }

    pub fn stamp(&mut self) {
        self.saved_at = Utc::now().to_rfc3339();
    }
}

/// Lifecycle of the result store.
///
/// `Fresh -> Loading -> Running <-> Flushing -> Finalized`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorePhase {
    Fresh,
    Loading,
    Running,
    Flushing,
    Finalized,
}

impl StorePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorePhase::Fresh => "fresh",
            StorePhase::Loading => "loading",
            StorePhase::Running => "running",
            StorePhase::Flushing => "flushing",
            StorePhase::Finalized => "finalized",
        }
    }
}
