//! Simulation scenarios.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScenarioStep {
    /// Run one aggregation tick.
    Tick,
    /// Move the simulated clock forward.
    Advance { minutes: i64 },
    /// Inject a fault.
    InjectFault { fault_type: FaultType, target: String },
    /// Clear every fault on a target.
    ClearFault { target: String },
    /// Assert a condition.
    Assert { condition: AssertCondition },
}

/// Types of faults that can be injected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FaultType {
    /// Bank site down: the adapter returns no data.
    BankOffline,
    /// Bank publishes cash buying multiplied by `factor`.
    Outlier { factor: f64 },
    /// The next `count` snapshot writes lose the race.
    StoreConflict { count: usize },
    /// Snapshot store unreachable. Target is ignored.
    StoreUnavailable,
}

/// Conditions that can be asserted against the last tick and the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AssertCondition {
    /// Institution's refresh was persisted in the last tick.
    Refreshed { institution: String },
    /// Institution's refresh failed in the last tick with this reason code.
    RefreshFailed { institution: String, reason: String },
    /// Institution was not due in the last tick.
    NotDue { institution: String },
    /// Institution has a record in the snapshot.
    Persisted { institution: String },
    /// Every persisted rate of a currency lies within `tolerance` of the
    /// market mid.
    RatesNearMid { currency: String, tolerance: f64 },
    /// The last tick was aborted.
    TickAborted,
}

impl Scenario {
    /// Load a built-in scenario by name, or a JSON scenario file by path.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "steady-state" => Ok(Self::steady_state()),
            "outlier-burst" => Ok(Self::outlier_burst()),
            "store-conflict" => Ok(Self::store_conflict()),
            "institution-outage" => Ok(Self::institution_outage()),
            path if path.ends_with(".json") => {
                let raw = std::fs::read_to_string(Path::new(path))?;
                Ok(serde_json::from_str(&raw)?)
            }
            _ => Err(anyhow::anyhow!("Unknown scenario: {}", name)),
        }
    }

    /// Institutions a scenario refers to.
    pub fn targets(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = self
            .steps
            .iter()
            .filter_map(|step| match step {
                ScenarioStep::InjectFault { fault_type, target } => match fault_type {
                    FaultType::StoreConflict { .. } | FaultType::StoreUnavailable => None,
                    _ => Some(target.as_str()),
                },
                ScenarioStep::Assert { condition } => match condition {
                    AssertCondition::Refreshed { institution }
                    | AssertCondition::RefreshFailed { institution, .. }
                    | AssertCondition::NotDue { institution }
                    | AssertCondition::Persisted { institution } => Some(institution.as_str()),
                    _ => None,
                },
                _ => None,
            })
            .collect();
        targets.sort_unstable();
        targets.dedup();
        targets
    }

    /// Several quiet cycles; everything refreshes and stays near the market.
    fn steady_state() -> Self {
        let mut steps = Vec::new();
        for _ in 0..3 {
            steps.push(ScenarioStep::Tick);
            steps.push(ScenarioStep::Assert {
                condition: AssertCondition::Refreshed {
                    institution: "cbe".to_string(),
                },
            });
            steps.push(ScenarioStep::Advance { minutes: 5 });
            steps.push(ScenarioStep::Tick);
            steps.push(ScenarioStep::Assert {
                condition: AssertCondition::NotDue {
                    institution: "cbe".to_string(),
                },
            });
            steps.push(ScenarioStep::Advance { minutes: 15 });
        }
        steps.push(ScenarioStep::Assert {
            condition: AssertCondition::RatesNearMid {
                currency: "USD".to_string(),
                tolerance: 0.1,
            },
        });

        Self {
            name: "steady-state".to_string(),
            description: "Quiet market, staleness-driven refresh cycles".to_string(),
            steps,
        }
    }

    /// One bank publishes a wild rate; it must not reach the snapshot.
    fn outlier_burst() -> Self {
        Self {
            name: "outlier-burst".to_string(),
            description: "Wild cash buying rate from one bank is screened out".to_string(),
            steps: vec![
                ScenarioStep::Tick,
                ScenarioStep::Advance { minutes: 20 },
                ScenarioStep::InjectFault {
                    fault_type: FaultType::Outlier { factor: 1.8 },
                    target: "abyssinia".to_string(),
                },
                ScenarioStep::Tick,
                // Other fields of the same quote are still accepted.
                ScenarioStep::Assert {
                    condition: AssertCondition::Refreshed {
                        institution: "abyssinia".to_string(),
                    },
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::RatesNearMid {
                        currency: "USD".to_string(),
                        tolerance: 0.1,
                    },
                },
                ScenarioStep::ClearFault {
                    target: "abyssinia".to_string(),
                },
                ScenarioStep::Advance { minutes: 20 },
                ScenarioStep::Tick,
                ScenarioStep::Assert {
                    condition: AssertCondition::RatesNearMid {
                        currency: "USD".to_string(),
                        tolerance: 0.1,
                    },
                },
            ],
        }
    }

    /// A lost write race only costs the affected bank one cycle.
    fn store_conflict() -> Self {
        Self {
            name: "store-conflict".to_string(),
            description: "Concurrent writer wins one save; the rest of the tick proceeds".to_string(),
            steps: vec![
                ScenarioStep::Tick,
                ScenarioStep::Advance { minutes: 20 },
                ScenarioStep::InjectFault {
                    fault_type: FaultType::StoreConflict { count: 1 },
                    target: "store".to_string(),
                },
                ScenarioStep::Tick,
                ScenarioStep::Assert {
                    condition: AssertCondition::RefreshFailed {
                        institution: "nbe".to_string(),
                        reason: "CONFLICT".to_string(),
                    },
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::Refreshed {
                        institution: "cbe".to_string(),
                    },
                },
                // Still stale, so picked up by the very next tick.
                ScenarioStep::Tick,
                ScenarioStep::Assert {
                    condition: AssertCondition::Refreshed {
                        institution: "nbe".to_string(),
                    },
                },
                ScenarioStep::InjectFault {
                    fault_type: FaultType::StoreUnavailable,
                    target: "store".to_string(),
                },
                ScenarioStep::Advance { minutes: 20 },
                ScenarioStep::Tick,
                ScenarioStep::Assert {
                    condition: AssertCondition::TickAborted,
                },
                ScenarioStep::ClearFault {
                    target: "store".to_string(),
                },
                ScenarioStep::Tick,
                ScenarioStep::Assert {
                    condition: AssertCondition::Refreshed {
                        institution: "cbe".to_string(),
                    },
                },
            ],
        }
    }

    /// A bank goes dark for a while; its last rates survive.
    fn institution_outage() -> Self {
        Self {
            name: "institution-outage".to_string(),
            description: "Bank site down for two cycles, then back".to_string(),
            steps: vec![
                ScenarioStep::Tick,
                ScenarioStep::InjectFault {
                    fault_type: FaultType::BankOffline,
                    target: "cbe".to_string(),
                },
                ScenarioStep::Advance { minutes: 20 },
                ScenarioStep::Tick,
                ScenarioStep::Assert {
                    condition: AssertCondition::RefreshFailed {
                        institution: "cbe".to_string(),
                        reason: "NO_DATA".to_string(),
                    },
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::Persisted {
                        institution: "cbe".to_string(),
                    },
                },
                ScenarioStep::Advance { minutes: 20 },
                ScenarioStep::Tick,
                ScenarioStep::Assert {
                    condition: AssertCondition::RefreshFailed {
                        institution: "cbe".to_string(),
                        reason: "NO_DATA".to_string(),
                    },
                },
                ScenarioStep::ClearFault {
                    target: "cbe".to_string(),
                },
                ScenarioStep::Tick,
                ScenarioStep::Assert {
                    condition: AssertCondition::Refreshed {
                        institution: "cbe".to_string(),
                    },
                },
            ],
        }
    }
}
