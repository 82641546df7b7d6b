//! Cost estimate for a compiled plan.
//!
//! Display only. Prices are whatever the resource definitions advertise;
//! settlement happens elsewhere.

use backend::StepData;
use serde::Serialize;

use crate::ExecutionPlan;

/// Price of one resource step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepCost {
    pub node_id: String,
    pub resource_id: String,
    pub price: f64,
}

/// Summed price of every resource step in a plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostEstimate {
    pub total: f64,
    pub steps: Vec<StepCost>,
}

impl CostEstimate {
    /// Total formatted to two decimals, e.g. `"3.00"`.
    pub fn formatted_total(&self) -> String {
        format!("{:.2}", self.total)
    }
}

/// Price every resource step. Transform and source steps are free.
pub fn estimate_cost(plan: &ExecutionPlan) -> CostEstimate {
    let steps: Vec<StepCost> = plan
        .steps
        .iter()
        .filter_map(|step| match &step.data {
            StepData::Resource(data) => Some(StepCost {
                node_id: step.node_id.clone(),
                resource_id: data.resource_id.clone(),
                price: data.price,
            }),
            StepData::Transform(_) | StepData::Source(_) => None,
        })
        .collect();

    CostEstimate {
        total: steps.iter().map(|s| s.price).sum(),
        steps,
    }
}
