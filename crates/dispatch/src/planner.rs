//! Batch planner — packs recipients into quota-sized batches.
//!
//! Single greedy left-to-right pass with a running weight accumulator.
//! A batch that lands exactly on the limit closes with the triggering
//! recipient; one that would exceed it closes without, and the recipient
//! opens the next batch. A recipient heavier than the limit on its own
//! always ends up alone in its batch.

use crate::weight::WeightModel;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct BatchPlanner {
    weights: WeightModel,
}

impl BatchPlanner {
    pub fn new(weights: WeightModel) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &WeightModel {
        &self.weights
    }

    /// Partition `recipients` in order. `has_session` reports whether a
    /// reusable session is already cached for an address.
    pub fn plan<F>(
        &self,
        recipients: &[String],
        payload_count: usize,
        has_session: F,
        rate_limit_amount: u64,
    ) -> Vec<Vec<String>>
    where
        F: Fn(&str) -> bool,
    {
        let mut batches = Vec::new();
        let mut batch: Vec<String> = Vec::new();
        let mut batch_weight = 0u64;

        for address in recipients {
            let weight = self.weights.weight(payload_count, has_session(address.as_str()));
            let next = batch_weight.saturating_add(weight);

            if next == rate_limit_amount {
                batch.push(address.clone());
                batches.push(std::mem::take(&mut batch));
                batch_weight = 0;
            } else if next > rate_limit_amount {
                if !batch.is_empty() {
                    batches.push(std::mem::take(&mut batch));
                }
                batch.push(address.clone());
                batch_weight = weight;
            } else {
                batch.push(address.clone());
                batch_weight = next;
            }
        }

        if !batch.is_empty() {
            batches.push(batch);
        }

        debug!(
            recipients = recipients.len(),
            batches = batches.len(),
            payload_count,
            rate_limit_amount,
            "Broadcast batches planned"
        );
        batches
    }
}
