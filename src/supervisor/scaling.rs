//! # Autoscaling Decisions
//!
//! Pure scaling arithmetic for the worker supervisor. The decision function
//! has no hidden state: the same queue measurements and parameters always
//! yield the same spawn count. Scale-down is never decided here; workers
//! retire themselves through their idle timeout.

use crate::config::AutoscaleParams;

/// How many new workers to spawn this beat
///
/// With autoscaling disabled the supervisor maintains exactly one baseline
/// cohort: it spawns `num_workers` only when nothing is consuming. With
/// autoscaling enabled and an empty queue it tops the cohort back up to the
/// baseline. With backlog present it scales straight to the ceiling, but only
/// once estimated demand exceeds the remaining headroom; below saturation the
/// existing workers are trusted to drain the backlog.
pub fn workers_to_spawn(
    message_count: u32,
    consumer_count: u32,
    params: &AutoscaleParams,
) -> u32 {
    if !params.auto_scale {
        return if consumer_count == 0 {
            params.num_workers
        } else {
            0
        };
    }

    if message_count == 0 {
        return params.num_workers.saturating_sub(consumer_count);
    }

    let per_worker = params.auto_scale_messages_per_worker.max(1);
    let demand = message_count / per_worker;
    let headroom = params.max_num_workers.saturating_sub(consumer_count);

    if demand > headroom {
        headroom
    } else {
        0
    }
}

/// Whether the consumer count warrants an operator alert
///
/// Fires once the count exceeds the alert watermark but has not yet hit the
/// ceiling; hitting the ceiling itself is visible from the scale decision.
pub fn should_alert(consumer_count: u32, params: &AutoscaleParams) -> bool {
    consumer_count > params.alert_threshold_size && consumer_count < params.max_num_workers
}
