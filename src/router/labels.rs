//! In-progress label on routes carrying canary traffic

use super::config::GatewayAPITrafficRouting;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

pub const DEFAULT_IN_PROGRESS_LABEL_KEY: &str = "rollouts.argoproj.io/gatewayapi-canary";
pub const DEFAULT_IN_PROGRESS_LABEL_VALUE: &str = "in-progress";

/// Set the label while the canary weight is non-zero, remove it at zero
///
/// Returns whether `metadata` changed. Does nothing when the label is disabled.
pub fn ensure_in_progress_label(
    metadata: &mut ObjectMeta,
    desired_weight: i32,
    config: &GatewayAPITrafficRouting,
) -> bool {
    if config.disable_in_progress_label {
        return false;
    }
    let key = config.in_progress_label_key();

    if desired_weight == 0 {
        return metadata
            .labels
            .as_mut()
            .and_then(|labels| labels.remove(key))
            .is_some();
    }

    let value = config.in_progress_label_value();
    let labels = metadata.labels.get_or_insert_with(BTreeMap::new);
    if labels.get(key).map(String::as_str) == Some(value) {
        return false;
    }
    labels.insert(key.to_string(), value.to_string());
    true
}
