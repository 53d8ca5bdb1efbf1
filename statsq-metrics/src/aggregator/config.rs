use serde::{Deserialize, Serialize};

use crate::Percentiles;

/// What happens to gauges that received no update since the previous flush.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InactiveGauges {
    /// Keep reporting the last value on every flush.
    #[default]
    Resend,

    /// Report a gauge once after it was updated and remove it in the same flush.
    ///
    /// A relative update to a removed gauge starts from zero.
    Delete,
}

/// Parameters used by the [`Aggregator`](crate::Aggregator).
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Number of flushes an inactive counter is still reported as zero before it is removed.
    ///
    /// Defaults to `60`.
    pub persist_count_keys: u32,

    /// Handling of gauges without updates.
    ///
    /// Defaults to [`InactiveGauges::Resend`].
    pub inactive_gauges: InactiveGauges,

    /// Name of a synthetic counter incremented for every received packet.
    ///
    /// Defaults to `None`, which disables the counter.
    pub receive_counter: Option<String>,

    /// Percentiles reported for every timer, in this order.
    pub percentiles: Percentiles,

    /// The postfix applied to all bucket names.
    ///
    /// Derived timer names insert their suffix before the postfix.
    pub postfix: String,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            persist_count_keys: 60,
            inactive_gauges: InactiveGauges::default(),
            receive_counter: None,
            percentiles: Percentiles::default(),
            postfix: String::new(),
        }
    }
}
