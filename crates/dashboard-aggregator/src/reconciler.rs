use dashboard_core::{OpportunityItem, SentinelSignal};

use crate::config::FeatureFlags;
use crate::fetch::v2::V2SnapshotRow;

/// Which table generation a pass reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaPath {
    Legacy,
    V2,
}

impl SchemaPath {
    pub fn from_flags(flags: &FeatureFlags) -> Self {
        if flags.read_v2 {
            SchemaPath::V2
        } else {
            SchemaPath::Legacy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaPath::Legacy => "legacy",
            SchemaPath::V2 => "v2",
        }
    }
}

/// V2 is usable when any of its primary reads produced something. Failed
/// reads count as empty.
pub fn v2_has_primary_rows(
    signals: &[SentinelSignal],
    opportunities: &[OpportunityItem],
    snapshot: Option<&V2SnapshotRow>,
) -> bool {
    snapshot.is_some() || !signals.is_empty() || !opportunities.is_empty()
}
