use crate::backup::store::retain_group::RetainGroupName;
use bon::Builder;
use serde::{Deserialize, Serialize};

/// How many backups each tier keeps. A tier with a keep-count of 0 is disabled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetentionPlan {
    #[builder(default)]
    pub recent: usize,
    #[builder(default)]
    pub daily: usize,
    #[builder(default)]
    pub weekly: usize,
    #[builder(default)]
    pub monthly: usize,
}

impl RetentionPlan {
    /// Keep-count of `tier`; `None` for the manual groups.
    pub fn keep(&self, tier: RetainGroupName) -> Option<usize> {
        match tier {
            RetainGroupName::Recent => Some(self.recent),
            RetainGroupName::Daily => Some(self.daily),
            RetainGroupName::Weekly => Some(self.weekly),
            RetainGroupName::Monthly => Some(self.monthly),
            RetainGroupName::PreUpdate | RetainGroupName::Reverted => None,
        }
    }

    pub fn is_enabled(&self, tier: RetainGroupName) -> bool {
        self.keep(tier).is_some_and(|keep| keep > 0)
    }
}
