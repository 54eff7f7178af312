//! Plan capability checks

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    AutomatedBots,
    FuturesTrading,
}

impl Capability {
    /// Fixed text shown when the plan lacks the capability
    pub fn denial_reason(&self) -> &'static str {
        match self {
            Capability::AutomatedBots => "Your plan does not include automated trading bots",
            Capability::FuturesTrading => "Your plan does not include futures trading",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::AutomatedBots => f.write_str("automated_bots"),
            Capability::FuturesTrading => f.write_str("futures_trading"),
        }
    }
}

#[async_trait::async_trait]
pub trait EntitlementChecker: Send + Sync {
    async fn has_capability(&self, user_id: Uuid, capability: Capability) -> Result<bool>;
}

/// Same capabilities for everyone, with per-user overrides
#[derive(Default)]
pub struct StaticEntitlements {
    granted: HashSet<Capability>,
    overrides: RwLock<HashMap<(Uuid, Capability), bool>>,
}

impl StaticEntitlements {
    pub fn new(granted: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            granted: granted.into_iter().collect(),
            overrides: RwLock::new(HashMap::new()),
        }
    }

    pub fn allow_all() -> Self {
        Self::new([Capability::AutomatedBots, Capability::FuturesTrading])
    }

    pub async fn set(&self, user_id: Uuid, capability: Capability, allowed: bool) {
        self.overrides.write().await.insert((user_id, capability), allowed);
    }
}

#[async_trait::async_trait]
impl EntitlementChecker for StaticEntitlements {
    async fn has_capability(&self, user_id: Uuid, capability: Capability) -> Result<bool> {
        let overrides = self.overrides.read().await;
        Ok(overrides
            .get(&(user_id, capability))
            .copied()
            .unwrap_or_else(|| self.granted.contains(&capability)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_overrides_win() {
        let entitlements = StaticEntitlements::new([Capability::AutomatedBots]);
        let user = Uuid::new_v4();

        assert!(entitlements.has_capability(user, Capability::AutomatedBots).await.unwrap());
        assert!(!entitlements.has_capability(user, Capability::FuturesTrading).await.unwrap());

        entitlements.set(user, Capability::AutomatedBots, false).await;
        assert!(!entitlements.has_capability(user, Capability::AutomatedBots).await.unwrap());
        assert!(entitlements
            .has_capability(Uuid::new_v4(), Capability::AutomatedBots)
            .await
            .unwrap());
    }
}
