//! Exchange account health and balance lookups

use anyhow::Result;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Trait for exchange account status providers
#[async_trait::async_trait]
pub trait PlatformMonitor: Send + Sync {
    /// Whether the exchange connection can take orders
    async fn is_healthy(&self, platform_id: Option<Uuid>) -> Result<bool>;

    /// Live available balance, `None` when the exchange does not report one
    async fn available_balance(&self, platform_id: Option<Uuid>) -> Result<Option<Decimal>>;
}

/// Fixed statuses, for paper deployments and tests.
///
/// Platforms without an entry are healthy with no known balance.
#[derive(Default)]
pub struct StaticPlatformMonitor {
    unhealthy: RwLock<Vec<Option<Uuid>>>,
    balances: RwLock<HashMap<Option<Uuid>, Decimal>>,
}

impl StaticPlatformMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_unhealthy(&self, platform_id: Option<Uuid>) {
        self.unhealthy.write().await.push(platform_id);
    }

    pub async fn set_balance(&self, platform_id: Option<Uuid>, balance: Decimal) {
        self.balances.write().await.insert(platform_id, balance);
    }
}

#[async_trait::async_trait]
impl PlatformMonitor for StaticPlatformMonitor {
    async fn is_healthy(&self, platform_id: Option<Uuid>) -> Result<bool> {
        Ok(!self.unhealthy.read().await.contains(&platform_id))
    }

    async fn available_balance(&self, platform_id: Option<Uuid>) -> Result<Option<Decimal>> {
        Ok(self.balances.read().await.get(&platform_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_static_monitor() {
        let monitor = StaticPlatformMonitor::new();
        let platform = Some(Uuid::new_v4());

        assert!(monitor.is_healthy(platform).await.unwrap());
        assert_eq!(monitor.available_balance(platform).await.unwrap(), None);

        monitor.set_unhealthy(platform).await;
        monitor.set_balance(platform, dec!(250)).await;

        assert!(!monitor.is_healthy(platform).await.unwrap());
        assert!(monitor.is_healthy(None).await.unwrap());
        assert_eq!(monitor.available_balance(platform).await.unwrap(), Some(dec!(250)));
    }
}
