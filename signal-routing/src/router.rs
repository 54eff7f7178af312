// Signal Router
// Picks the adapter a bot is configured for and returns at most one signal per call

use super::adapters::{SignalAdapter, SourceAdapter};
use super::storage::SignalSourceStore;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use common::{BotConfig, BotConfigLoader, SignalSource, UnifiedSignal};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// A signal together with the configuration it was selected under
#[derive(Debug, Clone)]
pub struct RoutedSignal {
    pub bot: BotConfig,
    pub signal: UnifiedSignal,
}

pub struct SignalRouter {
    configs: BotConfigLoader,
    adapters: HashMap<SignalSource, Arc<dyn SignalAdapter>>,
}

impl SignalRouter {
    /// Create a router with no adapters registered
    pub fn new(configs: BotConfigLoader) -> Self {
        Self {
            configs,
            adapters: HashMap::new(),
        }
    }

    /// Router with the four standard adapters over one source store
    pub fn with_store(configs: BotConfigLoader, store: Arc<dyn SignalSourceStore>) -> Self {
        Self::new(configs)
            .add_adapter(Arc::new(SourceAdapter::pattern_engine(store.clone())))
            .add_adapter(Arc::new(SourceAdapter::realtime_engine(store.clone())))
            .add_adapter(Arc::new(SourceAdapter::webhook_alert(store.clone())))
            .add_adapter(Arc::new(SourceAdapter::legacy_engine(store)))
    }

    /// Register (or replace) the adapter for its source
    pub fn add_adapter(mut self, adapter: Arc<dyn SignalAdapter>) -> Self {
        debug!("Registering signal adapter: {}", adapter.source());
        self.adapters.insert(adapter.source(), adapter);
        self
    }

    /// Next signal for a user, `None` when the bot is missing, inactive or has nothing fresh
    pub async fn get_next_signal(&self, user_id: Uuid) -> Result<Option<UnifiedSignal>> {
        Ok(self.route(user_id, Utc::now()).await?.map(|r| r.signal))
    }

    pub async fn route(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Option<RoutedSignal>> {
        let Some(bot) = self.configs.load(user_id).await? else {
            return Ok(None);
        };
        if !bot.is_active {
            debug!(user_id = %user_id, "Bot inactive, skipping");
            return Ok(None);
        }

        let adapter = self
            .adapters
            .get(&bot.signal_source)
            .ok_or_else(|| anyhow!("no adapter registered for source {}", bot.signal_source))?;

        match adapter.fetch_latest(&bot, now).await? {
            Some(signal) => {
                info!(
                    user_id = %user_id,
                    signal_id = %signal.id,
                    source = %signal.source,
                    symbol = %signal.symbol,
                    action = %signal.action,
                    confidence = signal.confidence,
                    "Routed signal"
                );
                Ok(Some(RoutedSignal { bot, signal }))
            }
            None => {
                debug!(user_id = %user_id, source = %bot.signal_source, "No qualifying signal");
                Ok(None)
            }
        }
    }
}
