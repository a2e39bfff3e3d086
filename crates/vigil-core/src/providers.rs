//! Data providers for `request_data`.
//!
//! A provider is registered per `(channel, request_type)` and produces the
//! JSON payload of a `data_response`. The hub ships placeholder providers;
//! the embedding application replaces them with persistence-backed ones.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::auth::Identity;
use crate::channel::ChannelKind;
use crate::metadata::ConnectionId;
use crate::registry::Registry;

/// What a provider can see about the requesting connection.
pub struct ProviderContext<'a> {
    pub channel: ChannelKind,
    pub connection_id: ConnectionId,
    pub identity: Option<&'a Identity>,
    pub registry: &'a Registry,
}

type Provider = Arc<dyn Fn(&ProviderContext<'_>) -> Value + Send + Sync>;

/// Provider table keyed by channel and request type.
#[derive(Clone, Default)]
pub struct DataProviders {
    table: HashMap<(ChannelKind, String), Provider>,
}

impl DataProviders {
    /// An empty table; every request is unsupported.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in providers.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut providers = Self::empty();
        providers.register(ChannelKind::LiveFeed, "camera_list", |_| json!([]));
        providers.register(ChannelKind::Violations, "recent_violations", |_| json!([]));
        providers.register(ChannelKind::SystemStatus, "current_status", |ctx| {
            serde_json::to_value(ctx.registry.stats()).unwrap_or(Value::Null)
        });
        providers.register(ChannelKind::Analytics, "live_metrics", |_| json!({}));
        providers
    }

    /// Register (or replace) a provider.
    pub fn register<F>(&mut self, channel: ChannelKind, request_type: impl Into<String>, provider: F)
    where
        F: Fn(&ProviderContext<'_>) -> Value + Send + Sync + 'static,
    {
        self.table
            .insert((channel, request_type.into()), Arc::new(provider));
    }

    /// Run the provider for `request_type`, if one is registered.
    #[must_use]
    pub fn lookup(&self, request_type: &str, ctx: &ProviderContext<'_>) -> Option<Value> {
        self.table
            .get(&(ctx.channel, request_type.to_string()))
            .map(|provider| provider(ctx))
    }

    /// Request types registered for a channel, sorted.
    #[must_use]
    pub fn request_types(&self, channel: ChannelKind) -> Vec<&str> {
        let mut types: Vec<&str> = self
            .table
            .keys()
            .filter(|(kind, _)| *kind == channel)
            .map(|(_, name)| name.as_str())
            .collect();
        types.sort_unstable();
        types
    }
}

impl fmt::Debug for DataProviders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataProviders")
            .field("count", &self.table.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(registry: &'a Registry, channel: ChannelKind) -> ProviderContext<'a> {
        ProviderContext {
            channel,
            connection_id: ConnectionId::generate(),
            identity: None,
            registry,
        }
    }

    #[test]
    fn test_default_providers() {
        let registry = Registry::new();
        let providers = DataProviders::with_defaults();

        assert_eq!(
            providers.lookup("camera_list", &ctx(&registry, ChannelKind::LiveFeed)),
            Some(json!([]))
        );
        assert_eq!(
            providers.lookup("live_metrics", &ctx(&registry, ChannelKind::Analytics)),
            Some(json!({}))
        );

        let status = providers
            .lookup("current_status", &ctx(&registry, ChannelKind::SystemStatus))
            .unwrap();
        assert_eq!(status["total_connections"], 0);
    }

    #[test]
    fn test_providers_are_per_channel() {
        let registry = Registry::new();
        let providers = DataProviders::with_defaults();

        assert!(providers
            .lookup("camera_list", &ctx(&registry, ChannelKind::Violations))
            .is_none());
        assert_eq!(
            providers.request_types(ChannelKind::Violations),
            vec!["recent_violations"]
        );
    }

    #[test]
    fn test_register_replaces() {
        let registry = Registry::new();
        let mut providers = DataProviders::with_defaults();
        providers.register(ChannelKind::Violations, "recent_violations", |ctx| {
            json!([{ "requested_by": ctx.connection_id.to_string() }])
        });

        let context = ctx(&registry, ChannelKind::Violations);
        let data = providers.lookup("recent_violations", &context).unwrap();
        assert_eq!(data[0]["requested_by"], context.connection_id.to_string());
    }
}
