use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::Provider;

/// Selects among configured `Provider` instances by id, falling back to a
/// configured default, then to whichever provider registered first.
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: Arc<RwLock<HashMap<String, Arc<dyn Provider>>>>,
    default_provider: Arc<RwLock<Option<String>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: Arc::new(RwLock::new(HashMap::new())),
            default_provider: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn register(&self, provider: Arc<dyn Provider>) {
        let id = provider.info().id.clone();
        self.providers.write().await.insert(id, provider);
    }

    pub async fn set_default(&self, provider_id: impl Into<String>) {
        *self.default_provider.write().await = Some(provider_id.into());
    }

    pub async fn get(&self, provider_id: Option<&str>) -> anyhow::Result<Arc<dyn Provider>> {
        let providers = self.providers.read().await;
        if let Some(id) = provider_id {
            return providers
                .get(id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("provider `{id}` is not registered"));
        }
        if let Some(default_id) = self.default_provider.read().await.clone() {
            if let Some(provider) = providers.get(&default_id) {
                return Ok(provider.clone());
            }
        }
        providers
            .values()
            .next()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no provider is registered"))
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EchoProvider;

    #[tokio::test]
    async fn falls_back_to_sole_registered_provider() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(EchoProvider::new("echo"))).await;
        let provider = registry.get(None).await.unwrap();
        assert_eq!(provider.info().id, "echo");
    }

    #[tokio::test]
    async fn unknown_id_is_an_error() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(EchoProvider::new("echo"))).await;
        assert!(registry.get(Some("missing")).await.is_err());
    }
}
