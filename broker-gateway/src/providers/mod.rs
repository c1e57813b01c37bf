use std::sync::Arc;

use reqwest::Client;

use crate::client::{ProviderCredentials, ProviderRegistry};

pub mod chat;
pub mod messages;
pub mod responses;

/// Build the registry with the three catalog backends. Called once at
/// startup; tests assemble their own registries with fakes.
pub fn standard_registry(
    http: Client,
    sync_a: ProviderCredentials,
    sync_b: ProviderCredentials,
    async_c: ProviderCredentials,
) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.insert(Arc::new(chat::ChatCompletionsClient::new(
        http.clone(),
        sync_a,
    )));
    registry.insert(Arc::new(messages::MessagesClient::new(http.clone(), sync_b)));
    registry.insert(Arc::new(responses::BackgroundResponsesClient::new(
        http, async_c,
    )));
    registry
}
