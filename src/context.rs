use std::sync::Arc;

use anyhow::Result;
use reqwest::Client;

use crate::args::BaseArgs;
use crate::auth::TokenProvider;
use crate::config::Settings;
use crate::http::{build_client, LayerClient};
use crate::layers::{LayerConfig, SyncContext};
use crate::observations::ObservationCache;
use crate::whitewater::WhitewaterSource;

/// Resolved settings plus the one HTTP client every command shares.
pub struct Session {
    pub settings: Settings,
    http: Client,
}

impl Session {
    pub fn open(base: &BaseArgs) -> Result<Self> {
        let settings = Settings::resolve(base)?;
        let http = build_client(settings.timeout)?;
        Ok(Self { settings, http })
    }

    pub fn token_provider(&self) -> Result<TokenProvider> {
        Ok(TokenProvider::new(
            self.http.clone(),
            self.settings.require_credential()?,
            self.settings.endpoints.clone(),
            self.settings.retry.clone(),
        ))
    }

    pub fn observations(&self) -> ObservationCache {
        let source = WhitewaterSource::new(
            self.http.clone(),
            &self.settings.observations_url,
            self.settings.retry.clone(),
        );
        ObservationCache::new(Arc::new(source))
    }

    pub fn layer_client(&self, config: &LayerConfig) -> LayerClient {
        LayerClient::new(
            self.http.clone(),
            &config.base_url,
            self.settings.retry.clone(),
        )
    }

    pub fn sync_context(&self) -> Result<SyncContext> {
        Ok(SyncContext {
            http: self.http.clone(),
            retry: self.settings.retry.clone(),
            tokens: Arc::new(self.token_provider()?),
            observations: Arc::new(self.observations()),
            concurrency: self.settings.concurrency,
        })
    }
}
