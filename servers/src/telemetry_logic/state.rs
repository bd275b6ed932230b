use anyhow::Result;
use std::sync::Arc;

use lib_common::cascade::{CascadePolicy, CommandOrchestrator, ConfirmationBudget, DockerControl, ResourceControl};
use lib_common::configs::{DependencyMap, StaticCredentials};
use lib_common::core::{Dispatcher, LifecycleController, TopicCatalog};
use lib_common::gateway::{Authenticator, ConnectionGateway};
use lib_common::producers::default_catalog;

use crate::telemetry_logic::config::Settings;

/// Everything a request handler needs, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<ConnectionGateway>,
    pub auth: Arc<Authenticator>,
    pub orchestrator: Arc<CommandOrchestrator>,
}

impl AppState {
    /// Wires the hub and the cascade engine from resolved settings.
    pub fn build(settings: &Settings) -> Result<Self> {
        let credentials = match &settings.credentials_path {
            Some(path) => Arc::new(StaticCredentials::load(path)?),
            None => {
                tracing::warn!("no credentials file configured; only the bootstrap token can authenticate");
                Arc::new(StaticCredentials::default())
            }
        };
        let auth = Arc::new(Authenticator::new(
            settings.bootstrap_token.clone(),
            settings.session_secret.as_bytes().to_vec(),
            credentials.clone(),
            credentials,
        ));

        let dependencies = match &settings.dependencies_path {
            Some(path) => DependencyMap::load(path)?,
            None => DependencyMap::new(),
        };
        let control: Arc<dyn ResourceControl> =
            Arc::new(DockerControl::new(settings.docker_bin.clone(), dependencies));

        let catalog = default_catalog(&settings.cadence, &settings.zpool_bin, &settings.docker_bin);
        tracing::info!(topics = ?catalog.names(), "topic catalog ready");

        let policy = CascadePolicy {
            start_delay: settings.cascade_delay,
            ..CascadePolicy::default()
        };
        let budget = ConfirmationBudget {
            max_attempts: settings.confirm_attempts,
            poll_interval: settings.confirm_interval,
        };

        Ok(Self::from_parts(catalog, auth, control, policy, budget))
    }

    pub fn from_parts(
        catalog: TopicCatalog,
        auth: Arc<Authenticator>,
        control: Arc<dyn ResourceControl>,
        policy: CascadePolicy,
        budget: ConfirmationBudget,
    ) -> Self {
        let lifecycle = Arc::new(LifecycleController::new(
            Arc::new(catalog),
            Arc::new(Dispatcher::new()),
        ));
        Self {
            gateway: Arc::new(ConnectionGateway::new(Arc::clone(&auth), lifecycle)),
            auth,
            orchestrator: Arc::new(CommandOrchestrator::new(control, policy, budget)),
        }
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleController> {
        self.gateway.lifecycle()
    }
}
