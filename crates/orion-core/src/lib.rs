// Orion core engine library. Each module owns one capability; `Orion`
// wires the whole roster together behind `Arc`s so `orion-cli` is the
// only place that knows the construction order.

pub mod auth;
pub mod channel;
pub mod config;
pub mod context;
pub mod daemon;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod policy;
pub mod providers;
pub mod rag;
pub mod sandbox;
pub mod store;
pub mod triggers;
pub mod vector;

use channel::{Channel, HttpChannel};
use config::Config;
use error::EngineResult;
use log::info;
use std::sync::Arc;

/// The assembled runtime: every component constructed once, in
/// dependency order, and held behind `Arc` so components can share them
/// freely without lifetimes leaking into their APIs.
pub struct Orion {
    pub config: Arc<Config>,
    pub policy: Arc<policy::PermissionPolicy>,
    pub channel: Arc<dyn Channel>,
    pub sandbox: Arc<sandbox::PermissionSandbox>,
    pub store: Arc<store::RelationalStore>,
    pub vectors: Arc<dyn vector::VectorBackend>,
    pub embedder: Arc<vector::EmbeddingClient>,
    pub memory: Arc<memory::MemoryFacade>,
    pub rag: Arc<rag::RagIngest>,
    pub auth: Arc<auth::AuthBroker>,
    pub orchestrator: Arc<orchestrator::Orchestrator>,
    pub context: Arc<context::ContextAssembler>,
    pub triggers: Arc<triggers::TriggerEngine>,
    pub daemon: Arc<daemon::Daemon>,
}

impl Orion {
    pub fn build(config: Config) -> EngineResult<Self> {
        let config = Arc::new(config);

        let policy = Arc::new(policy::PermissionPolicy::load(&config.policy_path)?);

        let channel: Arc<dyn Channel> = match (&config.channel.base_url, &config.channel.bot_token) {
            (Some(base_url), Some(token)) => Arc::new(HttpChannel::new(format!("{}/bot{token}", base_url.trim_end_matches('/')))),
            (Some(base_url), None) => Arc::new(HttpChannel::new(base_url.clone())),
            (None, _) => Arc::new(HttpChannel::new("https://api.telegram.org/bot0:unconfigured")),
        };

        let sandbox = Arc::new(sandbox::PermissionSandbox::new(policy.clone(), channel.clone()));

        let store = Arc::new(store::RelationalStore::open(config.sqlite_path())?);

        let vectors = vector::build_backend(&config)?;

        let embedder = Arc::new(vector::EmbeddingClient::new(
            &config.local_provider_base_url,
            "nomic-embed-text",
            config.vector_store.hosted_key.clone(),
        ));

        let memory = Arc::new(memory::MemoryFacade::new(store.clone(), vectors.clone(), embedder.clone()));
        let rag = Arc::new(rag::RagIngest::new(vectors.clone(), embedder.clone()));

        let auth = Arc::new(auth::AuthBroker::new(&config));
        let orchestrator = Arc::new(orchestrator::Orchestrator::new(config.clone(), auth.clone()));
        let context = Arc::new(context::ContextAssembler::new(memory.clone(), rag.clone()));

        let triggers = Arc::new(triggers::TriggerEngine::load(&config.triggers_path, Some(store.clone()))?);

        let daemon = Arc::new(daemon::Daemon::new(
            store.clone(),
            memory.clone(),
            triggers.clone(),
            sandbox.clone(),
            policy.clone(),
            channel.clone(),
            "owner",
            config.channel.default_recipient.clone(),
            config.daemon_interval_seconds,
        ));

        info!("[orion] engine assembled, project root {}", config.project_root.display());

        Ok(Self { config, policy, channel, sandbox, store, vectors, embedder, memory, rag, auth, orchestrator, context, triggers, daemon })
    }
}
