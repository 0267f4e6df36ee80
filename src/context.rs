//! The single injected context every HTTP handler and CLI command shares:
//! one `Core` struct, assembled once at startup and handed to every
//! handler as `axum` state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use hearth_core::config::ConfigManager;
use hearth_core::executor::Executor;
use hearth_core::llm::{LlmClient, LlmProvider, ModelSpec};
use hearth_core::memory::{CachedSemanticMemory, SemanticMemory};
use hearth_core::pipeline::PrePipeline;
use hearth_core::router::{Router, RouterModels};
use hearth_core::skills::builtin::{MemorySearchSkill, ShellSkill, SkillWriterSkill, WebSearchSkill};
use hearth_core::skills::{Skill, SkillRegistry};
use hearth_core::store::TaskStore;
use tracing::info;

use crate::proactive::ProactiveQueue;

/// Everything a request handler or CLI command needs, bundled once at
/// startup and shared behind `Arc`s. Stopped in reverse order of
/// construction by `main`'s shutdown sequence.
pub struct Core {
    pub config: Arc<ConfigManager>,
    pub store: Arc<TaskStore>,
    pub llm: Arc<LlmClient>,
    pub router: Arc<Router>,
    pub skills: Arc<SkillRegistry>,
    pub executor: Arc<Executor>,
    pub heartbeat: Arc<hearth_core::heartbeat::Heartbeat>,
    pub memory: Arc<dyn SemanticMemory>,
    pub pipeline: Arc<PrePipeline>,
    pub proactive: ProactiveQueue,
    pub personality_path: PathBuf,
    pub assistant_name: String,
    pub started_at: Instant,
}

impl Core {
    pub async fn bootstrap() -> Result<Arc<Self>> {
        let config = ConfigManager::new().await.context("loading configuration")?;
        config.start_watcher();

        let cfg = config.get_config().await;

        let db_path = ConfigManager::db_path().context("resolving database path")?;
        let store = Arc::new(TaskStore::open(&db_path).await.context("opening task store")?);

        let models: Vec<ModelSpec> = cfg
            .models
            .iter()
            .map(|m| {
                let provider = m.provider.parse::<LlmProvider>().unwrap_or(LlmProvider::OpenAiCompatible);
                ModelSpec {
                    id: m.id.clone(),
                    provider,
                    base_url: m.base_url.clone(),
                    api_key: m.api_key.clone(),
                }
            })
            .collect();
        let llm = Arc::new(LlmClient::new(models));

        let installed: Vec<String> = llm.list_models().iter().map(|m| m.id.clone()).collect();
        let router_models = RouterModels {
            small: cfg.router_small_model.clone(),
            medium: cfg.router_medium_model.clone(),
            large: cfg.router_large_model.clone(),
            fallback_preference: cfg.router_fallback_preference.clone(),
        };
        let router = Arc::new(Router::new(router_models, installed));

        let memory: Arc<dyn SemanticMemory> =
            Arc::new(CachedSemanticMemory::new(llm.clone(), cfg.embed_model.clone()));

        let skills_dir = ConfigManager::workspace_dir().context("resolving workspace dir")?.join("skills");

        let skills = Arc::new_cyclic(|weak: &std::sync::Weak<SkillRegistry>| {
            let builtins: Vec<Arc<dyn Skill>> = vec![
                Arc::new(ShellSkill::default()),
                Arc::new(MemorySearchSkill::new(memory.clone())),
                Arc::new(WebSearchSkill::new(cfg.web_search_endpoint.clone())),
                Arc::new(SkillWriterSkill::new(weak.clone(), skills_dir.clone())),
            ];
            SkillRegistry::new(skills_dir, builtins)
        });
        skills.load_all().await.context("loading skill registry")?;

        let executor = Arc::new(Executor::new(llm.clone(), skills.clone(), config.clone()));
        let heartbeat = hearth_core::heartbeat::Heartbeat::new(
            store.clone(),
            executor.clone(),
            router.clone(),
            config.clone(),
        );

        let pipeline = Arc::new(PrePipeline::new(llm.clone(), cfg.pipeline_model.clone()));

        let agent_home = ConfigManager::agent_home().context("resolving agent home")?;
        let personality_path = agent_home.join("personality.json");
        let assistant_name = read_assistant_name(&personality_path).unwrap_or_else(|| "Hearth".to_string());

        let proactive = ProactiveQueue::new(20);
        proactive.watch(heartbeat.subscribe());

        info!(models = llm.list_models().len(), "core bootstrapped");

        Ok(Arc::new(Self {
            config,
            store,
            llm,
            router,
            skills,
            executor,
            heartbeat,
            memory,
            pipeline,
            proactive,
            personality_path,
            assistant_name,
            started_at: Instant::now(),
        }))
    }
}

fn read_assistant_name(path: &PathBuf) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    let value: serde_json::Value = serde_json::from_str(&text).ok()?;
    value.get("name")?.as_str().map(|s| s.to_string())
}
