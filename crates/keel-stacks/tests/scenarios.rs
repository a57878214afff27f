//! End-to-end scenarios: a foundation stack shared by several application stacks.

use keel_backend::{MemoryCloud, MemoryStateStore};
use keel_config::ProjectConfig;
use keel_core::Error;
use keel_core::backend::CloudBackend;
use keel_core::routing::MatchCondition;
use keel_core::stack::StackKind;
use keel_core::state::StateStore;
use keel_engine::ConvergenceEngine;
use keel_stacks::{ApplicationBuilder, FoundationBuilder};
use std::sync::Arc;

struct World {
    cloud: Arc<MemoryCloud>,
    store: Arc<MemoryStateStore>,
    config: ProjectConfig,
}

impl World {
    fn new() -> Self {
        let mut config = ProjectConfig::default();
        config.project = "blog".to_string();
        Self {
            cloud: Arc::new(MemoryCloud::new()),
            store: Arc::new(MemoryStateStore::new()),
            config,
        }
    }

    fn engine(&self) -> ConvergenceEngine {
        ConvergenceEngine::new(self.cloud.clone())
    }

    fn foundation(&self) -> FoundationBuilder {
        FoundationBuilder::new(self.config.clone(), self.engine(), self.store.clone())
    }

    fn application(&self) -> ApplicationBuilder {
        ApplicationBuilder::new(self.config.clone(), self.engine(), self.store.clone())
    }
}

#[tokio::test]
async fn test_production_owns_the_catch_all_rule() {
    let world = World::new();
    let contract = world.foundation().build("foundation-prod", "acme").await.unwrap();

    world
        .application()
        .deploy_from("prod", "foundation-prod")
        .await
        .unwrap();

    let rules = world.cloud.listener_rules(&contract.listener_id).await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].priority, Some(1));
    assert_eq!(rules[0].condition, MatchCondition::path("*"));
}

#[tokio::test]
async fn test_previews_coexist_with_production() {
    let world = World::new();
    let contract = world.foundation().build("foundation-prod", "acme").await.unwrap();
    let app = world.application();

    app.deploy_from("prod", "foundation-prod").await.unwrap();
    app.deploy_from("preview-42", "foundation-prod").await.unwrap();
    app.deploy_from("preview-43", "foundation-prod").await.unwrap();

    let rules = world.cloud.listener_rules(&contract.listener_id).await.unwrap();
    let previews: Vec<_> = rules.iter().filter(|r| r.stack.starts_with("preview")).collect();
    assert_eq!(previews.len(), 2);
    assert!(previews.iter().all(|r| r.priority.is_none()));
    assert_ne!(previews[0].condition, previews[1].condition);
    for rule in &previews {
        assert_eq!(rule.condition, MatchCondition::query("stack", &rule.stack));
    }
    assert_eq!(rules.iter().filter(|r| r.is_catch_all()).count(), 1);
}

#[tokio::test]
async fn test_unbuilt_foundation_aborts_before_creating_anything() {
    let world = World::new();

    let err = world
        .application()
        .deploy_from("prod", "foundation-missing")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::MissingOutput { ref stack, ref key }
            if stack == "foundation-missing" && key == "connectionStringHandle"
    ));
    assert_eq!(world.cloud.resource_count().unwrap(), 0);
    assert!(world.store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_preview_deploys_do_not_race() {
    let world = World::new();
    let contract = world.foundation().build("foundation-prod", "acme").await.unwrap();
    let app = world.application();

    let names: Vec<String> = (0..5).map(|i| format!("preview-{}", i)).collect();
    let results = futures::future::join_all(
        names.iter().map(|name| app.deploy(name, &contract)),
    )
    .await;
    assert!(results.iter().all(Result::is_ok));

    let rules = world.cloud.listener_rules(&contract.listener_id).await.unwrap();
    assert_eq!(rules.len(), 5);
}

#[tokio::test]
async fn test_second_production_identity_is_a_routing_collision() {
    let world = World::new();
    world.foundation().build("foundation-prod", "acme").await.unwrap();
    world
        .application()
        .deploy_from("prod", "foundation-prod")
        .await
        .unwrap();

    let mut misconfigured = world.config.clone();
    misconfigured.production_stack = "production".to_string();
    let other = ApplicationBuilder::new(misconfigured, world.engine(), world.store.clone());

    let err = other
        .deploy_from("production", "foundation-prod")
        .await
        .unwrap_err();
    assert!(err.is_routing_collision(), "unexpected error: {}", err);

    // Resources that do not depend on the rule still converged and are recorded.
    let state = world
        .store
        .load(StackKind::Application, "production")
        .await
        .unwrap()
        .unwrap();
    assert!(state.resource("targetGroup").is_some());
    assert!(state.resource("listenerRule").is_none());
    assert!(state.resource("service").is_none());
}

#[tokio::test]
async fn test_rebuilding_is_idempotent() {
    let world = World::new();
    let first = world.foundation().build("foundation-prod", "acme").await.unwrap();
    let count = world.cloud.resource_count().unwrap();
    let app = world.application();
    let deployed = app.deploy("preview-42", &first).await.unwrap();
    let with_app = world.cloud.resource_count().unwrap();

    let second = world.foundation().build("foundation-prod", "acme").await.unwrap();
    let redeployed = app.deploy("preview-42", &second).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(deployed, redeployed);
    assert_eq!(world.cloud.resource_count().unwrap(), with_app);
    assert!(with_app > count);
}

#[tokio::test]
async fn test_foundation_destroy_waits_for_applications() {
    let world = World::new();
    world.foundation().build("foundation-prod", "acme").await.unwrap();
    let app = world.application();
    app.deploy_from("preview-42", "foundation-prod").await.unwrap();

    assert!(matches!(
        world.foundation().destroy("foundation-prod").await,
        Err(Error::InvalidInput(_))
    ));

    app.destroy("preview-42").await.unwrap();
    world.foundation().destroy("foundation-prod").await.unwrap();
    assert_eq!(world.cloud.resource_count().unwrap(), 0);
}
