//! End-to-end pipeline scenarios against mock HTTP backends.

use std::sync::Arc;
use std::time::Duration;

use reco_kernel::api::{RecommendRequest, codes};
use reco_kernel::config::{
    AlgorithmConfig, CacheScope, CacheSettings, DaoConfig, FilterConfig, FilterKind, RankAlgorithm,
    RecallConfig, RecallKind, RecommendConfig, RemoteMlSettings, SceneConfig, SeedItem,
};
use reco_kernel::registry::ComponentKind;
use reco_runtime::{Engine, EngineFactory};
use reco_testing::init_tracing;

/// Mock HTTP backends (model server, external item service).
mod mock {
    use axum::{Json, Router, routing::post};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    pub struct MockServer {
        pub base_url: String,
        pub hits: Arc<AtomicUsize>,
    }

    impl MockServer {
        pub fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// Model server: scores every instance with the same value after an
    /// optional delay. `POST /score`.
    pub async fn score_server(score: f64, delay: Duration) -> MockServer {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in = Arc::clone(&hits);
        let app = Router::new().route(
            "/score",
            post(move |Json(body): Json<Value>| {
                let hits = Arc::clone(&hits_in);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                    let n = body["instances"].as_array().map(|a| a.len()).unwrap_or(0);
                    Json(json!({ "scores": vec![score; n] }))
                }
            }),
        );
        let base_url = serve(app).await;
        MockServer { base_url, hits }
    }

    /// External DAO service answering the same rows for every key after
    /// an optional delay. `POST /items`.
    pub async fn items_server(rows: Value, delay: Duration) -> MockServer {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in = Arc::clone(&hits);
        let app = Router::new().route(
            "/items",
            post(move |Json(_body): Json<Value>| {
                let hits = Arc::clone(&hits_in);
                let rows = rows.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                    Json(json!({ "items": rows }))
                }
            }),
        );
        let base_url = serve(app).await;
        MockServer { base_url, hits }
    }
}

fn scene(recalls: &[&str], final_size: usize) -> SceneConfig {
    let mut scene = SceneConfig::new("home");
    scene.recall_names = recalls.iter().map(|s| s.to_string()).collect();
    scene.final_size = final_size;
    scene
}

fn remote_ml(name: &str, endpoint: &str, timeout_ms: u64) -> AlgorithmConfig {
    AlgorithmConfig::remote_ml(
        name,
        RemoteMlSettings {
            endpoint_url: endpoint.to_string(),
            processor_kind: "json".into(),
            auth_headers: Default::default(),
            timeout_ms,
            retry_times: 0,
            response_parser_name: "score-list".into(),
            requested_outputs: vec![],
        },
    )
}

fn rank_with(scene: &mut SceneConfig, algo: &str) {
    scene.rank.algorithms = vec![RankAlgorithm {
        name: algo.into(),
        weight: 1.0,
    }];
}

// ── seed scenario 1: happy path ──────────────────────────────────────────

#[tokio::test]
async fn happy_path_merges_dedups_and_ranks() {
    init_tracing();

    let mut cfg = RecommendConfig::default();
    cfg.daos.push(
        DaoConfig::memory("pop_table")
            .with_row("popularity", SeedItem::new("A", 0.9).with_property("rel", 0.9))
            .with_row("popularity", SeedItem::new("B", 0.8).with_property("rel", 0.8))
            .with_row("popularity", SeedItem::new("C", 0.7).with_property("rel", 0.7)),
    );
    cfg.daos.push(
        DaoConfig::memory("cf_table")
            .with_row("u1", SeedItem::new("B", 0.85).with_property("rel", 0.85))
            .with_row("u1", SeedItem::new("D", 0.6).with_property("rel", 0.6)),
    );
    cfg.recalls
        .push(RecallConfig::new("pop", RecallKind::Popularity).with_dao("pop_table"));
    cfg.recalls
        .push(RecallConfig::new("cf", RecallKind::Collaborative).with_dao("cf_table"));
    cfg.algorithms.push(AlgorithmConfig::field_lookup("rel", "rel"));

    let mut home = scene(&["pop", "cf"], 3);
    rank_with(&mut home, "rel");
    cfg.scenes.push(home);

    let engine = Engine::new(cfg, EngineFactory::default()).unwrap();
    let response = engine.recommend(RecommendRequest::new("home", "u1")).await;

    assert_eq!(response.code, codes::OK);
    let ids: Vec<_> = response.items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["A", "B", "C"]);
    let scores: Vec<_> = response.items.iter().map(|i| i.score).collect();
    assert_eq!(scores, vec![0.9, 0.85, 0.7]);

    // B came from both recalls and carries both retrieve sources.
    let b = &response.items[1];
    let sources: Vec<_> = b.retrieve_sources.iter().cloned().collect();
    assert_eq!(sources, vec!["cf".to_string(), "pop".to_string()]);
}

// ── seed scenario 2: deadline exceeded in rank ───────────────────────────

#[tokio::test]
async fn rank_deadline_degrades_to_neutral_scores() {
    init_tracing();
    let model = mock::score_server(0.9, Duration::from_millis(500)).await;

    let mut cfg = RecommendConfig::default();
    cfg.daos.push(
        DaoConfig::memory("pop_table")
            .with_row("popularity", SeedItem::new("D", 0.9))
            .with_row("popularity", SeedItem::new("B", 0.8))
            .with_row("popularity", SeedItem::new("A", 0.7))
            .with_row("popularity", SeedItem::new("C", 0.6)),
    );
    cfg.recalls
        .push(RecallConfig::new("pop", RecallKind::Popularity).with_dao("pop_table"));
    cfg.algorithms.push(remote_ml(
        "ml",
        &format!("{}/score", model.base_url),
        1_000,
    ));

    let mut home = scene(&["pop"], 3);
    rank_with(&mut home, "ml");
    home.budgets.rank_ms = 40;
    cfg.scenes.push(home);

    let engine = Engine::new(cfg, EngineFactory::default()).unwrap();
    let response = engine
        .recommend(RecommendRequest::new("home", "u1").with_debug(true))
        .await;

    assert_eq!(response.code, codes::OK);
    // All neutral, so the order falls back to lexicographic ids.
    let ids: Vec<_> = response.items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["A", "B", "C"]);
    for item in &response.items {
        assert_eq!(item.score, 0.5);
    }

    let trace = response.debug.expect("debug trace");
    let rank_trace = trace.phases.iter().find(|p| p.phase == "rank").unwrap();
    assert!(rank_trace.deadline_hit);
}

// ── seed scenario 3: filter sequence ─────────────────────────────────────

#[tokio::test]
async fn quality_then_diversity_filter_sequence() {
    init_tracing();

    let mut cfg = RecommendConfig::default();
    cfg.daos.push(
        DaoConfig::memory("pop_table")
            .with_row(
                "popularity",
                SeedItem::new("A", 0.9)
                    .with_property("q", 0.9)
                    .with_property("cat", "x"),
            )
            .with_row(
                "popularity",
                SeedItem::new("B", 0.85)
                    .with_property("q", 0.4)
                    .with_property("cat", "x"),
            )
            .with_row(
                "popularity",
                SeedItem::new("C", 0.8)
                    .with_property("q", 0.8)
                    .with_property("cat", "x"),
            )
            .with_row(
                "popularity",
                SeedItem::new("D", 0.7)
                    .with_property("q", 0.7)
                    .with_property("cat", "y"),
            ),
    );
    cfg.recalls
        .push(RecallConfig::new("pop", RecallKind::Popularity).with_dao("pop_table"));
    cfg.filters.push(FilterConfig {
        name: "quality".into(),
        kind: FilterKind::PropertyThreshold,
        property: Some("q".into()),
        min_value: Some(0.5),
        category_property: None,
        max_per_category: None,
        exposure_property: None,
        state_property: None,
        allowed_states: vec![],
    });
    cfg.filters.push(FilterConfig {
        name: "diversity".into(),
        kind: FilterKind::CategoryQuota,
        property: None,
        min_value: None,
        category_property: Some("cat".into()),
        max_per_category: Some(2),
        exposure_property: None,
        state_property: None,
        allowed_states: vec![],
    });

    let mut home = scene(&["pop"], 10);
    home.filter_names = vec!["quality".into(), "diversity".into()];
    cfg.scenes.push(home);

    let engine = Engine::new(cfg, EngineFactory::default()).unwrap();
    let response = engine.recommend(RecommendRequest::new("home", "u1")).await;

    let ids: Vec<_> = response.items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["A", "C", "D"]);
}

// ── seed scenario 4: dedup merges scores and sources ─────────────────────

#[tokio::test]
async fn recall_dedup_merges_scores_and_sources() {
    init_tracing();

    let mut cfg = RecommendConfig::default();
    cfg.daos.push(
        DaoConfig::memory("t1").with_row("popularity", SeedItem::new("X", 0.6)),
    );
    cfg.daos.push(
        DaoConfig::memory("t2").with_row("popularity", SeedItem::new("X", 0.9)),
    );
    cfg.recalls
        .push(RecallConfig::new("r1", RecallKind::Popularity).with_dao("t1"));
    cfg.recalls
        .push(RecallConfig::new("r2", RecallKind::Popularity).with_dao("t2"));
    cfg.scenes.push(scene(&["r1", "r2"], 10));

    let engine = Engine::new(cfg, EngineFactory::default()).unwrap();
    let response = engine.recommend(RecommendRequest::new("home", "u1")).await;

    assert_eq!(response.items.len(), 1);
    let x = &response.items[0];
    assert_eq!(x.id, "X");
    assert_eq!(x.score, 0.9);
    let sources: Vec<_> = x.retrieve_sources.iter().cloned().collect();
    assert_eq!(sources, vec!["r1".to_string(), "r2".to_string()]);
}

// ── seed scenario 5: hot reload under concurrent traffic ─────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hot_reload_swaps_atomically_under_load() {
    init_tracing();
    let old_model = mock::score_server(0.3, Duration::from_millis(2)).await;
    let new_model = mock::score_server(0.7, Duration::from_millis(2)).await;

    let base_config = |endpoint: &str| {
        let mut cfg = RecommendConfig::default();
        cfg.daos.push(
            DaoConfig::memory("pop_table")
                .with_row("popularity", SeedItem::new("A", 0.9))
                .with_row("popularity", SeedItem::new("B", 0.8)),
        );
        cfg.recalls
            .push(RecallConfig::new("pop", RecallKind::Popularity).with_dao("pop_table"));
        cfg.algorithms.push(remote_ml("m", endpoint, 500));
        let mut home = scene(&["pop"], 2);
        rank_with(&mut home, "m");
        cfg.scenes.push(home);
        cfg
    };

    let engine = Arc::new(
        Engine::new(
            base_config(&format!("{}/score", old_model.base_url)),
            EngineFactory::default(),
        )
        .unwrap(),
    );
    let signature_before = engine
        .registry()
        .signature(ComponentKind::Algorithm, "m")
        .unwrap();

    let fire = |n: usize| {
        let engine = Arc::clone(&engine);
        (0..n)
            .map(move |i| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    engine
                        .recommend(RecommendRequest::new("home", format!("u{i}")))
                        .await
                })
            })
            .collect::<Vec<_>>()
    };

    // One fully-served request pins the old instance before the reload.
    let warmup = engine.recommend(RecommendRequest::new("home", "u0")).await;
    assert_eq!(warmup.items[0].score, 0.3);

    let first_wave = fire(50);
    let report = engine
        .reload(base_config(&format!("{}/score", new_model.base_url)))
        .unwrap();
    assert!(report.is_clean());
    let second_wave = fire(50);

    let mut old_scored = 0usize;
    let mut new_scored = 0usize;
    for handle in first_wave.into_iter().chain(second_wave) {
        let response = handle.await.unwrap();
        assert_eq!(response.code, codes::OK);
        assert_eq!(response.items.len(), 2);
        // Every request saw exactly one instance: all scores in one
        // response come from the same endpoint.
        let scores: Vec<_> = response.items.iter().map(|i| i.score).collect();
        if scores.iter().all(|s| (*s - 0.3).abs() < 1e-9) {
            old_scored += 1;
        } else if scores.iter().all(|s| (*s - 0.7).abs() < 1e-9) {
            new_scored += 1;
        } else {
            panic!("mixed-instance response: {scores:?}");
        }
    }
    assert_eq!(old_scored + new_scored, 100);
    // The second wave started after the reload returned, so the new
    // instance certainly served traffic.
    assert!(new_scored >= 50);

    let signature_after = engine
        .registry()
        .signature(ComponentKind::Algorithm, "m")
        .unwrap();
    assert_ne!(signature_before, signature_after);
}

// ── seed scenario 6: global cache hit ────────────────────────────────────

#[tokio::test]
async fn global_cache_serves_second_user_without_dao_call() {
    init_tracing();
    let items = mock::items_server(
        serde_json::json!([{ "id": "A", "score": 0.9 }, { "id": "B", "score": 0.8 }]),
        Duration::ZERO,
    )
    .await;

    let mut cfg = RecommendConfig::default();
    cfg.daos
        .push(DaoConfig::external_http("pop_service", &items.base_url));
    cfg.recalls.push(
        RecallConfig::new("pop", RecallKind::Popularity)
            .with_dao("pop_service")
            .with_cache(CacheSettings {
                scope: CacheScope::Global,
                ttl_secs: 60,
                capacity: 16,
            }),
    );
    cfg.scenes.push(scene(&["pop"], 5));

    let engine = Engine::new(cfg, EngineFactory::default()).unwrap();

    let first = engine.recommend(RecommendRequest::new("home", "u1")).await;
    let second = engine.recommend(RecommendRequest::new("home", "u2")).await;

    assert_eq!(first.items.len(), 2);
    assert_eq!(second.items.len(), 2);
    assert_eq!(items.hits(), 1, "second request must be served from cache");
}

// ── boundary behaviors ───────────────────────────────────────────────────

#[tokio::test]
async fn empty_recall_list_yields_empty_success() {
    init_tracing();
    let mut cfg = RecommendConfig::default();
    cfg.scenes.push(scene(&[], 5));

    let engine = Engine::new(cfg, EngineFactory::default()).unwrap();
    let response = engine
        .recommend(RecommendRequest::new("home", "u1").with_debug(true))
        .await;

    assert_eq!(response.code, codes::OK);
    assert!(response.items.is_empty());
    let trace = response.debug.unwrap();
    assert!(trace.phases.iter().all(|p| !p.deadline_hit));
}

#[tokio::test]
async fn all_recalls_timing_out_yields_empty_response_with_flag() {
    init_tracing();
    let slow = mock::items_server(
        serde_json::json!([{ "id": "A", "score": 0.9 }]),
        Duration::from_millis(400),
    )
    .await;

    let mut cfg = RecommendConfig::default();
    cfg.daos.push(
        DaoConfig::external_http("slow_service", &slow.base_url).with_timeout_ms(1_000),
    );
    cfg.recalls
        .push(RecallConfig::new("pop", RecallKind::Popularity).with_dao("slow_service"));
    let mut home = scene(&["pop"], 5);
    home.budgets.recall_ms = 30;
    cfg.scenes.push(home);

    let engine = Engine::new(cfg, EngineFactory::default()).unwrap();
    let response = engine
        .recommend(RecommendRequest::new("home", "u1").with_debug(true))
        .await;

    assert_eq!(response.code, codes::OK);
    assert!(response.items.is_empty());
    let trace = response.debug.unwrap();
    let recall_trace = trace.phases.iter().find(|p| p.phase == "recall").unwrap();
    assert!(recall_trace.deadline_hit);
}

#[tokio::test]
async fn fewer_candidates_than_final_size_from_yaml_config() {
    init_tracing();
    let engine = reco_testing::engine_from_yaml(
        r#"
scenes:
  - scene_id: home
    recall_names: [pop]
    final_size: 5
recalls:
  - name: pop
    type: popularity
    dao_name: pop_table
daos:
  - name: pop_table
    type: memory
    data:
      popularity:
        - { id: A, score: 0.9 }
        - { id: B, score: 0.8 }
"#,
    )
    .unwrap();

    let response = engine.recommend(RecommendRequest::new("home", "u1")).await;
    assert_eq!(response.items.len(), 2);
}

#[tokio::test]
async fn identical_requests_are_deterministic() {
    init_tracing();
    let mut cfg = RecommendConfig::default();
    cfg.daos.push(
        DaoConfig::memory("pop_table")
            .with_row("popularity", SeedItem::new("A", 0.9).with_property("rel", 0.9))
            .with_row("popularity", SeedItem::new("B", 0.9).with_property("rel", 0.9))
            .with_row("popularity", SeedItem::new("C", 0.9).with_property("rel", 0.9)),
    );
    cfg.recalls
        .push(RecallConfig::new("pop", RecallKind::Popularity).with_dao("pop_table"));
    cfg.algorithms.push(AlgorithmConfig::field_lookup("rel", "rel"));
    let mut home = scene(&["pop"], 3);
    rank_with(&mut home, "rel");
    cfg.scenes.push(home);

    let engine = Engine::new(cfg, EngineFactory::default()).unwrap();
    let first = engine.recommend(RecommendRequest::new("home", "u1")).await;
    let second = engine.recommend(RecommendRequest::new("home", "u1")).await;

    let ids = |r: &reco_kernel::api::RecommendResponse| {
        r.items.iter().map(|i| i.id.clone()).collect::<Vec<_>>()
    };
    assert_eq!(ids(&first), ids(&second));
    // Equal scores, so the order is the lexicographic tie-break.
    assert_eq!(ids(&first), vec!["A", "B", "C"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn admission_rejects_beyond_max_in_flight() {
    init_tracing();
    let slow_model = mock::score_server(0.9, Duration::from_millis(300)).await;

    let mut cfg = RecommendConfig::default();
    cfg.engine.max_in_flight = 1;
    cfg.engine.request_timeout_ms = 1_000;
    cfg.daos.push(
        DaoConfig::memory("pop_table").with_row("popularity", SeedItem::new("A", 0.9)),
    );
    cfg.recalls
        .push(RecallConfig::new("pop", RecallKind::Popularity).with_dao("pop_table"));
    cfg.algorithms.push(remote_ml(
        "ml",
        &format!("{}/score", slow_model.base_url),
        800,
    ));
    let mut home = scene(&["pop"], 5);
    rank_with(&mut home, "ml");
    home.budgets.rank_ms = 800;
    cfg.scenes.push(home);

    let engine = Arc::new(Engine::new(cfg, EngineFactory::default()).unwrap());

    let in_flight = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.recommend(RecommendRequest::new("home", "u1")).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let rejected = engine.recommend(RecommendRequest::new("home", "u2")).await;
    assert_eq!(rejected.code, codes::UNAVAILABLE);

    let served = in_flight.await.unwrap();
    assert_eq!(served.code, codes::OK);
}
