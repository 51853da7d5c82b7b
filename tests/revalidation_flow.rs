// 集成测试 - 验证变更捕获到失效通知投递的完整流程
// 订阅路由由 wiremock 模拟，不可达路由使用释放后的本地端口
use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use isr_revalidate::{
    DeliveryOutcome, DynamicRecord, EventHookBridge, FanOutMode, InMemoryRecordStore,
    MutationHooks, MutationType, RevalidateConfig,
};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn subscriber(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/revalidate"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}

/// 获取一个当前无人监听的本地地址
fn unreachable_route() -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(format!("http://{addr}"))
}

fn fast_config(routes: Vec<String>) -> RevalidateConfig {
    let mut config = RevalidateConfig::new("secret", routes);
    config.retry.max_attempts = 3;
    config.retry.initial_delay_ms = 5;
    config.retry.max_delay_ms = 20;
    config.http.connect_timeout_ms = 500;
    config.http.timeout_ms = 2000;
    config
}

async fn forms(server: &MockServer) -> Vec<HashMap<String, String>> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|request| {
            url::form_urlencoded::parse(&request.body)
                .into_owned()
                .collect()
        })
        .collect()
}

fn product(id: &str, permalink: &str, categories: &[&str]) -> DynamicRecord {
    DynamicRecord::new("products", id)
        .with_field("permalink", permalink)
        .with_field("category", json!(categories))
}

fn category(id: &str, name: &str, permalink: &str) -> DynamicRecord {
    DynamicRecord::new("categories", id)
        .with_field("name", name)
        .with_field("permalink", permalink)
}

#[tokio::test]
async fn test_create_product_notifies_with_resolved_categories() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = subscriber(200).await;
    let store = InMemoryRecordStore::new();
    store.upsert(category("c1", "shoes", "/c/shoes"));
    let bridge = EventHookBridge::new(&fast_config(vec![server.uri()]), store.clone())?;

    let created = product("p1", "p1-slug", &["shoes"]);
    store.upsert(created.clone());
    let reports = bridge.after_create(&created).await;

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].outcome, DeliveryOutcome::Delivered(200));

    let received = forms(&server).await;
    assert_eq!(received.len(), 1);
    let form = &received[0];
    assert_eq!(form["api_key"], "secret");
    assert_eq!(form["type"], "create");
    assert_eq!(form["product_permalink"], "p1-slug");
    assert_eq!(form["product_categories"], "/c/shoes");
    assert!(form.keys().all(|key| !key.contains("_old_")));

    let request = &server.received_requests().await.unwrap_or_default()[0];
    let content_type = request
        .headers
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    assert_eq!(content_type, "application/x-www-form-urlencoded");
    Ok(())
}

#[tokio::test]
async fn test_delete_category_notifies_old_permalink_only() -> Result<()> {
    let server = subscriber(200).await;
    let store = InMemoryRecordStore::new();
    store.upsert(category("c1", "old", "/c/old"));
    let bridge = EventHookBridge::new(&fast_config(vec![server.uri()]), store.clone())?;

    let handle = category("c1", "old", "/c/old");
    bridge.before_delete(&handle).await;
    store.remove("categories", "c1");
    bridge.after_delete(&handle).await;

    let received = forms(&server).await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["type"], "delete");
    assert_eq!(received[0]["category_old_permalink"], "/c/old");
    assert!(received[0].keys().all(|key| !key.contains("_new_")));
    assert!(received[0].keys().all(|key| !key.starts_with("product_")));
    Ok(())
}

#[tokio::test]
async fn test_update_product_carries_state_before_and_after() -> Result<()> {
    let server = subscriber(200).await;
    let store = InMemoryRecordStore::new();
    store.upsert(category("c1", "a", "/c/a"));
    store.upsert(category("c2", "b", "/c/b"));
    store.upsert(product("p1", "/p/old", &["a", "b"]));
    let bridge = EventHookBridge::new(&fast_config(vec![server.uri()]), store.clone())?;

    let updated = product("p1", "/p/new", &["b"]);
    bridge.before_update(&updated).await;
    // 模拟耗时较长的写入
    tokio::time::sleep(Duration::from_millis(30)).await;
    store.upsert(updated.clone());
    bridge.after_update(&updated).await;

    let received = forms(&server).await;
    assert_eq!(received[0]["type"], "update");
    assert_eq!(received[0]["product_old_permalink"], "/p/old");
    assert_eq!(received[0]["product_old_categories"], "/c/a,/c/b");
    assert_eq!(received[0]["product_new_permalink"], "/p/new");
    assert_eq!(received[0]["product_new_categories"], "/c/b");
    assert_eq!(bridge.pending_mutations(), 0);
    Ok(())
}

#[tokio::test]
async fn test_explicit_context_survives_interleaved_mutations() -> Result<()> {
    let server = subscriber(200).await;
    let store = InMemoryRecordStore::new();
    store.upsert(product("a", "/p/a-old", &[]));
    store.upsert(product("b", "/p/b-old", &[]));
    let bridge = EventHookBridge::new(&fast_config(vec![server.uri()]), store.clone())?;

    let a = product("a", "/p/a-new", &[]);
    let b = product("b", "/p/b-new", &[]);
    let ctx_a = bridge.capture_before(&a, MutationType::Update).await;
    let ctx_b = bridge.capture_before(&b, MutationType::Update).await;
    store.upsert(b.clone());
    store.upsert(a.clone());
    bridge.complete(&b, MutationType::Update, ctx_b).await;
    bridge.complete(&a, MutationType::Update, ctx_a).await;

    let received = forms(&server).await;
    assert_eq!(received.len(), 2);
    assert_eq!(received[0]["product_old_permalink"], "/p/b-old");
    assert_eq!(received[1]["product_old_permalink"], "/p/a-old");
    Ok(())
}

#[tokio::test]
async fn test_concurrent_mutations_do_not_cross_contaminate() -> Result<()> {
    let server = subscriber(200).await;
    let store = InMemoryRecordStore::new();
    let ids: Vec<String> = (0..8).map(|i| format!("p{i}")).collect();
    for id in &ids {
        store.upsert(product(id, &format!("/p/{id}-old"), &[]));
    }
    let bridge = Arc::new(EventHookBridge::new(
        &fast_config(vec![server.uri()]),
        store.clone(),
    )?);

    // 所有 before 阶段先于任何 after 阶段执行，最大化交错
    let updated: Vec<DynamicRecord> = ids
        .iter()
        .map(|id| product(id, &format!("/p/{id}-new"), &[]))
        .collect();
    futures::future::join_all(updated.iter().map(|record| bridge.before_update(record))).await;
    for record in &updated {
        store.upsert(record.clone());
    }
    futures::future::join_all(updated.iter().rev().map(|record| bridge.after_update(record)))
        .await;

    let received = forms(&server).await;
    assert_eq!(received.len(), ids.len());
    for form in &received {
        let new_permalink = &form["product_new_permalink"];
        let id = new_permalink
            .trim_start_matches("/p/")
            .trim_end_matches("-new");
        assert_eq!(form["product_old_permalink"], format!("/p/{id}-old"));
    }
    assert_eq!(bridge.pending_mutations(), 0);
    Ok(())
}

#[tokio::test]
async fn test_unreachable_route_does_not_block_others() -> Result<()> {
    let first = subscriber(200).await;
    let second = subscriber(200).await;
    let dead = unreachable_route()?;
    let config = fast_config(vec![first.uri(), dead.clone(), second.uri()]);
    let bridge = EventHookBridge::new(&config, InMemoryRecordStore::new())?;

    let reports = bridge.after_create(&category("c1", "new", "/c/new")).await;

    assert_eq!(reports.len(), 3);
    assert_eq!(reports[0].outcome, DeliveryOutcome::Delivered(200));
    assert_eq!(reports[0].attempts, 1);
    assert!(matches!(reports[1].outcome, DeliveryOutcome::Unreachable(_)));
    assert_eq!(reports[1].route, dead);
    assert_eq!(reports[1].attempts, 3);
    assert!(reports[1].error().is_some());
    assert_eq!(reports[2].outcome, DeliveryOutcome::Delivered(200));
    assert_eq!(reports[2].attempts, 1);

    assert_eq!(forms(&first).await.len(), 1);
    assert_eq!(forms(&second).await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_fan_out_keeps_route_order() -> Result<()> {
    let ok = subscriber(200).await;
    let missing = subscriber(404).await;
    let dead = unreachable_route()?;
    let mut config = fast_config(vec![dead, missing.uri(), ok.uri()]);
    config.dispatch.fan_out = FanOutMode::Concurrent;
    let bridge = EventHookBridge::new(&config, InMemoryRecordStore::new())?;

    let reports = bridge.after_create(&category("c1", "new", "/c/new")).await;

    assert!(matches!(reports[0].outcome, DeliveryOutcome::Unreachable(_)));
    assert_eq!(reports[1].outcome, DeliveryOutcome::NotFound(404));
    assert_eq!(reports[2].outcome, DeliveryOutcome::Delivered(200));
    Ok(())
}

#[tokio::test]
async fn test_http_error_statuses_are_not_retried() -> Result<()> {
    let failing = subscriber(500).await;
    let rejecting = subscriber(401).await;
    let config = fast_config(vec![failing.uri(), rejecting.uri()]);
    let bridge = EventHookBridge::new(&config, InMemoryRecordStore::new())?;

    let reports = bridge.after_create(&category("c1", "new", "/c/new")).await;

    assert_eq!(reports[0].outcome, DeliveryOutcome::ServerError(500));
    assert_eq!(reports[0].attempts, 1);
    assert_eq!(reports[1].outcome, DeliveryOutcome::Unexpected(401));
    assert_eq!(reports[1].attempts, 1);
    assert_eq!(forms(&failing).await.len(), 1);
    assert_eq!(forms(&rejecting).await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_redirect_is_reported_not_followed() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/revalidate"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/moved"))
        .mount(&server)
        .await;
    Mock::given(path("/moved"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    let bridge = EventHookBridge::new(&fast_config(vec![server.uri()]), InMemoryRecordStore::new())?;

    let reports = bridge.after_create(&category("c1", "new", "/c/new")).await;

    assert_eq!(reports[0].outcome, DeliveryOutcome::Unexpected(302));
    assert_eq!(reports[0].attempts, 1);
    // 只收到原始 POST，没有跟随到 /moved
    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.path(), "/api/revalidate");
    Ok(())
}

#[tokio::test]
async fn test_config_file_drives_bridge() -> Result<()> {
    let server = subscriber(200).await;
    let dir = tempfile::tempdir()?;
    let file = dir.path().join("revalidate.toml");
    std::fs::write(
        &file,
        format!(
            r#"
api_key = "from-file"
routes = ["{}"]

[collections]
products = "items"

[retry]
max_attempts = 2
"#,
            server.uri()
        ),
    )?;

    // 不读取进程环境变量，结果只取决于配置文件
    let config = RevalidateConfig::load_with(Some(file.as_path()), |_| None)?;
    let bridge = EventHookBridge::new(&config, InMemoryRecordStore::new())?;
    bridge
        .after_create(&DynamicRecord::new("items", "i1").with_field("permalink", "/i/1"))
        .await;

    let received = forms(&server).await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["api_key"], "from-file");
    assert_eq!(received[0]["type"], "create");
    assert_eq!(received[0]["product_permalink"], "/i/1");
    Ok(())
}
