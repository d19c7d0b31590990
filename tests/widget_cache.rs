use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use fragcache::cache::{
    CacheBackend, CacheConfig, CacheError, CacheGate, CallArgs, FileBackend, FixedLocale,
    OutputForm, TagTokenStore, TaskLocale, TokenStorage, Widget, digest_hex, with_locale,
};
use serde_json::json;
use tempfile::TempDir;

fn file_config(dir: &TempDir) -> CacheConfig {
    CacheConfig {
        driver: "file".to_string(),
        file_directory: dir.path().to_path_buf(),
        ..Default::default()
    }
}

fn hero() -> Widget {
    Widget::new("HeroWidget", "hero")
        .with_tags(["home"])
        .with_lifetime(Duration::from_secs(60))
}

async fn render<B: CacheBackend>(
    gate: &CacheGate<B>,
    widget: &Widget,
    args: &CallArgs,
    calls: &AtomicUsize,
) -> String {
    gate.cache_result::<String, CacheError, _, _>(args, widget, OutputForm::Html, || async {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("<section>{n}</section>"))
    })
    .await
    .expect("render should succeed")
}

#[tokio::test]
async fn file_driver_key_follows_tag_token() {
    let dir = TempDir::new().expect("temp dir");
    let backend = FileBackend::new(dir.path());
    backend
        .store_token("widget_tag_token:home", "t0")
        .await
        .expect("seed token");

    let gate = CacheGate::from_config(&file_config(&dir), Arc::new(FixedLocale::new("en")))
        .expect("file driver");
    assert!(!gate.supports_tag_scoping());

    let before = gate
        .keys()
        .make_key(&CallArgs::new(), &hero(), OutputForm::Html)
        .await
        .expect("key");
    assert_eq!(before.as_str(), digest_hex(r#"["t0"]{}enHTMLheroHeroWidget"#));

    gate.expire_tagged(["home"]).await.expect("rotate");

    let after = gate
        .keys()
        .make_key(&CallArgs::new(), &hero(), OutputForm::Html)
        .await
        .expect("key");
    assert_ne!(before, after);
}

#[tokio::test]
async fn file_driver_entries_and_tokens_survive_restart() {
    let dir = TempDir::new().expect("temp dir");
    let calls = AtomicUsize::new(0);
    let args = CallArgs::new().with(json!({"limit": 3}));

    let first = {
        let gate = CacheGate::from_config(&file_config(&dir), Arc::new(FixedLocale::new("en")))
            .expect("file driver");
        render(&gate, &hero(), &args, &calls).await
    };

    let gate = CacheGate::from_config(&file_config(&dir), Arc::new(FixedLocale::new("en")))
        .expect("file driver");
    assert_eq!(render(&gate, &hero(), &args, &calls).await, first);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    gate.expire_tagged(["home"]).await.expect("rotate");

    let reopened = CacheGate::from_config(&file_config(&dir), Arc::new(FixedLocale::new("en")))
        .expect("file driver");
    assert_eq!(
        render(&reopened, &hero(), &args, &calls).await,
        "<section>1</section>"
    );
}

#[tokio::test]
async fn memory_driver_flushes_only_matching_tags() {
    let gate = CacheGate::from_config(&CacheConfig::default(), Arc::new(FixedLocale::new("en")))
        .expect("memory driver");
    assert!(gate.supports_tag_scoping());

    let calls = AtomicUsize::new(0);
    let sidebar = Widget::new("SidebarWidget", "sidebar")
        .with_tags(["sidebar"])
        .with_lifetime(Duration::from_secs(60));

    render(&gate, &hero(), &CallArgs::new(), &calls).await;
    render(&gate, &sidebar, &CallArgs::new(), &calls).await;
    gate.expire_tagged(["home"]).await.expect("flush");

    render(&gate, &hero(), &CallArgs::new(), &calls).await;
    render(&gate, &sidebar, &CallArgs::new(), &calls).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // Keys on drivers with tag support carry no tokens.
    let material = gate
        .keys()
        .key_material(&CallArgs::new(), &hero(), OutputForm::Html)
        .await
        .expect("material");
    assert_eq!(material, "{}enHTMLheroHeroWidget");
}

#[tokio::test]
async fn disabled_cache_computes_every_time() {
    let dir = TempDir::new().expect("temp dir");
    let config = CacheConfig {
        enabled: false,
        ..file_config(&dir)
    };
    let gate = CacheGate::from_config(&config, Arc::new(FixedLocale::new("en"))).expect("gate");
    let calls = AtomicUsize::new(0);

    render(&gate, &hero(), &CallArgs::new(), &calls).await;
    render(&gate, &hero(), &CallArgs::new(), &calls).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(!dir.path().join("entries").exists());
}

#[tokio::test]
async fn task_locale_separates_entries() {
    let gate = CacheGate::from_config(&CacheConfig::default(), Arc::new(TaskLocale::new("en")))
        .expect("memory driver");
    let calls = AtomicUsize::new(0);

    let en = render(&gate, &hero(), &CallArgs::new(), &calls).await;
    let fa = with_locale("fa", render(&gate, &hero(), &CallArgs::new(), &calls)).await;
    let en_again = render(&gate, &hero(), &CallArgs::new(), &calls).await;

    assert_ne!(en, fa);
    assert_eq!(en, en_again);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unsupported_driver_is_reported() {
    let config = CacheConfig {
        driver: "database".to_string(),
        ..Default::default()
    };
    let err = CacheGate::from_config(&config, Arc::new(FixedLocale::new("en")))
        .err()
        .expect("database driver has no backend");
    assert!(matches!(err, CacheError::UnsupportedDriver { .. }));
}

#[tokio::test]
async fn tokens_are_shared_through_storage() {
    let dir = TempDir::new().expect("temp dir");
    let first = TagTokenStore::new(Arc::new(FileBackend::new(dir.path())));
    let second = TagTokenStore::new(Arc::new(FileBackend::new(dir.path())));

    let token = first.token_for("home").await.expect("token");
    assert_eq!(second.token_for("home").await.expect("token"), token);

    let rotated = second.rotate("home").await.expect("rotate");
    assert_eq!(first.token_for("home").await.expect("token"), rotated);
}
