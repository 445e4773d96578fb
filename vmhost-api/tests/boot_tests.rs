//! 集成测试 - 启动流程

mod common;

use common::{installed, interpreter, interpreter_with, CountingTransport, FakeLinker, INDEX, LIB_ROOT};
use std::path::Path;
use std::sync::Arc;
use vmhost_api::vmhost_core::IndexError;
use vmhost_api::{BootError, HostConfig, HostError, LoadState, ReadinessState, Variant};
use vmhost_core::testing::poll_once;
use vmhost_vfs::VirtualFileSystem;

const STAGES: &[&str] = &[
    "uninitialized",
    "fetching",
    "linking",
    "initializing_filesystem",
    "running_startup",
    "fetching_index",
    "installing_eager",
    "ready",
    "failed",
];

fn stage_rank(name: &str) -> usize {
    STAGES.iter().position(|stage| *stage == name).unwrap()
}

fn boot_error(result: Result<(), HostError>) -> Arc<BootError> {
    match result {
        Err(HostError::NotReady(err)) => err,
        other => panic!("expected a boot failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_boot_reaches_ready() {
    let (interp, stats, transport) = interpreter(HostConfig::default());
    assert_eq!(interp.state(), ReadinessState::Uninitialized);
    assert!(interp.module_index().is_none());

    interp.ready().await.unwrap();

    assert!(interp.state().is_ready());
    assert_eq!(transport.fetched(), vec!["pypy.vm.js", "modules/index.json"]);
    assert_eq!(stats.home.lock().unwrap().as_deref(), Some("/lib/pypyjs/pypy.js"));
    assert_eq!(stats.executed(), vec!["import js"]);
    assert_eq!(stats.live_buffers(), 0);
    assert_eq!(interp.module_index().map(|index| index.len()), Some(9));
}

#[tokio::test]
async fn test_readiness_is_monotonic() {
    let (interp, _, _) = interpreter(HostConfig::default());
    let mut rx = interp.subscribe();
    let first = rx.borrow_and_update().name();

    let watcher = async {
        let mut seen = vec![first];
        while rx.changed().await.is_ok() {
            let state = rx.borrow_and_update().clone();
            seen.push(state.name());
            if state.is_terminal() {
                break;
            }
        }
        seen
    };
    let (result, seen) = tokio::join!(interp.ready(), watcher);

    result.unwrap();
    assert_eq!(seen.first(), Some(&"uninitialized"));
    assert_eq!(seen.last(), Some(&"ready"));
    for pair in seen.windows(2) {
        assert!(stage_rank(pair[0]) < stage_rank(pair[1]), "went from {} to {}", pair[0], pair[1]);
    }

    // Ready 之后不再发布新状态
    interp.ready().await.unwrap();
    assert!(!rx.has_changed().unwrap());
    assert!(interp.state().is_ready());
}

#[tokio::test]
async fn test_ready_is_memoized() {
    let (interp, stats, transport) = interpreter(HostConfig::default());

    let (first, second) = tokio::join!(interp.ready(), interp.ready());
    first.unwrap();
    second.unwrap();
    interp.ready().await.unwrap();

    assert_eq!(transport.fetch_count("pypy.vm.js"), 1);
    assert_eq!(transport.fetch_count("modules/index.json"), 1);
    assert_eq!(stats.executed(), vec!["import js"]);
}

#[tokio::test]
async fn test_missing_payload_fails_fetching() {
    let transport = CountingTransport::new(&[("modules/index.json", INDEX)]);
    let (interp, _, transport) = interpreter_with(HostConfig::default(), FakeLinker::new(), transport);

    let err = boot_error(interp.ready().await);

    assert_eq!(err.stage(), "fetching");
    assert!(matches!(&*err, BootError::Payload(_)));
    assert!(interp.state().is_failed());
    assert_eq!(transport.fetched(), vec!["pypy.vm.js"]);
}

#[tokio::test]
async fn test_link_failure_is_terminal() {
    let transport = CountingTransport::new(&[("pypy.vm.js", "garbage"), ("modules/index.json", INDEX)]);
    let (interp, stats, transport) = interpreter_with(HostConfig::default(), FakeLinker::new(), transport);

    let err = boot_error(interp.ready().await);
    assert_eq!(err.stage(), "linking");

    // 之后的每个调用都返回同一个错误
    let again = boot_error(interp.ready().await);
    assert!(Arc::ptr_eq(&err, &again));
    match interp.eval("x = 1").await {
        Err(HostError::NotReady(later)) => assert!(Arc::ptr_eq(&err, &later)),
        other => panic!("expected NotReady, got {:?}", other),
    }
    assert!(matches!(interp.get("x").await, Err(HostError::NotReady(_))));

    assert_eq!(transport.fetched(), vec!["pypy.vm.js"]);
    assert!(stats.executed().is_empty());
    assert_eq!(interp.state(), ReadinessState::Failed(err));
}

#[tokio::test]
async fn test_memory_initializer_is_fetched() {
    let transport = CountingTransport::standard();
    transport.put("pypy.vm.js.mem", "MEM");
    let linker = FakeLinker {
        memory_init: Some(String::from("pypy.vm.js.mem")),
        ..FakeLinker::new()
    };
    let (interp, _, transport) = interpreter_with(HostConfig::default(), linker, transport);

    interp.ready().await.unwrap();

    assert_eq!(
        transport.fetched(),
        vec!["pypy.vm.js", "pypy.vm.js.mem", "modules/index.json"]
    );
}

#[tokio::test]
async fn test_missing_memory_initializer() {
    let linker = FakeLinker {
        memory_init: Some(String::from("pypy.vm.js.mem")),
        ..FakeLinker::new()
    };
    let (interp, _, transport) = interpreter_with(HostConfig::default(), linker, CountingTransport::standard());

    let err = boot_error(interp.ready().await);

    assert!(matches!(&*err, BootError::MemoryInitFetch { path, .. } if path == "pypy.vm.js.mem"));
    assert_eq!(err.stage(), "linking");
    assert_eq!(transport.fetch_count("modules/index.json"), 0);
}

#[tokio::test]
async fn test_startup_failure_stops_pipeline() {
    let linker = FakeLinker {
        fail_startup: true,
        ..FakeLinker::new()
    };
    let (interp, stats, transport) = interpreter_with(HostConfig::default(), linker, CountingTransport::standard());

    let err = boot_error(interp.ready().await);

    assert_eq!(err.stage(), "running_startup");
    assert!(matches!(&*err, BootError::Startup(_)));
    assert!(stats.home.lock().unwrap().is_none());
    assert_eq!(transport.fetched(), vec!["pypy.vm.js"]);
}

#[tokio::test]
async fn test_home_path_failure() {
    let linker = FakeLinker {
        home_status: 2,
        ..FakeLinker::new()
    };
    let (interp, stats, _) = interpreter_with(HostConfig::default(), linker, CountingTransport::standard());

    let err = boot_error(interp.ready().await);

    assert!(matches!(&*err, BootError::Home(2)));
    assert!(stats.executed().is_empty());
    assert_eq!(stats.live_buffers(), 0);
}

#[tokio::test]
async fn test_malformed_index() {
    let transport = CountingTransport::standard();
    transport.put("modules/index.json", "{ \"modules\": ");
    let (interp, _, _) = interpreter_with(HostConfig::default(), FakeLinker::new(), transport);

    let err = boot_error(interp.ready().await);

    assert_eq!(err.stage(), "fetching_index");
    assert!(matches!(&*err, BootError::Index(IndexError::Malformed(_))));
}

#[tokio::test]
async fn test_unknown_eager_module() {
    let transport = CountingTransport::standard();
    transport.put(
        "modules/index.json",
        r#"{ "modules": {}, "eager": { "ghost": "x = 1" } }"#,
    );
    let (interp, _, _) = interpreter_with(HostConfig::default(), FakeLinker::new(), transport);

    let err = boot_error(interp.ready().await);

    assert!(matches!(&*err, BootError::Index(IndexError::UnknownEager(name)) if name == "ghost"));
}

#[tokio::test]
async fn test_eager_modules_are_not_fetched() {
    let (interp, stats, transport) = interpreter(HostConfig::default());

    interp.ready().await.unwrap();

    assert!(installed(&stats, &format!("{LIB_ROOT}/site.py")));
    assert_eq!(interp.module_state("site"), LoadState::Loaded);
    assert_eq!(interp.loaded_modules(), vec!["site"]);

    interp.load_modules(["site"]).await.unwrap();
    assert_eq!(transport.fetch_count("modules/site.py"), 0);
}

#[tokio::test]
async fn test_search_dirs_are_created() {
    let config = HostConfig {
        search_dirs: vec![String::from("lib/pypyjs/lib-python/2.7"), String::from("/opt/site")],
        ..HostConfig::default()
    };
    let (interp, stats, _) = interpreter(config);

    interp.ready().await.unwrap();

    let fs = stats.fs.lock().unwrap().clone().unwrap();
    assert!(fs.is_dir(Path::new("/lib/pypyjs/lib-python/2.7")));
    assert!(fs.is_dir(Path::new("/opt/site")));
}

#[tokio::test]
async fn test_execution_context() {
    let config = HostConfig {
        total_memory: 64 * 1024 * 1024,
        ..HostConfig::with_root("dist")
    };
    let (interp, stats, _) = interpreter(config);

    interp.ready().await.unwrap();

    let context = stats.context.lock().unwrap().clone().unwrap();
    assert_eq!(context.total_memory, 64 * 1024 * 1024);
    assert!(context.no_initial_run);
    assert!(context.no_exit_runtime);
    assert!(context.no_fs_init);
    assert_eq!(context.prefix, "dist/");
    assert_eq!(context.this_program, "/lib/pypyjs/pypy.js");
}

#[tokio::test]
async fn test_minimal_variant_skips_index() {
    let config = HostConfig {
        variant: Variant::Minimal,
        ..HostConfig::default()
    };
    let (interp, stats, transport) = interpreter(config);

    interp.ready().await.unwrap();

    assert!(interp.state().is_ready());
    assert_eq!(transport.fetched(), vec!["pypy.vm.js"]);
    assert!(stats.home.lock().unwrap().is_none());
    assert!(stats.executed().is_empty());
    assert_eq!(interp.module_index().map(|index| index.is_empty()), Some(true));

    assert!(interp.eval("x = 1").await.unwrap().is_success());
    assert!(matches!(interp.get("x").await, Err(HostError::Unsupported("get"))));
    assert!(matches!(interp.set("x", 2).await, Err(HostError::Unsupported("set"))));
}

#[tokio::test]
async fn test_dropped_boot_is_interrupted() {
    let (interp, _, transport) = interpreter(HostConfig::default());

    {
        let mut boot = std::pin::pin!(interp.ready());
        assert!(poll_once(boot.as_mut()).await.is_none());
        assert_eq!(interp.state(), ReadinessState::Fetching);
    }
    assert!(interp.state().is_failed());

    let err = boot_error(interp.ready().await);
    assert!(matches!(&*err, BootError::Interrupted));
    assert_eq!(transport.fetch_count("pypy.vm.js"), 1);
}
