//! 容器注册表的集成测试

mod common;

use common::{event_log, take, EventProcessor, LiveTracker, RecordingContainer};
use datafill::cache::CachingProcessor;
use datafill::container::{MapContainer, SharedContainer};
use datafill::errors::{BoxError, ContainerError};
use datafill::key::key_set;
use datafill::registry::{
    ContainerRegistry, DestroyOrder, LifecycleStage, RegistryPolicy,
};
use futures_util::future;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn recording(label: &str, events: &common::EventLog) -> Arc<RecordingContainer> {
    Arc::new(
        RecordingContainer::records("user", vec![(1, json!({"name": label}))])
            .labelled(label)
            .with_events(Arc::clone(events)),
    )
}

#[tokio::test]
async fn test_register_and_get_returns_registered_instance() {
    let registry = ContainerRegistry::new();
    let container: SharedContainer = Arc::new(MapContainer::from_records("dict", [(1, json!("a"))]));
    registry.register(Arc::clone(&container)).unwrap();

    let resolved = registry.get("dict").unwrap();
    assert!(Arc::ptr_eq(&resolved, &container));
    assert_eq!(resolved.fetch(&key_set([1])).await.unwrap().len(), 1);
    assert!(registry.contains("dict"));
    assert_eq!(registry.namespaces(), vec!["dict".to_string()]);
}

#[test]
fn test_unknown_namespace_is_not_found() {
    let registry = ContainerRegistry::new();
    let err = registry.get("missing").err().unwrap();
    assert!(matches!(err, ContainerError::NotFound { ref namespace } if namespace == "missing"));
    assert!(err.is_configuration_error());
}

#[test]
fn test_replace_fires_one_destroy_create_pair() {
    let events = event_log();
    let registry = ContainerRegistry::new();
    registry.add_processor(EventProcessor::new("audit", &events));

    let old = recording("old", &events);
    registry.register(old.clone() as SharedContainer).unwrap();
    assert_eq!(take(&events), vec!["audit:after-create:user"]);

    let new = recording("new", &events);
    registry.register(new.clone() as SharedContainer).unwrap();
    assert_eq!(
        take(&events),
        vec![
            "audit:after-destroy:user",
            "audit:after-create:user",
            "destroy:old",
        ]
    );
    assert_eq!(old.destroy_count(), 1);
    assert_eq!(new.destroy_count(), 0);

    let current = registry.get("user").unwrap();
    assert!(Arc::ptr_eq(&current, &(new as SharedContainer)));
    assert_eq!(registry.entry_info("user").unwrap().generation, 2);
    assert_eq!(registry.stats().replacements, 1);
}

#[test]
fn test_destroy_runs_once_after_processors_in_reverse_order() {
    let events = event_log();
    let registry = ContainerRegistry::new();
    registry.add_processor(EventProcessor::new("first", &events));
    registry.add_processor(EventProcessor::new("second", &events));

    let container = recording("only", &events);
    registry.register(container.clone() as SharedContainer).unwrap();
    take(&events);

    assert!(registry.remove("user").unwrap());
    assert_eq!(
        take(&events),
        vec![
            "second:after-destroy:user",
            "first:after-destroy:user",
            "destroy:only",
        ]
    );

    assert!(!registry.remove("user").unwrap());
    assert_eq!(container.destroy_count(), 1);
    assert!(take(&events).is_empty());
}

#[test]
fn test_forward_destroy_order() {
    let events = event_log();
    let registry = ContainerRegistry::with_policy(RegistryPolicy {
        destroy_order: DestroyOrder::Forward,
        ..RegistryPolicy::default()
    });
    registry.add_processor(EventProcessor::new("first", &events));
    registry.add_processor(EventProcessor::new("second", &events));

    registry.register(recording("only", &events) as SharedContainer).unwrap();
    take(&events);
    registry.remove("user").unwrap();

    assert_eq!(
        take(&events),
        vec![
            "first:after-destroy:user",
            "second:after-destroy:user",
            "destroy:only",
        ]
    );
}

#[test]
fn test_failed_after_destroy_keeps_previous_container() {
    let events = event_log();
    let registry = ContainerRegistry::new();
    let processor = EventProcessor::new("guard", &events);
    registry.add_processor(processor.clone());

    let old = recording("old", &events);
    registry.register(old.clone() as SharedContainer).unwrap();
    processor.fail_after_destroy.store(true, Ordering::SeqCst);

    let err = registry
        .register(recording("new", &events) as SharedContainer)
        .unwrap_err();
    match err {
        ContainerError::Lifecycle {
            ref processor,
            stage,
            ..
        } => {
            assert_eq!(processor, "guard");
            assert_eq!(stage, LifecycleStage::AfterDestroy);
        }
        other => panic!("unexpected error: {other}"),
    }

    let current = registry.get("user").unwrap();
    assert!(Arc::ptr_eq(&current, &(old.clone() as SharedContainer)));
    assert_eq!(old.destroy_count(), 0);
    assert_eq!(registry.entry_info("user").unwrap().generation, 1);

    // 移除同样被拒绝
    assert!(registry.remove("user").is_err());
    assert!(registry.contains("user"));
}

#[test]
fn test_before_register_veto_leaves_registry_untouched() {
    let events = event_log();
    let registry = ContainerRegistry::new();
    let processor = EventProcessor::new("veto", &events);
    processor.fail_before_register.store(true, Ordering::SeqCst);
    registry.add_processor(processor);

    let err = registry
        .register(recording("rejected", &events) as SharedContainer)
        .unwrap_err();
    assert!(matches!(
        err,
        ContainerError::Lifecycle {
            stage: LifecycleStage::BeforeRegister,
            ..
        }
    ));
    assert!(!registry.contains("user"));
    assert!(take(&events).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_use_creates_once() {
    let registry = Arc::new(ContainerRegistry::new());
    let created = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&created);

    registry
        .register_lazy("slow", move |namespace: &str| -> Result<SharedContainer, BoxError> {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            Ok(Arc::new(MapContainer::from_records(namespace, [(1, json!("a"))])))
        })
        .unwrap();

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let registry = Arc::clone(&registry);
            tokio::task::spawn_blocking(move || registry.get("slow"))
        })
        .collect();
    let resolved: Vec<SharedContainer> = future::join_all(handles)
        .await
        .into_iter()
        .map(|res| res.unwrap().unwrap())
        .collect();

    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert!(resolved.iter().all(|c| Arc::ptr_eq(c, &resolved[0])));
    assert_eq!(registry.stats().materializations, 1);
}

#[test]
fn test_failed_factory_is_retried() {
    let registry = ContainerRegistry::new();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);

    registry
        .register_lazy("flaky", move |namespace: &str| -> Result<SharedContainer, BoxError> {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err("connection refused".into());
            }
            Ok(Arc::new(MapContainer::from_records(namespace, [(1, json!("a"))])))
        })
        .unwrap();

    assert!(matches!(
        registry.get("flaky"),
        Err(ContainerError::FactoryFailed { .. })
    ));
    assert!(!registry.entry_info("flaky").unwrap().materialized);

    registry.get("flaky").unwrap();
    registry.get("flaky").unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert!(registry.entry_info("flaky").unwrap().materialized);
}

#[test]
fn test_lazy_entry_lifecycle() {
    let events = event_log();
    let registry = ContainerRegistry::new();
    registry.add_processor(EventProcessor::new("audit", &events));

    let factory_events = Arc::clone(&events);
    registry
        .register_lazy("user", move |_: &str| -> Result<SharedContainer, BoxError> {
            Ok(Arc::new(
                RecordingContainer::records("user", vec![])
                    .labelled("lazy")
                    .with_events(Arc::clone(&factory_events)),
            ))
        })
        .unwrap();

    let info = registry.entry_info("user").unwrap();
    assert!(info.lazy);
    assert!(!info.materialized);
    assert!(take(&events).is_empty());

    registry.get("user").unwrap();
    assert_eq!(take(&events), vec!["audit:after-create:user"]);

    registry.remove("user").unwrap();
    assert_eq!(
        take(&events),
        vec!["audit:after-destroy:user", "destroy:lazy"]
    );
}

#[test]
fn test_removing_unmaterialized_lazy_entry_skips_destroy() {
    let events = event_log();
    let registry = ContainerRegistry::new();
    registry.add_processor(EventProcessor::new("audit", &events));
    registry
        .register_lazy("never", |namespace: &str| -> Result<SharedContainer, BoxError> {
            Ok(Arc::new(MapContainer::from_records(namespace, [(1, json!("a"))])))
        })
        .unwrap();

    assert!(registry.remove("never").unwrap());
    assert!(take(&events).is_empty());
    assert!(registry.is_empty());
}

#[test]
fn test_clear_destroys_everything() {
    let events = event_log();
    let registry = ContainerRegistry::new();
    let a = Arc::new(RecordingContainer::records("a", vec![]).with_events(Arc::clone(&events)));
    let b = Arc::new(RecordingContainer::records("b", vec![]).with_events(Arc::clone(&events)));
    registry.register(a.clone() as SharedContainer).unwrap();
    registry.register(b.clone() as SharedContainer).unwrap();

    assert!(registry.clear().is_empty());
    assert!(registry.is_empty());
    assert_eq!(a.destroy_count(), 1);
    assert_eq!(b.destroy_count(), 1);
    assert_eq!(registry.stats().removals, 2);
}

#[test]
fn test_failed_after_create_on_replace_restores_previous() {
    let events = event_log();
    let registry = ContainerRegistry::new();
    let tracker = Arc::new(LiveTracker::default());
    let reject = EventProcessor::new("reject", &events);
    registry.add_processor(tracker.clone());
    registry.add_processor(reject.clone());

    let old = recording("old", &events);
    registry.register(old.clone() as SharedContainer).unwrap();
    assert!(tracker.is_live("user"));
    reject.fail_after_create.store(true, Ordering::SeqCst);

    let new = recording("new", &events);
    let err = registry.register(new.clone() as SharedContainer).unwrap_err();
    assert!(matches!(
        err,
        ContainerError::Lifecycle {
            stage: LifecycleStage::AfterCreate,
            ..
        }
    ));

    let current = registry.get("user").unwrap();
    assert!(Arc::ptr_eq(&current, &(old.clone() as SharedContainer)));
    assert!(tracker.is_live("user"));
    assert_eq!(old.destroy_count(), 0);
    assert_eq!(new.destroy_count(), 0);
    assert_eq!(registry.entry_info("user").unwrap().generation, 1);
}

#[test]
fn test_failed_init_on_replace_restores_previous() {
    let events = event_log();
    let registry = ContainerRegistry::new();
    let tracker = Arc::new(LiveTracker::default());
    registry.add_processor(EventProcessor::new("audit", &events));
    registry.add_processor(tracker.clone());

    let old = recording("old", &events);
    registry.register(old.clone() as SharedContainer).unwrap();
    take(&events);

    let new = Arc::new(
        RecordingContainer::records("user", vec![])
            .labelled("new")
            .failing_init(),
    );
    let err = registry.register(new.clone() as SharedContainer).unwrap_err();
    assert!(matches!(err, ContainerError::InitFailed { ref namespace, .. } if namespace == "user"));

    assert_eq!(
        take(&events),
        vec![
            "audit:after-destroy:user",
            "audit:after-create:user",
            "audit:after-destroy:user",
            "audit:after-create:user",
        ]
    );
    let current = registry.get("user").unwrap();
    assert!(Arc::ptr_eq(&current, &(old.clone() as SharedContainer)));
    assert!(tracker.is_live("user"));
    assert_eq!(old.destroy_count(), 0);
    assert_eq!(new.init_count(), 0);
    assert_eq!(registry.entry_info("user").unwrap().generation, 1);
}

#[test]
fn test_refused_remove_restores_processors() {
    let events = event_log();
    let registry = ContainerRegistry::new();
    let refuse = EventProcessor::new("refuse", &events);
    let tracker = Arc::new(LiveTracker::default());
    registry.add_processor(refuse.clone());
    registry.add_processor(tracker.clone());

    let container = Arc::new(RecordingContainer::records("d", vec![(1, json!("a"))]));
    registry.register(container.clone() as SharedContainer).unwrap();
    refuse.fail_after_destroy.store(true, Ordering::SeqCst);

    // 逆序销毁：tracker 先收到事件，refuse 随后拒绝
    let err = registry.remove("d").unwrap_err();
    assert!(matches!(
        err,
        ContainerError::Lifecycle {
            ref processor,
            stage: LifecycleStage::AfterDestroy,
            ..
        } if processor == "refuse"
    ));
    assert!(registry.contains("d"));
    assert!(tracker.is_live("d"));
    assert_eq!(container.destroy_count(), 0);

    refuse.fail_after_destroy.store(false, Ordering::SeqCst);
    assert!(registry.remove("d").unwrap());
    assert!(!tracker.is_live("d"));
    assert_eq!(container.destroy_count(), 1);
}

#[test]
fn test_init_runs_once_for_registered_instance() {
    let registry = ContainerRegistry::new();
    let container = Arc::new(RecordingContainer::records("user", vec![(1, json!("a"))]));
    registry.register(container.clone() as SharedContainer).unwrap();
    assert_eq!(container.init_count(), 1);

    for _ in 0..3 {
        registry.get("user").unwrap();
    }
    assert_eq!(container.init_count(), 1);
}

#[test]
fn test_lazy_init_runs_on_first_creation_only() {
    let registry = ContainerRegistry::new();
    let container = Arc::new(RecordingContainer::records("user", vec![(1, json!("a"))]));
    let produced = Arc::clone(&container);
    registry
        .register_lazy("user", move |_: &str| -> Result<SharedContainer, BoxError> {
            Ok(produced.clone() as SharedContainer)
        })
        .unwrap();
    assert_eq!(container.init_count(), 0);

    registry.get("user").unwrap();
    registry.get("user").unwrap();
    assert_eq!(container.init_count(), 1);
}

#[test]
fn test_init_failure_leaves_registry_unchanged() {
    let events = event_log();
    let registry = ContainerRegistry::new();
    registry.add_processor(EventProcessor::new("audit", &events));

    let broken = Arc::new(RecordingContainer::records("user", vec![]).failing_init());
    let err = registry.register(broken.clone() as SharedContainer).unwrap_err();
    assert!(matches!(err, ContainerError::InitFailed { .. }));
    assert!(!registry.contains("user"));
    assert_eq!(registry.stats().registrations, 0);
    assert_eq!(
        take(&events),
        vec!["audit:after-create:user", "audit:after-destroy:user"]
    );

    // 懒加载条目初始化失败后保持未创建状态，可以重试
    let flaky = Arc::new(RecordingContainer::records("lazy", vec![]).failing_init());
    let produced = Arc::clone(&flaky);
    registry
        .register_lazy("lazy", move |_: &str| -> Result<SharedContainer, BoxError> {
            Ok(produced.clone() as SharedContainer)
        })
        .unwrap();
    assert!(matches!(
        registry.get("lazy"),
        Err(ContainerError::InitFailed { .. })
    ));
    assert!(!registry.entry_info("lazy").unwrap().materialized);
    take(&events);

    flaky.fail_init.store(false, Ordering::SeqCst);
    registry.get("lazy").unwrap();
    assert_eq!(flaky.init_count(), 1);
    assert_eq!(take(&events), vec!["audit:after-create:lazy"]);
}

#[test]
fn test_cached_container_forwards_init() {
    let registry = ContainerRegistry::new();
    registry.add_processor(Arc::new(CachingProcessor::default()));

    let inner = Arc::new(RecordingContainer::records("user", vec![(1, json!("a"))]));
    registry.register(inner.clone() as SharedContainer).unwrap();
    let resolved = registry.get("user").unwrap();
    assert!(!Arc::ptr_eq(&resolved, &(inner.clone() as SharedContainer)));
    assert_eq!(inner.init_count(), 1);

    let broken = Arc::new(RecordingContainer::records("broken", vec![]).failing_init());
    assert!(matches!(
        registry.register(broken as SharedContainer),
        Err(ContainerError::InitFailed { .. })
    ));
    assert!(!registry.contains("broken"));
}
