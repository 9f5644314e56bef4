//! 集成测试共用的容器与处理器

#![allow(dead_code)]

use async_trait::async_trait;
use datafill::container::{lookup, Container, ContainerLifecycle, FetchResult, Fetched, SharedContainer};
use datafill::errors::{BoxError, ContainerError};
use datafill::key::{Key, KeySet};
use datafill::registry::{LifecycleProcessor, Registration};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn take(events: &EventLog) -> Vec<String> {
    std::mem::take(&mut *events.lock())
}

/// 记录每次查询请求的内存容器
pub struct RecordingContainer {
    namespace: String,
    label: String,
    data: FetchResult,
    delay: Option<Duration>,
    calls: Mutex<Vec<KeySet>>,
    initialized: AtomicUsize,
    destroyed: AtomicUsize,
    pub fail_init: AtomicBool,
    events: Option<EventLog>,
}

impl RecordingContainer {
    pub fn new(namespace: &str, data: Vec<(Key, Fetched)>) -> Self {
        Self {
            namespace: namespace.to_string(),
            label: namespace.to_string(),
            data: data.into_iter().collect(),
            delay: None,
            calls: Mutex::new(Vec::new()),
            initialized: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
            fail_init: AtomicBool::new(false),
            events: None,
        }
    }

    /// 一对一数据：整数键 -> 记录
    pub fn records(namespace: &str, records: Vec<(i64, Value)>) -> Self {
        Self::new(
            namespace,
            records
                .into_iter()
                .map(|(k, v)| (Key::Int(k), Fetched::One(v)))
                .collect(),
        )
    }

    pub fn labelled(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = Some(events);
        self
    }

    pub fn calls(&self) -> Vec<KeySet> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn failing_init(self) -> Self {
        self.fail_init.store(true, Ordering::SeqCst);
        self
    }

    pub fn init_count(&self) -> usize {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn destroy_count(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Container for RecordingContainer {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn fetch(&self, keys: &KeySet) -> Result<FetchResult, ContainerError> {
        self.calls.lock().push(keys.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(keys
            .iter()
            .filter_map(|key| lookup(&self.data, key).map(|found| (key.clone(), found.clone())))
            .collect())
    }

    fn lifecycle(&self) -> Option<&dyn ContainerLifecycle> {
        Some(self)
    }
}

impl ContainerLifecycle for RecordingContainer {
    fn init(&self) -> Result<(), BoxError> {
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(format!("{} cannot connect", self.label).into());
        }
        self.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn destroy(&self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        if let Some(events) = &self.events {
            events.lock().push(format!("destroy:{}", self.label));
        }
    }
}

/// 总是失败的容器
pub struct FailingContainer {
    pub namespace: String,
}

#[async_trait]
impl Container for FailingContainer {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn fetch(&self, _keys: &KeySet) -> Result<FetchResult, ContainerError> {
        Err(ContainerError::fetch_failed(&self.namespace, "backend unavailable"))
    }
}

/// 记录生命周期事件的处理器，可配置在某个阶段失败
pub struct EventProcessor {
    name: String,
    events: EventLog,
    pub fail_before_register: AtomicBool,
    pub fail_after_create: AtomicBool,
    pub fail_after_destroy: AtomicBool,
}

impl EventProcessor {
    pub fn new(name: &str, events: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            events: Arc::clone(events),
            fail_before_register: AtomicBool::new(false),
            fail_after_create: AtomicBool::new(false),
            fail_after_destroy: AtomicBool::new(false),
        })
    }
}

impl LifecycleProcessor for EventProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn before_register(&self, namespace: &str, registration: Registration) -> Result<Registration, BoxError> {
        if self.fail_before_register.load(Ordering::SeqCst) {
            return Err(format!("{} rejects {}", self.name, namespace).into());
        }
        Ok(registration)
    }

    fn after_create(&self, namespace: &str, container: SharedContainer) -> Result<SharedContainer, BoxError> {
        if self.fail_after_create.load(Ordering::SeqCst) {
            return Err(format!("{} rejects instance of {}", self.name, namespace).into());
        }
        self.events
            .lock()
            .push(format!("{}:after-create:{}", self.name, namespace));
        Ok(container)
    }

    fn after_destroy(&self, namespace: &str, _container: &SharedContainer) -> Result<(), BoxError> {
        if self.fail_after_destroy.load(Ordering::SeqCst) {
            return Err(format!("{} refuses to release {}", self.name, namespace).into());
        }
        self.events
            .lock()
            .push(format!("{}:after-destroy:{}", self.name, namespace));
        Ok(())
    }
}

/// 按生命周期事件维护"存活"命名空间集合的处理器
#[derive(Default)]
pub struct LiveTracker {
    live: Mutex<BTreeSet<String>>,
}

impl LiveTracker {
    pub fn is_live(&self, namespace: &str) -> bool {
        self.live.lock().contains(namespace)
    }
}

impl LifecycleProcessor for LiveTracker {
    fn name(&self) -> &str {
        "tracker"
    }

    fn after_create(&self, namespace: &str, container: SharedContainer) -> Result<SharedContainer, BoxError> {
        self.live.lock().insert(namespace.to_string());
        Ok(container)
    }

    fn after_destroy(&self, namespace: &str, _container: &SharedContainer) -> Result<(), BoxError> {
        self.live.lock().remove(namespace);
        Ok(())
    }
}
