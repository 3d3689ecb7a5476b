use async_trait::async_trait;
use cloudlink_core::{
    FieldMap, FieldValue, KindRegistry, Operations, ReconcilerConfig, RemoteError, RemoteService,
    ResourceKind, ResourceReconciler, ResourceRef, RetryPolicy, StatusConfig, TagConfig, TagSet,
    TimeoutConfig,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Scripted<T> = Mutex<VecDeque<Result<T, RemoteError>>>;

/// Remote service answering from per-operation scripts and recording calls
///
/// An operation with an empty script answers with an empty map; an empty
/// status script answers `NotFound`.
#[derive(Default)]
pub struct FakeService {
    responses: Mutex<HashMap<String, VecDeque<Result<FieldMap, RemoteError>>>>,
    statuses: Scripted<String>,
    tag_results: Scripted<()>,
    calls: Mutex<Vec<(String, FieldMap)>>,
    status_calls: Mutex<Vec<Vec<String>>>,
    tag_calls: Mutex<Vec<(ResourceRef, TagSet, Vec<String>)>>,
}

#[allow(dead_code)]
impl FakeService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, operation: &str, response: FieldMap) {
        self.script(operation, Ok(response));
    }

    pub fn fail(&self, operation: &str, code: &str) {
        self.script(operation, Err(RemoteError::new(code, "scripted failure")));
    }

    fn script(&self, operation: &str, result: Result<FieldMap, RemoteError>) {
        self.responses
            .lock()
            .unwrap()
            .entry(operation.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn status(&self, state: &str) {
        self.statuses.lock().unwrap().push_back(Ok(state.to_string()));
    }

    pub fn status_error(&self, code: &str) {
        self.statuses
            .lock()
            .unwrap()
            .push_back(Err(RemoteError::new(code, "scripted status failure")));
    }

    pub fn fail_tags(&self, code: &str) {
        self.tag_results
            .lock()
            .unwrap()
            .push_back(Err(RemoteError::new(code, "scripted tag failure")));
    }

    pub fn calls(&self) -> Vec<(String, FieldMap)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn requests_to(&self, operation: &str) -> Vec<FieldMap> {
        self.calls()
            .into_iter()
            .filter(|(op, _)| op == operation)
            .map(|(_, request)| request)
            .collect()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.requests_to(operation).len()
    }

    pub fn status_count(&self) -> usize {
        self.status_calls.lock().unwrap().len()
    }

    pub fn tag_calls(&self) -> Vec<(ResourceRef, TagSet, Vec<String>)> {
        self.tag_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteService for FakeService {
    fn name(&self) -> &str {
        "fake"
    }

    async fn invoke(&self, operation: &str, request: &FieldMap) -> Result<FieldMap, RemoteError> {
        self.calls
            .lock()
            .unwrap()
            .push((operation.to_string(), request.clone()));
        self.responses
            .lock()
            .unwrap()
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(FieldMap::new()))
    }

    async fn fetch_status(&self, _kind: &str, segments: &[String]) -> Result<String, RemoteError> {
        self.status_calls.lock().unwrap().push(segments.to_vec());
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(RemoteError::new("NotFound", "no status scripted")))
    }

    async fn apply_tags(
        &self,
        resource: &ResourceRef,
        to_replace: &TagSet,
        to_delete: &[String],
    ) -> Result<(), RemoteError> {
        self.tag_calls.lock().unwrap().push((
            resource.clone(),
            to_replace.clone(),
            to_delete.to_vec(),
        ));
        self.tag_results.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

pub fn fields<const N: usize>(entries: [(&str, FieldValue); N]) -> FieldMap {
    entries
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

/// Short deadlines and delays, for use with a paused clock
pub fn fast_config() -> ReconcilerConfig {
    ReconcilerConfig {
        retry: RetryPolicy::fixed(Duration::from_millis(100)),
        poll_interval_ms: 100,
        timeouts: TimeoutConfig::uniform(10),
    }
}

pub fn reconciler(service: &Arc<FakeService>) -> ResourceReconciler {
    ResourceReconciler::new(service.clone(), fast_config())
}

/// Synchronous kind with a single-segment identity
pub fn api_group() -> ResourceKind {
    ResourceKind::new(
        "api_gateway_group",
        Operations::new("CreateApiGroup", "DescribeApiGroup", "DeleteApiGroup")
            .with_update("ModifyApiGroup"),
        ["id"],
    )
}

/// Taggable kind whose tags are listed through a separate operation
#[allow(dead_code)]
pub fn tagged_group() -> ResourceKind {
    api_group().with_tags(TagConfig::new("apigroup").listed_by("ListTagResources"))
}

/// Asynchronous kind with a two-segment identity
#[allow(dead_code)]
pub fn vswitch() -> ResourceKind {
    ResourceKind::new(
        "vswitch",
        Operations::new("CreateVSwitch", "DescribeVSwitch", "DeleteVSwitch")
            .with_update("ModifyVSwitch"),
        ["vpc_id", "vswitch_id"],
    )
    .with_status(StatusConfig::ready_in(["Available"]).with_failure(["Failed"]))
}

#[allow(dead_code)]
pub fn registry() -> KindRegistry {
    let mut registry = KindRegistry::new();
    registry.add(api_group());
    registry.add(vswitch());
    registry
}
