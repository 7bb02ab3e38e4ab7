//! Response Coordinator (C6): bridges the synchronous REST contract to the
//! asynchronous pipeline. The *only* response path — no global routing maps
//! per the REDESIGN FLAGS.
//!
//! Grounded on `examples/original_source/.../response/coordinator.py`
//! (`RLock`-guarded request map, `Event`-based single-shot completion,
//! idempotent `notify_completion`, synthesised `PROCESSING_TIMEOUT`),
//! translated to `tokio::sync::oneshot` + `tokio::time::timeout` per the
//! REDESIGN FLAGS' sync/async bridge guidance.

use crate::error::{ApiError, CoordinatorError};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Validating,
    Matching,
    Settling,
    Completed,
    Timeout,
    Error,
}

impl RequestStatus {
    fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Timeout | RequestStatus::Error)
    }
}

/// The payload handed back to the REST caller — shape mirrors the external
/// `ApiResponse` interface (spec §6), minus transport framing.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    pub order_id: Option<Uuid>,
    pub error: Option<ApiError>,
}

impl ApiResponse {
    pub fn success(order_id: Option<Uuid>) -> Self {
        Self { success: true, order_id, error: None }
    }

    pub fn failure(error: ApiError) -> Self {
        Self { success: false, order_id: None, error: Some(error) }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseResult {
    pub request_id: String,
    pub api_response: ApiResponse,
    pub final_status: RequestStatus,
}

pub struct Registration {
    pub request_id: String,
    pub timeout_at: Instant,
}

struct PendingRequest {
    team_id: String,
    status: RequestStatus,
    registered_at: Instant,
    timeout_at: Instant,
    /// The stage the request was last observed in, surfaced on synthesised
    /// timeouts for debuggability (per SPEC_FULL §9).
    current_stage: Option<String>,
    order_id: Option<Uuid>,
    api_response: Option<ApiResponse>,
    completion: Option<oneshot::Sender<ResponseResult>>,
}

pub struct CoordinatorConfig {
    pub default_timeout: Duration,
    pub max_pending_requests: usize,
    pub cleanup_interval: Duration,
    pub request_id_prefix: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_millis(500),
            max_pending_requests: 10_000,
            cleanup_interval: Duration::from_secs(30),
            request_id_prefix: "req".to_string(),
        }
    }
}

pub struct ResponseCoordinator {
    config: CoordinatorConfig,
    requests: Mutex<HashMap<String, PendingRequest>>,
    shutting_down: Mutex<bool>,
    next_id: Mutex<u64>,
}

impl ResponseCoordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            requests: Mutex::new(HashMap::new()),
            shutting_down: Mutex::new(false),
            next_id: Mutex::new(0),
        }
    }

    fn next_request_id(&self) -> String {
        let mut next_id = self.next_id.lock();
        *next_id += 1;
        format!("{}-{}", self.config.request_id_prefix, *next_id)
    }

    /// Register a request and return its id + deadline. Fails fast if the
    /// coordinator is shutting down or over capacity.
    pub fn register_request(
        &self,
        team_id: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<(Registration, oneshot::Receiver<ResponseResult>), CoordinatorError> {
        if *self.shutting_down.lock() {
            return Err(CoordinatorError::ShuttingDown);
        }

        let mut requests = self.requests.lock();
        if requests.len() >= self.config.max_pending_requests {
            return Err(CoordinatorError::Overloaded {
                pending: requests.len(),
                capacity: self.config.max_pending_requests,
            });
        }

        let request_id = self.next_request_id();
        let now = Instant::now();
        let timeout_at = now + timeout.unwrap_or(self.config.default_timeout);
        let (tx, rx) = oneshot::channel();

        requests.insert(
            request_id.clone(),
            PendingRequest {
                team_id: team_id.into(),
                status: RequestStatus::Pending,
                registered_at: now,
                timeout_at,
                current_stage: None,
                order_id: None,
                api_response: None,
                completion: Some(tx),
            },
        );

        Ok((Registration { request_id, timeout_at }, rx))
    }

    /// Park the caller until either a terminal notification arrives or the
    /// deadline elapses, in which case the coordinator synthesises the
    /// timeout response itself and records it.
    pub async fn wait_for_completion(
        &self,
        request_id: String,
        receiver: oneshot::Receiver<ResponseResult>,
        timeout_at: Instant,
    ) -> ResponseResult {
        match tokio::time::timeout_at(timeout_at, receiver).await {
            Ok(Ok(result)) => result,
            _ => self.synthesize_timeout(request_id),
        }
    }

    fn synthesize_timeout(&self, request_id: String) -> ResponseResult {
        let mut requests = self.requests.lock();
        let stage = requests.get(&request_id).and_then(|r| r.current_stage.clone());
        requests.remove(&request_id);

        ResponseResult {
            request_id,
            api_response: ApiResponse::failure(ApiError::processing_timeout(stage.as_deref())),
            final_status: RequestStatus::Timeout,
        }
    }

    /// Idempotent: returns `true` for both the first notification and any
    /// redundant later one; `false` only if the id is unknown.
    pub fn notify_completion(&self, request_id: &str, api_response: ApiResponse, order_id: Option<Uuid>) -> bool {
        let mut requests = self.requests.lock();
        let Some(pending) = requests.get_mut(request_id) else {
            return false;
        };

        if pending.status.is_terminal() {
            return true;
        }

        pending.status = if api_response.success { RequestStatus::Completed } else { RequestStatus::Error };
        pending.order_id = order_id.or(pending.order_id);
        pending.api_response = Some(api_response.clone());

        let final_status = pending.status;
        if let Some(sender) = pending.completion.take() {
            let _ = sender.send(ResponseResult {
                request_id: request_id.to_string(),
                api_response,
                final_status,
            });
        }
        true
    }

    /// Observational only: non-terminal transitions, no-op once terminal.
    pub fn update_status(&self, request_id: &str, status: RequestStatus, stage_details: Option<String>) -> bool {
        let mut requests = self.requests.lock();
        let Some(pending) = requests.get_mut(request_id) else {
            return false;
        };
        if pending.status.is_terminal() {
            return false;
        }
        pending.status = status;
        if stage_details.is_some() {
            pending.current_stage = stage_details;
        }
        true
    }

    pub fn get_request_status(&self, request_id: &str) -> Option<RequestStatus> {
        self.requests.lock().get(request_id).map(|r| r.status)
    }

    /// Sweep expired and long-completed entries; returns the count removed.
    pub fn cleanup_completed_requests(&self) -> usize {
        let now = Instant::now();
        let mut requests = self.requests.lock();
        let before = requests.len();
        requests.retain(|_, pending| {
            let expired = now >= pending.timeout_at && pending.completion.is_none();
            let stale_terminal = pending.status.is_terminal() && now.duration_since(pending.registered_at) > self.config.cleanup_interval;
            !(expired || stale_terminal)
        });
        before - requests.len()
    }

    /// Reject new registrations and synthesise `SERVICE_SHUTDOWN` for every
    /// outstanding wait.
    pub fn shutdown(&self) {
        *self.shutting_down.lock() = true;
        let mut requests = self.requests.lock();
        for (request_id, pending) in requests.iter_mut() {
            if pending.status.is_terminal() {
                continue;
            }
            pending.status = RequestStatus::Error;
            if let Some(sender) = pending.completion.take() {
                let _ = sender.send(ResponseResult {
                    request_id: request_id.clone(),
                    api_response: ApiResponse::failure(ApiError::service_shutdown()),
                    final_status: RequestStatus::Error,
                });
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notification_wakes_the_waiter_exactly_once() {
        let coordinator = ResponseCoordinator::new(CoordinatorConfig::default());
        let (registration, receiver) = coordinator.register_request("TEAM_A", None).unwrap();
        let request_id = registration.request_id.clone();

        let order_id = Uuid::new_v4();
        let notified = coordinator.notify_completion(&request_id, ApiResponse::success(Some(order_id)), Some(order_id));
        assert!(notified);

        let result = coordinator
            .wait_for_completion(request_id.clone(), receiver, registration.timeout_at)
            .await;
        assert_eq!(result.final_status, RequestStatus::Completed);
        assert!(result.api_response.success);
    }

    #[tokio::test]
    async fn redundant_notification_is_idempotent() {
        let coordinator = ResponseCoordinator::new(CoordinatorConfig::default());
        let (registration, _receiver) = coordinator.register_request("TEAM_A", None).unwrap();
        let request_id = registration.request_id;

        assert!(coordinator.notify_completion(&request_id, ApiResponse::success(None), None));
        assert!(coordinator.notify_completion(&request_id, ApiResponse::success(None), None));
    }

    #[tokio::test]
    async fn unnotified_request_times_out() {
        let coordinator = ResponseCoordinator::new(CoordinatorConfig::default());
        let (registration, receiver) = coordinator
            .register_request("TEAM_A", Some(Duration::from_millis(50)))
            .unwrap();
        let request_id = registration.request_id.clone();

        let result = coordinator
            .wait_for_completion(request_id.clone(), receiver, registration.timeout_at)
            .await;
        assert_eq!(result.final_status, RequestStatus::Timeout);
        assert_eq!(result.api_response.error.as_ref().unwrap().code, "PROCESSING_TIMEOUT");

        // Late notification after cleanup: unknown id, no-op.
        assert!(!coordinator.notify_completion(&request_id, ApiResponse::success(None), None));
    }

    #[test]
    fn registration_fails_once_shutdown() {
        let coordinator = ResponseCoordinator::new(CoordinatorConfig::default());
        coordinator.shutdown();
        let err = coordinator.register_request("TEAM_A", None).unwrap_err();
        assert!(matches!(err, CoordinatorError::ShuttingDown));
    }

    #[test]
    fn registration_fails_over_capacity() {
        let mut config = CoordinatorConfig::default();
        config.max_pending_requests = 1;
        let coordinator = ResponseCoordinator::new(config);
        coordinator.register_request("TEAM_A", None).unwrap();
        let err = coordinator.register_request("TEAM_B", None).unwrap_err();
        assert!(matches!(err, CoordinatorError::Overloaded { .. }));
    }
}
