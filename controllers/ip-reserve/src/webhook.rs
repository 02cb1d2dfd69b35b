//! Pod admission webhook
//!
//! Validating webhook registered for pod `DELETE` and the `pods/eviction`
//! subresource. It never blocks on its own judgement: the request is denied
//! only when recording the pod's addresses failed, so the caller retries the
//! removal instead of losing the reservation.

use crate::error::ControllerError;
use crate::retention::{ReserveOutcome, RetentionStore};
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use tracing::{debug, error, info, warn};

/// Subresource used by the eviction API
pub const EVICTION_SUBRESOURCE: &str = "eviction";

/// True for requests that take a pod away: deletes and evictions.
pub fn is_pod_removal(request: &AdmissionRequest<DynamicObject>) -> bool {
    let eviction = [&request.sub_resource, &request.request_sub_resource]
        .into_iter()
        .any(|sub| sub.as_deref() == Some(EVICTION_SUBRESOURCE));
    matches!(request.operation, Operation::Delete) || eviction
}

/// Reserves the pod's addresses if the request removes a pod.
pub async fn validate_pod_removal(
    engine: &RetentionStore,
    request: &AdmissionRequest<DynamicObject>,
) -> Result<Option<ReserveOutcome>, ControllerError> {
    if !is_pod_removal(request) {
        return Ok(None);
    }
    let namespace = request.namespace.as_deref().unwrap_or_default();
    engine.reserve(namespace, &request.name).await.map(Some)
}

/// Full review round trip: always answers, denying on engine errors.
pub async fn review_response(
    engine: &RetentionStore,
    review: AdmissionReview<DynamicObject>,
) -> AdmissionReview<DynamicObject> {
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Invalid admission review");
            return AdmissionResponse::invalid(e.to_string()).into_review();
        }
    };

    debug!(
        uid = %request.uid,
        namespace = ?request.namespace,
        name = %request.name,
        operation = ?request.operation,
        sub_resource = ?request.sub_resource,
        "Admission request"
    );

    let response = AdmissionResponse::from(&request);
    match validate_pod_removal(engine, &request).await {
        Ok(Some(outcome)) => {
            info!(name = %request.name, ?outcome, "Pod removal admitted");
            response.into_review()
        }
        Ok(None) => response.into_review(),
        Err(e) => {
            error!(name = %request.name, namespace = ?request.namespace, error = %e, "Denied pod removal");
            response.deny(e.to_string()).into_review()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use cluster_store::MockClusterStore;
    use serde_json::json;

    fn review(operation: &str, sub_resource: Option<&str>, namespace: &str, name: &str) -> AdmissionReview<DynamicObject> {
        serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": {"group": "", "version": "v1", "kind": "Pod"},
                "resource": {"group": "", "version": "v1", "resource": "pods"},
                "subResource": sub_resource,
                "requestSubResource": sub_resource,
                "name": name,
                "namespace": namespace,
                "operation": operation,
                "userInfo": {"username": "system:serviceaccount:kube-system:node-controller"},
                "object": null,
                "oldObject": null,
                "dryRun": false
            }
        }))
        .unwrap()
    }

    fn allowed(review: &AdmissionReview<DynamicObject>) -> bool {
        review.response.as_ref().unwrap().allowed
    }

    fn store_with_pod() -> MockClusterStore {
        let store = MockClusterStore::new();
        add_opted_in_namespace(&store, "redis");
        store.add_instance(create_stateful_instance("redis", "redis-0", &["10.4.0.2"]));
        store
    }

    #[test]
    fn test_is_pod_removal() {
        let delete: AdmissionRequest<DynamicObject> = review("DELETE", None, "redis", "redis-0").try_into().unwrap();
        let evict: AdmissionRequest<DynamicObject> =
            review("CREATE", Some("eviction"), "redis", "redis-0").try_into().unwrap();
        let update: AdmissionRequest<DynamicObject> =
            review("UPDATE", Some("status"), "redis", "redis-0").try_into().unwrap();

        assert!(is_pod_removal(&delete));
        assert!(is_pod_removal(&evict));
        assert!(!is_pod_removal(&update));
    }

    #[tokio::test]
    async fn test_delete_reserves_and_allows() {
        let store = store_with_pod();
        let engine = create_default_engine(&store);

        let out = review_response(&engine, review("DELETE", None, "redis", "redis-0")).await;

        assert!(allowed(&out));
        assert!(store.tracking_data().unwrap().contains_key("10.4.0.2"));
        assert_eq!(store.reserved_cidrs().unwrap(), strings(&[SENTINEL, "10.4.0.2"]));
    }

    #[tokio::test]
    async fn test_eviction_reserves() {
        let store = store_with_pod();
        let engine = create_default_engine(&store);

        let out = review_response(&engine, review("CREATE", Some("eviction"), "redis", "redis-0")).await;

        assert!(allowed(&out));
        assert!(store.tracking_data().is_some());
    }

    #[tokio::test]
    async fn test_other_operations_pass_through() {
        let store = store_with_pod();
        let engine = create_default_engine(&store);

        let out = review_response(&engine, review("UPDATE", None, "redis", "redis-0")).await;

        assert!(allowed(&out));
        assert_eq!(store.call_count("namespace_labels"), 0);
    }

    #[tokio::test]
    async fn test_engine_error_denies() {
        let store = MockClusterStore::new();
        add_opted_in_namespace(&store, "redis");
        let engine = create_default_engine(&store);

        let out = review_response(&engine, review("DELETE", None, "redis", "redis-9")).await;

        let response = out.response.unwrap();
        assert!(!response.allowed);
        assert!(response.result.message.contains("redis/redis-9"));
    }

    #[tokio::test]
    async fn test_filtered_pod_is_allowed() {
        let store = MockClusterStore::new();
        let engine = create_default_engine(&store);

        let out = review_response(&engine, review("DELETE", None, "default", "web-1")).await;

        assert!(allowed(&out));
        assert!(store.tracking_data().is_none());
    }

    #[tokio::test]
    async fn test_review_without_request_is_invalid() {
        let engine = create_default_engine(&MockClusterStore::new());
        let empty: AdmissionReview<DynamicObject> = serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview"
        }))
        .unwrap();

        let out = review_response(&engine, empty).await;

        assert!(!allowed(&out));
    }
}
