use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::models::identity::{Identity, Role};
use crate::models::request::{NewTripRequest, RequestStatus, TripRequest};
use crate::observability::metrics::Metrics;
use crate::store::{paths, DataStore};

// Conditional writes only lose to another writer, and the request has a single
// mutable edge, so the second attempt always sees a terminal status.
const MAX_TRANSITION_ATTEMPTS: usize = 3;

pub struct RequestLifecycle {
    store: Arc<dyn DataStore>,
    metrics: Metrics,
}

impl RequestLifecycle {
    pub fn new(store: Arc<dyn DataStore>, metrics: Metrics) -> Self {
        Self { store, metrics }
    }

    pub async fn create_request(
        &self,
        identity: &Identity,
        draft: NewTripRequest,
    ) -> Result<TripRequest, AppError> {
        identity.require_role(Role::Rider)?;
        draft.validate(Utc::now().date_naive())?;

        let id = self.store.push(paths::REQUESTS).await?;
        let request = TripRequest::new(id, identity.user_id.clone(), draft);

        // one write of the full record; readers never see a partial request
        self.store
            .set(&paths::request(&request.id)?, serde_json::to_value(&request)?)
            .await?;

        self.metrics
            .trip_requests_total
            .with_label_values(&["created"])
            .inc();
        info!(
            request_id = %request.id,
            rider_id = %request.rider_id,
            fare = request.fare,
            "trip request created"
        );

        Ok(request)
    }

    pub async fn get(&self, request_id: &str) -> Result<TripRequest, AppError> {
        let (request, _) = self.load(request_id).await?;
        Ok(request)
    }

    pub async fn accept(
        &self,
        identity: &Identity,
        request_id: &str,
    ) -> Result<TripRequest, AppError> {
        identity.require_role(Role::Conductor)?;
        let otp = generate_otp();

        let accepted = self
            .transition(request_id, RequestStatus::Accepted, |current| {
                current.accepted(&identity.user_id, otp.clone())
            })
            .await?;

        info!(
            request_id = %accepted.id,
            conductor_id = %identity.user_id,
            "trip request accepted"
        );
        Ok(accepted)
    }

    pub async fn reject(
        &self,
        identity: &Identity,
        request_id: &str,
    ) -> Result<TripRequest, AppError> {
        identity.require_role(Role::Conductor)?;

        let rejected = self
            .transition(request_id, RequestStatus::Rejected, TripRequest::rejected)
            .await?;

        info!(
            request_id = %rejected.id,
            conductor_id = %identity.user_id,
            "trip request rejected"
        );
        Ok(rejected)
    }

    pub async fn list_requests_for_user(
        &self,
        identity: &Identity,
    ) -> Result<Vec<TripRequest>, AppError> {
        let user = Value::String(identity.user_id.clone());

        let as_rider = self
            .store
            .query_by_index(paths::REQUESTS, paths::RIDER_INDEX, &user)
            .await?;
        let as_conductor = self
            .store
            .query_by_index(paths::REQUESTS, paths::CONDUCTOR_INDEX, &user)
            .await?;

        let mut seen = HashSet::new();
        let mut requests = Vec::with_capacity(as_rider.len() + as_conductor.len());
        for raw in as_rider.into_iter().chain(as_conductor) {
            let request: TripRequest = serde_json::from_value(raw)?;
            if seen.insert(request.id.clone()) {
                requests.push(request);
            }
        }

        Ok(requests)
    }

    pub async fn verify_otp(
        &self,
        identity: &Identity,
        request_id: &str,
        code: &str,
    ) -> Result<(), AppError> {
        identity.require_role(Role::Conductor)?;
        let request = self.get(request_id).await?;

        if request.status != RequestStatus::Accepted {
            return Err(AppError::InvalidTransition {
                from: request.status,
                to: RequestStatus::Accepted,
            });
        }
        if !request.is_accepted_by(&identity.user_id) {
            return Err(AppError::Forbidden(format!(
                "request {request_id} was accepted by another conductor"
            )));
        }

        match request.otp.as_deref() {
            Some(expected) if expected == code.trim() => {
                info!(request_id, conductor_id = %identity.user_id, "trip otp verified");
                Ok(())
            }
            _ => Err(AppError::OtpMismatch),
        }
    }

    async fn load(&self, request_id: &str) -> Result<(TripRequest, Value), AppError> {
        let raw = self
            .store
            .get(&paths::request(request_id)?)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("request {request_id} not found")))?;

        let request = serde_json::from_value(raw.clone())?;
        Ok((request, raw))
    }

    async fn transition<F>(
        &self,
        request_id: &str,
        target: RequestStatus,
        apply: F,
    ) -> Result<TripRequest, AppError>
    where
        F: Fn(&TripRequest) -> Result<TripRequest, AppError>,
    {
        let path = paths::request(request_id)?;

        for attempt in 1..=MAX_TRANSITION_ATTEMPTS {
            let (current, raw) = self.load(request_id).await?;

            let next = match apply(&current) {
                Ok(next) => next,
                Err(err @ AppError::InvalidTransition { .. }) => {
                    self.metrics.transition_conflicts_total.inc();
                    warn!(
                        request_id,
                        from = ?current.status,
                        to = ?target,
                        "refused request transition"
                    );
                    return Err(err);
                }
                Err(err) => return Err(err),
            };

            if self
                .store
                .conditional_set(&path, &raw, serde_json::to_value(&next)?)
                .await?
            {
                let outcome = match target {
                    RequestStatus::Accepted => "accepted",
                    RequestStatus::Rejected => "rejected",
                    RequestStatus::Pending => "pending",
                };
                self.metrics
                    .trip_requests_total
                    .with_label_values(&[outcome])
                    .inc();
                return Ok(next);
            }

            debug!(request_id, attempt, "conditional write lost; re-reading request");
        }

        Err(AppError::StoreUnavailable(format!(
            "request {request_id} kept changing during transition"
        )))
    }
}

fn generate_otp() -> String {
    format!("{:04}", rand::thread_rng().gen_range(0..10_000))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::RequestLifecycle;
    use crate::error::AppError;
    use crate::models::identity::{Identity, Role};
    use crate::models::request::{NewTripRequest, RequestStatus};
    use crate::observability::metrics::Metrics;
    use crate::store::memory::InMemoryStore;

    fn rider(id: &str) -> Identity {
        Identity::new(id, Role::Rider)
    }

    fn conductor(id: &str) -> Identity {
        Identity::new(id, Role::Conductor)
    }

    fn draft() -> NewTripRequest {
        NewTripRequest {
            pickup: "12 Harbour Road".to_string(),
            destination: "Central Station".to_string(),
            fare: 150,
            pre_book_date: None,
        }
    }

    fn setup() -> (Arc<InMemoryStore>, RequestLifecycle) {
        let store = Arc::new(InMemoryStore::new());
        let lifecycle = RequestLifecycle::new(store.clone(), Metrics::new());
        (store, lifecycle)
    }

    #[tokio::test]
    async fn created_request_is_pending_and_readable() {
        let (_store, lifecycle) = setup();
        let created = lifecycle.create_request(&rider("u1"), draft()).await.unwrap();

        assert_eq!(created.status, RequestStatus::Pending);
        assert!(created.accepted_by.is_none());
        assert_eq!(lifecycle.get(&created.id).await.unwrap(), created);
    }

    #[tokio::test]
    async fn only_riders_create_and_only_conductors_decide() {
        let (_store, lifecycle) = setup();

        assert!(matches!(
            lifecycle.create_request(&conductor("c1"), draft()).await,
            Err(AppError::Forbidden(_))
        ));

        let created = lifecycle.create_request(&rider("u1"), draft()).await.unwrap();
        assert!(matches!(
            lifecycle.accept(&rider("u2"), &created.id).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            lifecycle.reject(&Identity::new("o1", Role::Owner), &created.id).await,
            Err(AppError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn accept_sets_conductor_and_otp() {
        let (_store, lifecycle) = setup();
        let created = lifecycle.create_request(&rider("u1"), draft()).await.unwrap();

        let accepted = lifecycle.accept(&conductor("c1"), &created.id).await.unwrap();
        assert_eq!(accepted.status, RequestStatus::Accepted);
        assert_eq!(accepted.accepted_by.as_deref(), Some("c1"));
        assert_eq!(accepted.otp.as_ref().map(String::len), Some(4));

        let stored = lifecycle.get(&created.id).await.unwrap();
        assert_eq!(stored, accepted);
    }

    #[tokio::test]
    async fn blank_conductor_id_never_accepts() {
        let (_store, lifecycle) = setup();
        let created = lifecycle.create_request(&rider("u1"), draft()).await.unwrap();

        assert!(matches!(
            lifecycle.accept(&conductor(""), &created.id).await,
            Err(AppError::BadRequest(_))
        ));

        let stored = lifecycle.get(&created.id).await.unwrap();
        assert_eq!(stored.status, RequestStatus::Pending);
        assert!(stored.accepted_by.is_none());
    }

    #[tokio::test]
    async fn terminal_requests_refuse_transitions_without_mutation() {
        let (_store, lifecycle) = setup();
        let created = lifecycle.create_request(&rider("u1"), draft()).await.unwrap();
        let rejected = lifecycle.reject(&conductor("c1"), &created.id).await.unwrap();
        assert_eq!(rejected.status, RequestStatus::Rejected);

        assert!(matches!(
            lifecycle.accept(&conductor("c2"), &created.id).await,
            Err(AppError::InvalidTransition {
                from: RequestStatus::Rejected,
                to: RequestStatus::Accepted,
            })
        ));
        assert!(matches!(
            lifecycle.reject(&conductor("c2"), &created.id).await,
            Err(AppError::InvalidTransition { .. })
        ));

        assert_eq!(lifecycle.get(&created.id).await.unwrap(), rejected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_accepts_have_exactly_one_winner() {
        let (store, _) = setup();
        let lifecycle = Arc::new(RequestLifecycle::new(store, Metrics::new()));
        let created = lifecycle.create_request(&rider("u1"), draft()).await.unwrap();

        let mut handles = Vec::new();
        for n in 0..8 {
            let lifecycle = lifecycle.clone();
            let id = created.id.clone();
            handles.push(tokio::spawn(async move {
                let conductor_id = format!("c{n}");
                let outcome = lifecycle.accept(&conductor(&conductor_id), &id).await;
                (conductor_id, outcome)
            }));
        }

        let mut winners = Vec::new();
        for handle in handles {
            let (conductor_id, outcome) = handle.await.unwrap();
            match outcome {
                Ok(_) => winners.push(conductor_id),
                Err(err) => assert!(
                    matches!(err, AppError::InvalidTransition { .. }),
                    "unexpected error {err:?}"
                ),
            }
        }

        assert_eq!(winners.len(), 1);
        let stored = lifecycle.get(&created.id).await.unwrap();
        assert_eq!(stored.accepted_by.as_deref(), Some(winners[0].as_str()));
    }

    #[tokio::test]
    async fn list_covers_rider_and_accepting_conductor() {
        let (_store, lifecycle) = setup();
        let first = lifecycle.create_request(&rider("u1"), draft()).await.unwrap();
        let second = lifecycle.create_request(&rider("u1"), draft()).await.unwrap();
        let other = lifecycle.create_request(&rider("u2"), draft()).await.unwrap();
        lifecycle.accept(&conductor("c1"), &other.id).await.unwrap();

        let mine: Vec<String> = lifecycle
            .list_requests_for_user(&rider("u1"))
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(mine, [first.id, second.id]);

        let accepted = lifecycle
            .list_requests_for_user(&conductor("c1"))
            .await
            .unwrap();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].id, other.id);

        assert!(lifecycle
            .list_requests_for_user(&conductor("c9"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn missing_request_is_not_found() {
        let (_store, lifecycle) = setup();
        assert!(matches!(
            lifecycle.get("does-not-exist").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            lifecycle.accept(&conductor("c1"), "does-not-exist").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn offline_store_surfaces_retryable_error() {
        let (store, lifecycle) = setup();
        store.set_online(false);

        let err = lifecycle.create_request(&rider("u1"), draft()).await.unwrap_err();
        assert!(matches!(err, AppError::StoreUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn otp_check_requires_the_accepting_conductor_and_matching_code() {
        let (_store, lifecycle) = setup();
        let created = lifecycle.create_request(&rider("u1"), draft()).await.unwrap();

        assert!(matches!(
            lifecycle.verify_otp(&conductor("c1"), &created.id, "0000").await,
            Err(AppError::InvalidTransition { .. })
        ));

        let accepted = lifecycle.accept(&conductor("c1"), &created.id).await.unwrap();
        let otp = accepted.otp.unwrap();
        let wrong = if otp == "0000" { "1111" } else { "0000" };

        assert!(lifecycle.verify_otp(&conductor("c1"), &created.id, &otp).await.is_ok());
        assert!(matches!(
            lifecycle.verify_otp(&conductor("c1"), &created.id, wrong).await,
            Err(AppError::OtpMismatch)
        ));
        assert!(matches!(
            lifecycle.verify_otp(&conductor("c2"), &created.id, &otp).await,
            Err(AppError::Forbidden(_))
        ));
    }
}
