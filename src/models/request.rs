use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::identity::Identity;

pub const PRE_BOOK_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl RequestStatus {
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        matches!(
            (self, next),
            (RequestStatus::Pending, RequestStatus::Accepted)
                | (RequestStatus::Pending, RequestStatus::Rejected)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TripRequest {
    pub id: String,
    pub rider_id: String,
    pub pickup: String,
    pub destination: String,
    pub fare: u32,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub accepted_by: Option<String>,
    pub pre_book_date: Option<String>,
    pub otp: Option<String>,
}

impl TripRequest {
    pub fn new(id: String, rider_id: String, draft: NewTripRequest) -> Self {
        Self {
            id,
            rider_id,
            pickup: draft.pickup.trim().to_string(),
            destination: draft.destination.trim().to_string(),
            fare: draft.fare,
            status: RequestStatus::Pending,
            created_at: Utc::now(),
            accepted_by: None,
            pre_book_date: draft.pre_book_date,
            otp: None,
        }
    }

    pub fn accepted(&self, conductor_id: &str, otp: String) -> Result<Self, AppError> {
        if conductor_id.trim().is_empty() {
            return Err(AppError::BadRequest(
                "accepting conductor id cannot be empty".to_string(),
            ));
        }

        let mut next = self.transitioned(RequestStatus::Accepted)?;
        next.accepted_by = Some(conductor_id.to_string());
        next.otp = Some(otp);
        Ok(next)
    }

    pub fn rejected(&self) -> Result<Self, AppError> {
        self.transitioned(RequestStatus::Rejected)
    }

    fn transitioned(&self, to: RequestStatus) -> Result<Self, AppError> {
        if !self.status.can_transition_to(to) {
            return Err(AppError::InvalidTransition {
                from: self.status,
                to,
            });
        }

        let mut next = self.clone();
        next.status = to;
        Ok(next)
    }

    pub fn chat_enabled(&self) -> bool {
        self.status == RequestStatus::Accepted
    }

    pub fn is_rider(&self, user_id: &str) -> bool {
        self.rider_id == user_id
    }

    pub fn is_accepted_by(&self, user_id: &str) -> bool {
        self.status == RequestStatus::Accepted && self.accepted_by.as_deref() == Some(user_id)
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.is_rider(user_id) || self.is_accepted_by(user_id)
    }

    pub fn require_participant(&self, identity: &Identity) -> Result<(), AppError> {
        if self.is_participant(&identity.user_id) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "user {} is not a participant of request {}",
                identity.user_id, self.id
            )))
        }
    }

    // otp is for the rider's eyes only
    pub fn view_for(&self, identity: &Identity) -> Self {
        let mut view = self.clone();
        if !self.is_rider(&identity.user_id) {
            view.otp = None;
        }
        view
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTripRequest {
    pub pickup: String,
    pub destination: String,
    pub fare: u32,
    #[serde(default)]
    pub pre_book_date: Option<String>,
}

impl NewTripRequest {
    pub fn validate(&self, today: NaiveDate) -> Result<(), AppError> {
        if self.pickup.trim().is_empty() {
            return Err(AppError::BadRequest("pickup cannot be empty".to_string()));
        }

        if self.destination.trim().is_empty() {
            return Err(AppError::BadRequest("destination cannot be empty".to_string()));
        }

        if let Some(raw) = &self.pre_book_date {
            let date = NaiveDate::parse_from_str(raw, PRE_BOOK_DATE_FORMAT).map_err(|err| {
                AppError::BadRequest(format!("pre_book_date {raw:?} is not YYYY-MM-DD: {err}"))
            })?;
            if date < today {
                return Err(AppError::BadRequest(format!(
                    "pre_book_date {raw} is in the past"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{NewTripRequest, RequestStatus, TripRequest};
    use crate::error::AppError;
    use crate::models::identity::{Identity, Role};

    const ALL: [RequestStatus; 3] = [
        RequestStatus::Pending,
        RequestStatus::Accepted,
        RequestStatus::Rejected,
    ];

    fn draft(pre_book_date: Option<&str>) -> NewTripRequest {
        NewTripRequest {
            pickup: " 12 Harbour Road ".to_string(),
            destination: "Central Station".to_string(),
            fare: 120,
            pre_book_date: pre_book_date.map(str::to_string),
        }
    }

    fn pending() -> TripRequest {
        TripRequest::new("r1".to_string(), "rider-1".to_string(), draft(None))
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 14).unwrap()
    }

    #[test]
    fn only_pending_has_outgoing_edges() {
        for from in ALL {
            for to in ALL {
                let expected = from == RequestStatus::Pending && to != RequestStatus::Pending;
                assert_eq!(from.can_transition_to(to), expected, "{from:?} -> {to:?}");
            }
        }
    }

    #[test]
    fn new_request_starts_pending_and_unbound() {
        let request = pending();
        assert_eq!(request.status, RequestStatus::Pending);
        assert!(request.accepted_by.is_none());
        assert!(request.otp.is_none());
        assert_eq!(request.pickup, "12 Harbour Road");
    }

    #[test]
    fn accept_binds_conductor_and_leaves_original_untouched() {
        let request = pending();
        let accepted = request.accepted("conductor-9", "4821".to_string()).unwrap();

        assert_eq!(accepted.status, RequestStatus::Accepted);
        assert_eq!(accepted.accepted_by.as_deref(), Some("conductor-9"));
        assert_eq!(request.status, RequestStatus::Pending);
        assert!(accepted.chat_enabled());
        assert!(!request.chat_enabled());
    }

    #[test]
    fn terminal_states_refuse_every_transition() {
        let accepted = pending().accepted("c1", "0000".to_string()).unwrap();
        let rejected = pending().rejected().unwrap();

        for terminal in [accepted, rejected] {
            assert_ne!(terminal.status, RequestStatus::Pending);
            assert_eq!(
                terminal.chat_enabled(),
                terminal.status == RequestStatus::Accepted
            );
            assert!(matches!(
                terminal.accepted("c2", "1111".to_string()),
                Err(AppError::InvalidTransition { .. })
            ));
            assert!(matches!(
                terminal.rejected(),
                Err(AppError::InvalidTransition { .. })
            ));
        }
    }

    #[test]
    fn accept_requires_a_conductor_id() {
        let request = pending();
        for blank in ["", "   "] {
            assert!(matches!(
                request.accepted(blank, "1234".to_string()),
                Err(AppError::BadRequest(_))
            ));
        }
    }

    #[test]
    fn participants_are_rider_and_accepting_conductor() {
        let request = pending();
        assert!(request.is_participant("rider-1"));
        assert!(!request.is_participant("conductor-9"));

        let accepted = request.accepted("conductor-9", "1234".to_string()).unwrap();
        assert!(accepted.is_participant("conductor-9"));
        assert!(!accepted.is_participant("conductor-2"));
    }

    #[test]
    fn otp_is_hidden_from_everyone_but_the_rider() {
        let accepted = pending().accepted("conductor-9", "1234".to_string()).unwrap();

        let rider_view = accepted.view_for(&Identity::new("rider-1", Role::Rider));
        let conductor_view = accepted.view_for(&Identity::new("conductor-9", Role::Conductor));

        assert_eq!(rider_view.otp.as_deref(), Some("1234"));
        assert!(conductor_view.otp.is_none());
    }

    #[test]
    fn validation_rejects_blank_addresses() {
        let mut blank_pickup = draft(None);
        blank_pickup.pickup = "   ".to_string();
        assert!(matches!(
            blank_pickup.validate(today()),
            Err(AppError::BadRequest(_))
        ));

        let mut blank_destination = draft(None);
        blank_destination.destination = String::new();
        assert!(matches!(
            blank_destination.validate(today()),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn pre_book_date_must_parse_and_not_be_past() {
        assert!(draft(Some("2026-03-14")).validate(today()).is_ok());
        assert!(draft(Some("2026-04-01")).validate(today()).is_ok());
        assert!(draft(Some("2026-03-13")).validate(today()).is_err());
        assert!(draft(Some("14/03/2026")).validate(today()).is_err());
    }
}
