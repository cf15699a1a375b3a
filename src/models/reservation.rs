use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub const RESERVATION_COLUMNS: &str = "reservations.id, reservations.item_id, \
     reservations.reserved_by_user_id, reservations.guest_name, reservations.guest_email, \
     reservations.reservation_token, reservations.status, reservations.reserved_at, \
     reservations.canceled_at, reservations.cancel_reason, reservations.notification_sent";

/// `active` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Active,
    Canceled,
    Fulfilled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Canceled => "canceled",
            ReservationStatus::Fulfilled => "fulfilled",
        }
    }

    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        matches!(
            (self, next),
            (ReservationStatus::Active, ReservationStatus::Canceled)
                | (ReservationStatus::Active, ReservationStatus::Fulfilled)
        )
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown reservation status: {0}")]
pub struct UnknownStatus(String);

impl FromStr for ReservationStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ReservationStatus::Active),
            "canceled" => Ok(ReservationStatus::Canceled),
            "fulfilled" => Ok(ReservationStatus::Fulfilled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl TryFrom<String> for ReservationStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct ReservationModel {
    pub id: Uuid,
    pub item_id: Uuid,
    pub reserved_by_user_id: Option<Uuid>,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub reservation_token: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: ReservationStatus,
    pub reserved_at: DateTime<Utc>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub notification_sent: bool,
}

impl ReservationModel {
    pub fn is_guest(&self) -> bool {
        self.reserved_by_user_id.is_none()
    }

    /// Whether `credential` identifies the holder of this reservation.
    pub fn is_held_by(&self, credential: &HolderCredential) -> bool {
        match credential {
            HolderCredential::User(user_id) => self.reserved_by_user_id == Some(*user_id),
            HolderCredential::GuestToken(token) => self
                .reservation_token
                .as_deref()
                .is_some_and(|stored| stored.as_bytes().ct_eq(token.as_bytes()).into()),
        }
    }

    /// Address the notifier should use for this reservation's holder.
    pub fn recipient(&self) -> Recipient {
        match (self.reserved_by_user_id, &self.guest_email) {
            (Some(user_id), _) => Recipient::User { user_id },
            (None, Some(email)) => Recipient::Guest {
                name: self.guest_name.clone().unwrap_or_default(),
                email: email.clone(),
            },
            (None, None) => Recipient::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Recipient {
    User { user_id: Uuid },
    Guest { name: String, email: String },
    Unknown,
}

/// Who is asking to reserve an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserverIdentity {
    User(Uuid),
    Guest { name: String, email: String },
}

impl ReserverIdentity {
    pub fn guest(name: impl Into<String>, email: impl Into<String>) -> Self {
        ReserverIdentity::Guest {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Guests need both a name and an email so they can be reached and cancel later.
    pub fn normalized(self) -> AppResult<Self> {
        match self {
            ReserverIdentity::User(id) => Ok(ReserverIdentity::User(id)),
            ReserverIdentity::Guest { name, email } => {
                let name = name.trim().to_string();
                let email = email.trim().to_ascii_lowercase();
                if name.is_empty() || email.is_empty() {
                    return Err(AppError::GuestInfoRequired);
                }
                if !looks_like_email(&email) {
                    return Err(AppError::InvalidInput(
                        "guest_email is not a valid address".to_string(),
                    ));
                }
                Ok(ReserverIdentity::Guest { name, email })
            }
        }
    }

    /// Key under which idempotency records for this identity are stored.
    pub fn actor_key(&self) -> String {
        match self {
            ReserverIdentity::User(id) => format!("user:{}", id),
            ReserverIdentity::Guest { email, .. } => format!("guest:{}", email),
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            ReserverIdentity::User(id) => Some(*id),
            ReserverIdentity::Guest { .. } => None,
        }
    }
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !domain.contains('@')
        }
        None => false,
    }
}

/// Proof of holding a reservation: a user id, or the token handed to a guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HolderCredential {
    User(Uuid),
    GuestToken(String),
}

/// Public-safe projection of an item's reservation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublicStatus {
    Available,
    Reserved,
    Purchased,
}

impl PublicStatus {
    pub fn from_flags(purchased: bool, has_active_reservation: bool) -> Self {
        if purchased {
            PublicStatus::Purchased
        } else if has_active_reservation {
            PublicStatus::Reserved
        } else {
            PublicStatus::Available
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guest_reservation(token: &str) -> ReservationModel {
        ReservationModel {
            id: Uuid::new_v4(),
            item_id: Uuid::new_v4(),
            reserved_by_user_id: None,
            guest_name: Some("Bob".to_string()),
            guest_email: Some("bob@x.com".to_string()),
            reservation_token: Some(token.to_string()),
            status: ReservationStatus::Active,
            reserved_at: Utc::now(),
            canceled_at: None,
            cancel_reason: None,
            notification_sent: false,
        }
    }

    #[test]
    fn test_transitions() {
        use ReservationStatus::*;
        assert!(Active.can_transition_to(Canceled));
        assert!(Active.can_transition_to(Fulfilled));
        assert!(!Canceled.can_transition_to(Active));
        assert!(!Fulfilled.can_transition_to(Canceled));
        assert!(!Active.can_transition_to(Active));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("fulfilled".parse::<ReservationStatus>().unwrap(), ReservationStatus::Fulfilled);
        assert!("pending".parse::<ReservationStatus>().is_err());
    }

    #[test]
    fn test_guest_identity_requires_both_fields() {
        assert_eq!(
            ReserverIdentity::guest("Bob", "  ").normalized(),
            Err(AppError::GuestInfoRequired)
        );
        assert_eq!(
            ReserverIdentity::guest("", "bob@x.com").normalized(),
            Err(AppError::GuestInfoRequired)
        );
        assert_eq!(
            ReserverIdentity::guest(" Bob ", "Bob@X.com").normalized().unwrap(),
            ReserverIdentity::guest("Bob", "bob@x.com")
        );
        assert!(matches!(
            ReserverIdentity::guest("Bob", "bob").normalized(),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_is_held_by() {
        let reservation = guest_reservation("secret-token");
        assert!(reservation.is_held_by(&HolderCredential::GuestToken("secret-token".into())));
        assert!(!reservation.is_held_by(&HolderCredential::GuestToken("secret-tokem".into())));
        assert!(!reservation.is_held_by(&HolderCredential::GuestToken("secret".into())));
        assert!(!reservation.is_held_by(&HolderCredential::GuestToken(String::new())));
        assert!(!reservation.is_held_by(&HolderCredential::User(Uuid::new_v4())));

        let user = Uuid::new_v4();
        let mut by_user = guest_reservation("unused");
        by_user.reservation_token = None;
        by_user.reserved_by_user_id = Some(user);
        assert!(by_user.is_held_by(&HolderCredential::User(user)));
        assert!(!by_user.is_held_by(&HolderCredential::GuestToken("unused".into())));
    }

    #[test]
    fn test_public_status_precedence() {
        assert_eq!(PublicStatus::from_flags(true, true), PublicStatus::Purchased);
        assert_eq!(PublicStatus::from_flags(false, true), PublicStatus::Reserved);
        assert_eq!(PublicStatus::from_flags(false, false), PublicStatus::Available);
    }
}
