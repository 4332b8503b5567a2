use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type PartyId = Uuid;

/// A named participant in the ledger. A party may act as borrower on some
/// loans and lender on others; the role is per-loan, not per-party.
///
/// Identity verification is out of scope: a party here is just a registered
/// name the caller context has already authenticated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Party {
    pub id: PartyId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Party {
    pub fn new(name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            created_at: Utc::now(),
        }
    }
}
