use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BusinessProfile {
    pub owner_id: String,
    pub business_name: Option<String>,
    pub vat_number: Option<String>,
    pub hmrc_connected: bool,
}

impl BusinessProfile {
    /// An empty profile for an owner who has not completed onboarding.
    pub fn empty(owner_id: &str) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            ..Default::default()
        }
    }
}
