use chrono::{DateTime, Utc};
use identity_docstore::Document;
use serde::{Deserialize, Serialize};

/// An issued token.
///
/// A token with a `reference_id` is stored under `tokens/{reference_id}`,
/// which makes the reference id unique and immutable.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, bon::Builder)]
pub struct Token {
    /// Store-assigned or reference-derived id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub id: Option<String>,

    /// Id of the application the token was issued to.
    #[serde(default)]
    #[builder(into)]
    pub application_id: Option<String>,

    /// Id of the authorization the token derives from.
    #[serde(default)]
    #[builder(into)]
    pub authorization_id: Option<String>,

    /// When the token was created.
    #[serde(default)]
    pub creation_date: Option<DateTime<Utc>>,

    /// When the token expires. Also drives store-managed cleanup.
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,

    /// Serialized token payload.
    #[serde(default)]
    #[builder(into)]
    pub payload: Option<String>,

    /// Additional properties as raw JSON object text.
    #[serde(default)]
    #[builder(into)]
    pub properties: Option<String>,

    /// When the token was redeemed.
    #[serde(default)]
    pub redemption_date: Option<DateTime<Utc>>,

    /// Reference identifier for reference tokens.
    #[serde(default)]
    #[builder(into)]
    pub reference_id: Option<String>,

    /// Status, see [`statuses`](crate::models::statuses).
    #[serde(default)]
    #[builder(into)]
    pub status: Option<String>,

    /// Subject the token was issued for.
    #[serde(default)]
    #[builder(into)]
    pub subject: Option<String>,

    /// Token type, such as `access_token`.
    #[serde(default, rename = "type")]
    #[builder(into)]
    pub token_type: Option<String>,
}

impl Token {
    /// The reference id, if set and not blank.
    #[must_use]
    pub fn reference(&self) -> Option<&str> {
        self.reference_id.as_deref().filter(|r| !r.trim().is_empty())
    }
}

impl Document for Token {
    const COLLECTION: &'static str = "Tokens";
    const ID_PREFIX: &'static str = "tokens";

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }
}
