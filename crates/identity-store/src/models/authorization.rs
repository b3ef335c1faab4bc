use chrono::{DateTime, Utc};
use identity_docstore::Document;
use serde::{Deserialize, Serialize};

/// A grant given by a subject to an application for a set of scopes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, bon::Builder)]
pub struct Authorization {
    /// Store-assigned id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub id: Option<String>,

    /// Id of the application the grant was given to.
    #[builder(into)]
    pub application_id: String,

    /// When the grant was created.
    #[serde(default)]
    pub creation_date: Option<DateTime<Utc>>,

    /// Additional properties as raw JSON object text.
    #[serde(default)]
    #[builder(into)]
    pub properties: Option<String>,

    /// Granted scopes.
    #[serde(default)]
    #[builder(default)]
    pub scopes: Vec<String>,

    /// Status, see [`statuses`](crate::models::statuses).
    #[serde(default)]
    #[builder(into)]
    pub status: Option<String>,

    /// Subject that gave the grant.
    #[serde(default)]
    #[builder(into)]
    pub subject: Option<String>,

    /// Type, see [`authorization_types`](crate::models::authorization_types).
    #[serde(default, rename = "type")]
    #[builder(into)]
    pub authorization_type: Option<String>,
}

impl Document for Authorization {
    const COLLECTION: &'static str = "Authorizations";
    const ID_PREFIX: &'static str = "authorizations";

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }
}
