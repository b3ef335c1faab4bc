use std::collections::BTreeMap;

use identity_docstore::Document;
use serde::{Deserialize, Serialize};

/// A consent scope. `name` is unique across scopes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, bon::Builder)]
pub struct Scope {
    /// Store-assigned id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub id: Option<String>,

    /// Scope name, such as `openid` or `api:read`.
    #[builder(into)]
    pub name: String,

    /// Default description.
    #[serde(default)]
    #[builder(into)]
    pub description: Option<String>,

    /// Localized descriptions keyed by culture.
    #[serde(default)]
    #[builder(default)]
    pub descriptions: BTreeMap<String, String>,

    /// Default display name.
    #[serde(default)]
    #[builder(into)]
    pub display_name: Option<String>,

    /// Localized display names keyed by culture.
    #[serde(default)]
    #[builder(default)]
    pub display_names: BTreeMap<String, String>,

    /// Additional properties as raw JSON object text.
    #[serde(default)]
    #[builder(into)]
    pub properties: Option<String>,

    /// Resources (audiences) the scope grants access to.
    #[serde(default)]
    #[builder(default)]
    pub resources: Vec<String>,
}

impl Document for Scope {
    const COLLECTION: &'static str = "Scopes";
    const ID_PREFIX: &'static str = "scopes";

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }
}
