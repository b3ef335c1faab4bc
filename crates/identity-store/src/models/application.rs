use std::collections::BTreeMap;

use identity_docstore::Document;
use serde::{Deserialize, Serialize};

/// A registered client application.
///
/// `client_id` is unique across applications, compared after
/// normalization.
///
/// # Example
///
/// ```
/// use identity_store::models::Application;
///
/// let app = Application::builder()
///     .client_id("billing-portal")
///     .display_name("Billing")
///     .redirect_uris(vec!["https://billing.example/cb".to_owned()])
///     .build();
///
/// assert!(app.id.is_none());
/// assert_eq!(app.client_id, "billing-portal");
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, bon::Builder)]
pub struct Application {
    /// Store-assigned id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub id: Option<String>,

    /// Application type, such as `web` or `native`.
    #[serde(default)]
    #[builder(into)]
    pub application_type: Option<String>,

    /// Client identifier presented by the application.
    #[builder(into)]
    pub client_id: String,

    /// Hashed client secret.
    #[serde(default)]
    #[builder(into)]
    pub client_secret: Option<String>,

    /// Client type, such as `confidential` or `public`.
    #[serde(default)]
    #[builder(into)]
    pub client_type: Option<String>,

    /// Consent type, such as `explicit` or `implicit`.
    #[serde(default)]
    #[builder(into)]
    pub consent_type: Option<String>,

    /// Default display name.
    #[serde(default)]
    #[builder(into)]
    pub display_name: Option<String>,

    /// Localized display names keyed by culture.
    #[serde(default)]
    #[builder(default)]
    pub display_names: BTreeMap<String, String>,

    /// JSON Web Key Set as raw JSON text.
    #[serde(default)]
    #[builder(into)]
    pub json_web_key_set: Option<String>,

    /// Granted permissions.
    #[serde(default)]
    #[builder(default)]
    pub permissions: Vec<String>,

    /// Allowed post-logout redirect URIs.
    #[serde(default)]
    #[builder(default)]
    pub post_logout_redirect_uris: Vec<String>,

    /// Additional properties as raw JSON object text.
    #[serde(default)]
    #[builder(into)]
    pub properties: Option<String>,

    /// Allowed redirect URIs.
    #[serde(default)]
    #[builder(default)]
    pub redirect_uris: Vec<String>,

    /// Requirements the application must satisfy.
    #[serde(default)]
    #[builder(default)]
    pub requirements: Vec<String>,

    /// Free-form settings.
    #[serde(default)]
    #[builder(default)]
    pub settings: BTreeMap<String, String>,
}

impl Document for Application {
    const COLLECTION: &'static str = "Applications";
    const ID_PREFIX: &'static str = "applications";

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }
}
