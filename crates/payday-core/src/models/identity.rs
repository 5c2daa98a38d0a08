use serde::{Deserialize, Serialize};

/// The signed-in user. `id` never changes; profile fields may.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        let email = email.into();
        // Display name defaults to the local part of the email
        let display_name = email.split('@').next().unwrap_or_default().to_string();
        Self {
            id: id.into(),
            email,
            display_name,
            avatar_ref: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }
}
