use serde::{Deserialize, Serialize};

/// The authenticated caller of a process graph. Dispatcher-level parameter
/// resolution substitutes `user.user_id` wherever a declared `_openeo_user`
/// parameter is annotated as a plain string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl User {
    pub fn new(user_id: impl Into<String>) -> Self {
        User {
            user_id: user_id.into(),
            email: None,
            name: None,
            roles: Vec::new(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}
