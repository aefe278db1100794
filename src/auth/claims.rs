use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// JWT claims issued by the CRM auth collaborator (SimpleJWT-style).
///
/// The only claim this service needs is the integer `user_id`; everything
/// else (`token_type`, `jti`, ...) is captured untyped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// CRM user (employee) id the token was issued for
    pub user_id: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Additional claims carried by the token
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Claims {
    pub fn is_expired(&self) -> bool {
        let now = chrono::Utc::now().timestamp();
        self.exp < now
    }
}
