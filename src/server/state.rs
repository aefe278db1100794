use std::sync::Arc;

use crate::auth::JwtValidator;
use crate::broker::Broker;
use crate::config::Settings;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub jwt_validator: Arc<JwtValidator>,
    pub broker: Arc<Broker>,
}

impl AppState {
    pub fn new(settings: Settings, broker: Arc<Broker>) -> Self {
        let jwt_validator = Arc::new(JwtValidator::new(&settings.jwt));

        Self {
            settings: Arc::new(settings),
            jwt_validator,
            broker,
        }
    }
}
