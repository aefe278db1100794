mod settings;

pub use settings::{ApiConfig, JwtConfig, RedisConfig, ServerConfig, Settings, StreamConfig};
