use anyhow::Result;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub http_host: String,
    pub http_port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    pub run_migrations: bool,
    pub kafka_enabled: bool,
    pub kafka_bootstrap_servers: String,
    pub kafka_topic: String,
    pub kafka_group_id: String,
    pub kafka_auto_offset_reset: String,
    pub kafka_sasl_mechanism: String,
    pub kafka_username: String,
    pub kafka_password: String,
    pub kafka_security_protocol: String,
    pub kafka_max_retries: u32,
    pub kafka_circuit_breaker_cooldown: u64,
    pub notification_cache_ttl_secs: u64,
    pub notification_cache_capacity: u64,
    pub stream_keepalive_secs: u64,
    pub pubsub_channel_capacity: usize,
    pub log_level: String,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let http_host = env::var("HTTP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let http_port = parse_var("HTTP_PORT", 8080);

        let db_host = env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string());
        let db_port = env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());
        let db_name = env::var("DB_DATABASE").unwrap_or_else(|_| "schoolbus".to_string());
        let db_user = env::var("DB_USER").unwrap_or_else(|_| "schoolbus".to_string());
        let db_pwd = env::var("DB_PWD").unwrap_or_else(|_| "schoolbus".to_string());

        let database_url = format!(
            "postgres://{}:{}@{}:{}/{}",
            db_user, db_pwd, db_host, db_port, db_name
        );
        let db_max_connections = parse_var("DB_MAX_CONNECTIONS", 50);
        let run_migrations = parse_var("RUN_MIGRATIONS", true);

        let kafka_enabled = parse_var("KAFKA_ENABLED", false);
        let kafka_bootstrap_servers =
            env::var("KAFKA_BOOTSTRAP_SERVERS").unwrap_or_else(|_| "localhost:9092".to_string());
        let kafka_topic =
            env::var("KAFKA_TOPIC").unwrap_or_else(|_| "schoolbus-locations".to_string());
        let kafka_group_id =
            env::var("KAFKA_GROUP_ID").unwrap_or_else(|_| "schoolbus-trips".to_string());
        let kafka_auto_offset_reset =
            env::var("KAFKA_AUTO_OFFSET_RESET").unwrap_or_else(|_| "latest".to_string());
        let kafka_sasl_mechanism =
            env::var("KAFKA_SASL_MECHANISM").unwrap_or_else(|_| "SCRAM-SHA-256".to_string());
        let kafka_username = env::var("KAFKA_USERNAME").unwrap_or_default();
        let kafka_password = env::var("KAFKA_PASSWORD").unwrap_or_default();
        let kafka_security_protocol =
            env::var("KAFKA_SECURITY_PROTOCOL").unwrap_or_else(|_| "SASL_PLAINTEXT".to_string());
        let kafka_max_retries = parse_var("KAFKA_MAX_RETRIES", 5);
        let kafka_circuit_breaker_cooldown = parse_var("KAFKA_CIRCUIT_BREAKER_COOLDOWN", 300);

        // 7 days
        let notification_cache_ttl_secs = parse_var("NOTIFICATION_CACHE_TTL_SECS", 604_800);
        let notification_cache_capacity = parse_var("NOTIFICATION_CACHE_CAPACITY", 100_000);
        let stream_keepalive_secs = parse_var("STREAM_KEEPALIVE_SECS", 30);
        let pubsub_channel_capacity = parse_var("PUBSUB_CHANNEL_CAPACITY", 256);

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            http_host,
            http_port,
            database_url,
            db_max_connections,
            run_migrations,
            kafka_enabled,
            kafka_bootstrap_servers,
            kafka_topic,
            kafka_group_id,
            kafka_auto_offset_reset,
            kafka_sasl_mechanism,
            kafka_username,
            kafka_password,
            kafka_security_protocol,
            kafka_max_retries,
            kafka_circuit_breaker_cooldown,
            notification_cache_ttl_secs,
            notification_cache_capacity,
            stream_keepalive_secs,
            pubsub_channel_capacity,
            log_level,
        })
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    pub fn notification_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.notification_cache_ttl_secs)
    }

    pub fn stream_keepalive(&self) -> Duration {
        Duration::from_secs(self.stream_keepalive_secs)
    }
}

/// Reads an env var, falling back to `default` when unset or unparseable.
fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
