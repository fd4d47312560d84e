use clap::Parser;

/// Gateway configuration, read from flags or the environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "lumina", about = "Virtual-key gateway for LLM providers")]
pub struct Cli {
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    #[arg(long, env = "REDIS_URL", default_value = "redis://localhost:6379")]
    pub redis_url: String,

    #[arg(long, env = "OPENSEARCH_URL", default_value = "http://localhost:9200")]
    pub opensearch_url: String,

    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: String,

    /// Master key for provider-credential encryption; the first 32 bytes
    /// are used.
    #[arg(long, env = "ENCRYPTION_KEY")]
    pub encryption_key: String,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Cli {
    pub fn validate(&self) -> Result<(), String> {
        if self.encryption_key.len() < 32 {
            return Err("ENCRYPTION_KEY must be at least 32 bytes".to_string());
        }
        if self.jwt_secret.is_empty() {
            return Err("JWT_SECRET must not be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(encryption_key: &str, jwt_secret: &str) -> Cli {
        Cli {
            port: 8080,
            database_url: "postgres://localhost/lumina".to_string(),
            redis_url: "redis://localhost:6379".to_string(),
            opensearch_url: "http://localhost:9200".to_string(),
            jwt_secret: jwt_secret.to_string(),
            encryption_key: encryption_key.to_string(),
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn short_encryption_key_is_rejected() {
        assert!(cli("too-short", "secret").validate().is_err());
        assert!(cli(&"k".repeat(32), "secret").validate().is_ok());
        assert!(cli(&"k".repeat(48), "secret").validate().is_ok());
    }

    #[test]
    fn empty_jwt_secret_is_rejected() {
        assert!(cli(&"k".repeat(32), "").validate().is_err());
    }
}
