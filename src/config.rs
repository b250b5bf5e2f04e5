use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    /// Central database holding the tenant registry.
    pub database_url: String,
    /// Server hosting the tenant databases. The database path of this URL is
    /// replaced with each tenant's database name.
    pub tenant_database_url: String,
    pub tenant_max_connections: u32,
    pub migrate_jobs: usize,
    pub demo_password: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = required("DATABASE_URL")?;
        Ok(Self {
            tenant_database_url: env::var("TENANT_DATABASE_URL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| database_url.clone()),
            database_url,
            tenant_max_connections: env::var("TENANT_POOL_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".into())
                .parse()?,
            migrate_jobs: env::var("MIGRATE_JOBS")
                .unwrap_or_else(|_| "1".into())
                .parse()?,
            demo_password: env::var("DEMO_PASSWORD").unwrap_or_else(|_| "Demo2024!".into()),
        })
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    env::var(key).map_err(|_| anyhow::anyhow!("Missing required env var: {}", key))
}
