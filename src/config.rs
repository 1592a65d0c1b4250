use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub session_ttl_hours: i64,
    /// Slot grid for availability generation, minutes.
    pub slot_granularity_min: i64,
    /// Online bookings must start at least this many minutes from now.
    pub min_lead_min: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let session_ttl_hours = env::var("SESSION_TTL_HOURS")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(24);
        let slot_granularity_min = env::var("SLOT_GRANULARITY_MIN")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(15);
        let min_lead_min = env::var("MIN_LEAD_MIN")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(60);

        Ok(Self {
            database_url,
            bind_addr,
            session_ttl_hours,
            slot_granularity_min,
            min_lead_min,
        })
    }
}
