use std::{env, net::SocketAddr, time::Duration};

use crate::{error::AppError, services::coordinator::DEFAULT_POLL_INTERVAL};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub trip_poll_interval: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://trips.db?mode=rwc".to_string());
        let listen_addr: SocketAddr = env::var("APP_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
            .parse()
            .map_err(|err| AppError::Config(format!("invalid APP_LISTEN_ADDR: {err}")))?;

        let trip_poll_interval = match env::var("TRIP_POLL_INTERVAL_SECS") {
            Ok(raw) => parse_poll_interval(&raw)?,
            Err(_) => DEFAULT_POLL_INTERVAL,
        };

        Ok(Self {
            database_url,
            listen_addr,
            trip_poll_interval,
        })
    }
}

fn parse_poll_interval(raw: &str) -> Result<Duration, AppError> {
    let secs: u64 = raw
        .trim()
        .parse()
        .map_err(|err| AppError::Config(format!("invalid TRIP_POLL_INTERVAL_SECS: {err}")))?;
    if secs == 0 {
        return Err(AppError::Config(
            "TRIP_POLL_INTERVAL_SECS must be greater than zero".into(),
        ));
    }
    Ok(Duration::from_secs(secs))
}
