use std::sync::Arc;

use crate::{
    config::AppConfig,
    services::{coordinator::TripCoordinator, store::SqliteStore},
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: SqliteStore,
    pub trips: TripCoordinator,
}

impl AppState {
    pub fn new(config: AppConfig, store: SqliteStore) -> Self {
        let trips = TripCoordinator::new(Arc::new(store.clone()), config.trip_poll_interval);
        Self {
            config,
            store,
            trips,
        }
    }
}
