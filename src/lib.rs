pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;

pub mod models {
    pub mod attendance;
    pub mod session;
    pub mod subject;
}

pub mod store;

pub mod services {
    pub mod attendance;
    pub mod authorization;
    pub mod link;
    pub mod sessions;
    pub mod subjects;
}

pub mod handlers;

pub mod middleware_layer {
    pub mod device;
    pub mod rate_limit;
}

pub mod validation;

pub use config::Config;
pub use error::{AppError, Result};
pub use state::AppState;
