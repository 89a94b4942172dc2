pub mod handlers;
pub mod logging;
pub mod server;
pub mod state;

pub use server::{app_config, build_sources, run_server, AggregatorConfig};
pub use state::AppState;
