pub mod auth;
pub mod config;
mod http_layers;
mod images;
pub mod server;
pub mod state;
mod stream_song;

pub use config::ServerConfig;
pub use http_layers::*;
pub use server::{make_app, run_server, SERVER_VERSION_HEADER};
pub use state::ServerState;
