mod build_flow;
mod config_driven;
mod sync_http;
