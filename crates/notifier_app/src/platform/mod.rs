mod app;
mod cli;
mod logging;

pub use app::run_app;
