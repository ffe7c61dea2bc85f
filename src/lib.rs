// Library surface shared by the binary and the integration tests.
pub mod app;
pub mod app_dirs;
pub mod config;
pub mod controller;
pub mod error;
pub mod export;
pub mod logging;
pub mod model;
pub mod prefill;
pub mod runtime;
pub mod store;
pub mod summary;
pub mod timer;
pub mod ui;
pub mod util;
pub mod worker;
