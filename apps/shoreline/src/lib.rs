pub mod config;
pub mod controller;
pub mod error;
pub mod input;
pub mod model;
pub mod protocol;
pub mod session;
pub mod telemetry;
pub mod tracker;
pub mod transcript;
pub mod view;
