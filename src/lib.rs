pub mod app;
pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod email;
pub mod response;
pub mod state;
