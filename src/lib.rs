//! Pathfinder: account signup and login for the personal-scheduling backend.

pub mod app;
pub mod auth;
pub mod config;
pub mod db;
pub mod state;
