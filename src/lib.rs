pub mod auth;
pub mod config;
pub mod cursor;
pub mod db;
pub mod error;
pub mod events;
pub mod handlers;
pub mod models;
pub mod persistence;
pub mod presence;
pub mod services;
pub mod state;
pub mod websocket;
