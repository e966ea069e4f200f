//! AI Tutor - an adaptive learning backend
//!
//! Courses are built from sessions whose content is a graph of "bubbles".
//! Students walk the graph, earn coins and can ask an AI tutor for help.

pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
