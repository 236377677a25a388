pub mod agent;
pub mod chart;
pub mod config;
pub mod dataset;
pub mod llm;
pub mod routes;
pub mod sandbox;
pub mod tools;
