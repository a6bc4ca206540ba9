//! ByteDeck quest progression engine: catalogue, prerequisite graph,
//! submissions, availability, XP ledger and quest maps behind an HTTP API.

pub mod availability;
pub mod avail_cache;
pub mod badges;
pub mod clock;
pub mod config;
pub mod deck;
pub mod domain;
pub mod error;
pub mod ledger;
pub mod library;
pub mod maps;
pub mod notify;
pub mod prereq;
pub mod protocol;
pub mod routes;
pub mod seeds;
pub mod store;
pub mod submissions;
pub mod tasks;
pub mod telemetry;
pub mod util;
