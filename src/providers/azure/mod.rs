//! Azure App Service through the Resource Manager REST API.
//!
//! Each service is a site with a `staging` deployment slot. Releases change
//! the slot's container image, check the slot, then swap it with production.

mod client;
mod health;

pub use client::AppServiceClient;
