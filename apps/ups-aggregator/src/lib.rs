pub mod config;
pub mod error;
pub mod poller;
pub mod powerpanel;
pub mod readings;
pub mod store;
pub mod telemetry;

#[cfg(test)]
pub mod test_support;
