pub mod aqi;
pub mod archive;
pub mod cli;
pub mod collector;
pub mod config;
pub mod derived;
pub mod http;
pub mod payload;
pub mod poller;
pub mod publish;
pub mod reading;
pub mod state;
pub mod units;

#[cfg(test)]
pub mod test_support;
