pub mod robinhood;
