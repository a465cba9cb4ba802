pub mod binance;
pub mod client;

pub use binance::BinanceTransport;
pub use client::{
    ConnectionState, StreamClient, StreamConnection, StreamEvent, StreamHandle, StreamTransport,
};
