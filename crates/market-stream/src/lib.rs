/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public market-stream crate surface
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod channel;
pub mod config;
pub mod error;
pub mod types;
pub mod ws;

// Re-export the channel clients and their connect functions
pub use channel::{
    Channel,
    ChannelClient,
    ChannelMessage,
    CommentsChannel,
    CommentsClient,
    CryptoPricesChannel,
    CryptoPricesClient,
    MarketChannel,
    MarketClient,
    MessageStream,
    ParseError,
    SubscriptionAction,
    UserChannel,
    UserClient,
    connect_comments,
    connect_crypto_prices,
    connect_market,
    connect_user,
};

pub use config::StreamConfig;
pub use error::{Result, StreamError};

// Re-export all types
pub use types::*;

// Re-export commonly used types from ws
pub use ws::{
    Connection,
    ConnectionState,
    Connector,
    RawMessage,
    TcpConnector,
    TlsConnector,
};
