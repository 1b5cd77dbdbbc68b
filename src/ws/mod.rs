pub mod connection;
pub mod user_channels;
pub mod userctx;
