mod boundary;
mod builder;
mod connection;
mod filter;

pub use boundary::{trailers_end_message, MessageBoundary, MessageElement};
pub use builder::{HttpClientConnection, HttpConnectionBuilder};
pub use connection::{ConnState, ConnectionVariant, NonPipelinedConnection, PipelinedConnection};
pub use filter::ConnectionFilter;
