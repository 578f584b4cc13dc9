pub mod codec;
pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod registry;
pub mod server;
pub mod session;
pub mod stream;


pub use error::{CodecError, FrameError, ProtocolError, ServerError};
pub use registry::Registry;
pub use server::Server;
