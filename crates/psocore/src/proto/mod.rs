// proto/mod.rs -- Wire framing shared by every client-facing service.

pub mod header;
pub mod redirect;
pub mod welcome;

pub use header::{HeaderKind, PacketHeader};
pub use welcome::{build_client_welcome, server_cipher_pair, WELCOME_TYPE};
