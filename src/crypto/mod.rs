pub mod channel;
pub mod handshake;

pub use channel::{ChannelError, SecureChannel, AES_KEY_LEN};
pub use handshake::{HandshakeError, RsaIdentity};
