//! Takion transport (§2 modules 3-5, §4.4-§4.5): the stream cipher, the
//! message codec, and the socket adapters that carry it.

mod cipher;
mod socket;
mod takion;

pub use cipher::{LocalCipher, RemoteCipher, StreamCipher};
pub use socket::{ControlSocket, TakionSender, TakionSocket};
pub use takion::{decode, encode, Decoded, MessageType};
