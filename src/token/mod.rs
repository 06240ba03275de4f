//! Token parsing, verification and cookie sealing

mod claims;
mod codec;
mod crypto;

pub use claims::{Claims, UmaPermission};
pub use codec::{TokenCodec, VerifyPolicy};
pub use crypto::CookieCipher;
