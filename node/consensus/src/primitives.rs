use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

/// Raw currency units. The full supply fits in 128 bits.
pub type Amount = u128;

macro_rules! bytes32_newtype {
	($name:ident) => {
		#[derive(
			Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
		)]
		pub struct $name(pub [u8; 32]);

		impl $name {
			pub const ZERO: Self = Self([0u8; 32]);

			pub fn is_zero(&self) -> bool {
				self.0 == [0u8; 32]
			}

			pub fn as_bytes(&self) -> &[u8; 32] {
				&self.0
			}
		}

		impl std::fmt::Display for $name {
			fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
				write!(f, "{}", hex::encode(self.0))
			}
		}

		impl std::fmt::Debug for $name {
			fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
				// The first few bytes are enough to identify a value in logs
				write!(f, "{}({}..)", stringify!($name), hex::encode(&self.0[..8]))
			}
		}

		impl From<[u8; 32]> for $name {
			fn from(bytes: [u8; 32]) -> Self {
				Self(bytes)
			}
		}
	};
}

bytes32_newtype!(BlockHash);
bytes32_newtype!(Account);
bytes32_newtype!(Root);
bytes32_newtype!(Link);

impl From<Account> for Root {
	fn from(account: Account) -> Self {
		Root(account.0)
	}
}

impl From<BlockHash> for Root {
	fn from(hash: BlockHash) -> Self {
		Root(hash.0)
	}
}

impl Link {
	/// Interpret the link field as a destination account (send blocks)
	pub fn as_account(&self) -> Account {
		Account(self.0)
	}

	/// Interpret the link field as a source block hash (receive blocks)
	pub fn as_hash(&self) -> BlockHash {
		BlockHash(self.0)
	}
}

impl From<Account> for Link {
	fn from(account: Account) -> Self {
		Link(account.0)
	}
}

impl From<BlockHash> for Link {
	fn from(hash: BlockHash) -> Self {
		Link(hash.0)
	}
}

/// The election identifier: `previous` (or zero for first blocks) paired with
/// the root the block contests.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QualifiedRoot {
	pub previous: BlockHash,
	pub root: Root,
}

impl std::fmt::Display for QualifiedRoot {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}:{}", self.previous, self.root)
	}
}

impl std::fmt::Debug for QualifiedRoot {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "QualifiedRoot({}..:{}..)", hex::encode(&self.previous.0[..8]), hex::encode(&self.root.0[..8]))
	}
}

/// An ed25519 signature split into its two halves so that serde derives apply.
#[derive(Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
	r: [u8; 32],
	s: [u8; 32],
}

impl Signature {
	pub fn from_bytes(bytes: [u8; 64]) -> Self {
		let mut r = [0u8; 32];
		let mut s = [0u8; 32];
		r.copy_from_slice(&bytes[..32]);
		s.copy_from_slice(&bytes[32..]);
		Signature { r, s }
	}

	pub fn to_bytes(&self) -> [u8; 64] {
		let mut bytes = [0u8; 64];
		bytes[..32].copy_from_slice(&self.r);
		bytes[32..].copy_from_slice(&self.s);
		bytes
	}
}

impl std::fmt::Debug for Signature {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "Signature({}..)", hex::encode(&self.r[..8]))
	}
}

/// An ed25519 keypair. Accounts are verifying keys.
#[derive(Clone)]
pub struct KeyPair {
	signing_key: SigningKey,
}

impl KeyPair {
	pub fn generate() -> Self {
		KeyPair { signing_key: SigningKey::from_bytes(&rand::random::<[u8; 32]>()) }
	}

	pub fn from_seed(seed: [u8; 32]) -> Self {
		KeyPair { signing_key: SigningKey::from_bytes(&seed) }
	}

	pub fn account(&self) -> Account {
		Account(self.signing_key.verifying_key().to_bytes())
	}

	pub fn sign(&self, message: &[u8]) -> Signature {
		Signature::from_bytes(self.signing_key.sign(message).to_bytes())
	}
}

impl std::fmt::Debug for KeyPair {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "KeyPair({:?})", self.account())
	}
}

/// Verify `signature` over `message` against `account`. Unloadable accounts
/// (not a valid curve point) verify as false rather than erroring, as they can
/// arrive from the network.
pub fn validate_message(account: &Account, message: &[u8], signature: &Signature) -> bool {
	match VerifyingKey::from_bytes(account.as_bytes()) {
		Ok(key) => {
			let signature = ed25519_dalek::Signature::from_bytes(&signature.to_bytes());
			key.verify(message, &signature).is_ok()
		},
		Err(_) => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sign_and_validate() {
		let key = KeyPair::generate();
		let signature = key.sign(b"payload");
		assert!(validate_message(&key.account(), b"payload", &signature));
		assert!(!validate_message(&key.account(), b"other payload", &signature));
		assert!(!validate_message(&KeyPair::generate().account(), b"payload", &signature));
	}

	#[test]
	fn signature_byte_round_trip() {
		let key = KeyPair::generate();
		let signature = key.sign(b"payload");
		assert_eq!(signature, Signature::from_bytes(signature.to_bytes()));
	}
}
