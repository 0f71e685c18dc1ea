//! Core type definitions for NOVA transactions.
//!
//! These types form the vocabulary of every transaction on the network: the
//! kind discriminant, the UTXO input/output shapes, and the plain 32-byte
//! [`Address`]. They are intentionally small and serde-friendly so they can
//! round-trip through both the bincode wire/storage encoding and JSON (used
//! by receipts and snapshot files).

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// A 32-byte account or contract address.
///
/// Displayed as lowercase hex. There is no bech32 or checksum wrapper here --
/// nothing downstream needs a human-friendly encoding, and plain hex keeps
/// address bytes sorting the same way whether compared as strings or as
/// storage keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(#[serde(with = "hex_bytes")] pub [u8; 32]);

impl Address {
    /// The all-zero address, used for system/coinbase-adjacent bookkeeping.
    pub const ZERO: Address = Address([0u8; 32]);

    /// Wraps a raw 32-byte value.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derives an address from a public key by BLAKE3-hashing its bytes.
    pub fn from_public_key_bytes(public_key: &[u8]) -> Self {
        Self(crate::crypto::hash::blake3_hash(public_key))
    }

    /// Parses an address from a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, AddressError> {
        let bytes = hex::decode(s).map_err(|e| AddressError::InvalidHex(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(AddressError::WrongLength(bytes.len()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Returns the raw 32 bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Errors parsing an [`Address`] from external input.
#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("expected 32 bytes, got {0}")]
    WrongLength(usize),
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(de)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        if bytes.len() != 32 {
            return Err(serde::de::Error::custom(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(arr)
    }
}

// ---------------------------------------------------------------------------
// TransactionKind
// ---------------------------------------------------------------------------

/// Discriminant for the operation a transaction represents.
///
/// This is an explicit tag carried for storage/wire purposes. It does not
/// override the marker-based detection the VM harness performs when routing
/// a transaction to the contract runtime -- that detection is frozen to
/// scanning output `script_pubkey`/input `signature` bytes for `CONTRACT`
/// and `DEPLOY` markers. `kind` disambiguates when those markers are absent
/// and is what gets persisted in receipts and storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Ordinary UTXO transfer: inputs spend prior outputs, new outputs created.
    Regular,
    /// No real input; mints the block reward to the proposer's output(s).
    Coinbase,
    /// Carries contract bytecode in its payload; has no outputs.
    ContractDeploy,
    /// Targets an existing contract address, carrying calldata in its payload.
    ContractCall,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Regular => write!(f, "Regular"),
            Self::Coinbase => write!(f, "Coinbase"),
            Self::ContractDeploy => write!(f, "ContractDeploy"),
            Self::ContractCall => write!(f, "ContractCall"),
        }
    }
}

// ---------------------------------------------------------------------------
// TransactionStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Submitted to the mempool, awaiting block inclusion.
    Pending,
    /// Included in a finalized block and executed successfully.
    Confirmed,
    /// Rejected during validation or execution.
    Failed,
    /// Exceeded the mempool TTL without being included in a block.
    Expired,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Confirmed => write!(f, "Confirmed"),
            Self::Failed => write!(f, "Failed"),
            Self::Expired => write!(f, "Expired"),
        }
    }
}

// ---------------------------------------------------------------------------
// Input / Output
// ---------------------------------------------------------------------------

/// A reference to a previously created output, spent by a transaction.
///
/// `Coinbase` and `ContractDeploy`/`ContractCall` transactions may carry no
/// inputs (or a single marker-bearing input, in the deploy case); `Regular`
/// transactions must have at least one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    /// Hex-encoded id of the transaction whose output is being spent.
    pub previous_tx_hash: String,
    /// Index into the previous transaction's `outputs`.
    pub output_index: u32,
    /// Hex-encoded Ed25519 signature authorizing the spend, `None` until signed.
    pub signature: Option<String>,
    /// Hex-encoded public key of the spender, `None` until signed.
    pub public_key: Option<String>,
    /// Relative ordering/replaceability hint, carried through unmodified.
    pub sequence: u32,
}

impl Input {
    /// Builds an unsigned input referencing a previous output.
    pub fn new(previous_tx_hash: impl Into<String>, output_index: u32) -> Self {
        Self {
            previous_tx_hash: previous_tx_hash.into(),
            output_index,
            signature: None,
            public_key: None,
            sequence: 0,
        }
    }

    /// `true` if the marker scan should treat this input as a deploy marker,
    /// i.e. its signature field contains the literal substring `DEPLOY`.
    pub fn carries_deploy_marker(&self) -> bool {
        self.signature
            .as_deref()
            .is_some_and(|s| s.contains("DEPLOY"))
    }
}

/// A newly created, spendable value slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    /// Value in photons (the smallest NOVA unit).
    pub value: u64,
    /// The address that can spend this output.
    pub recipient_address: Address,
    /// Opaque script/marker bytes. The harness scans this for the literal
    /// substring `CONTRACT` to detect contract transactions.
    pub script_pubkey: Option<Vec<u8>>,
}

impl Output {
    /// Builds a plain value-carrying output with no script.
    pub fn new(value: u64, recipient_address: Address) -> Self {
        Self {
            value,
            recipient_address,
            script_pubkey: None,
        }
    }

    /// `true` if the marker scan should treat this output as a contract
    /// marker, i.e. `script_pubkey` contains the literal substring `CONTRACT`.
    pub fn carries_contract_marker(&self) -> bool {
        self.script_pubkey
            .as_deref()
            .is_some_and(|bytes| contains_subslice(bytes, b"CONTRACT"))
    }
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() || haystack.len() < needle.len() {
        return needle.is_empty();
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
