// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Fixed-size blake2b-256 identifiers: [`ArchiveAddress`] names a finalized
//! archive, [`ContentDigest`] names the bytes of a single entry. Both render
//! as 64 lowercase hex characters.

use std::{fmt, str::FromStr};

use blake2b_simd::Params;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

pub const HASH_LENGTH: usize = 32;

/// Incremental blake2b-256 hasher.
pub struct Hasher(blake2b_simd::State);

impl Default for Hasher {
    fn default() -> Self {
        Hasher(Params::new().hash_length(HASH_LENGTH).to_state())
    }
}

impl Hasher {
    pub fn update(&mut self, bytes: &[u8]) -> &mut Self {
        self.0.update(bytes);
        self
    }

    pub fn finalize(&self) -> [u8; HASH_LENGTH] {
        let mut out = [0; HASH_LENGTH];
        out.copy_from_slice(self.0.finalize().as_bytes());
        out
    }
}

/// Generates blake2b hash of fixed 32 bytes size.
pub fn blake2b_256(ingest: &[u8]) -> [u8; HASH_LENGTH] {
    Hasher::default().update(ingest).finalize()
}

macro_rules! hex_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; HASH_LENGTH]);

        impl $name {
            pub const fn new(bytes: [u8; HASH_LENGTH]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let mut bytes = [0; HASH_LENGTH];
                hex::decode_to_slice(s, &mut bytes)
                    .map_err(|e| Error::InvalidAddress(format!("{s:?}: {e}")))?;
                // Upper case hex decodes fine but would break the canonical form.
                if s.bytes().any(|b| b.is_ascii_uppercase()) {
                    return Err(Error::InvalidAddress(format!("{s:?}: not lowercase")));
                }
                Ok(Self(bytes))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_identifier!(
    /// Content-derived name of a finalized archive.
    ArchiveAddress
);

hex_identifier!(
    /// blake2b-256 of an entry's bytes.
    ContentDigest
);

impl ContentDigest {
    pub fn of(bytes: &[u8]) -> Self {
        Self(blake2b_256(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    impl Arbitrary for ArchiveAddress {
        fn arbitrary(g: &mut Gen) -> Self {
            let mut bytes = [0; HASH_LENGTH];
            bytes.iter_mut().for_each(|b| *b = u8::arbitrary(g));
            ArchiveAddress::new(bytes)
        }
    }

    #[quickcheck]
    fn address_display_parses_back(address: ArchiveAddress) {
        let rendered = address.to_string();
        assert_eq!(rendered.len(), 64);
        assert_eq!(rendered.parse::<ArchiveAddress>().unwrap(), address);
    }

    #[test]
    fn rejects_malformed_addresses() {
        let (g, upper, long) = ("g".repeat(64), "AB".repeat(32), "00".repeat(33));
        for bad in ["", "abc", g.as_str(), upper.as_str(), long.as_str()] {
            assert!(bad.parse::<ArchiveAddress>().is_err(), "{bad:?} parsed");
        }
    }

    #[test]
    fn serializes_as_hex_string() {
        let address = ArchiveAddress::new([0xab; HASH_LENGTH]);
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
        assert_eq!(
            serde_json::from_str::<ArchiveAddress>(&json).unwrap(),
            address
        );
    }

    #[test]
    fn incremental_hash_matches_one_shot() {
        let mut hasher = Hasher::default();
        hasher.update(b"hello ").update(b"world");
        assert_eq!(hasher.finalize(), blake2b_256(b"hello world"));
    }
}
