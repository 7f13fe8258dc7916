//! Byte and bit ordering

use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordering used to assemble multi-bit values
///
/// | Variant  | Bytes          | Bits inside a byte |
/// |----------|----------------|--------------------|
/// | `Big`    | most significant first  | MSB first |
/// | `Little` | least significant first | LSB first |
/// | `Middle` | 16-bit words in big-endian order, each word little-endian | MSB first |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    /// Network order
    #[default]
    Big,
    /// Intel order
    Little,
    /// PDP-11 order
    Middle,
}

impl Endian {
    /// Network byte order, as used by most file formats
    pub const NETWORK: Endian = Endian::Big;

    /// Short lowercase name
    pub fn name(&self) -> &'static str {
        match self {
            Endian::Big => "big",
            Endian::Little => "little",
            Endian::Middle => "middle",
        }
    }
}

impl fmt::Display for Endian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Endian {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "big" | "be" | "network" => Ok(Endian::Big),
            "little" | "le" => Ok(Endian::Little),
            "middle" | "pdp" => Ok(Endian::Middle),
            _ => Err(format!("Unknown endian: {}", s)),
        }
    }
}
