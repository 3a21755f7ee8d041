use crate::{
    Result,
    constants::{MAX_ADDRESS, MAX_IDENTIFICATION_LENGTH, MIN_ADDRESS, MIN_IDENTIFICATION_LENGTH},
    error::CoreError,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;

/// Bus address of a module (2 digits, zero-padded on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ModuleAddress(u8);

impl ModuleAddress {
    /// Create a new address with validation.
    ///
    /// # Errors
    /// Returns `CoreError::InvalidAddress` if the value is outside 1-99.
    pub fn new(value: u8) -> Result<Self> {
        if !(MIN_ADDRESS..=MAX_ADDRESS).contains(&value) {
            return Err(CoreError::InvalidAddress {
                value: u32::from(value),
                min: MIN_ADDRESS,
                max: MAX_ADDRESS,
            });
        }
        Ok(ModuleAddress(value))
    }

    /// Parse the two ASCII digits found in a frame header.
    ///
    /// # Errors
    /// Returns `CoreError::UnparsableAddress` if either byte is not a digit,
    /// or `CoreError::InvalidAddress` for `00`.
    pub fn from_ascii(digits: [u8; 2]) -> Result<Self> {
        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(CoreError::UnparsableAddress(
                String::from_utf8_lossy(&digits).into_owned(),
            ));
        }
        Self::new((digits[0] - b'0') * 10 + (digits[1] - b'0'))
    }

    #[must_use]
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// The address as it travels on the wire.
    #[must_use]
    pub fn to_ascii(&self) -> [u8; 2] {
        [b'0' + self.0 / 10, b'0' + self.0 % 10]
    }
}

impl fmt::Display for ModuleAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

impl std::str::FromStr for ModuleAddress {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let value: u8 = s
            .parse()
            .map_err(|_| CoreError::UnparsableAddress(s.to_string()))?;
        ModuleAddress::new(value)
    }
}

impl TryFrom<u8> for ModuleAddress {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self> {
        ModuleAddress::new(value)
    }
}

impl From<ModuleAddress> for u8 {
    fn from(address: ModuleAddress) -> Self {
        address.0
    }
}

/// Persistent identifier of a module, independent of its bus address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(pub u32);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical group of modules sharing dwell-time accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub u32);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Credential code presented at a module (card, tag or ticket number).
///
/// # Security
/// Comparison runs in constant time so that lookups do not leak how much
/// of a guessed code matched.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identification(String);

impl Identification {
    /// Create a new identification with validation.
    ///
    /// The code is trimmed before validation. Leading zeros are significant
    /// and preserved.
    ///
    /// # Errors
    /// Returns `CoreError::InvalidIdentification` if:
    /// - the trimmed code is empty or longer than 20 characters
    /// - the code contains anything but ASCII alphanumerics
    pub fn new(code: &str) -> Result<Self> {
        let code = code.trim();

        let len = code.len();
        if !(MIN_IDENTIFICATION_LENGTH..=MAX_IDENTIFICATION_LENGTH).contains(&len) {
            return Err(CoreError::InvalidIdentification(format!(
                "length must be {MIN_IDENTIFICATION_LENGTH}-{MAX_IDENTIFICATION_LENGTH}, got {len}"
            )));
        }

        if !code.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(CoreError::InvalidIdentification(format!(
                "'{code}' contains non alphanumeric characters"
            )));
        }

        Ok(Identification(code.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identification {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Identification {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Identification::new(s)
    }
}

impl TryFrom<String> for Identification {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Identification::new(&value)
    }
}

impl From<Identification> for String {
    fn from(identification: Identification) -> Self {
        identification.0
    }
}

impl PartialEq for Identification {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl std::hash::Hash for Identification {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

/// Logical direction of a module, and of the movements recorded there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Entrada
    Entry,
    /// Salida
    Exit,
}

impl Direction {
    #[inline]
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Direction::Entry => Direction::Exit,
            Direction::Exit => Direction::Entry,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_entry(self) -> bool {
        matches!(self, Direction::Entry)
    }

    #[inline]
    #[must_use]
    pub fn is_exit(self) -> bool {
        matches!(self, Direction::Exit)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Direction::Entry => write!(f, "Entry"),
            Direction::Exit => write!(f, "Exit"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("15", 15)]
    #[case("01", 1)]
    #[case("99", 99)]
    fn test_address_valid(#[case] input: &str, #[case] expected: u8) {
        let address: ModuleAddress = input.parse().unwrap();
        assert_eq!(address.as_u8(), expected);
        assert_eq!(address.to_string(), format!("{:02}", expected));
    }

    #[rstest]
    #[case("00")]
    #[case("100")]
    #[case("abc")]
    fn test_address_invalid(#[case] input: &str) {
        let result: Result<ModuleAddress> = input.parse();
        assert!(result.is_err());
    }

    #[test]
    fn test_address_ascii() {
        let address = ModuleAddress::new(7).unwrap();
        assert_eq!(&address.to_ascii(), b"07");
        assert_eq!(ModuleAddress::from_ascii(*b"07").unwrap(), address);
        assert!(ModuleAddress::from_ascii(*b"0x").is_err());
        assert!(ModuleAddress::from_ascii(*b"00").is_err());
    }

    #[test]
    fn test_address_serde_rejects_out_of_range() {
        let ok: ModuleAddress = serde_json::from_str("42").unwrap();
        assert_eq!(ok.as_u8(), 42);
        assert!(serde_json::from_str::<ModuleAddress>("0").is_err());
    }

    #[rstest]
    #[case("00012345", "00012345")]
    #[case("  ABC123 ", "ABC123")]
    #[case("12345678901234567890", "12345678901234567890")]
    fn test_identification_valid(#[case] input: &str, #[case] expected: &str) {
        let id = Identification::new(input).unwrap();
        assert_eq!(id.as_str(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("123456789012345678901")]
    #[case("12-34")]
    fn test_identification_invalid(#[case] input: &str) {
        assert!(Identification::new(input).is_err());
    }

    #[test]
    fn test_direction_opposite() {
        assert_eq!(Direction::Entry.opposite(), Direction::Exit);
        assert_eq!(Direction::Exit.opposite(), Direction::Entry);
        assert!(Direction::Entry.is_entry());
        assert!(Direction::Exit.is_exit());
    }
}
