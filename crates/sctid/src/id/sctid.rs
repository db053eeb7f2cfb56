use super::verhoeff;
use crate::{ComponentType, Error, Namespace, Partition, Result};
use core::fmt;
use core::str::FromStr;

const NAMESPACE_FACTOR: u64 = 10_000_000;
const NAMESPACE_MIN: u32 = 1_000_000;
const NAMESPACE_MAX: u32 = 9_999_999;

/// A SNOMED CT component identifier.
///
/// The decimal form is laid out as:
///
/// ```text
///  item | namespace (extensions only, 7 digits) | partition (2) | check (1)
/// ```
///
/// The check digit is the Verhoeff check digit over every preceding digit. A
/// value of this type is always well formed: it has between
/// [`Sctid::MIN_LEN`] and [`Sctid::MAX_LEN`] digits, a valid partition and a
/// valid check digit.
///
/// # Example
///
/// ```
/// use sctid::{ComponentType, Namespace, Partition, Sctid};
///
/// let partition: Partition = "00".parse().unwrap();
/// let id = Sctid::from_parts(1_119_303, Namespace::INTERNATIONAL, partition).unwrap();
/// assert_eq!(id.to_string(), "1119303003");
/// assert_eq!(id.component_type(), ComponentType::Concept);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sctid(u64);

impl Sctid {
    pub const MIN_LEN: usize = 6;
    pub const MAX_LEN: usize = 18;

    /// Builds an identifier from its item id, namespace and partition,
    /// appending the check digit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSctid`] if the item id is zero, the namespace
    /// does not match the partition's scope, or the result would not fit in
    /// [`Sctid::MAX_LEN`] digits.
    pub fn from_parts(item: u64, namespace: Namespace, partition: Partition) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidSctid {
            sctid: format!("{item}/{namespace}/{partition}"),
            reason: reason.to_string(),
        };

        if item == 0 {
            return Err(invalid("item identifier must be positive"));
        }
        if partition.is_extension() == namespace.is_international() {
            return Err(invalid("namespace does not match partition scope"));
        }

        let body = if partition.is_extension() {
            if !(NAMESPACE_MIN..=NAMESPACE_MAX).contains(&namespace.id()) {
                return Err(invalid("extension namespace must have seven digits"));
            }
            item.checked_mul(NAMESPACE_FACTOR)
                .and_then(|v| v.checked_add(u64::from(namespace.id())))
        } else {
            Some(item)
        }
        .and_then(|v| v.checked_mul(100))
        .and_then(|v| v.checked_add(u64::from(partition.value())))
        .ok_or_else(|| invalid("identifier too long"))?;

        let (buf, len) = ascii_digits(body);
        if len + 1 > Self::MAX_LEN {
            return Err(invalid("identifier too long"));
        }
        if len + 1 < Self::MIN_LEN {
            return Err(invalid("identifier too short"));
        }
        let check = verhoeff::check_digit(&buf[..len]);
        Ok(Self(body * 10 + u64::from(check)))
    }

    /// The smallest item id that yields an identifier of at least
    /// [`Sctid::MIN_LEN`] digits in `partition`.
    pub const fn min_item(partition: Partition) -> u64 {
        if partition.is_extension() { 1 } else { 100 }
    }

    /// The raw numeric value.
    pub const fn value(self) -> u64 {
        self.0
    }

    pub fn partition(self) -> Partition {
        let digits = (self.0 / 10) % 100;
        let component_type = ComponentType::from_partition_digit((digits % 10) as u8)
            .unwrap_or(ComponentType::Concept);
        Partition::new(digits / 10 == 1, component_type)
    }

    pub fn component_type(self) -> ComponentType {
        self.partition().component_type()
    }

    /// The namespace embedded in the identifier, or
    /// [`Namespace::INTERNATIONAL`] for core identifiers.
    pub fn namespace(self) -> Namespace {
        if self.partition().is_extension() {
            Namespace::new(((self.0 / 1000) % NAMESPACE_FACTOR) as u32)
        } else {
            Namespace::INTERNATIONAL
        }
    }

    /// The item identifier, i.e. everything in front of the namespace and
    /// partition.
    pub fn item(self) -> u64 {
        if self.partition().is_extension() {
            self.0 / 1000 / NAMESPACE_FACTOR
        } else {
            self.0 / 1000
        }
    }
}

impl fmt::Display for Sctid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Sctid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidSctid {
            sctid: s.to_string(),
            reason: reason.to_string(),
        };

        let bytes = s.as_bytes();
        if !(Self::MIN_LEN..=Self::MAX_LEN).contains(&bytes.len()) {
            return Err(invalid("expected 6 to 18 digits"));
        }
        if !bytes.iter().all(u8::is_ascii_digit) {
            return Err(invalid("expected only decimal digits"));
        }
        if bytes[0] == b'0' {
            return Err(invalid("leading zero"));
        }
        let len = bytes.len();
        Partition::from_digits(bytes[len - 3] - b'0', bytes[len - 2] - b'0')?;
        if !verhoeff::is_valid(bytes) {
            return Err(invalid("does not have a valid check digit"));
        }

        s.parse::<u64>()
            .map(Self)
            .map_err(|e| invalid(&e.to_string()))
    }
}

impl TryFrom<u64> for Sctid {
    type Error = Error;

    fn try_from(value: u64) -> Result<Self> {
        value.to_string().parse()
    }
}

impl From<Sctid> for u64 {
    fn from(id: Sctid) -> Self {
        id.0
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Sctid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Sctid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let raw = <String as serde::Deserialize>::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Writes the decimal digits of `value` into a stack buffer.
fn ascii_digits(mut value: u64) -> ([u8; 20], usize) {
    let mut buf = [0_u8; 20];
    let mut n = 0;
    loop {
        buf[n] = b'0' + (value % 10) as u8;
        n += 1;
        value /= 10;
        if value == 0 {
            break;
        }
    }
    buf[..n].reverse();
    (buf, n)
}
