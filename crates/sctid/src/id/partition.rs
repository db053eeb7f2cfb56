use crate::{Error, Result};
use core::fmt;
use core::str::FromStr;

/// The kind of component an identifier is minted for.
///
/// Encoded as the second digit of an SCTID's partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ComponentType {
    Concept,
    Description,
    Relationship,
}

impl ComponentType {
    /// Every component type, in partition-digit order.
    pub const ALL: [Self; 3] = [Self::Concept, Self::Description, Self::Relationship];

    /// The partition digit (`0`, `1` or `2`) for this component type.
    pub const fn partition_digit(self) -> u8 {
        match self {
            Self::Concept => 0,
            Self::Description => 1,
            Self::Relationship => 2,
        }
    }

    pub const fn from_partition_digit(digit: u8) -> Option<Self> {
        match digit {
            0 => Some(Self::Concept),
            1 => Some(Self::Description),
            2 => Some(Self::Relationship),
            _ => None,
        }
    }

    /// Multiplier applied to the base prefetch count when sizing a cache for
    /// this component type. Descriptions and relationships are minted at
    /// roughly two and four times the rate of concepts.
    pub const fn prefetch_multiplier(self) -> usize {
        match self {
            Self::Concept => 1,
            Self::Description => 2,
            Self::Relationship => 4,
        }
    }

    pub(crate) const fn index(self) -> usize {
        self.partition_digit() as usize
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Concept => "Concept",
            Self::Description => "Description",
            Self::Relationship => "Relationship",
        })
    }
}

/// A registered SCTID namespace.
///
/// `0` is the international core. Extensions own a seven digit namespace
/// which is embedded in every identifier they mint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Namespace(u32);

impl Namespace {
    pub const INTERNATIONAL: Self = Self(0);

    /// Number of digits an extension namespace occupies inside an SCTID.
    pub const EXTENSION_DIGITS: usize = 7;

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn id(self) -> u32 {
        self.0
    }

    pub const fn is_international(self) -> bool {
        self.0 == 0
    }

    /// The partition used for `component_type` identifiers minted in this
    /// namespace.
    pub const fn partition(self, component_type: ComponentType) -> Partition {
        Partition::new(!self.is_international(), component_type)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Namespace {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// The two-digit partition of an SCTID.
///
/// The first digit says whether the identifier belongs to the international
/// core (`0`) or an extension (`1`); the second is the
/// [`ComponentType`] digit. Only `00`, `01`, `02`, `10`, `11` and `12` are
/// valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Partition {
    extension: bool,
    component_type: ComponentType,
}

impl Partition {
    pub const fn new(extension: bool, component_type: ComponentType) -> Self {
        Self {
            extension,
            component_type,
        }
    }

    pub const fn is_extension(self) -> bool {
        self.extension
    }

    pub const fn component_type(self) -> ComponentType {
        self.component_type
    }

    /// The partition as a number in `0..=12`, e.g. `11` for an extension
    /// description.
    pub const fn value(self) -> u8 {
        (self.extension as u8) * 10 + self.component_type.partition_digit()
    }

    pub fn from_digits(scope: u8, component: u8) -> Result<Self> {
        let extension = match scope {
            0 => false,
            1 => true,
            _ => return Err(Error::InvalidPartition(format!("{scope}{component}"))),
        };
        let component_type = ComponentType::from_partition_digit(component)
            .ok_or_else(|| Error::InvalidPartition(format!("{scope}{component}")))?;
        Ok(Self::new(extension, component_type))
    }
}

impl FromStr for Partition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.as_bytes() {
            [a @ b'0'..=b'9', b @ b'0'..=b'9'] => Self::from_digits(a - b'0', b - b'0'),
            _ => Err(Error::InvalidPartition(s.to_string())),
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}",
            self.extension as u8,
            self.component_type.partition_digit()
        )
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Partition {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Partition {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let raw = <String as serde::Deserialize>::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
