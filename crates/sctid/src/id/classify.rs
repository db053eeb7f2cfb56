//! Shape-only classification of identifier strings.
//!
//! These helpers never touch an identifier authority. They look at the
//! string's length, its digits and the component digit of its partition.

use super::verhoeff;
use crate::{ComponentType, Error, Result};

const SHAPE_MIN_LEN: usize = 7;
const SHAPE_MAX_LEN: usize = 18;

fn has_sctid_shape(sctid: &str) -> bool {
    (SHAPE_MIN_LEN..=SHAPE_MAX_LEN).contains(&sctid.len())
        && sctid.bytes().all(|b| b.is_ascii_digit())
}

/// The component type encoded in `sctid`, if it looks like an identifier
/// (7 to 18 digits) with a known component digit.
pub fn component_type_of(sctid: &str) -> Option<ComponentType> {
    if !has_sctid_shape(sctid) {
        return None;
    }
    let digit = sctid.as_bytes()[sctid.len() - 2] - b'0';
    ComponentType::from_partition_digit(digit)
}

pub fn is_concept_id(sctid: &str) -> bool {
    component_type_of(sctid) == Some(ComponentType::Concept)
}

pub fn is_description_id(sctid: &str) -> bool {
    component_type_of(sctid) == Some(ComponentType::Description)
}

pub fn is_relationship_id(sctid: &str) -> bool {
    component_type_of(sctid) == Some(ComponentType::Relationship)
}

/// Checks the Verhoeff check digit of `sctid` and, when `expected` is given,
/// that it has the shape of an identifier of that component type.
///
/// # Errors
///
/// Returns [`Error::InvalidSctid`] describing the first problem found.
pub fn validate_id(sctid: &str, expected: Option<ComponentType>) -> Result<()> {
    if !verhoeff::is_valid(sctid.as_bytes()) {
        return Err(Error::InvalidSctid {
            sctid: sctid.to_string(),
            reason: "does not have a valid check digit".into(),
        });
    }
    match expected {
        Some(component_type) if component_type_of(sctid) != Some(component_type) => {
            Err(Error::InvalidSctid {
                sctid: sctid.to_string(),
                reason: format!("is not a valid id for a {component_type}"),
            })
        }
        _ => Ok(()),
    }
}
