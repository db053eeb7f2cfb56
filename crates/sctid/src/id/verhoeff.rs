//! Verhoeff check digit over a string of decimal digits.
//!
//! Every SCTID ends with a Verhoeff check digit computed over all preceding
//! digits. The dihedral group D5 tables below catch every single-digit error
//! and every adjacent transposition.

const MULTIPLICATION: [[u8; 10]; 10] = [
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
    [1, 2, 3, 4, 0, 6, 7, 8, 9, 5],
    [2, 3, 4, 0, 1, 7, 8, 9, 5, 6],
    [3, 4, 0, 1, 2, 8, 9, 5, 6, 7],
    [4, 0, 1, 2, 3, 9, 5, 6, 7, 8],
    [5, 9, 8, 7, 6, 0, 4, 3, 2, 1],
    [6, 5, 9, 8, 7, 1, 0, 4, 3, 2],
    [7, 6, 5, 9, 8, 2, 1, 0, 4, 3],
    [8, 7, 6, 5, 9, 3, 2, 1, 0, 4],
    [9, 8, 7, 6, 5, 4, 3, 2, 1, 0],
];

const PERMUTATION: [[u8; 10]; 8] = [
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
    [1, 5, 7, 6, 2, 8, 3, 0, 9, 4],
    [5, 8, 0, 3, 7, 9, 6, 1, 4, 2],
    [8, 9, 1, 6, 0, 4, 3, 5, 2, 7],
    [9, 4, 5, 3, 1, 2, 7, 6, 8, 0],
    [4, 2, 8, 6, 5, 7, 3, 9, 0, 1],
    [2, 7, 9, 3, 8, 0, 6, 4, 1, 5],
    [7, 0, 4, 6, 9, 1, 3, 2, 5, 8],
];

const INVERSE: [u8; 10] = [0, 4, 3, 2, 1, 5, 6, 7, 8, 9];

/// Computes the check digit to append to `digits`.
///
/// `digits` must contain only ASCII decimal digits.
pub(crate) fn check_digit(digits: &[u8]) -> u8 {
    let mut c = 0_u8;
    for (i, &d) in digits.iter().rev().enumerate() {
        c = MULTIPLICATION[c as usize][PERMUTATION[(i + 1) % 8][(d - b'0') as usize] as usize];
    }
    INVERSE[c as usize]
}

/// Returns `true` if the last digit of `digits` is the correct check digit
/// for the rest.
pub(crate) fn is_valid(digits: &[u8]) -> bool {
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return false;
    }
    let mut c = 0_u8;
    for (i, &d) in digits.iter().rev().enumerate() {
        c = MULTIPLICATION[c as usize][PERMUTATION[i % 8][(d - b'0') as usize] as usize];
    }
    c == 0
}
