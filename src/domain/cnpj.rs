//! CNPJ (Brazilian company registry number) validation and formatting.
//!
//! Credentials are issued per CNPJ, so pools reject malformed identifiers
//! before they ever reach the upstream.

const FIRST_WEIGHTS: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
const SECOND_WEIGHTS: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

/// Strip everything that is not an ASCII digit.
pub fn digits(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn check_digit(digits: &[u32], weights: &[u32]) -> u32 {
    let sum: u32 = digits.iter().zip(weights).map(|(d, w)| d * w).sum();
    match sum % 11 {
        0 | 1 => 0,
        rest => 11 - rest,
    }
}

/// Validate length, repeated digits and both check digits.
pub fn is_valid(raw: &str) -> bool {
    let clean = digits(raw);
    if clean.len() != 14 {
        return false;
    }
    let nums: Vec<u32> = clean.chars().filter_map(|c| c.to_digit(10)).collect();
    if nums.iter().all(|d| *d == nums[0]) {
        return false;
    }
    let first = check_digit(&nums[..12], &FIRST_WEIGHTS);
    if nums[12] != first {
        return false;
    }
    let second = check_digit(&nums[..13], &SECOND_WEIGHTS);
    nums[13] == second
}

/// `XX.XXX.XXX/XXXX-XX`, or `None` when the input does not hold 14 digits.
pub fn format(raw: &str) -> Option<String> {
    let d = digits(raw);
    if d.len() != 14 {
        return None;
    }
    Some(format!(
        "{}.{}.{}/{}-{}",
        &d[0..2],
        &d[2..5],
        &d[5..8],
        &d[8..12],
        &d[12..14]
    ))
}
