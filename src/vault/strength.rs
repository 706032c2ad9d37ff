//! Heuristic password strength scoring on a 0-4 scale.
//!
//! The score feeds the vault statistics (weak counts and the health
//! score) and the per-credential detail view.  It is a coarse local
//! heuristic, not a crack-time estimate: length carries most of the
//! weight, character variety adds one point, and obviously bad
//! passwords are pinned to zero.

/// Passwords on every breach list's first page.
const COMMON_PASSWORDS: &[&str] = &[
    "password",
    "password1",
    "123456",
    "12345678",
    "123456789",
    "qwerty",
    "abc123",
    "letmein",
    "iloveyou",
    "admin",
    "welcome",
    "monkey",
    "dragon",
];

/// Score a password from 0 (worst) to 4 (best).
///
/// - 0: shorter than 8 chars, a known common password, or a single
///   repeated character
/// - +1 at 8 chars, +2 at 12, +3 at 16 (length points)
/// - +1 for three or more character classes (lower, upper, digit,
///   symbol)
/// - -1 for fewer than four distinct characters
pub fn score_password(password: &str) -> u8 {
    if password.chars().count() < 8 {
        return 0;
    }
    if COMMON_PASSWORDS.contains(&password.to_lowercase().as_str()) {
        return 0;
    }

    let length = password.chars().count();
    let mut score: i32 = match length {
        0..=7 => 0,
        8..=11 => 1,
        12..=15 => 2,
        _ => 3,
    };

    let mut lower = false;
    let mut upper = false;
    let mut digit = false;
    let mut symbol = false;
    for c in password.chars() {
        if c.is_ascii_lowercase() {
            lower = true;
        } else if c.is_ascii_uppercase() {
            upper = true;
        } else if c.is_ascii_digit() {
            digit = true;
        } else {
            symbol = true;
        }
    }
    let classes = [lower, upper, digit, symbol].iter().filter(|b| **b).count();
    if classes >= 3 {
        score += 1;
    }

    // Low distinct-character counts defeat the length bonus.
    let mut distinct: Vec<char> = password.chars().collect();
    distinct.sort_unstable();
    distinct.dedup();
    if distinct.len() < 4 {
        score -= 1;
    }
    if distinct.len() == 1 {
        return 0;
    }

    score.clamp(0, 4) as u8
}
