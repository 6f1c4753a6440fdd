//! Dense-order positional keys for list children.
//!
//! Keys are strings over the printable-ASCII digit alphabet `'!'..='~'`,
//! compared bytewise. Between any two distinct keys another key exists, and
//! construction is a pure function of its bounds, so replicas minting from
//! equal neighbours mint equal keys.
//!
//! Keys produced here never end in the minimum digit; that keeps the left
//! neighbourhood of every key dense (a strictly smaller key always exists).

use serde::{Deserialize, Serialize};
use std::fmt;

const MIN_DIGIT: u8 = b'!';
const MAX_DIGIT: u8 = b'~';
const RADIX: u16 = (MAX_DIGIT - MIN_DIGIT + 1) as u16;

/// A list child's key in the dense total order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(String);

impl Position {
    /// Mints a key strictly between the two bounds; `None` stands for the
    /// open end on that side. Bounds must satisfy `lo < hi` when both are
    /// present and must themselves be keys minted by this algebra (or by the
    /// session authority).
    pub fn between(lo: Option<&Position>, hi: Option<&Position>) -> Position {
        let lo_bytes = lo.map(|p| p.0.as_bytes()).unwrap_or(b"");
        let hi_bytes = hi.map(|p| p.0.as_bytes());
        debug_assert!(
            hi_bytes.map_or(true, |hi| lo_bytes < hi),
            "position bounds out of order"
        );
        let bytes = midpoint(lo_bytes, hi_bytes);
        Position(String::from_utf8(bytes).expect("digit alphabet is ASCII"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Position {
    fn from(s: String) -> Self {
        Position(s)
    }
}

impl From<&str> for Position {
    fn from(s: &str) -> Self {
        Position(s.to_owned())
    }
}

/// Digit-at-a-time midpoint between `a` and `b` (exclusive), where an absent
/// `b` is the open upper end and `a` may be empty (the open lower end). The
/// lower bound is implicitly padded with the minimum digit, so a shared
/// prefix is kept and the first digit gap decides; the key grows by one digit
/// only when the gap between adjacent digits closes.
fn midpoint(a: &[u8], b: Option<&[u8]>) -> Vec<u8> {
    if let Some(b) = b {
        let mut n = 0;
        while n < b.len() && a.get(n).copied().unwrap_or(MIN_DIGIT) == b[n] {
            n += 1;
        }
        debug_assert!(n < b.len(), "upper bound must exceed the padded lower bound");
        if n > 0 {
            let mut out = b[..n].to_vec();
            out.extend(midpoint(a.get(n..).unwrap_or(b""), Some(&b[n..])));
            return out;
        }
    }

    let digit_a = a.first().map(|d| digit_index(*d)).unwrap_or(0);
    let digit_b = b
        .and_then(|b| b.first())
        .map(|d| digit_index(*d))
        .unwrap_or(RADIX);

    if digit_b - digit_a > 1 {
        return vec![digit_at((digit_a + digit_b + 1) / 2)];
    }

    // Adjacent first digits: reuse the upper bound's first digit when it has
    // a longer tail, otherwise keep the lower digit and recurse on its tail
    // against the open end.
    match b {
        Some(b) if b.len() > 1 => b[..1].to_vec(),
        _ => {
            let mut out = vec![digit_at(digit_a)];
            out.extend(midpoint(a.get(1..).unwrap_or(b""), None));
            out
        }
    }
}

fn digit_index(digit: u8) -> u16 {
    debug_assert!((MIN_DIGIT..=MAX_DIGIT).contains(&digit), "digit out of alphabet");
    (digit - MIN_DIGIT) as u16
}

fn digit_at(index: u16) -> u8 {
    debug_assert!(index < RADIX, "digit index out of alphabet");
    MIN_DIGIT + index as u8
}
