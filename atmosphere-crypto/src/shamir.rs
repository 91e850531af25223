//! Shamir's Secret Sharing over GF(p) with `p = 2^255 - 19`.
//!
//! The mesh master key is a 32-byte Ed25519 secret key. It is encoded as
//! a big-endian integer modulo `p`, hidden as the constant term of a
//! random degree-`(t-1)` polynomial, and distributed as `n` points
//! `(i, P(i) mod p)` for `i` in `1..=n`. Any `t` of the `n` shares
//! reconstruct the secret via Lagrange interpolation at `x = 0`; fewer
//! than `t` shares reveal nothing about it.

use num_bigint::{BigInt, Sign};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::RngCore;
use std::fmt;

/// `2^255 - 19`, the field prime shares are computed modulo.
fn field_prime() -> BigInt {
    (BigInt::one() << 255) - BigInt::from(19)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShamirError {
    InvalidThreshold { threshold: usize, shares: usize },
    SecretTooLarge,
    DuplicateShareIndex(u8),
    TooFewShares { have: usize, need: usize },
}

impl fmt::Display for ShamirError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShamirError::InvalidThreshold { threshold, shares } => write!(
                f,
                "threshold {threshold} must be between 1 and the share count {shares}"
            ),
            ShamirError::SecretTooLarge => {
                write!(f, "secret does not fit in the GF(2^255-19) field")
            }
            ShamirError::DuplicateShareIndex(i) => write!(f, "duplicate share index {i}"),
            ShamirError::TooFewShares { have, need } => {
                write!(f, "need at least {need} shares to reconstruct, have {have}")
            }
        }
    }
}

impl std::error::Error for ShamirError {}

/// One point `(index, value)` of the sharing polynomial. `value` is the
/// big-endian encoding of `P(index) mod p`, padded to 32 bytes.
pub type Share = (u8, [u8; 32]);

fn mod_inverse(a: &BigInt, p: &BigInt) -> BigInt {
    // Extended Euclidean algorithm; `a` and `p` are coprime because `p` is prime
    // and `a mod p != 0`.
    let (mut old_r, mut r) = (a.clone(), p.clone());
    let (mut old_s, mut s) = (BigInt::one(), BigInt::zero());

    while !r.is_zero() {
        let quotient = &old_r / &r;
        let new_r = &old_r - &quotient * &r;
        old_r = r;
        r = new_r;
        let new_s = &old_s - &quotient * &s;
        old_s = s;
        s = new_s;
    }

    old_s.mod_floor(p)
}

fn eval_polynomial(coefficients: &[BigInt], x: &BigInt, p: &BigInt) -> BigInt {
    let mut result = BigInt::zero();
    for coeff in coefficients.iter().rev() {
        result = (&result * x + coeff).mod_floor(p);
    }
    result
}

fn bigint_to_32_bytes(value: &BigInt) -> [u8; 32] {
    let (_, be_bytes) = value.to_bytes_be();
    let mut out = [0u8; 32];
    let offset = 32usize.saturating_sub(be_bytes.len());
    out[offset..].copy_from_slice(&be_bytes[be_bytes.len().saturating_sub(32)..]);
    out
}

/// Whether `secret`, read as a big-endian 256-bit integer, is valid
/// input to [`split_secret`] (strictly less than the field prime). A
/// uniformly random 32-byte value fails this roughly half the time,
/// since `p` is just under `2^255` — callers that generate secrets
/// randomly should resample on `false` rather than propagate the error.
pub fn fits_field(secret: &[u8; 32]) -> bool {
    BigInt::from_bytes_be(Sign::Plus, secret) < field_prime()
}

/// Split a 32-byte secret into `num_shares` shares, any `threshold` of
/// which reconstruct it.
pub fn split_secret(
    secret: &[u8; 32],
    threshold: usize,
    num_shares: usize,
) -> Result<Vec<Share>, ShamirError> {
    if threshold == 0 || threshold > num_shares || num_shares == 0 || num_shares > 255 {
        return Err(ShamirError::InvalidThreshold {
            threshold,
            shares: num_shares,
        });
    }

    let p = field_prime();
    let secret_int = BigInt::from_bytes_be(Sign::Plus, secret);
    if secret_int >= p {
        return Err(ShamirError::SecretTooLarge);
    }

    let mut rng = rand::rngs::OsRng;
    let mut coefficients = Vec::with_capacity(threshold);
    coefficients.push(secret_int);
    for _ in 1..threshold {
        coefficients.push(random_field_element(&mut rng, &p));
    }

    let mut shares = Vec::with_capacity(num_shares);
    for i in 1..=num_shares as u8 {
        let x = BigInt::from(i);
        let y = eval_polynomial(&coefficients, &x, &p);
        shares.push((i, bigint_to_32_bytes(&y)));
    }
    Ok(shares)
}

fn random_field_element(rng: &mut impl RngCore, p: &BigInt) -> BigInt {
    loop {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        let candidate = BigInt::from_bytes_be(Sign::Plus, &bytes);
        if &candidate < p {
            return candidate;
        }
    }
}

/// Reconstruct the secret from `threshold`-or-more shares via Lagrange
/// interpolation at `x = 0`.
pub fn combine_shares(shares: &[Share]) -> Result<[u8; 32], ShamirError> {
    if shares.is_empty() {
        return Err(ShamirError::TooFewShares { have: 0, need: 1 });
    }

    let mut seen = std::collections::HashSet::new();
    for (i, _) in shares {
        if !seen.insert(*i) {
            return Err(ShamirError::DuplicateShareIndex(*i));
        }
    }

    let p = field_prime();
    let points: Vec<(BigInt, BigInt)> = shares
        .iter()
        .map(|(i, v)| (BigInt::from(*i), BigInt::from_bytes_be(Sign::Plus, v)))
        .collect();

    let mut secret = BigInt::zero();
    for (j, (x_j, y_j)) in points.iter().enumerate() {
        let mut numerator = BigInt::one();
        let mut denominator = BigInt::one();
        for (m, (x_m, _)) in points.iter().enumerate() {
            if m == j {
                continue;
            }
            numerator = (&numerator * (-x_m)).mod_floor(&p);
            denominator = (&denominator * (x_j - x_m)).mod_floor(&p);
        }
        let term = (y_j * &numerator * mod_inverse(&denominator, &p)).mod_floor(&p);
        secret = (&secret + term).mod_floor(&p);
    }

    Ok(bigint_to_32_bytes(&secret))
}
