//! Reed-Solomon over GF(256), the LBP algorithm used by LTO drives that
//! predate CRC32C support.
//!
//! Grounded on the function surface declared in
//! `reed_solomon_crc.h` (`rs_gf256_enc`/`rs_gf256_check`); that header
//! carries no body, so the field arithmetic and systematic encoding below is
//! a standard from-scratch GF(256) Reed-Solomon implementation with 4 parity
//! bytes, not a transliteration.

const GF_PRIME_POLY: u16 = 0x11d;

lazy_static::lazy_static! {
    static ref GF_EXP: [u8; 512] = build_exp_table();
    static ref GF_LOG: [u8; 256] = build_log_table(&GF_EXP);
    static ref GENERATOR: [u8; 5] = build_generator(&GF_EXP, &GF_LOG);
}

fn build_exp_table() -> [u8; 512] {
    let mut exp = [0u8; 512];
    let mut x: u16 = 1;
    for i in 0..255usize {
        exp[i] = x as u8;
        x <<= 1;
        if x & 0x100 != 0 {
            x ^= GF_PRIME_POLY;
        }
    }
    for i in 255..512 {
        exp[i] = exp[i - 255];
    }
    exp
}

fn build_log_table(exp: &[u8; 512]) -> [u8; 256] {
    let mut log = [0u8; 256];
    for i in 0..255usize {
        log[exp[i] as usize] = i as u8;
    }
    log
}

fn gf_mul(a: u8, b: u8, exp: &[u8; 512], log: &[u8; 256]) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    let sum = log[a as usize] as usize + log[b as usize] as usize;
    exp[sum]
}

/// Generator polynomial with roots at `a^0..a^3`, i.e.
/// `(x + a^0)(x + a^1)(x + a^2)(x + a^3)`, coefficients highest-degree first.
/// Degree 4, so 5 coefficients.
fn build_generator(exp: &[u8; 512], log: &[u8; 256]) -> [u8; 5] {
    let mut g: Vec<u8> = vec![1];
    for i in 0..4u8 {
        let root = exp[i as usize];
        let mut next = vec![0u8; g.len() + 1];
        for (j, &coeff) in g.iter().enumerate() {
            next[j] ^= coeff;
            next[j + 1] ^= gf_mul(coeff, root, exp, log);
        }
        g = next;
    }
    let mut out = [0u8; 5];
    out.copy_from_slice(&g);
    out
}

/// Compute the 4-byte remainder of `data` divided by the generator
/// polynomial, i.e. the systematic Reed-Solomon parity for `data`.
fn remainder(data: &[u8]) -> [u8; 4] {
    let exp: &[u8; 512] = &GF_EXP;
    let log: &[u8; 256] = &GF_LOG;
    let gen: &[u8; 5] = &GENERATOR;

    let mut reg = [0u8; 4];
    for &byte in data {
        let feedback = byte ^ reg[0];
        for i in 0..3 {
            reg[i] = reg[i + 1] ^ gf_mul(feedback, gen[4 - (i + 1)], exp, log);
        }
        reg[3] = gf_mul(feedback, gen[0], exp, log);
    }
    reg
}

/// Encode in place: `buf`'s last 4 bytes are the parity trailer (expected to
/// be zeroed by the caller) and are overwritten with the computed parity for
/// everything before them.
pub fn rs_gf256_enc(buf: &mut [u8]) {
    assert!(buf.len() >= 4, "rs_gf256_enc: buffer too small for parity");
    let (data, trailer) = buf.split_at_mut(buf.len() - 4);
    let parity = remainder(data);
    trailer.copy_from_slice(&parity);
}

/// Verify: recompute the parity of the payload portion of `buf` and compare
/// against the trailing 4 bytes.
pub fn rs_gf256_check(buf: &[u8]) -> bool {
    if buf.len() < 4 {
        return false;
    }
    let (data, trailer) = buf.split_at(buf.len() - 4);
    remainder(data) == trailer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exp_log_are_inverse() {
        for i in 1..255usize {
            let x = GF_EXP[i];
            assert_eq!(GF_LOG[x as usize] as usize, i);
        }
    }

    #[test]
    fn encode_then_check_passes() {
        let mut buf = vec![1u8, 2, 3, 4, 5, 6, 7, 0, 0, 0, 0];
        rs_gf256_enc(&mut buf);
        assert!(rs_gf256_check(&buf));
    }
}
