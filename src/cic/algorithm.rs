//! # Nibble Transforms
//!
//! The three bit-exact transforms of the CIC exchange, as pure functions over
//! 16-nibble halves of the working RAM. Every value is a nibble (`0..=0xF`)
//! and every index stays inside its half.
//!
//! Operation order matters throughout: intermediate sums feed the next step,
//! none of these are associative.

use super::consts::{SEED_HEADER, X105_NIBBLES};

/// Nibbles in one half of the working RAM.
pub const HALF: usize = 16;

/// Rolling mod-16 addition chain from `start` to the end of the half:
/// every nibble after `start` becomes `prev + 1 + current`.
pub fn encode_round(half: &mut [u8; HALF], start: usize) {
    let mut data = half[start];
    for nibble in half.iter_mut().skip(start + 1) {
        data = (((data + 1) & 0xF) + *nibble) & 0xF;
        *nibble = data;
    }
}

/// The compare-mode permutation.
///
/// One pass runs for each step of a counter that starts at `half[15]` and
/// decrements mod 16 until it reaches 0xF, so the pass count is data
/// dependent (1 to 16).
pub fn round(half: &mut [u8; HALF]) {
    let mut count = half[15];
    let mut a = count;

    loop {
        let mut b = 1;

        a = (a + half[b] + 1) & 0xF;
        half[b] = a;
        b += 1;

        a = (a + half[b] + 1) & 0xF;
        core::mem::swap(&mut a, &mut half[b]);
        half[b] = !half[b] & 0xF;
        b += 1;

        let sum = (a & 0xF) + (half[b] & 0xF) + 1;
        if sum < 16 {
            a = half[b];
            half[b] = sum;
            b += 1;
        } else {
            a = sum & 0xF;
        }

        for _ in 0..2 {
            a = (a + half[b]) & 0xF;
            half[b] = a;
            b += 1;
        }

        a += 8;
        if a < 16 {
            a = (a + half[b]) & 0xF;
        } else {
            a &= 0xF;
        }
        half[b] = a;
        b += 1;

        // Wrap-around pass over the rest of the half and back to 0
        loop {
            a = (a + half[b] + 1) & 0xF;
            half[b] = a;
            b = (b + 1) & 0xF;
            if b == 0 {
                break;
            }
        }

        count = (count + 0xF) & 0xF;
        if count == 0xF {
            break;
        }
    }
}

/// X105 challenge transform, in place. Turns the 30-nibble challenge into
/// the response the console checks against its own model.
pub fn x105_algorithm(nibbles: &mut [u8; X105_NIBBLES]) {
    let mut a: u8 = 5;
    let mut carry = true;

    for nibble in nibbles.iter_mut() {
        if *nibble & 0x1 == 0 {
            a += 8;
        }
        if a & 0x2 == 0 {
            a += 4;
        }
        a = (a + *nibble) & 0xF;
        *nibble = a;

        if !carry {
            a += 7;
        }
        a = (a + *nibble) & 0xF;
        a = a + *nibble + u8::from(carry);
        carry = a >= 0x10;
        if carry {
            a -= 0x10;
        }
        // The complement also seeds the next nibble
        a = !a & 0xF;
        *nibble = a;
    }
}

/// Seed window, encoded twice. Returns the six nibbles streamed in
/// SendSeed.
pub fn encode_seed(seed: u8) -> [u8; 6] {
    const START: usize = 0xA;

    let mut half = [0u8; HALF];
    half[START..START + 2].copy_from_slice(&SEED_HEADER);
    for pair in half[START + 2..].chunks_exact_mut(2) {
        pair[0] = seed >> 4;
        pair[1] = seed & 0xF;
    }

    encode_round(&mut half, START);
    encode_round(&mut half, START);

    let mut stream = [0; 6];
    stream.copy_from_slice(&half[START..]);
    stream
}

/// Checksum window, encoded four times. Returns the sixteen nibbles
/// streamed in SendChecksum.
pub fn encode_checksum(checksum: &[u8; 6]) -> [u8; HALF] {
    let mut half = [0u8; HALF];
    for (pair, byte) in half[4..].chunks_exact_mut(2).zip(checksum) {
        pair[0] = byte >> 4;
        pair[1] = byte & 0xF;
    }

    for _ in 0..4 {
        encode_round(&mut half, 0);
    }
    half
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
