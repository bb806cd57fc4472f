//! Solenoid protocol codec.
//!
//! A controller board exposes 24 binary outputs addressed as three
//! 8-bit groups, tagged `'A'`, `'B'` and `'C'` on the wire. Each group
//! carries an independent polarity flag: when set, every bit in that
//! group is inverted before transmission. The protocol is write-only,
//! so no decode direction exists.

/// Number of solenoid outputs on one controller board.
pub const SOLENOIDS_PER_DEVICE: usize = 24;

/// Number of outputs per protocol group.
pub const GROUP_SIZE: usize = 8;

/// Number of protocol groups per board.
pub const GROUP_COUNT: usize = SOLENOIDS_PER_DEVICE / GROUP_SIZE;

/// Wire tags for the three output groups.
pub const GROUP_TAGS: [u8; GROUP_COUNT] = [b'A', b'B', b'C'];

/// Pack eight output states into one protocol byte.
///
/// Bit `i` of the result is set iff `bits[i]` is true.
pub fn pack_bits(bits: &[bool; GROUP_SIZE]) -> u8 {
    bits.iter()
        .enumerate()
        .fold(0u8, |byte, (i, &on)| if on { byte | (1 << i) } else { byte })
}

/// Encode 24 logical output states into the three group bytes.
///
/// Each wire bit is `logical XOR polarity[group]`, where an output's
/// group is `index / 8`.
pub fn encode(states: &[bool; SOLENOIDS_PER_DEVICE], polarities: [bool; GROUP_COUNT]) -> [u8; GROUP_COUNT] {
    let mut bytes = [0u8; GROUP_COUNT];
    for (group, byte) in bytes.iter_mut().enumerate() {
        let mut bits = [false; GROUP_SIZE];
        for (slot, bit) in bits.iter_mut().enumerate() {
            *bit = states[group * GROUP_SIZE + slot] != polarities[group];
        }
        *byte = pack_bits(&bits);
    }
    bytes
}
