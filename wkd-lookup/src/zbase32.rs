//! z-base-32 encoding as described in RFC 6189 section 5.1.6.
//!
//! This is not RFC 4648 Base32: it uses a different alphabet, packs bits
//! MSB-first and never emits padding characters. A trailing group of fewer
//! than 5 bits is padded on the right with zero bits.

/// The 32 symbols, indexed by 5-bit value.
pub const ALPHABET: &[u8; 32] = b"ybndrfg8ejkmcpqxot1uwisza345h769";

const SHIFT: u32 = 5;
const MASK: u32 = 0x1F;

/// Number of symbols [`encode`] produces for `len` input bytes.
pub const fn encoded_len(len: usize) -> usize {
    (len * 8).div_ceil(SHIFT as usize)
}

/// Encode `data` as z-base-32.
///
/// ```
/// assert_eq!(wkd_lookup::zbase32::encode(b"hello"), "pb1sa5dx");
/// assert_eq!(wkd_lookup::zbase32::encode(b""), "");
/// ```
pub fn encode(data: &[u8]) -> String {
    let Some((&first, rest)) = data.split_first() else {
        return String::new();
    };

    let mut out = String::with_capacity(encoded_len(data.len()));
    let mut rest = rest.iter();

    // Only the low `bits_left` bits of the accumulator are meaningful.
    let mut buffer = u32::from(first);
    let mut bits_left = 8u32;

    loop {
        if bits_left < SHIFT {
            match rest.next() {
                Some(&byte) => {
                    buffer = ((buffer << 8) | u32::from(byte)) & 0xFFFF;
                    bits_left += 8;
                }
                None if bits_left == 0 => break,
                None => {
                    let pad = SHIFT - bits_left;
                    buffer <<= pad;
                    bits_left += pad;
                }
            }
        }

        bits_left -= SHIFT;
        out.push(ALPHABET[((buffer >> bits_left) & MASK) as usize] as char);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input() {
        assert_eq!(encode(&[]), "");
        assert_eq!(encoded_len(0), 0);
    }

    #[test]
    fn known_vectors() {
        assert_eq!(encode(&[0x00]), "yy");
        assert_eq!(encode(&[0x01]), "yr");
        assert_eq!(encode(&[0xFF]), "9h");
        assert_eq!(encode(&[0x00, 0x00]), "yyyy");
        assert_eq!(encode(&[0x00; 5]), "yyyyyyyy");
        assert_eq!(encode(&[0xF0, 0xBF, 0xC7]), "6n9hq");
        assert_eq!(encode(b"test"), "qt1zg7y");
        assert_eq!(encode(b"hello"), "pb1sa5dx");
        assert_eq!(encode(b"Hello, World!"), "jb1sa5dxfoofq551pt1nn");
    }

    #[test]
    fn length_is_ceil_of_bits_over_five() {
        for n in 1..=64usize {
            let data: Vec<u8> = (0..n).map(|i| (i * 37 + 11) as u8).collect();
            let encoded = encode(&data);
            assert_eq!(encoded.len(), (8 * n).div_ceil(5), "input length {n}");
            assert_eq!(encoded.len(), encoded_len(n));
            assert!(encoded.bytes().all(|c| ALPHABET.contains(&c)));
        }
    }

    #[test]
    fn deterministic() {
        let data = [0xDE, 0xAD, 0xBE, 0xEF, 0x42];
        assert_eq!(encode(&data), encode(&data));
    }

    #[test]
    fn agrees_with_z32_crate() {
        // SHA-1 digest sized and ed25519 public key sized inputs.
        let digest: Vec<u8> = (0u8..20).collect();
        let key: Vec<u8> = (100u8..132).collect();
        assert_eq!(encode(&digest), z32::encode(&digest));
        assert_eq!(encode(&key), z32::encode(&key));
    }
}
