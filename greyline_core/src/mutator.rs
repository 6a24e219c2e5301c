use rand::Rng;

/// Lowest byte value an operator may produce (space).
const BYTE_MIN: u8 = 32;
/// Highest byte value an operator may produce (DEL).
const BYTE_MAX: u8 = 127;
/// Largest signed delta applied by the arithmetic operator.
const ARITH_MAX_DELTA: i16 = 35;
/// Adjacent-unit widths shared by the bit/byte-window operators.
const WIDTHS: [usize; 3] = [1, 2, 4];
/// Inputs are never deleted below this length unless they start shorter.
pub const DEFAULT_MIN_RETAIN_LEN: usize = 10;

/// Boundary-triggering replacement values for 1/2/4-byte windows, confined to
/// the printable range the operators work in.
const INTERESTING: &[&[u8]] = &[
    &[127],
    &[36],
    &[32],
    &[127, 127],
    &[32, 32],
    &[36, 36],
    &[127, 127, 127, 127],
    &[32, 32, 32, 32],
    &[36, 36, 36, 36],
];

/// The closed registry of byte-level mutation operators.
///
/// Every operator is total: empty and single-byte inputs produce a valid
/// result instead of failing. Operators that assume a minimum length fall
/// back to a single-byte insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteMutation {
    InsertRandomByte,
    FlipAdjacentBits,
    ArithmeticBytes,
    InterestingBytes,
    HavocInsert,
    HavocReplace,
    DeleteBytes,
    SwapCase,
}

impl ByteMutation {
    pub const REGISTRY: [ByteMutation; 8] = [
        ByteMutation::InsertRandomByte,
        ByteMutation::FlipAdjacentBits,
        ByteMutation::ArithmeticBytes,
        ByteMutation::InterestingBytes,
        ByteMutation::HavocInsert,
        ByteMutation::HavocReplace,
        ByteMutation::DeleteBytes,
        ByteMutation::SwapCase,
    ];
}

/// Applies operators from the registry, one uniformly chosen per `mutate`
/// call. Stacking (several mutations in sequence) is done via [`stacked`].
///
/// [`stacked`]: MutationEngine::stacked
#[derive(Debug, Clone, Copy)]
pub struct MutationEngine {
    min_retain_len: usize,
}

impl Default for MutationEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_RETAIN_LEN)
    }
}

impl MutationEngine {
    pub fn new(min_retain_len: usize) -> Self {
        Self { min_retain_len }
    }

    /// One application of one uniformly chosen operator. No operator
    /// weighting.
    pub fn mutate<R: Rng + ?Sized>(&self, input: &[u8], rng: &mut R) -> Vec<u8> {
        let op = ByteMutation::REGISTRY[rng.random_range(0..ByteMutation::REGISTRY.len())];
        self.apply(op, input, rng)
    }

    /// Stacked mutation used for fuzzed candidates: applies `mutate`
    /// `min(len(input), 2^k)` times with `k` uniform in `[1, 5]`, feeding
    /// each output back in as the next input.
    pub fn stacked<R: Rng + ?Sized>(&self, input: &[u8], rng: &mut R) -> Vec<u8> {
        let k = rng.random_range(1u32..=5);
        let trials = input.len().min(1usize << k);
        let mut candidate = input.to_vec();
        for _ in 0..trials {
            candidate = self.mutate(&candidate, rng);
        }
        candidate
    }

    /// Applies one specific operator. Exposed so each operator can be
    /// exercised in isolation.
    pub fn apply<R: Rng + ?Sized>(&self, op: ByteMutation, input: &[u8], rng: &mut R) -> Vec<u8> {
        match op {
            ByteMutation::InsertRandomByte => insert_random_byte(input, rng),
            ByteMutation::FlipAdjacentBits => flip_adjacent_bits(input, rng),
            ByteMutation::ArithmeticBytes => arithmetic_bytes(input, rng),
            ByteMutation::InterestingBytes => interesting_bytes(input, rng),
            ByteMutation::HavocInsert => havoc_insert(input, rng),
            ByteMutation::HavocReplace => havoc_replace(input, rng),
            ByteMutation::DeleteBytes => delete_bytes(input, rng, self.min_retain_len),
            ByteMutation::SwapCase => swap_case(input, rng),
        }
    }
}

fn clamp_byte(value: i16) -> u8 {
    value.clamp(BYTE_MIN as i16, BYTE_MAX as i16) as u8
}

fn random_printable<R: Rng + ?Sized>(rng: &mut R) -> u8 {
    rng.random_range(BYTE_MIN..=BYTE_MAX)
}

/// Window width and start position for operators touching N adjacent bytes.
/// The window is truncated rather than rejected when the input is short.
fn byte_window<R: Rng + ?Sized>(len: usize, rng: &mut R) -> (usize, usize) {
    let n = WIDTHS[rng.random_range(0..WIDTHS.len())];
    let span = n.min(len);
    let pos = if len > span {
        rng.random_range(0..=len - span)
    } else {
        0
    };
    (pos, span)
}

fn insert_random_byte<R: Rng + ?Sized>(input: &[u8], rng: &mut R) -> Vec<u8> {
    let pos = rng.random_range(0..=input.len());
    let mut out = Vec::with_capacity(input.len() + 1);
    out.extend_from_slice(&input[..pos]);
    out.push(random_printable(rng));
    out.extend_from_slice(&input[pos..]);
    out
}

fn flip_adjacent_bits<R: Rng + ?Sized>(input: &[u8], rng: &mut R) -> Vec<u8> {
    if input.is_empty() {
        return insert_random_byte(input, rng);
    }
    let n = WIDTHS[rng.random_range(0..WIDTHS.len())];
    let total_bits = input.len() * 8;
    let pos = rng.random_range(0..=total_bits - n);

    let mut out = input.to_vec();
    for bit in pos..pos + n {
        out[bit / 8] ^= 0x80 >> (bit % 8);
    }
    // Flips can leave a byte outside the working range; pull it back in.
    for byte in &mut out {
        *byte = (*byte).clamp(BYTE_MIN, BYTE_MAX);
    }
    out
}

fn arithmetic_bytes<R: Rng + ?Sized>(input: &[u8], rng: &mut R) -> Vec<u8> {
    if input.is_empty() {
        return insert_random_byte(input, rng);
    }
    let (pos, span) = byte_window(input.len(), rng);
    let mut out = input.to_vec();
    for byte in &mut out[pos..pos + span] {
        let delta = rng.random_range(-ARITH_MAX_DELTA..=ARITH_MAX_DELTA);
        *byte = clamp_byte(*byte as i16 + delta);
    }
    out
}

fn interesting_bytes<R: Rng + ?Sized>(input: &[u8], rng: &mut R) -> Vec<u8> {
    if input.is_empty() {
        return insert_random_byte(input, rng);
    }
    let pick = INTERESTING[rng.random_range(0..INTERESTING.len())];
    let span = pick.len().min(input.len());
    let pos = if input.len() > span {
        rng.random_range(0..=input.len() - span)
    } else {
        0
    };
    let mut out = input.to_vec();
    out[pos..pos + span].copy_from_slice(&pick[..span]);
    out
}

fn havoc_insert<R: Rng + ?Sized>(input: &[u8], rng: &mut R) -> Vec<u8> {
    if input.is_empty() {
        return insert_random_byte(input, rng);
    }
    let length = rng.random_range(0..=input.len());
    let pos = rng.random_range(0..=input.len());
    let chunk: Vec<u8> = if rng.random_bool(0.75) {
        let start = rng.random_range(0..=input.len() - length);
        input[start..start + length].to_vec()
    } else {
        (0..length).map(|_| random_printable(rng)).collect()
    };

    let mut out = Vec::with_capacity(input.len() + chunk.len());
    out.extend_from_slice(&input[..pos]);
    out.extend_from_slice(&chunk);
    out.extend_from_slice(&input[pos..]);
    out
}

fn havoc_replace<R: Rng + ?Sized>(input: &[u8], rng: &mut R) -> Vec<u8> {
    if input.is_empty() {
        return insert_random_byte(input, rng);
    }
    let pos = rng.random_range(0..=input.len());
    let length = rng.random_range(0..=input.len() - pos);
    let chunk: Vec<u8> = if rng.random_bool(0.75) {
        let start = rng.random_range(0..=input.len() - length);
        input[start..start + length].to_vec()
    } else {
        (0..length).map(|_| random_printable(rng)).collect()
    };

    let mut out = Vec::with_capacity(input.len());
    out.extend_from_slice(&input[..pos]);
    out.extend_from_slice(&chunk);
    out.extend_from_slice(&input[pos + length..]);
    out
}

fn delete_bytes<R: Rng + ?Sized>(input: &[u8], rng: &mut R, min_retain_len: usize) -> Vec<u8> {
    if input.len() <= min_retain_len {
        return input.to_vec();
    }
    let max_removal = input.len() - min_retain_len;
    let pos = rng.random_range(0..input.len());
    let length = rng.random_range(0..=max_removal.min(input.len() - pos));

    let mut out = Vec::with_capacity(input.len() - length);
    out.extend_from_slice(&input[..pos]);
    out.extend_from_slice(&input[pos + length..]);
    out
}

fn swap_case<R: Rng + ?Sized>(input: &[u8], rng: &mut R) -> Vec<u8> {
    if input.is_empty() {
        return insert_random_byte(input, rng);
    }
    let (pos, span) = byte_window(input.len(), rng);
    let mut out = input.to_vec();
    for byte in &mut out[pos..pos + span] {
        if byte.is_ascii_alphabetic() {
            *byte ^= 0x20;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;

    #[test]
    fn every_operator_is_total_on_degenerate_inputs() {
        let engine = MutationEngine::default();
        let mut rng = ChaCha8Rng::from_seed([7u8; 32]);

        for op in ByteMutation::REGISTRY {
            for input in [&b""[..], &b"x"[..]] {
                for _ in 0..200 {
                    let out = engine.apply(op, input, &mut rng);
                    // Bounded length deltas: nothing shrinks a degenerate
                    // input below zero, and one application grows it by at
                    // most len + 1 bytes.
                    assert!(
                        out.len() <= input.len() * 2 + 1,
                        "{op:?} grew a degenerate input unexpectedly"
                    );
                }
            }
        }
    }

    #[test]
    fn insert_adds_exactly_one_printable_byte() {
        let engine = MutationEngine::default();
        let mut rng = ChaCha8Rng::from_seed([1u8; 32]);
        let input = b"hello".to_vec();

        for _ in 0..100 {
            let out = engine.apply(ByteMutation::InsertRandomByte, &input, &mut rng);
            assert_eq!(out.len(), input.len() + 1);
            for byte in &out {
                assert!((BYTE_MIN..=BYTE_MAX).contains(byte));
            }
        }
    }

    #[test]
    fn flip_and_arithmetic_stay_in_printable_range() {
        let engine = MutationEngine::default();
        let mut rng = ChaCha8Rng::from_seed([2u8; 32]);
        let input: Vec<u8> = (BYTE_MIN..=BYTE_MAX).collect();

        for op in [ByteMutation::FlipAdjacentBits, ByteMutation::ArithmeticBytes] {
            for _ in 0..300 {
                let out = engine.apply(op, &input, &mut rng);
                assert_eq!(out.len(), input.len(), "{op:?} changed the length");
                for byte in &out {
                    assert!((BYTE_MIN..=BYTE_MAX).contains(byte), "{op:?} escaped range");
                }
            }
        }
    }

    #[test]
    fn interesting_bytes_replaces_a_window_in_place() {
        let engine = MutationEngine::default();
        let mut rng = ChaCha8Rng::from_seed([3u8; 32]);
        let input = b"abcdefgh".to_vec();

        for _ in 0..100 {
            let out = engine.apply(ByteMutation::InterestingBytes, &input, &mut rng);
            assert_eq!(out.len(), input.len());
        }
    }

    #[test]
    fn delete_never_shrinks_below_min_retain_len() {
        let engine = MutationEngine::new(10);
        let mut rng = ChaCha8Rng::from_seed([4u8; 32]);
        let input: Vec<u8> = b"abcdefghijklmnop".to_vec();

        for _ in 0..500 {
            let out = engine.apply(ByteMutation::DeleteBytes, &input, &mut rng);
            assert!(out.len() >= 10);
            assert!(out.len() <= input.len());
        }

        let short = b"abc".to_vec();
        let out = engine.apply(ByteMutation::DeleteBytes, &short, &mut rng);
        assert_eq!(out, short, "inputs at or below the floor pass through");
    }

    #[test]
    fn swap_case_only_touches_alphabetic_bytes() {
        let engine = MutationEngine::default();
        let mut rng = ChaCha8Rng::from_seed([5u8; 32]);
        let input = b"a1B2c3D4".to_vec();

        for _ in 0..200 {
            let out = engine.apply(ByteMutation::SwapCase, &input, &mut rng);
            assert_eq!(out.len(), input.len());
            for (before, after) in input.iter().zip(&out) {
                if before.is_ascii_alphabetic() {
                    assert!(*after == *before || *after == *before ^ 0x20);
                } else {
                    assert_eq!(after, before);
                }
            }
        }
    }

    #[test]
    fn havoc_insert_grows_and_havoc_replace_preserves_length() {
        let engine = MutationEngine::default();
        let mut rng = ChaCha8Rng::from_seed([6u8; 32]);
        let input = b"splice me please".to_vec();

        for _ in 0..200 {
            let inserted = engine.apply(ByteMutation::HavocInsert, &input, &mut rng);
            assert!(inserted.len() >= input.len());
            assert!(inserted.len() <= input.len() * 2);

            let replaced = engine.apply(ByteMutation::HavocReplace, &input, &mut rng);
            assert_eq!(replaced.len(), input.len());
        }
    }

    #[test]
    fn stacked_mutation_bounds_trials_by_input_length() {
        let engine = MutationEngine::default();
        let mut rng = ChaCha8Rng::from_seed([8u8; 32]);

        // Empty input: trials = min(0, 2^k) = 0, candidate passes through.
        let out = engine.stacked(b"", &mut rng);
        assert!(out.is_empty());

        for _ in 0..100 {
            let out = engine.stacked(b"seed-data", &mut rng);
            // At most 9 stacked steps; each step at most doubles + 1.
            assert!(out.len() < 9 * 1024);
        }
    }

    #[test]
    fn mutate_eventually_changes_the_input() {
        let engine = MutationEngine::default();
        let mut rng = ChaCha8Rng::from_seed([9u8; 32]);
        let input = b"immutable?".to_vec();

        let changed = (0..100).any(|_| engine.mutate(&input, &mut rng) != input);
        assert!(changed, "100 mutations never altered the input");
    }
}
