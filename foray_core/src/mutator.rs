use crate::input::TrialInput;
use rand::Rng;

/// Derives the next trial input from an optional base selected out of the
/// guidance corpus.
///
/// `None` means the corpus had nothing to offer yet and the mutator should
/// generate from scratch. Generation must be bounded per call; the guidance
/// engine relies on that to keep `next_input` non-blocking.
pub trait Mutator<R: Rng + ?Sized>: Send {
    fn mutate(&mut self, base: Option<&TrialInput>, rng: &mut R) -> Result<TrialInput, anyhow::Error>;
}

/// Byte-level havoc: each call applies one randomly chosen edit to the base
/// input. Starts from a single zero byte when there is no base.
#[derive(Debug, Clone, Copy)]
pub struct ByteHavocMutator {
    /// Inputs never grow past this many bytes.
    max_len: usize,
}

impl ByteHavocMutator {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len: max_len.max(1),
        }
    }
}

impl Default for ByteHavocMutator {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl<R: Rng + ?Sized> Mutator<R> for ByteHavocMutator {
    fn mutate(
        &mut self,
        base: Option<&TrialInput>,
        rng: &mut R,
    ) -> Result<TrialInput, anyhow::Error> {
        let mut bytes = match base {
            Some(input) => input.as_bytes().to_vec(),
            None => vec![0u8],
        };
        if bytes.is_empty() {
            bytes.push(0);
        }

        match rng.random_range(0u8..4) {
            // Nudge one byte by a small wrapping delta.
            0 => {
                let index = rng.random_range(0..bytes.len());
                let delta = rng.random_range(1u8..=15u8);
                bytes[index] = bytes[index].wrapping_add(delta);
            }
            // Flip a single bit.
            1 => {
                let index = rng.random_range(0..bytes.len());
                bytes[index] ^= 1 << rng.random_range(0u8..8);
            }
            // Insert a random byte, respecting the length cap.
            2 => {
                if bytes.len() < self.max_len {
                    let index = rng.random_range(0..=bytes.len());
                    bytes.insert(index, rng.random_range(0u8..=u8::MAX));
                } else {
                    let index = rng.random_range(0..bytes.len());
                    bytes[index] = rng.random_range(0u8..=u8::MAX);
                }
            }
            // Remove a byte, keeping at least one.
            _ => {
                if bytes.len() > 1 {
                    let index = rng.random_range(0..bytes.len());
                    bytes.remove(index);
                }
            }
        }

        Ok(TrialInput::new(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;

    #[test]
    fn no_base_yields_a_non_empty_input() {
        let mut mutator = ByteHavocMutator::default();
        let mut rng = ChaCha8Rng::from_seed([0; 32]);
        let input = mutator.mutate(None, &mut rng).unwrap();
        assert!(!input.is_empty());
    }

    #[test]
    fn mutation_is_deterministic_for_a_fixed_seed() {
        let base = TrialInput::new(vec![1, 2, 3, 4]);
        let mut first = ByteHavocMutator::default();
        let mut second = ByteHavocMutator::default();
        let mut rng_a = ChaCha8Rng::from_seed([7; 32]);
        let mut rng_b = ChaCha8Rng::from_seed([7; 32]);
        for _ in 0..32 {
            assert_eq!(
                first.mutate(Some(&base), &mut rng_a).unwrap(),
                second.mutate(Some(&base), &mut rng_b).unwrap()
            );
        }
    }

    #[test]
    fn mutation_eventually_changes_the_base() {
        let base = TrialInput::new(vec![0xAA; 8]);
        let mut mutator = ByteHavocMutator::default();
        let mut rng = ChaCha8Rng::from_seed([3; 32]);
        let changed = (0..16)
            .map(|_| mutator.mutate(Some(&base), &mut rng).unwrap())
            .any(|mutated| mutated != base);
        assert!(changed);
    }

    #[test]
    fn length_cap_is_honored() {
        let base = TrialInput::new(vec![0; 4]);
        let mut mutator = ByteHavocMutator::new(4);
        let mut rng = ChaCha8Rng::from_seed([9; 32]);
        for _ in 0..64 {
            let mutated = mutator.mutate(Some(&base), &mut rng).unwrap();
            assert!(mutated.len() <= 4);
        }
    }
}
