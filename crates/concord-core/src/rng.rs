use serde::{Deserialize, Serialize};

/// Deterministic PRNG with 256-bit state, suitable for snapshots/replays.
///
/// This is `xoshiro256**` seeded via SplitMix64. Text seeds are hashed with
/// FNV-1a first, so `init 2 some-seed` pins the whole setup shuffle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRng {
    state: [u64; 4],
}

impl GameRng {
    pub fn seed_from_u64(seed: u64) -> Self {
        let mut sm = SplitMix64 { state: seed };
        Self {
            state: [sm.next(), sm.next(), sm.next(), sm.next()],
        }
    }

    pub fn seed_from_text(seed: &str) -> Self {
        Self::seed_from_u64(concord_protocol::wire::fnv1a64(seed.as_bytes()))
    }

    pub fn next_u64(&mut self) -> u64 {
        // xoshiro256**
        let result = self.state[1].wrapping_mul(5).rotate_left(7).wrapping_mul(9);

        let t = self.state[1] << 17;

        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];

        self.state[2] ^= t;

        self.state[3] = self.state[3].rotate_left(45);

        result
    }

    /// Uniform draw from `0..span` with rejection sampling.
    pub fn gen_index(&mut self, span: usize) -> usize {
        assert!(span > 0, "empty range");
        let span = span as u64;
        let threshold = u64::MAX - (u64::MAX % span);
        loop {
            let x = self.next_u64();
            if x < threshold {
                return (x % span) as usize;
            }
        }
    }

    /// Fisher-Yates shuffle.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.gen_index(i + 1);
            items.swap(i, j);
        }
    }
}

struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    fn next(&mut self) -> u64 {
        let mut z = self.state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        self.state = z;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }
}
