use rand::Rng;

/// Alphabet in ascending ASCII order, so string order follows numeric order.
const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

/// Generator of 20 character keys whose lexicographic order is creation
/// order: 8 characters of timestamp followed by 12 random characters that
/// are incremented instead of re-rolled within the same millisecond.
#[derive(Debug, Default)]
pub struct PushIds {
    last_ms: i64,
    last_rand: [u8; 12],
}

impl PushIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, now_ms: i64) -> String {
        // a clock that steps back must not reorder keys
        let same_or_earlier = now_ms <= self.last_ms;
        if same_or_earlier {
            for digit in self.last_rand.iter_mut().rev() {
                if *digit == 63 {
                    *digit = 0;
                } else {
                    *digit += 1;
                    break;
                }
            }
        } else {
            self.last_ms = now_ms;
            let mut rng = rand::thread_rng();
            for digit in self.last_rand.iter_mut() {
                *digit = rng.gen_range(0..64);
            }
        }

        let mut ts = [0u8; 8];
        let mut ms = self.last_ms.max(0) as u64;
        for slot in ts.iter_mut().rev() {
            *slot = PUSH_CHARS[(ms % 64) as usize];
            ms /= 64;
        }
        let mut id = String::with_capacity(20);
        id.extend(ts.iter().map(|&b| b as char));
        id.extend(self.last_rand.iter().map(|&d| PUSH_CHARS[d as usize] as char));
        id
    }
}
