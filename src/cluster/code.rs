use rand::Rng;
use rand::seq::SliceRandom;

const ADJECTIVES: &[&str] = &[
    "autumn", "hidden", "bitter", "misty", "silent", "empty", "dry", "dark", "summer", "icy",
    "delicate", "quiet", "white", "cool", "spring", "winter", "patient", "twilight", "dawn",
    "crimson", "wispy", "weathered", "blue", "billowing", "broken", "cold", "damp", "falling",
    "frosty", "green", "long", "late", "lingering", "bold", "little", "morning", "muddy", "old",
    "red", "rough", "still", "small", "sparkling", "shy", "wandering", "withered", "wild",
    "black", "young", "holy", "solitary", "fragrant", "aged", "snowy", "proud", "floral",
    "restless", "divine", "polished", "ancient", "purple", "lively", "nameless",
];

const NOUNS: &[&str] = &[
    "waterfall", "river", "breeze", "moon", "rain", "wind", "sea", "morning", "snow", "lake",
    "sunset", "pine", "shadow", "leaf", "dawn", "glitter", "forest", "hill", "cloud", "meadow",
    "sun", "glade", "bird", "brook", "butterfly", "bush", "dew", "dust", "field", "fire",
    "flower", "firefly", "feather", "grass", "haze", "mountain", "night", "pond", "darkness",
    "snowflake", "silence", "sound", "sky", "shape", "surf", "thunder", "violet", "water",
    "wildflower", "wave", "resonance", "wood", "dream", "cherry", "tree", "fog", "frost",
    "voice", "paper", "frog", "smoke", "star",
];

const TOKEN_RANGE: u32 = 10_000;
const MAX_ATTEMPTS: usize = 64;

/// A fresh `adjective-noun-NNNN` code not accepted by `taken`.
///
/// Falls back to a longer suffix if the short space keeps colliding.
pub fn generate_code<R, F>(rng: &mut R, taken: F) -> String
where
    R: Rng + ?Sized,
    F: Fn(&str) -> bool,
{
    for _ in 0..MAX_ATTEMPTS {
        let code = haiku(rng, TOKEN_RANGE);
        if !taken(&code) {
            return code;
        }
    }
    loop {
        let code = haiku(rng, u32::MAX);
        if !taken(&code) {
            return code;
        }
    }
}

fn haiku<R: Rng + ?Sized>(rng: &mut R, token_range: u32) -> String {
    let adjective = ADJECTIVES.choose(rng).copied().unwrap_or("quiet");
    let noun = NOUNS.choose(rng).copied().unwrap_or("lake");
    let token = rng.gen_range(0..token_range);
    format!("{}-{}-{:04}", adjective, noun, token)
}
