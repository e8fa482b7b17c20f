use rand::{seq::SliceRandom, Rng};

const ADJECTIVES: &[&str] = &[
    "brave", "calm", "clever", "eager", "gentle", "happy", "jolly", "kind", "lively", "mighty",
    "nimble", "proud", "quiet", "quick", "sly", "swift", "witty", "zesty",
];

const NOUNS: &[&str] = &[
    "badger", "crane", "dolphin", "eagle", "falcon", "fox", "heron", "koala", "lynx", "otter",
    "panda", "raven", "seal", "tiger", "walrus", "wolf", "yak", "zebra",
];

/// `adjective_noun_NNN`, used when registration omits a nickname.
pub fn generate() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("quiet");
    let noun = NOUNS.choose(&mut rng).copied().unwrap_or("otter");
    format!("{}_{}_{:03}", adjective, noun, rng.gen_range(0..1000))
}
