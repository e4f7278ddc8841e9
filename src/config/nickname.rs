//! Nickname generation.
//!
//! Default nicknames look like `NeonFox42`. When a nick is taken, configured
//! alternates are tried before falling back to the base nick with a random
//! two-digit suffix.

use rand::RngExt;

const ADJECTIVES: &[&str] = &[
    "Shadow", "Neon", "Cyber", "Lunar", "Solar", "Frost", "Storm", "Pixel", "Ghost", "Hyper",
    "Turbo", "Cosmic", "Iron", "Rogue", "Atomic", "Rapid", "Zero", "Nova", "Onyx", "Hex",
];

const NOUNS: &[&str] = &[
    "Fox", "Wolf", "Hawk", "Raven", "Lynx", "Viper", "Shark", "Owl", "Cobra", "Otter", "Crow",
    "Bear", "Moth", "Newt", "Crane", "Bison", "Reef", "Byte", "Node", "Crab",
];

/// Generate a random nickname like `NeonFox42`.
pub fn generate_nickname() -> String {
    let mut rng = rand::rng();
    let adj = ADJECTIVES[rng.random_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.random_range(0..NOUNS.len())];
    let num: u8 = rng.random_range(0..100);
    format!("{}{}{}", adj, noun, num)
}

/// The nick to try after `attempt` earlier attempts were rejected.
pub fn alternate_nick(base: &str, alt_nicks: &[String], attempt: usize) -> String {
    match alt_nicks.get(attempt) {
        Some(nick) => nick.clone(),
        None => {
            let num: u8 = rand::rng().random_range(10..100);
            format!("{}{}", base, num)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_nickname_shape() {
        for _ in 0..50 {
            let nick = generate_nickname();
            assert!(nick.len() <= 13);
            assert!(nick.chars().next().unwrap().is_ascii_uppercase());
        }
    }

    #[test]
    fn test_alternates_then_fallback() {
        let alts = vec!["bot_".to_string(), "bot__".to_string()];
        assert_eq!(alternate_nick("bot", &alts, 0), "bot_");
        assert_eq!(alternate_nick("bot", &alts, 1), "bot__");

        let fallback = alternate_nick("bot", &alts, 2);
        assert_eq!(fallback.len(), 5);
        assert!(fallback.starts_with("bot"));
        assert!(fallback[3..].parse::<u8>().is_ok());
    }
}
