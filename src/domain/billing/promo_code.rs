//! Promo code generation and normalization.
//!
//! Codes are 12 symbols drawn from a 32-symbol alphabet that drops the
//! visually confusable characters (`I`, `O`, `0`, `1`), displayed in groups
//! of four: `K7PM-W3XD-9RQA`. Matching is case-insensitive and ignores the
//! group separators; everything downstream works on the normalized form.

use rand::Rng;

/// The 32 unambiguous code symbols.
pub const CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Number of symbols in a generated code, separators excluded.
pub const CODE_LENGTH: usize = 12;

/// Symbols per display group.
const GROUP_LENGTH: usize = 4;

/// Generates a random promo code in display form (`XXXX-XXXX-XXXX`).
pub fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut code = String::with_capacity(CODE_LENGTH + CODE_LENGTH / GROUP_LENGTH - 1);
    for i in 0..CODE_LENGTH {
        if i > 0 && i % GROUP_LENGTH == 0 {
            code.push('-');
        }
        let symbol = CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())];
        code.push(symbol as char);
    }
    code
}

/// Normalizes user input for hashing and lookup: uppercase, separators and
/// whitespace stripped.
pub fn normalize_code(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// The display/lookup prefix stored alongside the hash: the first group of
/// the normalized code.
pub fn code_prefix(input: &str) -> String {
    normalize_code(input).chars().take(GROUP_LENGTH).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn alphabet_has_32_unique_unambiguous_symbols() {
        let mut seen = std::collections::HashSet::new();
        for &b in CODE_ALPHABET.iter() {
            assert!(seen.insert(b), "duplicate symbol {}", b as char);
        }
        assert_eq!(seen.len(), 32);
        for confusable in [b'I', b'O', b'0', b'1'] {
            assert!(!CODE_ALPHABET.contains(&confusable));
        }
    }

    #[test]
    fn generated_code_has_expected_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        let code = generate_code(&mut rng);

        assert_eq!(code.len(), 14); // 12 symbols + 2 separators
        let groups: Vec<&str> = code.split('-').collect();
        assert_eq!(groups.len(), 3);
        for group in groups {
            assert_eq!(group.len(), 4);
            assert!(group.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn generated_codes_differ() {
        let mut rng = StdRng::seed_from_u64(7);
        let a = generate_code(&mut rng);
        let b = generate_code(&mut rng);
        assert_ne!(a, b);
    }

    #[test]
    fn normalize_strips_separators_and_uppercases() {
        assert_eq!(normalize_code("k7pm-w3xd-9rqa"), "K7PMW3XD9RQA");
        assert_eq!(normalize_code("  K7PM W3XD 9RQA "), "K7PMW3XD9RQA");
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize_code("k7pm-w3xd-9rqa");
        assert_eq!(normalize_code(&once), once);
    }

    #[test]
    fn generated_code_normalizes_to_its_symbols() {
        let mut rng = StdRng::seed_from_u64(42);
        let code = generate_code(&mut rng);
        assert_eq!(normalize_code(&code).len(), CODE_LENGTH);
    }

    #[test]
    fn prefix_is_first_group() {
        assert_eq!(code_prefix("K7PM-W3XD-9RQA"), "K7PM");
        assert_eq!(code_prefix("k7pmw3xd9rqa"), "K7PM");
    }
}
