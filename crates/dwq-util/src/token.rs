//! Random token generation, used for the `unique` value a worker stamps on
//! each job execution, exclusive-jobdir lease tokens, and control-queue
//! names. The Python source used `random.random()` (a float rendered as a
//! string); we generate a hex token of equivalent entropy instead, since
//! there's no reason to keep the float-as-string shape once nothing else
//! parses it back.

use rand::Rng as _;

pub fn random_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_distinct() {
        assert_ne!(random_token(), random_token());
    }

    #[test]
    fn tokens_are_hex() {
        let t = random_token();
        assert_eq!(t.len(), 32);
        assert!(t.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
