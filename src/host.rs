// External collaborators.
//
// The planner, parser, catalog, and DDL dispatch are out of scope; this
// module only pins down the contract they must satisfy so the rest of the
// crate can be written and tested against a mock without depending on a
// real SQL engine.

/// `serialize`/`deserialize` must be total inverses. This crate calls
/// these through [`encode`]/[`decode`] rather than through a trait object,
/// since the plan payload is already reduced to bytes by the time it
/// reaches [`crate::cache::PlanCache`] — the host is responsible for
/// producing those bytes from its own planned-statement type before
/// calling in.
pub fn encode<T: serde::Serialize>(value: &T) -> Vec<u8> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .expect("encoding an in-memory value cannot fail")
}

/// Returns `None` on a corrupt payload — the caller discards the entry and
/// re-plans rather than propagating the error.
pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Option<T> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _len)| value)
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        a: u32,
        b: String,
    }

    #[test]
    fn round_trip_is_total_inverse() {
        let value = Sample {
            a: 7,
            b: "plan".to_string(),
        };
        let bytes = encode(&value);
        let decoded: Sample = decode(&bytes).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn corrupt_bytes_decode_to_none() {
        let garbage = vec![0xffu8; 3];
        let decoded: Option<Sample> = decode(&garbage);
        assert!(decoded.is_none());
    }
}
