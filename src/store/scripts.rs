//! Lua scripts for atomic store operations
//!
//! # Scripts Provided
//!
//! - `MAP_INTERN`: get-or-assign the integer id of a string within a map

use sha1::{Digest, Sha1};

/// Atomically look up a string in a map, assigning the next id if absent
///
/// # Keys
/// - KEYS[1]: Map hash key (`pcp:map:<scope>`)
///
/// # Arguments
/// - ARGV[1]: String to intern
///
/// # Returns
/// - `{id, 1}` when the id was assigned by this call
/// - `{id, 0}` when the string was already mapped
pub const MAP_INTERN: &str = r#"
local ID = redis.pcall('HGET', KEYS[1], ARGV[1])
local NEW = 0
if (ID == false) then
    ID = redis.pcall('HLEN', KEYS[1]) + 1
    redis.call('HSETNX', KEYS[1], ARGV[1], tostring(ID))
    NEW = 1
end
return {tonumber(ID), NEW}
"#;

/// Hex SHA-1 of a script body, as the store names it
pub fn script_sha(source: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_sha_matches_redis_naming() {
        // redis-rs computes the same digest for EVALSHA
        let script = redis::Script::new(MAP_INTERN);
        assert_eq!(script_sha(MAP_INTERN), script.get_hash());
        assert_eq!(script_sha(MAP_INTERN).len(), 40);
    }

    #[test]
    fn test_intern_script_shape() {
        assert!(MAP_INTERN.contains("HSETNX"));
        assert!(MAP_INTERN.contains("HLEN"));
    }
}
