// Cache key.

/// Sentinel `user_id` meaning "any user" — the entry is not row-security
/// sensitive and is shared across all users of the database.
pub const ANY_USER: u32 = 0;

/// Composite cache key: `{user_id, db_id, query_id, const_id}`.
///
/// Compared and hashed component-wise. `query_id` is the external
/// fingerprinter's stable 64-bit normalized-text hash; `const_id` is the
/// secondary hash this crate computes itself in [`crate::walker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub user_id: u32,
    pub db_id: u32,
    pub query_id: u64,
    pub const_id: u32,
}

impl Fingerprint {
    pub fn new(user_id: u32, db_id: u32, query_id: u64, const_id: u32) -> Self {
        Self {
            user_id,
            db_id,
            query_id,
            const_id,
        }
    }

    /// True when this fingerprint is not scoped to a particular user.
    pub fn is_shared_across_users(&self) -> bool {
        self.user_id == ANY_USER
    }
}

/// Key into the reverse-dependency index: `{db_id, class_id, object_id_or_hash}`.
///
/// Only relation, type, and procedure classes are tracked; `class_id`
/// distinguishes them so the same numeric object id in two classes does
/// not collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RdependKey {
    pub db_id: u32,
    pub class_id: ObjectClass,
    pub object: u32,
}

/// Catalog object classes the reverse index tracks. Only two non-relation
/// classes are tracked — types and procedures — and unknown classes are
/// ignored, enforced by this being the exhaustive set rather than an
/// open-ended enum with an `Other` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ObjectClass {
    Relation,
    Type,
    Procedure,
}

impl RdependKey {
    pub fn relation(db_id: u32, rel_id: u32) -> Self {
        Self {
            db_id,
            class_id: ObjectClass::Relation,
            object: rel_id,
        }
    }

    pub fn ty(db_id: u32, type_hash: u32) -> Self {
        Self {
            db_id,
            class_id: ObjectClass::Type,
            object: type_hash,
        }
    }

    pub fn procedure(db_id: u32, proc_hash: u32) -> Self {
        Self {
            db_id,
            class_id: ObjectClass::Procedure,
            object: proc_hash,
        }
    }
}

/// Non-relation dependency recorded on an entry: a catalog-cache hash
/// rather than a raw object id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct InvalItem {
    pub class_id: ObjectClass,
    pub object_hash: u32,
}
