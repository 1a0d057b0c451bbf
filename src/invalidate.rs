// Invalidator: translates DDL notifications into discard/evict/lock
// actions against the Entry Store and Reverse-Dependency Index.

use crate::fingerprint::RdependKey;

/// What the invalidator needs the host to be able to derive from a parsed
/// DDL statement.
pub trait DdlObserver {
    /// Inheritance ancestors of `relation` (walked to the root).
    fn ancestors_of(&self, relation: u32) -> Vec<u32>;
    /// All inheritors of `relation`, including partition children.
    fn inheritors_of(&self, relation: u32) -> Vec<u32>;
}

/// One DDL statement, pre-classified by the host's utility dispatch into
/// the shape the invalidator needs. Each variant carries exactly the
/// object identifiers needed to compute its reverse-index targets.
#[derive(Debug, Clone)]
pub enum DdlStatement {
    DropRelation { db_id: u32, relation: u32 },
    DropProcedure { db_id: u32, proc_hash: u32 },
    DropIndex { db_id: u32, parent_relation: u32 },
    DropIndexConcurrently { db_id: u32, parent_relation: u32 },
    AlterTableAccessExclusive { db_id: u32, relation: u32 },
    AlterTableAttachDetachPartition { db_id: u32, relation: u32 },
    AlterTableDetachPartitionConcurrently { db_id: u32, relation: u32 },
    CreateIndex { db_id: u32, relation: u32, partitioned: bool },
    CreateTableInherits { db_id: u32, parents: Vec<u32> },
    AlterDomain { db_id: u32, type_hash: u32 },
    AlterFunction { db_id: u32, proc_hash: u32 },
    CreateOrReplaceFunction { db_id: u32, proc_hash: u32, already_exists: bool },
    Reindex { db_id: u32 },
    ReindexConcurrentlySpecific { db_id: u32, relation: u32 },
    AlterTextSearchDictionary { db_id: u32 },
}

/// How a statement's targets must be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationKind {
    Discard,
    Evict,
    LockThenUnlock,
    ResetWholeDatabase,
}

/// The result of classifying a statement: what to do, and against which
/// reverse-index keys.
#[derive(Debug, Clone)]
pub struct Classification {
    pub kind: InvalidationKind,
    pub targets: Vec<RdependKey>,
}

/// Classify `stmt` into an [`InvalidationKind`] and its target reverse-index
/// keys. Ancestor/inheritor expansion is delegated to `observer` — this
/// function does not touch the entry store or the reverse index itself.
pub fn classify(stmt: &DdlStatement, observer: &dyn DdlObserver) -> Classification {
    match stmt {
        DdlStatement::DropRelation { db_id, relation } => Classification {
            kind: InvalidationKind::Evict,
            targets: vec![RdependKey::relation(*db_id, *relation)],
        },
        DdlStatement::DropProcedure { db_id, proc_hash } => Classification {
            kind: InvalidationKind::Evict,
            targets: vec![RdependKey::procedure(*db_id, *proc_hash)],
        },
        DdlStatement::DropIndex {
            db_id,
            parent_relation,
        } => Classification {
            kind: InvalidationKind::Discard,
            targets: vec![RdependKey::relation(*db_id, *parent_relation)],
        },
        DdlStatement::DropIndexConcurrently {
            db_id,
            parent_relation,
        } => Classification {
            kind: InvalidationKind::LockThenUnlock,
            targets: vec![RdependKey::relation(*db_id, *parent_relation)],
        },
        DdlStatement::AlterTableAccessExclusive { db_id, relation } => Classification {
            kind: InvalidationKind::Discard,
            targets: relation_with_ancestors_and_inheritors(*db_id, *relation, observer),
        },
        DdlStatement::AlterTableAttachDetachPartition { db_id, relation } => Classification {
            kind: InvalidationKind::Discard,
            targets: relation_with_ancestors(*db_id, *relation, observer),
        },
        DdlStatement::AlterTableDetachPartitionConcurrently { db_id, relation } => {
            Classification {
                kind: InvalidationKind::LockThenUnlock,
                targets: relation_with_ancestors(*db_id, *relation, observer),
            }
        }
        DdlStatement::CreateIndex {
            db_id,
            relation,
            partitioned,
        } => {
            let mut targets = relation_with_ancestors(*db_id, *relation, observer);
            if *partitioned {
                targets.extend(
                    observer
                        .inheritors_of(*relation)
                        .into_iter()
                        .map(|r| RdependKey::relation(*db_id, r)),
                );
            }
            Classification {
                kind: InvalidationKind::Discard,
                targets,
            }
        }
        DdlStatement::CreateTableInherits { db_id, parents } => {
            let mut targets = Vec::new();
            for &parent in parents {
                targets.push(RdependKey::relation(*db_id, parent));
                targets.extend(
                    observer
                        .ancestors_of(parent)
                        .into_iter()
                        .map(|r| RdependKey::relation(*db_id, r)),
                );
            }
            Classification {
                kind: InvalidationKind::Discard,
                targets,
            }
        }
        DdlStatement::AlterDomain { db_id, type_hash } => Classification {
            kind: InvalidationKind::Discard,
            targets: vec![RdependKey::ty(*db_id, *type_hash)],
        },
        DdlStatement::AlterFunction { db_id, proc_hash } => Classification {
            kind: InvalidationKind::Discard,
            targets: vec![RdependKey::procedure(*db_id, *proc_hash)],
        },
        DdlStatement::CreateOrReplaceFunction {
            db_id,
            proc_hash,
            already_exists,
        } => {
            if *already_exists {
                Classification {
                    kind: InvalidationKind::Discard,
                    targets: vec![RdependKey::procedure(*db_id, *proc_hash)],
                }
            } else {
                Classification {
                    kind: InvalidationKind::Discard,
                    targets: vec![],
                }
            }
        }
        DdlStatement::Reindex { .. } => Classification {
            kind: InvalidationKind::ResetWholeDatabase,
            targets: vec![],
        },
        DdlStatement::ReindexConcurrentlySpecific { db_id, relation } => Classification {
            kind: InvalidationKind::LockThenUnlock,
            targets: vec![RdependKey::relation(*db_id, *relation)],
        },
        DdlStatement::AlterTextSearchDictionary { .. } => Classification {
            kind: InvalidationKind::ResetWholeDatabase,
            targets: vec![],
        },
    }
}

fn relation_with_ancestors(db_id: u32, relation: u32, observer: &dyn DdlObserver) -> Vec<RdependKey> {
    let mut targets = vec![RdependKey::relation(db_id, relation)];
    targets.extend(
        observer
            .ancestors_of(relation)
            .into_iter()
            .map(|r| RdependKey::relation(db_id, r)),
    );
    targets
}

fn relation_with_ancestors_and_inheritors(
    db_id: u32,
    relation: u32,
    observer: &dyn DdlObserver,
) -> Vec<RdependKey> {
    let mut targets = relation_with_ancestors(db_id, relation, observer);
    targets.extend(
        observer
            .inheritors_of(relation)
            .into_iter()
            .map(|r| RdependKey::relation(db_id, r)),
    );
    targets
}

/// CASCADE on DROP does not recursively follow the dependency graph here.
/// FIXME: a DROP ... CASCADE that fans out to dependents of dependents only
/// invalidates the first hop.
pub const CASCADE_NOTE: &str = "CASCADE recursion is not followed";
