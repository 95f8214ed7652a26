//! Equality queries.
//!
//! A query is planned against the collection's indexes and then run against
//! one root snapshot. Whatever the plan, every candidate is re-checked
//! against all constraints, so the plan changes cost but never the result.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tessera_tree::MerkleSearchTree;
use tracing::debug;

use crate::collection::{documents, fetch, Documents};
use crate::error::{DbError, DbResult};
use crate::index::{list_indexes, lookup_at};
use crate::record::RecordId;
use crate::session::Session;

/// Field equality constraints plus a result limit. A limit of 0 is unbounded.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub equal: BTreeMap<String, Value>,
    pub limit: usize,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field` to equal `value`.
    pub fn equal(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equal.insert(field.into(), value.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Whether `document` satisfies every constraint.
    pub fn matches(&self, document: &Value) -> bool {
        self.equal
            .iter()
            .all(|(field, value)| document.get(field) == Some(value))
    }
}

/// How a query is answered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum QueryPlan {
    /// Walk every document.
    Scan,
    /// Point lookup in one index covering exactly the query fields.
    IndexLookup { fields: Vec<String> },
    /// Lookups in several indexes, record ids intersected.
    IndexIntersection { indexes: Vec<Vec<String>> },
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scan => f.write_str("full scan"),
            Self::IndexLookup { fields } => write!(f, "index lookup on {fields:?}"),
            Self::IndexIntersection { indexes } => {
                write!(f, "intersection of indexes {indexes:?}")
            }
        }
    }
}

/// Choose a plan for `query` given the field lists of the available indexes.
pub fn plan(query: &Query, available: &[Vec<String>]) -> QueryPlan {
    if query.equal.is_empty() {
        return QueryPlan::Scan;
    }
    let wanted: BTreeSet<&str> = query.equal.keys().map(String::as_str).collect();

    if let Some(exact) = available.iter().find(|index| field_set(index) == wanted) {
        return QueryPlan::IndexLookup {
            fields: exact.clone(),
        };
    }

    // Greedy cover: largest usable index first.
    let mut usable: Vec<&Vec<String>> = available
        .iter()
        .filter(|index| field_set(index).is_subset(&wanted))
        .collect();
    usable.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let mut covered: BTreeSet<&str> = BTreeSet::new();
    let mut chosen: Vec<Vec<String>> = Vec::new();
    for index in usable {
        let fields = field_set(index);
        if !fields.is_subset(&covered) {
            covered.extend(fields);
            chosen.push(index.clone());
        }
        if covered == wanted {
            break;
        }
    }

    match chosen.len() {
        _ if covered != wanted => QueryPlan::Scan,
        1 => QueryPlan::IndexLookup {
            fields: chosen.remove(0),
        },
        _ => QueryPlan::IndexIntersection { indexes: chosen },
    }
}

fn field_set(fields: &[String]) -> BTreeSet<&str> {
    fields.iter().map(String::as_str).collect()
}

/// Run `query` over `collection` as of `snapshot`.
pub(crate) fn execute(
    tree: &MerkleSearchTree,
    snapshot: Session,
    collection: &str,
    query: &Query,
) -> DbResult<Documents> {
    let available = list_indexes(tree, snapshot.root, collection)?;
    let plan = plan(query, &available);
    debug!(collection, %plan, limit = query.limit, "running query");

    let candidates: Documents = match &plan {
        QueryPlan::Scan => documents(tree, snapshot.root, collection, None),
        QueryPlan::IndexLookup { fields } => {
            let ids = intersect(tree, &snapshot, collection, query, std::slice::from_ref(fields))?;
            resolve(tree, &snapshot, collection, ids)
        }
        QueryPlan::IndexIntersection { indexes } => {
            let ids = intersect(tree, &snapshot, collection, query, indexes)?;
            resolve(tree, &snapshot, collection, ids)
        }
    };

    let residual = query.clone();
    let matching = candidates.filter(move |candidate| match candidate {
        Ok(record) => residual.matches(&record.data),
        Err(_) => true,
    });
    Ok(match query.limit {
        0 => Box::new(matching),
        limit => Box::new(matching.take(limit)),
    })
}

/// Record ids found in every one of `indexes`, ascending.
fn intersect(
    tree: &MerkleSearchTree,
    snapshot: &Session,
    collection: &str,
    query: &Query,
    indexes: &[Vec<String>],
) -> DbResult<BTreeSet<RecordId>> {
    let mut result: Option<BTreeSet<RecordId>> = None;
    for fields in indexes {
        let values = fields
            .iter()
            .map(|field| {
                query.equal.get(field).ok_or_else(|| {
                    DbError::InvalidIndex(format!("query has no value for indexed field {field}"))
                })
            })
            .collect::<DbResult<Vec<&Value>>>()?;
        let ids: BTreeSet<RecordId> = lookup_at(tree, snapshot, collection, fields, &values)?
            .into_iter()
            .collect();
        let narrowed = match result {
            None => ids,
            Some(previous) => previous.intersection(&ids).cloned().collect(),
        };
        if narrowed.is_empty() {
            return Ok(narrowed);
        }
        result = Some(narrowed);
    }
    Ok(result.unwrap_or_default())
}

/// Lazily fetch the documents behind `ids`.
fn resolve(
    tree: &MerkleSearchTree,
    snapshot: &Session,
    collection: &str,
    ids: BTreeSet<RecordId>,
) -> Documents {
    let tree = tree.clone();
    let root = snapshot.root;
    let collection = collection.to_string();
    Box::new(
        ids.into_iter()
            .filter_map(move |id| fetch(&tree, root, &collection, id).transpose()),
    )
}
