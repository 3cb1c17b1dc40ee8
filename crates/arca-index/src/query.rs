//! Structured filter, sort, pagination and facet requests.
//!
//! The index engine is pluggable; these types are what the core speaks.
//! Backends translate them into their own query language.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::IndexDocument;

/// One predicate over a document field.
///
/// For array-valued fields a predicate matches if any element matches.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FilterParameter {
    Equals { field: String, value: Value },
    OneOf { field: String, values: Vec<Value> },
    /// Inclusive bounds; a missing bound is open.
    Range {
        field: String,
        from: Option<Value>,
        to: Option<Value>,
    },
    Exists { field: String },
}

impl FilterParameter {
    pub fn matches(&self, doc: &IndexDocument) -> bool {
        match self {
            Self::Equals { field, value } => any_element(doc.get(field), |v| v == value),
            Self::OneOf { field, values } => any_element(doc.get(field), |v| values.contains(v)),
            Self::Range { field, from, to } => any_element(doc.get(field), |v| {
                let above = from
                    .as_ref()
                    .map_or(true, |lo| compare(Some(v), Some(lo)) != Ordering::Less);
                let below = to
                    .as_ref()
                    .map_or(true, |hi| compare(Some(v), Some(hi)) != Ordering::Greater);
                above && below
            }),
            Self::Exists { field } => matches!(doc.get(field), Some(v) if !v.is_null()),
        }
    }
}

fn any_element(value: Option<&Value>, mut pred: impl FnMut(&Value) -> bool) -> bool {
    match value {
        None => false,
        Some(Value::Array(items)) => items.iter().any(pred),
        Some(v) => pred(v),
    }
}

/// Conjunction of parameters. An empty filter matches everything.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub parameters: Vec<FilterParameter>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn equals(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.parameters.push(FilterParameter::Equals {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn one_of(mut self, field: &str, values: Vec<Value>) -> Self {
        self.parameters.push(FilterParameter::OneOf {
            field: field.to_string(),
            values,
        });
        self
    }

    pub fn range(mut self, field: &str, from: Option<Value>, to: Option<Value>) -> Self {
        self.parameters.push(FilterParameter::Range {
            field: field.to_string(),
            from,
            to,
        });
        self
    }

    pub fn exists(mut self, field: &str) -> Self {
        self.parameters.push(FilterParameter::Exists {
            field: field.to_string(),
        });
        self
    }

    pub fn matches(&self, doc: &IndexDocument) -> bool {
        self.parameters.iter().all(|p| p.matches(doc))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortParameter {
    pub field: String,
    pub descending: bool,
}

/// Ordering of results. Documents tie-break on id so pages are stable.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sorter {
    pub parameters: Vec<SortParameter>,
}

impl Sorter {
    pub fn by(mut self, field: &str, descending: bool) -> Self {
        self.parameters.push(SortParameter {
            field: field.to_string(),
            descending,
        });
        self
    }

    pub fn compare(&self, a: &IndexDocument, b: &IndexDocument) -> Ordering {
        for p in &self.parameters {
            let ord = compare(a.get(&p.field), b.get(&p.field));
            let ord = if p.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.id.cmp(&b.id)
    }
}

/// Total order over optional JSON values; missing and `null` sort last.
pub fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

/// Pagination window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sublist {
    pub first: usize,
    pub max: usize,
}

impl Sublist {
    pub fn new(first: usize, max: usize) -> Self {
        Self { first, max }
    }

    pub fn all() -> Self {
        Self {
            first: 0,
            max: usize::MAX,
        }
    }
}

impl Default for Sublist {
    fn default() -> Self {
        Self { first: 0, max: 100 }
    }
}

/// Fields to compute value counts for.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facets {
    pub fields: Vec<String>,
}

impl Facets {
    pub fn on(fields: &[&str]) -> Self {
        Self {
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// Value counts for one facet field.
pub type FacetCounts = BTreeMap<String, usize>;

/// Everything a query needs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub filter: Filter,
    pub sorter: Sorter,
    pub sublist: Sublist,
    pub facets: Facets,
}

impl Query {
    pub fn filtered(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn sorted(mut self, sorter: Sorter) -> Self {
        self.sorter = sorter;
        self
    }

    pub fn page(mut self, sublist: Sublist) -> Self {
        self.sublist = sublist;
        self
    }

    pub fn with_facets(mut self, facets: Facets) -> Self {
        self.facets = facets;
        self
    }
}

/// One page of results plus the total number of matches.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IndexPage {
    pub total_count: usize,
    pub offset: usize,
    pub results: Vec<IndexDocument>,
    pub facet_results: BTreeMap<String, FacetCounts>,
}

/// Facet key for a value: strings as-is, everything else as JSON.
pub fn facet_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Evaluate a query over an in-memory set of documents.
pub fn evaluate<'a, I>(docs: I, query: &Query) -> IndexPage
where
    I: IntoIterator<Item = &'a IndexDocument>,
{
    let mut matching: Vec<&IndexDocument> =
        docs.into_iter().filter(|d| query.filter.matches(d)).collect();

    let mut facet_results = BTreeMap::new();
    for field in &query.facets.fields {
        let mut counts = FacetCounts::new();
        for doc in &matching {
            match doc.get(field) {
                Some(Value::Array(items)) => {
                    for item in items.iter().filter(|v| !v.is_null()) {
                        *counts.entry(facet_key(item)).or_default() += 1;
                    }
                }
                Some(Value::Null) | None => {}
                Some(v) => *counts.entry(facet_key(v)).or_default() += 1,
            }
        }
        facet_results.insert(field.clone(), counts);
    }

    matching.sort_by(|a, b| query.sorter.compare(a, b));
    let total_count = matching.len();
    let results = matching
        .into_iter()
        .skip(query.sublist.first)
        .take(query.sublist.max)
        .cloned()
        .collect();

    IndexPage {
        total_count,
        offset: query.sublist.first,
        results,
        facet_results,
    }
}
