//! Four-pass query solver
//!
//! The predicate tree is first compiled into a [`Plan`] whose leaves carry
//! a [`Resolution`] that each pass moves one step forward:
//!
//! 1. map pass: label and note names become their value map
//! 2. value pass: the literal (or every value passing a pattern) becomes
//!    the membership set keys of matching series
//! 3. expression pass: membership sets are fetched, then combined by
//!    intersection (`&&`) and union (`||`)
//! 4. time pass: the solved series are windowed into samples
//!
//! Every pass sends all of its commands as one pipeline before reading any
//! reply, so a query costs at most four round trips regardless of its
//! size. A missing name or value resolves to the empty set; a reply of the
//! wrong shape fails the whole query.

use super::ast::{classify, CompareOp, NameScope, Node};
use super::report::{QueryResult, Sample, SeriesValues};
use super::sets::{intersect, union, union_all};
use crate::error::{QueryError, Result, StoreError};
use crate::identity::SeriesId;
use crate::loader::persist::split_member;
use crate::mapper::{parse_id, MapName};
use crate::metrics::record_query;
use crate::store::{Command, Keys, Pipeline, Store};
use crate::types::{TimeWindow, Timestamp};
use regex::Regex;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

// ============================================================================
// Plan
// ============================================================================

/// How a leaf tests candidate values of its map
#[derive(Debug, Clone)]
enum ValueTest {
    Equal,
    NotEqual,
    Matches(Regex),
    NotMatches(Regex),
}

impl ValueTest {
    fn accepts(&self, candidate: &str, literal: &str) -> bool {
        match self {
            ValueTest::Equal => candidate == literal,
            ValueTest::NotEqual => candidate != literal,
            ValueTest::Matches(re) => re.is_match(candidate),
            ValueTest::NotMatches(re) => !re.is_match(candidate),
        }
    }
}

/// Progress of one leaf through the passes
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Nothing resolved yet
    Pending,
    /// Name resolved to the map holding its values
    Map(MapName),
    /// Values resolved to series membership set keys
    SeriesKeys(Vec<String>),
    /// Final set of matching series
    Series(Vec<SeriesId>),
}

#[derive(Debug)]
struct Leaf {
    scope: NameScope,
    field: String,
    literal: String,
    test: ValueTest,
    resolution: Resolution,
}

impl Leaf {
    fn notes(&self) -> bool {
        self.scope == NameScope::Note
    }
}

/// A predicate tree compiled for solving
#[derive(Debug)]
pub struct Plan {
    root: PlanNode,
}

#[derive(Debug)]
enum PlanNode {
    Leaf(Leaf),
    And(Box<PlanNode>, Box<PlanNode>),
    Or(Box<PlanNode>, Box<PlanNode>),
}

impl Plan {
    /// Compile a predicate tree, rejecting what cannot be solved
    pub fn compile(node: &Node) -> std::result::Result<Self, QueryError> {
        Ok(Self {
            root: PlanNode::compile(node)?,
        })
    }

    /// Leaf resolutions in tree order, mostly useful for inspection
    pub fn resolutions(&self) -> Vec<&Resolution> {
        let mut out = Vec::new();
        self.root.visit(&mut |leaf| out.push(&leaf.resolution));
        out
    }
}

impl PlanNode {
    fn compile(node: &Node) -> std::result::Result<Self, QueryError> {
        match node {
            Node::And(l, r) => Ok(PlanNode::And(Box::new(Self::compile(l)?), Box::new(Self::compile(r)?))),
            Node::Or(l, r) => Ok(PlanNode::Or(Box::new(Self::compile(l)?), Box::new(Self::compile(r)?))),
            Node::Neg(_) => Err(QueryError::Unsupported("!".to_string())),
            Node::Name(name) => Err(QueryError::Malformed(format!("name '{}' without comparison", name))),
            Node::String(value) => Err(QueryError::Malformed(format!("literal {:?} without comparison", value))),
            Node::Compare { op, .. } => {
                let (op, name, literal) = node
                    .comparison()
                    .ok_or_else(|| QueryError::Malformed(format!("comparison {} needs a name and a literal", op)))?;
                let test = match op {
                    CompareOp::Eq => ValueTest::Equal,
                    CompareOp::Neq => ValueTest::NotEqual,
                    CompareOp::Match => ValueTest::Matches(compile_pattern(literal)?),
                    CompareOp::NotMatch => ValueTest::NotMatches(compile_pattern(literal)?),
                    other => return Err(QueryError::Unsupported(other.symbol().to_string())),
                };
                let (scope, field) = classify(name);
                if matches!(scope, NameScope::Metric | NameScope::Instance) && field != "name" {
                    return Err(QueryError::Unsupported(format!("field '{}'", name)));
                }
                Ok(PlanNode::Leaf(Leaf {
                    scope,
                    field: field.to_string(),
                    literal: literal.to_string(),
                    test,
                    resolution: Resolution::Pending,
                }))
            },
        }
    }

    fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Leaf)) {
        match self {
            PlanNode::Leaf(leaf) => f(leaf),
            PlanNode::And(l, r) | PlanNode::Or(l, r) => {
                l.visit(f);
                r.visit(f);
            },
        }
    }

    fn leaves_mut<'a>(&'a mut self, out: &mut Vec<&'a mut Leaf>) {
        match self {
            PlanNode::Leaf(leaf) => out.push(leaf),
            PlanNode::And(l, r) | PlanNode::Or(l, r) => {
                l.leaves_mut(out);
                r.leaves_mut(out);
            },
        }
    }

    /// Combine leaf sets bottom-up, consuming them
    fn evaluate(&mut self) -> Vec<SeriesId> {
        match self {
            PlanNode::Leaf(leaf) => match std::mem::replace(&mut leaf.resolution, Resolution::Pending) {
                Resolution::Series(ids) => ids,
                _ => Vec::new(),
            },
            PlanNode::And(l, r) => {
                let left = l.evaluate();
                intersect(left, r.evaluate())
            },
            PlanNode::Or(l, r) => {
                let left = l.evaluate();
                union(left, r.evaluate())
            },
        }
    }
}

fn compile_pattern(pattern: &str) -> std::result::Result<Regex, QueryError> {
    Regex::new(pattern).map_err(|e| QueryError::Pattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

fn parse_series(text: String, context: &str) -> std::result::Result<SeriesId, StoreError> {
    text.parse().map_err(|_| StoreError::UnexpectedReply {
        context: context.to_string(),
        expected: "series identifier",
        found: text,
    })
}

// ============================================================================
// Solver
// ============================================================================

/// Solves predicate trees against the store
pub struct Solver {
    store: Arc<dyn Store>,
    keys: Keys,
}

impl Solver {
    /// Create a solver over a store
    pub fn new(store: Arc<dyn Store>, keys: Keys) -> Self {
        Self { store, keys }
    }

    /// Solve a tree, optionally windowing the matching series into samples
    pub async fn solve(&self, node: &Node, window: Option<&TimeWindow>) -> Result<QueryResult> {
        let started = Instant::now();
        let result = self.solve_inner(node, window).await;
        record_query(started.elapsed().as_secs_f64(), window.is_some(), result.is_ok());
        result
    }

    async fn solve_inner(&self, node: &Node, window: Option<&TimeWindow>) -> Result<QueryResult> {
        let mut plan = Plan::compile(node)?;
        self.map_pass(&mut plan).await?;
        self.value_pass(&mut plan).await?;
        let mut series = self.expression_pass(&mut plan).await?;
        series.sort_unstable();
        debug!(query = %node, series = series.len(), "Query solved");

        match window {
            None => Ok(QueryResult::Series(series)),
            Some(window) => Ok(QueryResult::Values(self.time_pass(&series, window).await?)),
        }
    }

    /// Resolve label and note names to their value maps
    async fn map_pass(&self, plan: &mut Plan) -> Result<()> {
        let mut leaves = Vec::new();
        plan.root.leaves_mut(&mut leaves);

        let mut pipeline = Pipeline::new();
        let mut pending = Vec::new();
        for (i, leaf) in leaves.iter_mut().enumerate() {
            match leaf.scope {
                NameScope::Metric => leaf.resolution = Resolution::Map(MapName::MetricName),
                NameScope::Instance => leaf.resolution = Resolution::Map(MapName::InstName),
                NameScope::Label | NameScope::Note => {
                    let names = self.keys.map(&MapName::names(leaf.notes()));
                    pipeline.append(Command::hget(&names, &leaf.field));
                    pending.push(i);
                },
            }
        }
        if pipeline.is_empty() {
            return Ok(());
        }

        let mut replies = self.store.execute(pipeline).await?;
        for i in pending {
            let leaf = &mut leaves[i];
            let reply = replies.next_reply("map pass")?.into_optional_string("HGET name map")?;
            leaf.resolution = match reply {
                Some(id) => Resolution::Map(MapName::values(leaf.notes(), parse_id(&id, "HGET name map")?)),
                None => {
                    debug!(name = %leaf.field, "Unknown name");
                    Resolution::Series(Vec::new())
                },
            };
        }
        Ok(())
    }

    /// Resolve literals and patterns to membership set keys
    async fn value_pass(&self, plan: &mut Plan) -> Result<()> {
        let mut leaves = Vec::new();
        plan.root.leaves_mut(&mut leaves);

        let mut pipeline = Pipeline::new();
        let mut pending = Vec::new();
        for (i, leaf) in leaves.iter().enumerate() {
            if let Resolution::Map(name) = &leaf.resolution {
                let key = self.keys.map(name);
                match leaf.test {
                    ValueTest::Equal => pipeline.append(Command::hget(&key, &leaf.literal)),
                    _ => pipeline.append(Command::hgetall(&key)),
                }
                pending.push(i);
            }
        }
        if pipeline.is_empty() {
            return Ok(());
        }

        let mut replies = self.store.execute(pipeline).await?;
        for i in pending {
            let leaf = &mut leaves[i];
            let Resolution::Map(name) = std::mem::replace(&mut leaf.resolution, Resolution::Pending) else {
                continue;
            };
            let reply = replies.next_reply("value pass")?;
            let ids = match leaf.test {
                ValueTest::Equal => match reply.into_optional_string("HGET value map")? {
                    Some(id) => vec![parse_id(&id, "HGET value map")?],
                    None => Vec::new(),
                },
                _ => {
                    let mut ids = Vec::new();
                    for (candidate, id) in reply.into_pairs("HGETALL value map")? {
                        if leaf.test.accepts(&candidate, &leaf.literal) {
                            ids.push(parse_id(&id, "HGETALL value map")?);
                        }
                    }
                    ids
                },
            };
            leaf.resolution = if ids.is_empty() {
                Resolution::Series(Vec::new())
            } else {
                Resolution::SeriesKeys(ids.into_iter().map(|id| self.keys.series_with(&name, id)).collect())
            };
        }
        Ok(())
    }

    /// Fetch membership sets and combine them through the tree
    async fn expression_pass(&self, plan: &mut Plan) -> Result<Vec<SeriesId>> {
        let mut leaves = Vec::new();
        plan.root.leaves_mut(&mut leaves);

        let mut pipeline = Pipeline::new();
        for leaf in &leaves {
            if let Resolution::SeriesKeys(keys) = &leaf.resolution {
                for key in keys {
                    pipeline.append(Command::smembers(key));
                }
            }
        }

        if !pipeline.is_empty() {
            let mut replies = self.store.execute(pipeline).await?;
            for leaf in leaves.iter_mut() {
                let Resolution::SeriesKeys(keys) = &leaf.resolution else {
                    continue;
                };
                let mut sets = Vec::with_capacity(keys.len());
                for _ in keys {
                    let members = replies.next_reply("expression pass")?.into_strings("SMEMBERS")?;
                    let ids = members
                        .into_iter()
                        .map(|m| parse_series(m, "SMEMBERS"))
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    sets.push(ids);
                }
                leaf.resolution = Resolution::Series(union_all(sets));
            }
        }
        drop(leaves);
        Ok(plan.root.evaluate())
    }

    /// Window the solved series into samples, newest first
    async fn time_pass(&self, series: &[SeriesId], window: &TimeWindow) -> Result<Vec<SeriesValues>> {
        if series.is_empty() || window.offset > window.count {
            return Ok(Vec::new());
        }
        let mut pipeline = Pipeline::new();
        for sid in series {
            pipeline.append(Command::zrevrangebyscore(
                &self.keys.samples(sid),
                window.end.map(|t| t.to_string()),
                window.start.map(|t| t.to_string()),
                window.offset,
                window.count,
            ));
        }

        let mut replies = self.store.execute(pipeline).await?;
        let mut out = Vec::new();
        for sid in series {
            let pairs = replies.next_reply("time pass")?.into_pairs("ZREVRANGEBYSCORE")?;
            let mut values = Vec::with_capacity(pairs.len());
            for (member, _score) in pairs {
                let parsed = split_member(&member)
                    .and_then(|(stamp, value)| stamp.parse::<Timestamp>().ok().map(|ts| (ts, value)));
                let Some((timestamp, value)) = parsed else {
                    return Err(StoreError::UnexpectedReply {
                        context: "ZREVRANGEBYSCORE".to_string(),
                        expected: "<stamp>:<value> member",
                        found: member,
                    }
                    .into());
                };
                values.push(Sample {
                    timestamp,
                    value: value.to_string(),
                });
            }
            if !values.is_empty() {
                out.push(SeriesValues { series: *sid, values });
            }
        }
        Ok(out)
    }
}
