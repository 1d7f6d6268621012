// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Property-based cross-check of index answers against scan answers.
//!
//! Ranges over a randomly chosen numeric column are divided recursively
//! into three non-overlapping sub-ranges; for every node the index path
//! and the sequential scan path must agree bit for bit, and the sub-range
//! counts must add up to the parent count. The concurrent mode races
//! worker threads over a shared query list built by recursive binary
//! subdivision of 2D range pairs and re-checks the sums afterwards.

use super::Partition;
use crate::{predicate::RangeOp, Predicate};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};

/// Deterministic query generator
///
/// Hash-based so the self test needs no randomness source beyond a seed;
/// the same seed always replays the same query mix.
struct QueryRng {
    state: u64,
}

impl QueryRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = xxhash_rust::xxh3::xxh3_64(&self.state.to_le_bytes());
        self.state
    }

    fn pick(&mut self, n: usize) -> usize {
        (self.next_u64() % n.max(1) as u64) as usize
    }
}

/// Outcome of a self-test run
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SelfTest {
    /// Ranges evaluated
    pub queries: usize,

    /// Nodes where index hits differed from scan hits
    pub mismatches: usize,

    /// Nodes whose children counts did not sum to the parent count
    pub subdivision_errors: usize,

    /// Sampled rows whose RID roundtrip was not the identity
    pub rid_errors: usize,
}

impl SelfTest {
    /// Returns `true` if every check passed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.mismatches == 0 && self.subdivision_errors == 0 && self.rid_errors == 0
    }

    fn merge(&mut self, other: Self) {
        self.queries += other.queries;
        self.mismatches += other.mismatches;
        self.subdivision_errors += other.subdivision_errors;
        self.rid_errors += other.rid_errors;
    }
}

/// One node of the subdivision tree
struct RangeNode {
    lo: f64,
    hi: f64,
    last: bool,
    depth: usize,
}

impl Partition {
    /// Runs the sequential self test: `rounds` root ranges over randomly
    /// chosen numeric columns, each subdivided recursively, plus a RID
    /// roundtrip sample.
    pub fn self_test(&self, rounds: usize, seed: u64) -> crate::Result<SelfTest> {
        let mut rng = QueryRng::new(seed ^ 0x5E1F_7E57);
        let mut report = SelfTest::default();

        let numeric = self.numeric_columns();
        if numeric.is_empty() {
            return Ok(report);
        }

        // `<partition>.longTests` deepens the subdivision
        let depth = if self
            .inner
            .resources
            .get_bool_scoped(&self.name(), "longTests")
        {
            4
        } else {
            2
        };

        for _ in 0..rounds {
            let column = &numeric[rng.pick(numeric.len())];
            let (min, max) = self.column_bounds(column)?;

            if !(min.is_finite() && max.is_finite()) {
                continue;
            }

            self.check_range_node(
                column,
                &RangeNode {
                    lo: min,
                    hi: max,
                    last: true,
                    depth,
                },
                &mut report,
            )?;
        }

        self.check_rid_roundtrip(&mut rng, &mut report)?;

        Ok(report)
    }

    /// Runs the concurrent self test: `nthreads - 1` workers race over a
    /// shared list of 2D range pairs; the supervisor then checks that
    /// every internal node's hit count equals the sum of its children.
    pub fn self_test_concurrent(&self, nthreads: usize, seed: u64) -> crate::Result<SelfTest> {
        let mut rng = QueryRng::new(seed ^ 0xC0_7E57);
        let mut report = SelfTest::default();

        let numeric = self.numeric_columns();
        if numeric.len() < 2 {
            return Ok(report);
        }

        let c1 = &numeric[rng.pick(numeric.len())];
        let mut c2 = &numeric[rng.pick(numeric.len())];
        if c1 == c2 {
            c2 = &numeric[(rng.pick(numeric.len()) + 1) % numeric.len()];
        }

        let b1 = self.column_bounds(c1)?;
        let b2 = self.column_bounds(c2)?;

        // Recursive binary subdivision of 2D range pairs, parents before
        // children. Ranges are half-open except along the root's top
        // edges, tracked per dimension so sibling counts tile exactly.
        struct Node2D {
            r1: (f64, f64),
            r2: (f64, f64),
            last1: bool,
            last2: bool,
            parent: Option<usize>,
        }

        let mut nodes = vec![Node2D {
            r1: b1,
            r2: b2,
            last1: true,
            last2: true,
            parent: None,
        }];

        let mut frontier = vec![0usize];
        for level in 0..3 {
            let mut next = vec![];

            for &slot in &frontier {
                let Some(node) = nodes.get(slot) else {
                    continue;
                };
                let (r1, r2, last1, last2) = (node.r1, node.r2, node.last1, node.last2);

                // alternate the split dimension per level
                let children = if level % 2 == 0 {
                    let mid = (r1.0 + r1.1) / 2.0;
                    [
                        ((r1.0, mid), r2, false, last2),
                        ((mid, r1.1), r2, last1, last2),
                    ]
                } else {
                    let mid = (r2.0 + r2.1) / 2.0;
                    [
                        (r1, (r2.0, mid), last1, false),
                        (r1, (mid, r2.1), last1, last2),
                    ]
                };

                for (r1, r2, last1, last2) in children {
                    nodes.push(Node2D {
                        r1,
                        r2,
                        last1,
                        last2,
                        parent: Some(slot),
                    });
                    next.push(nodes.len() - 1);
                }
            }

            frontier = next;
        }

        let mut is_parent = vec![false; nodes.len()];
        for node in &nodes {
            if let Some(p) = node.parent {
                if let Some(flag) = is_parent.get_mut(p) {
                    *flag = true;
                }
            }
        }

        let counts: Vec<AtomicUsize> = nodes.iter().map(|_| AtomicUsize::new(0)).collect();
        let cursor = AtomicUsize::new(0);
        let failures = Mutex::new(SelfTest::default());
        let workers = nthreads.saturating_sub(1).max(1);

        std::thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| loop {
                    let i = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some(node) = nodes.get(i) else {
                        break;
                    };

                    let verify = !is_parent.get(i).copied().unwrap_or_default();

                    let p1 = range_pred(c1, node.r1.0, node.r1.1, node.last1);
                    let p2 = range_pred(c2, node.r2.0, node.r2.1, node.last2);

                    match self.count_2d(&p1, &p2, verify) {
                        Ok((count, mismatch)) => {
                            if let Some(slot) = counts.get(i) {
                                slot.store(count, Ordering::Relaxed);
                            }

                            let mut f = failures.lock().expect("lock is poisoned");
                            f.queries += 1;
                            if mismatch {
                                f.mismatches += 1;
                            }
                        }
                        Err(e) => {
                            log::warn!("concurrent self-test query failed: {e}");
                        }
                    }
                });
            }
        });

        report.merge(failures.into_inner().expect("lock is poisoned"));

        // supervisor pass: each internal node equals the sum of its children
        let mut sums = vec![0usize; nodes.len()];
        for (i, node) in nodes.iter().enumerate() {
            if let Some(parent) = node.parent {
                if let Some(sum) = sums.get_mut(parent) {
                    *sum += counts.get(i).map_or(0, |c| c.load(Ordering::Relaxed));
                }
            }
        }

        for (i, node_is_parent) in is_parent.iter().enumerate() {
            let observed = counts.get(i).map_or(0, |c| c.load(Ordering::Relaxed));

            if *node_is_parent && sums.get(i) != Some(&observed) {
                log::error!("2D subdivision at node {i} does not tile its parent");
                report.subdivision_errors += 1;
            }
        }

        Ok(report)
    }

    fn numeric_columns(&self) -> Vec<String> {
        self.read_data()
            .columns
            .iter()
            .filter(|c| c.kind().is_numeric())
            .map(|c| c.name().to_owned())
            .collect()
    }

    /// Evaluates one node through both paths, recursing into a 3-way split.
    fn check_range_node(
        &self,
        column: &str,
        node: &RangeNode,
        report: &mut SelfTest,
    ) -> crate::Result<usize> {
        let pred = range_pred(column, node.lo, node.hi, node.last);

        let via_index = self.evaluate(&pred)?;
        let via_scan = self.evaluate_via_scan(&pred)?;

        report.queries += 1;

        if via_index.xor(&via_scan).count_ones() != 0 {
            log::error!(
                "index/scan disagreement over {column:?} in [{}, {})",
                node.lo,
                node.hi,
            );
            report.mismatches += 1;
        }

        let count = via_scan.count_ones();

        if node.depth > 0 && node.hi > node.lo {
            let third = (node.hi - node.lo) / 3.0;
            let t1 = node.lo + third;
            let t2 = node.lo + 2.0 * third;

            if t1 > node.lo && t2 > t1 && node.hi > t2 {
                let sum = self.check_range_node(
                    column,
                    &RangeNode {
                        lo: node.lo,
                        hi: t1,
                        last: false,
                        depth: node.depth - 1,
                    },
                    report,
                )? + self.check_range_node(
                    column,
                    &RangeNode {
                        lo: t1,
                        hi: t2,
                        last: false,
                        depth: node.depth - 1,
                    },
                    report,
                )? + self.check_range_node(
                    column,
                    &RangeNode {
                        lo: t2,
                        hi: node.hi,
                        last: node.last,
                        depth: node.depth - 1,
                    },
                    report,
                )?;

                if sum != count {
                    log::error!(
                        "subdivision of {column:?} [{}, {}) sums to {sum}, expected {count}",
                        node.lo,
                        node.hi,
                    );
                    report.subdivision_errors += 1;
                }
            }
        }

        Ok(count)
    }

    fn check_rid_roundtrip(
        &self,
        rng: &mut QueryRng,
        report: &mut SelfTest,
    ) -> crate::Result<()> {
        let mask = self.active_mask();
        let nrows = mask.len();

        if nrows == 0 {
            return Ok(());
        }

        for _ in 0..32.min(nrows) {
            let row = rng.pick(nrows) as crate::RowId;

            if !mask.get(row as usize) {
                continue;
            }

            let Some(rid) = self.rid_of_row(row)? else {
                continue;
            };

            if self.row_from_rid(rid)? != Some(row) {
                log::error!("RID roundtrip failed for row {row}");
                report.rid_errors += 1;
            }
        }

        Ok(())
    }

    /// Counts hits of a 2D range pair, double-checking the scan path on
    /// leaves.
    fn count_2d(
        &self,
        p1: &Predicate,
        p2: &Predicate,
        verify: bool,
    ) -> crate::Result<(usize, bool)> {
        let hits = self.evaluate(p1)?.and(&self.evaluate(p2)?);

        let mut mismatch = false;
        if verify {
            let scanned = self
                .evaluate_via_scan(p1)?
                .and(&self.evaluate_via_scan(p2)?);
            mismatch = hits.xor(&scanned).count_ones() != 0;
        }

        Ok((hits.count_ones(), mismatch))
    }
}

/// `lo <= x < hi`, or `lo <= x <= hi` for the closing segment.
fn range_pred(column: &str, lo: f64, hi: f64, inclusive: bool) -> Predicate {
    let hi_op = if inclusive { RangeOp::Le } else { RangeOp::Lt };
    Predicate::range(column).bounds(lo, RangeOp::Le, hi_op, hi)
}
