// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Predicate dispatch: route a range, discrete, pattern or keyword
//! predicate to the bitmap index, a scan kernel, or both.
//!
//! The index path is never trusted blindly: the index contributes a sure
//! set and a possible set, and the rows in between are confirmed by a
//! type-specialized scan restricted to exactly those rows. Every answer is
//! intersected with the active-row mask (and the column's null mask)
//! before it is returned.

use super::{PartData, Partition, PartitionInner};
use crate::{
    column::Column,
    index::{Estimate, IndexOps},
    predicate::{
        keywords, like_match, normalize_float, normalize_int, IntBounds, Interval, Predicate,
        RangePredicate,
    },
    scan::{
        self, Above, Always, Below, Between, EqTo, InIntSet, InSet, Not, RawValues, Scalar,
        ValueTest,
    },
    types::ColumnType,
    Bitvector, Error,
};
use byteorder::{LittleEndian, ReadBytesExt};
use crate::scan::dispatch_scalar;
use std::path::Path;

impl Partition {
    /// Evaluates a predicate to the exact set of matching active rows.
    pub fn evaluate(&self, pred: &Predicate) -> crate::Result<Bitvector> {
        self.evaluate_inner(pred, true)
    }

    /// Evaluates a predicate bypassing any index (scan only).
    #[doc(hidden)]
    pub fn evaluate_via_scan(&self, pred: &Predicate) -> crate::Result<Bitvector> {
        self.evaluate_inner(pred, false)
    }

    /// Number of matching active rows.
    pub fn count_hits(&self, pred: &Predicate) -> crate::Result<usize> {
        Ok(self.evaluate(pred)?.count_ones())
    }

    /// Logical complement of [`Partition::evaluate`] within the candidate
    /// rows of the predicate's column.
    ///
    /// Numeric ranges run the complement kernel in a single pass; other
    /// predicate kinds subtract the hits from the candidates.
    pub fn neg_evaluate(&self, pred: &Predicate) -> crate::Result<Bitvector> {
        if let Predicate::Range(range) = pred {
            let data = self.read_data();
            self.check_queryable(&data)?;

            if let Some(col) = data.column(&range.column) {
                if col.kind().is_numeric() {
                    let candidates = data.candidates(col);
                    return neg_range(&self.inner, col, range, &candidates);
                }
            }
        }

        let hits = self.evaluate(pred)?;

        let data = self.read_data();
        let universe = match data.column(pred.column()) {
            Some(col) => data.candidates(col),
            None => data.mask.clone(),
        };

        Ok(universe.and_not(&hits))
    }

    /// Materializes the numeric values of `column` at the rows matching
    /// `pred`, in row order, together with the rows themselves.
    ///
    /// A range over the selected column itself is fused into a single
    /// pass; any other predicate is evaluated first and the values are
    /// then gathered at the hit rows.
    pub fn select_values(
        &self,
        column: &str,
        pred: &Predicate,
    ) -> crate::Result<(Vec<f64>, Bitvector)> {
        if let Predicate::Range(range) = pred {
            if range.column == column {
                let data = self.read_data();
                self.check_queryable(&data)?;

                let col = data
                    .column(column)
                    .ok_or_else(|| Error::UnknownColumn(column.to_owned()))?;

                if !col.kind().is_numeric() {
                    return Err(unsupported(col));
                }

                let candidates = data.candidates(col);
                return select_range(&self.inner, col, range, &candidates);
            }
        }

        let hits = self.evaluate(pred)?;

        let data = self.read_data();
        let col = data
            .column(column)
            .ok_or_else(|| Error::UnknownColumn(column.to_owned()))?;

        if !col.kind().is_numeric() {
            return Err(unsupported(col));
        }

        let values = materialize_rows(&self.inner, col, &hits)?;
        Ok((values, hits))
    }

    /// Index-only bounds: `sure ⊆ evaluate(pred) ⊆ possible`.
    ///
    /// Cheap; without a usable index the bounds degrade to
    /// `(∅, candidates)`.
    pub fn estimate(&self, pred: &Predicate) -> crate::Result<Estimate> {
        let data = self.read_data();
        self.check_queryable(&data)?;

        if let Predicate::Range(range) = pred {
            if let Some(col) = data.column(&range.column) {
                if !col.kind().is_numeric() {
                    return Err(unsupported(col));
                }

                let candidates = data.candidates(col);

                if let Some(idx) = usable_index(col, data.nrows) {
                    let est = idx.estimate(&interval_f64_of(col.kind(), range));
                    return Ok(Estimate {
                        sure: est.sure.and(&candidates),
                        possible: est.possible.and(&candidates),
                    });
                }

                return Ok(Estimate {
                    sure: Bitvector::with_len(data.nrows, false),
                    possible: candidates,
                });
            }

            return Err(Error::UnknownColumn(range.column.clone()));
        }

        // non-range predicates: exact for meta tags, trivial otherwise
        match data.column(pred.column()) {
            Some(col) => {
                let candidates = data.candidates(col);
                Ok(Estimate {
                    sure: Bitvector::with_len(data.nrows, false),
                    possible: candidates,
                })
            }
            None => {
                let hits = eval_meta_tag(&data, pred)?;
                Ok(Estimate {
                    sure: hits.clone(),
                    possible: hits,
                })
            }
        }
    }

    /// Monotone cost measure used to order predicate evaluation.
    ///
    /// With a current index this is the number of undecided candidate
    /// bytes left for the scan; without one it is the sequential scan
    /// volume.
    pub fn estimate_cost(&self, pred: &Predicate) -> crate::Result<f64> {
        let data = self.read_data();
        self.check_queryable(&data)?;

        let Some(col) = data.column(pred.column()) else {
            // meta tags are answered from the header alone
            return Ok(0.0);
        };

        let elem = col.kind().element_size().unwrap_or(16) as f64;
        let candidates = data.candidates(col);

        if let Predicate::Range(range) = pred {
            if col.kind().is_numeric() {
                if let Some(idx) = usable_index(col, data.nrows) {
                    let est = idx.estimate(&interval_f64_of(col.kind(), range));
                    let undecided = est.undecided().and(&candidates);
                    return Ok(undecided.count_ones() as f64 * elem);
                }
            }
        }

        Ok(candidates.count_ones() as f64 * elem)
    }

    fn evaluate_inner(&self, pred: &Predicate, use_index: bool) -> crate::Result<Bitvector> {
        let data = self.read_data();
        self.check_queryable(&data)?;

        match pred {
            Predicate::Range(range) => {
                let col = data
                    .column(&range.column)
                    .ok_or_else(|| Error::UnknownColumn(range.column.clone()))?;

                eval_range(&self.inner, &data, col, range, use_index)
            }

            Predicate::DiscreteSet { column, values } => {
                let col = data
                    .column(column)
                    .ok_or_else(|| Error::UnknownColumn(column.clone()))?;

                eval_discrete(&self.inner, &data, col, values)
            }

            Predicate::IntSet { column, values } => {
                let col = data
                    .column(column)
                    .ok_or_else(|| Error::UnknownColumn(column.clone()))?;

                let widened: Vec<i128> = values.iter().map(|&v| i128::from(v)).collect();
                eval_int_membership(&self.inner, &data, col, widened)
            }

            Predicate::UIntSet { column, values } => {
                let col = data
                    .column(column)
                    .ok_or_else(|| Error::UnknownColumn(column.clone()))?;

                let widened: Vec<i128> = values.iter().map(|&v| i128::from(v)).collect();
                eval_int_membership(&self.inner, &data, col, widened)
            }

            Predicate::StringEq { column, .. }
            | Predicate::StringIn { column, .. }
            | Predicate::Like { column, .. }
            | Predicate::Keyword { column, .. }
            | Predicate::AllKeywords { column, .. } => match data.column(column) {
                Some(col) => eval_string(&self.inner, &data, col, pred),
                None => eval_meta_tag(&data, pred),
            },
        }
    }

    fn check_queryable(&self, data: &PartData) -> crate::Result<()> {
        if data.state.is_queryable() {
            Ok(())
        } else {
            Err(Error::NotQueryable)
        }
    }
}

fn unsupported(col: &Column) -> Error {
    Error::UnsupportedType {
        column: col.name().to_owned(),
        kind: col.kind(),
    }
}

fn usable_index(col: &Column, nrows: usize) -> Option<&crate::index::ColumnIndex> {
    col.index.as_ref().filter(|idx| idx.row_count() == nrows)
}

/// Converts a range to the `f64` domain the index bins live in.
fn interval_f64_of(kind: ColumnType, range: &RangePredicate) -> Interval<f64> {
    match kind {
        ColumnType::Byte => widen(&normalize_int::<i8>(range)),
        ColumnType::UByte => widen(&normalize_int::<u8>(range)),
        ColumnType::Short => widen(&normalize_int::<i16>(range)),
        ColumnType::UShort => widen(&normalize_int::<u16>(range)),
        ColumnType::Int => widen(&normalize_int::<i32>(range)),
        ColumnType::UInt | ColumnType::Category => widen(&normalize_int::<u32>(range)),
        ColumnType::Long => widen(&normalize_int::<i64>(range)),
        ColumnType::ULong => widen(&normalize_int::<u64>(range)),
        ColumnType::Float => normalize_float(range, true),
        ColumnType::Double => normalize_float(range, false),
        ColumnType::Text | ColumnType::Blob | ColumnType::Oid => Interval::Empty,
    }
}

fn widen<T: Scalar>(interval: &Interval<T>) -> Interval<f64> {
    match interval {
        Interval::Empty => Interval::Empty,
        Interval::All => Interval::All,
        Interval::Eq(v) => Interval::Eq(v.to_f64()),
        Interval::Range { lo, hi } => Interval::Range {
            lo: lo.map(|(b, s)| (b.to_f64(), s)),
            hi: hi.map(|(b, s)| (b.to_f64(), s)),
        },
    }
}

fn eval_range(
    inner: &PartitionInner,
    data: &PartData,
    col: &Column,
    range: &RangePredicate,
    use_index: bool,
) -> crate::Result<Bitvector> {
    let candidates = data.candidates(col);

    match col.kind() {
        ColumnType::Byte => eval_range_int::<i8>(inner, data, col, range, &candidates, use_index),
        ColumnType::UByte => eval_range_int::<u8>(inner, data, col, range, &candidates, use_index),
        ColumnType::Short => eval_range_int::<i16>(inner, data, col, range, &candidates, use_index),
        ColumnType::UShort => {
            eval_range_int::<u16>(inner, data, col, range, &candidates, use_index)
        }
        ColumnType::Int => eval_range_int::<i32>(inner, data, col, range, &candidates, use_index),
        ColumnType::UInt | ColumnType::Category => {
            eval_range_int::<u32>(inner, data, col, range, &candidates, use_index)
        }
        ColumnType::Long => eval_range_int::<i64>(inner, data, col, range, &candidates, use_index),
        ColumnType::ULong => eval_range_int::<u64>(inner, data, col, range, &candidates, use_index),
        ColumnType::Float => {
            eval_range_float::<f32>(inner, data, col, range, &candidates, use_index)
        }
        ColumnType::Double => {
            eval_range_float::<f64>(inner, data, col, range, &candidates, use_index)
        }
        ColumnType::Text | ColumnType::Blob | ColumnType::Oid => Err(unsupported(col)),
    }
}

fn eval_range_int<T>(
    inner: &PartitionInner,
    data: &PartData,
    col: &Column,
    range: &RangePredicate,
    candidates: &Bitvector,
    use_index: bool,
) -> crate::Result<Bitvector>
where
    T: Scalar + IntBounds + PartialOrd,
{
    let interval = normalize_int::<T>(range);
    eval_interval::<T, T>(inner, data, col, &interval, widen(&interval), candidates, use_index)
}

fn eval_range_float<T>(
    inner: &PartitionInner,
    data: &PartData,
    col: &Column,
    range: &RangePredicate,
    candidates: &Bitvector,
    use_index: bool,
) -> crate::Result<Bitvector>
where
    T: Scalar,
    Above<f64>: ValueTest<T>,
    Below<f64>: ValueTest<T>,
    Between<f64>: ValueTest<T>,
    EqTo<f64>: ValueTest<T>,
{
    let interval = normalize_float(range, T::KIND == ColumnType::Float);
    eval_interval::<T, f64>(
        inner,
        data,
        col,
        &interval,
        interval,
        candidates,
        use_index,
    )
}

/// Core of the range path: index estimate plus candidate scan.
#[allow(clippy::too_many_arguments)]
fn eval_interval<T, B>(
    inner: &PartitionInner,
    data: &PartData,
    col: &Column,
    interval: &Interval<B>,
    interval_f64: Interval<f64>,
    candidates: &Bitvector,
    use_index: bool,
) -> crate::Result<Bitvector>
where
    T: Scalar,
    B: Copy,
    Above<B>: ValueTest<T>,
    Below<B>: ValueTest<T>,
    Between<B>: ValueTest<T>,
    EqTo<B>: ValueTest<T>,
{
    if matches!(interval, Interval::Empty) {
        return Ok(Bitvector::with_len(data.nrows, false));
    }

    // an unconstrained range keeps every candidate; the index must not be
    // consulted here because its bins do not cover NaN rows
    if matches!(
        interval,
        Interval::All
            | Interval::Range {
                lo: None,
                hi: None
            }
    ) {
        return Ok(candidates.clone());
    }

    if use_index {
        if let Some(idx) = usable_index(col, data.nrows) {
            let est = idx.estimate(&interval_f64);
            let sure = est.sure.and(candidates);
            let undecided = est.undecided().and(candidates);

            if undecided.count_ones() == 0 {
                return Ok(sure);
            }

            log::trace!(
                "index narrowed candidates to {} undecided rows",
                undecided.count_ones(),
            );

            let confirmed = scan_interval::<T, B>(inner, col, interval, &undecided)?;
            return Ok(sure.or(&confirmed));
        }
    }

    scan_interval::<T, B>(inner, col, interval, candidates)
}

fn scan_interval<T, B>(
    inner: &PartitionInner,
    col: &Column,
    interval: &Interval<B>,
    mask: &Bitvector,
) -> crate::Result<Bitvector>
where
    T: Scalar,
    B: Copy,
    Above<B>: ValueTest<T>,
    Below<B>: ValueTest<T>,
    Between<B>: ValueTest<T>,
    EqTo<B>: ValueTest<T>,
{
    match interval {
        Interval::Empty => Ok(Bitvector::with_len(mask.len(), false)),
        Interval::All | Interval::Range { lo: None, hi: None } => Ok(mask.clone()),
        Interval::Eq(v) => run_scan::<T, _>(inner, col, EqTo { value: *v }, mask),
        Interval::Range {
            lo: Some((l, ls)),
            hi: Some((h, hs)),
        } => run_scan::<T, _>(
            inner,
            col,
            Between {
                lo: *l,
                lo_strict: *ls,
                hi: *h,
                hi_strict: *hs,
            },
            mask,
        ),
        Interval::Range {
            lo: Some((l, ls)),
            hi: None,
        } => run_scan::<T, _>(
            inner,
            col,
            Above {
                bound: *l,
                strict: *ls,
            },
            mask,
        ),
        Interval::Range {
            lo: None,
            hi: Some((h, hs)),
        } => run_scan::<T, _>(
            inner,
            col,
            Below {
                bound: *h,
                strict: *hs,
            },
            mask,
        ),
    }
}

/// Runs one kernel over the preferred value source.
///
/// Array fetch first; the buffered descriptor path is the fallback when
/// the column does not fit the in-memory budget, and the retry path after
/// invoking the cleaners on a failed fetch.
fn run_scan<T: Scalar, P: ValueTest<T>>(
    inner: &PartitionInner,
    col: &Column,
    test: P,
    mask: &Bitvector,
) -> crate::Result<Bitvector> {
    let path = col.value_path(&inner.active_dir);

    match inner.fm.fetch_array(&path, inner.access) {
        Ok(Some(view)) => scan_in_memory::<T, P>(&view, test, mask),
        Ok(None) => {
            let fd = inner.fm.fetch_descriptor(&path)?;
            scan::scan_file_bits(&fd, test, mask, &inner.fm)
        }
        Err(e) => {
            log::warn!("array fetch of {path:?} failed ({e}); cleaning up and retrying on the descriptor path");
            inner.fm.run_cleaners();

            let fd = inner.fm.fetch_descriptor(&path)?;
            scan::scan_file_bits(&fd, test, mask, &inner.fm)
        }
    }
}

fn scan_in_memory<T: Scalar, P: ValueTest<T>>(
    bytes: &[u8],
    test: P,
    mask: &Bitvector,
) -> crate::Result<Bitvector> {
    let want = mask.len() * T::SIZE;

    if bytes.len() >= want {
        let exact = bytes.get(..want).unwrap_or(bytes);
        return scan::scan_bits(&RawValues::<T>::new(exact), test, mask);
    }

    // short value file: rows past its end cannot match
    log::warn!(
        "value file holds {} elements, expected {}; restricting the scan",
        bytes.len() / T::SIZE,
        mask.len(),
    );

    let avail = bytes.len() / T::SIZE;
    let mut prefix = Bitvector::with_len(avail.min(mask.len()), true);
    prefix.adjust_size(mask.len(), false);

    let mut padded = bytes.to_vec();
    padded.resize(want, 0);

    scan::scan_bits(&RawValues::<T>::new(&padded), test, &mask.and(&prefix))
}

fn eval_discrete(
    inner: &PartitionInner,
    data: &PartData,
    col: &Column,
    values: &[f64],
) -> crate::Result<Bitvector> {
    let candidates = data.candidates(col);

    if col.kind().is_integer() {
        // values that do not coerce to an integer cannot match any row
        let mut widened: Vec<i128> = values
            .iter()
            .filter(|v| v.trunc() == **v && v.is_finite())
            .map(|&v| v as i128)
            .collect();
        widened.sort_unstable();
        widened.dedup();

        return eval_int_membership(inner, data, col, widened);
    }

    if col.kind().is_float() {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
        sorted.sort_by(f64::total_cmp);
        sorted.dedup_by(|a, b| a == b);

        return match col.kind() {
            ColumnType::Float => run_scan::<f32, _>(
                inner,
                col,
                InSet { sorted: &sorted },
                &candidates,
            ),
            _ => run_scan::<f64, _>(inner, col, InSet { sorted: &sorted }, &candidates),
        };
    }

    Err(unsupported(col))
}

fn eval_int_membership(
    inner: &PartitionInner,
    data: &PartData,
    col: &Column,
    mut widened: Vec<i128>,
) -> crate::Result<Bitvector> {
    if !col.kind().is_integer() {
        return Err(unsupported(col));
    }

    widened.sort_unstable();
    widened.dedup();

    let candidates = data.candidates(col);
    let test = InIntSet { sorted: &widened };

    dispatch_scalar!(
        col.kind(),
        T => run_scan::<T, _>(inner, col, test, &candidates),
        Err(unsupported(col)),
    )
}

fn eval_string(
    inner: &PartitionInner,
    data: &PartData,
    col: &Column,
    pred: &Predicate,
) -> crate::Result<Bitvector> {
    let candidates = data.candidates(col);

    match col.kind() {
        ColumnType::Category => {
            let Some(dict) = &col.dictionary else {
                log::warn!(
                    "column {:?} has no dictionary; string predicate matches nothing",
                    col.name(),
                );
                return Ok(Bitvector::with_len(data.nrows, false));
            };

            let codes: Vec<u32> = match pred {
                Predicate::StringEq { value, .. } => dict.code(value).into_iter().collect(),
                Predicate::StringIn { values, .. } => {
                    values.iter().filter_map(|v| dict.code(v)).collect()
                }
                Predicate::Like { pattern, .. } => (0..dict.len() as u32)
                    .filter(|&c| dict.value(c).is_some_and(|s| like_match(pattern, s)))
                    .collect(),
                Predicate::Keyword { word, .. } => (0..dict.len() as u32)
                    .filter(|&c| {
                        dict.value(c)
                            .is_some_and(|s| keywords(s).any(|k| k == word))
                    })
                    .collect(),
                Predicate::AllKeywords { words, .. } => (0..dict.len() as u32)
                    .filter(|&c| {
                        dict.value(c).is_some_and(|s| {
                            words.iter().all(|w| keywords(s).any(|k| k == w))
                        })
                    })
                    .collect(),
                _ => return Err(unsupported(col)),
            };

            if codes.is_empty() {
                return Ok(Bitvector::with_len(data.nrows, false));
            }

            // exact equality index over the codes answers without a scan
            if let Some(idx) = usable_index(col, data.nrows) {
                if codes.len() == 1 {
                    let code = f64::from(codes[0]);
                    let est = idx.estimate(&Interval::Eq(code));
                    if est.undecided().count_ones() == 0 {
                        return Ok(est.sure.and(&candidates));
                    }
                }
            }

            let mut widened: Vec<i128> = codes.iter().map(|&c| i128::from(c)).collect();
            widened.sort_unstable();
            widened.dedup();

            run_scan::<u32, _>(inner, col, InIntSet { sorted: &widened }, &candidates)
        }

        ColumnType::Text => {
            let matcher: Box<dyn Fn(&[u8]) -> bool> = match pred {
                Predicate::StringEq { value, .. } => {
                    let value = value.clone();
                    Box::new(move |bytes| bytes == value.as_bytes())
                }
                Predicate::StringIn { values, .. } => {
                    let values = values.clone();
                    Box::new(move |bytes| values.iter().any(|v| bytes == v.as_bytes()))
                }
                Predicate::Like { pattern, .. } => {
                    let pattern = pattern.clone();
                    Box::new(move |bytes| like_match(&pattern, &String::from_utf8_lossy(bytes)))
                }
                Predicate::Keyword { word, .. } => {
                    let word = word.clone();
                    Box::new(move |bytes| {
                        keywords(&String::from_utf8_lossy(bytes)).any(|k| k == word)
                    })
                }
                Predicate::AllKeywords { words, .. } => {
                    let words = words.clone();
                    Box::new(move |bytes| {
                        let text = String::from_utf8_lossy(bytes).into_owned();
                        words.iter().all(|w| keywords(&text).any(|k| k == w))
                    })
                }
                _ => return Err(unsupported(col)),
            };

            scan_text(inner, col, data.nrows, &candidates, &matcher)
        }

        _ => Err(unsupported(col)),
    }
}

fn neg_range(
    inner: &PartitionInner,
    col: &Column,
    range: &RangePredicate,
    candidates: &Bitvector,
) -> crate::Result<Bitvector> {
    match col.kind() {
        ColumnType::Byte => neg_range_int::<i8>(inner, col, range, candidates),
        ColumnType::UByte => neg_range_int::<u8>(inner, col, range, candidates),
        ColumnType::Short => neg_range_int::<i16>(inner, col, range, candidates),
        ColumnType::UShort => neg_range_int::<u16>(inner, col, range, candidates),
        ColumnType::Int => neg_range_int::<i32>(inner, col, range, candidates),
        ColumnType::UInt | ColumnType::Category => neg_range_int::<u32>(inner, col, range, candidates),
        ColumnType::Long => neg_range_int::<i64>(inner, col, range, candidates),
        ColumnType::ULong => neg_range_int::<u64>(inner, col, range, candidates),
        ColumnType::Float => neg_range_float::<f32>(inner, col, range, candidates),
        ColumnType::Double => neg_range_float::<f64>(inner, col, range, candidates),
        ColumnType::Text | ColumnType::Blob | ColumnType::Oid => Err(unsupported(col)),
    }
}

fn neg_range_int<T>(
    inner: &PartitionInner,
    col: &Column,
    range: &RangePredicate,
    candidates: &Bitvector,
) -> crate::Result<Bitvector>
where
    T: Scalar + IntBounds + PartialOrd,
{
    neg_scan_interval::<T, T>(inner, col, &normalize_int::<T>(range), candidates)
}

fn neg_range_float<T>(
    inner: &PartitionInner,
    col: &Column,
    range: &RangePredicate,
    candidates: &Bitvector,
) -> crate::Result<Bitvector>
where
    T: Scalar,
    Above<f64>: ValueTest<T>,
    Below<f64>: ValueTest<T>,
    Between<f64>: ValueTest<T>,
    EqTo<f64>: ValueTest<T>,
{
    let interval = normalize_float(range, T::KIND == ColumnType::Float);
    neg_scan_interval::<T, f64>(inner, col, &interval, candidates)
}

fn neg_scan_interval<T, B>(
    inner: &PartitionInner,
    col: &Column,
    interval: &Interval<B>,
    mask: &Bitvector,
) -> crate::Result<Bitvector>
where
    T: Scalar,
    B: Copy,
    Above<B>: ValueTest<T>,
    Below<B>: ValueTest<T>,
    Between<B>: ValueTest<T>,
    EqTo<B>: ValueTest<T>,
{
    match interval {
        Interval::Empty => Ok(mask.clone()),
        Interval::All | Interval::Range { lo: None, hi: None } => {
            Ok(Bitvector::with_len(mask.len(), false))
        }
        Interval::Eq(v) => run_neg_scan::<T, _>(inner, col, EqTo { value: *v }, mask),
        Interval::Range {
            lo: Some((l, ls)),
            hi: Some((h, hs)),
        } => run_neg_scan::<T, _>(
            inner,
            col,
            Between {
                lo: *l,
                lo_strict: *ls,
                hi: *h,
                hi_strict: *hs,
            },
            mask,
        ),
        Interval::Range {
            lo: Some((l, ls)),
            hi: None,
        } => run_neg_scan::<T, _>(
            inner,
            col,
            Above {
                bound: *l,
                strict: *ls,
            },
            mask,
        ),
        Interval::Range {
            lo: None,
            hi: Some((h, hs)),
        } => run_neg_scan::<T, _>(
            inner,
            col,
            Below {
                bound: *h,
                strict: *hs,
            },
            mask,
        ),
    }
}

fn run_neg_scan<T: Scalar, P: ValueTest<T>>(
    inner: &PartitionInner,
    col: &Column,
    test: P,
    mask: &Bitvector,
) -> crate::Result<Bitvector> {
    let path = col.value_path(&inner.active_dir);

    match inner.fm.fetch_array(&path, inner.access) {
        Ok(Some(view)) => neg_scan_in_memory::<T, P>(&view, test, mask),
        Ok(None) => {
            let fd = inner.fm.fetch_descriptor(&path)?;
            scan::scan_file_bits(&fd, Not(test), mask, &inner.fm)
        }
        Err(e) => {
            log::warn!("array fetch of {path:?} failed ({e}); cleaning up and retrying on the descriptor path");
            inner.fm.run_cleaners();

            let fd = inner.fm.fetch_descriptor(&path)?;
            scan::scan_file_bits(&fd, Not(test), mask, &inner.fm)
        }
    }
}

fn neg_scan_in_memory<T: Scalar, P: ValueTest<T>>(
    bytes: &[u8],
    test: P,
    mask: &Bitvector,
) -> crate::Result<Bitvector> {
    let want = mask.len() * T::SIZE;

    if bytes.len() >= want {
        let exact = bytes.get(..want).unwrap_or(bytes);
        return scan::neg_scan_bits(&RawValues::<T>::new(exact), test, mask);
    }

    log::warn!(
        "value file holds {} elements, expected {}; restricting the scan",
        bytes.len() / T::SIZE,
        mask.len(),
    );

    let avail = bytes.len() / T::SIZE;
    let mut prefix = Bitvector::with_len(avail.min(mask.len()), true);
    prefix.adjust_size(mask.len(), false);

    let mut padded = bytes.to_vec();
    padded.resize(want, 0);

    scan::neg_scan_bits(&RawValues::<T>::new(&padded), test, &mask.and(&prefix))
}

fn select_range(
    inner: &PartitionInner,
    col: &Column,
    range: &RangePredicate,
    candidates: &Bitvector,
) -> crate::Result<(Vec<f64>, Bitvector)> {
    match col.kind() {
        ColumnType::Byte => select_range_int::<i8>(inner, col, range, candidates),
        ColumnType::UByte => select_range_int::<u8>(inner, col, range, candidates),
        ColumnType::Short => select_range_int::<i16>(inner, col, range, candidates),
        ColumnType::UShort => select_range_int::<u16>(inner, col, range, candidates),
        ColumnType::Int => select_range_int::<i32>(inner, col, range, candidates),
        ColumnType::UInt | ColumnType::Category => {
            select_range_int::<u32>(inner, col, range, candidates)
        }
        ColumnType::Long => select_range_int::<i64>(inner, col, range, candidates),
        ColumnType::ULong => select_range_int::<u64>(inner, col, range, candidates),
        ColumnType::Float => select_range_float::<f32>(inner, col, range, candidates),
        ColumnType::Double => select_range_float::<f64>(inner, col, range, candidates),
        ColumnType::Text | ColumnType::Blob | ColumnType::Oid => Err(unsupported(col)),
    }
}

fn select_range_int<T>(
    inner: &PartitionInner,
    col: &Column,
    range: &RangePredicate,
    candidates: &Bitvector,
) -> crate::Result<(Vec<f64>, Bitvector)>
where
    T: Scalar + IntBounds + PartialOrd,
{
    select_interval::<T, T>(inner, col, &normalize_int::<T>(range), candidates)
}

fn select_range_float<T>(
    inner: &PartitionInner,
    col: &Column,
    range: &RangePredicate,
    candidates: &Bitvector,
) -> crate::Result<(Vec<f64>, Bitvector)>
where
    T: Scalar,
    Above<f64>: ValueTest<T>,
    Below<f64>: ValueTest<T>,
    Between<f64>: ValueTest<T>,
    EqTo<f64>: ValueTest<T>,
{
    let interval = normalize_float(range, T::KIND == ColumnType::Float);
    select_interval::<T, f64>(inner, col, &interval, candidates)
}

fn select_interval<T, B>(
    inner: &PartitionInner,
    col: &Column,
    interval: &Interval<B>,
    mask: &Bitvector,
) -> crate::Result<(Vec<f64>, Bitvector)>
where
    T: Scalar,
    B: Copy,
    Above<B>: ValueTest<T>,
    Below<B>: ValueTest<T>,
    Between<B>: ValueTest<T>,
    EqTo<B>: ValueTest<T>,
{
    match interval {
        Interval::Empty => Ok((vec![], Bitvector::with_len(mask.len(), false))),
        Interval::All | Interval::Range { lo: None, hi: None } => {
            select_fused::<T, _>(inner, col, Always, mask)
        }
        Interval::Eq(v) => select_fused::<T, _>(inner, col, EqTo { value: *v }, mask),
        Interval::Range {
            lo: Some((l, ls)),
            hi: Some((h, hs)),
        } => select_fused::<T, _>(
            inner,
            col,
            Between {
                lo: *l,
                lo_strict: *ls,
                hi: *h,
                hi_strict: *hs,
            },
            mask,
        ),
        Interval::Range {
            lo: Some((l, ls)),
            hi: None,
        } => select_fused::<T, _>(
            inner,
            col,
            Above {
                bound: *l,
                strict: *ls,
            },
            mask,
        ),
        Interval::Range {
            lo: None,
            hi: Some((h, hs)),
        } => select_fused::<T, _>(
            inner,
            col,
            Below {
                bound: *h,
                strict: *hs,
            },
            mask,
        ),
    }
}

/// One pass producing both the packed values and the hit rows.
fn select_fused<T: Scalar, P: ValueTest<T>>(
    inner: &PartitionInner,
    col: &Column,
    test: P,
    mask: &Bitvector,
) -> crate::Result<(Vec<f64>, Bitvector)> {
    let bytes = column_bytes::<T>(inner, col, mask.len())?;

    let (values, hits) =
        scan::scan_values_and_bits(&RawValues::<T>::new(&bytes), test, mask)?;

    Ok((values.into_iter().map(Scalar::to_f64).collect(), hits))
}

/// Gathers the values at already-decided hit rows.
fn materialize_rows(
    inner: &PartitionInner,
    col: &Column,
    hits: &Bitvector,
) -> crate::Result<Vec<f64>> {
    dispatch_scalar!(
        col.kind(),
        T => {
            let bytes = column_bytes::<T>(inner, col, hits.len())?;
            let values = scan::scan_values(&RawValues::<T>::new(&bytes), Always, hits)?;
            Ok(values.into_iter().map(Scalar::to_f64).collect())
        },
        Err(unsupported(col)),
    )
}

/// Whole-column bytes sized to exactly `nrows` elements (short files are
/// zero-padded, long files truncated).
fn column_bytes<T: Scalar>(
    inner: &PartitionInner,
    col: &Column,
    nrows: usize,
) -> crate::Result<Vec<u8>> {
    let path = col.value_path(&inner.active_dir);

    let mut bytes = match inner.fm.fetch_array(&path, inner.access) {
        Ok(Some(view)) => view.to_vec(),
        Ok(None) | Err(_) => {
            let raw = std::fs::read(&path)?;
            inner.fm.record_read(raw.len() as u64);
            raw
        }
    };

    let want = nrows * T::SIZE;
    if bytes.len() < want {
        log::warn!(
            "value file {path:?} holds {} elements, expected {nrows}; padding",
            bytes.len() / T::SIZE,
        );
    }
    bytes.resize(want, 0);

    Ok(bytes)
}

/// Row-wise scan over a TEXT column through its `.sp` offset file.
fn scan_text(
    inner: &PartitionInner,
    col: &Column,
    nrows: usize,
    mask: &Bitvector,
    matcher: &dyn Fn(&[u8]) -> bool,
) -> crate::Result<Bitvector> {
    let offsets = read_offsets(&col.offsets_path(&inner.active_dir), nrows)?;
    let payload = std::fs::read(col.payload_path(&inner.active_dir))?;
    inner.fm.record_read(payload.len() as u64);

    let mut hits = crate::bitvector::HitBuilder::for_density(mask.len(), mask.count_ones());

    for row in mask.ones() {
        let Some((&start, &end)) = offsets.get(row).zip(offsets.get(row + 1)) else {
            continue;
        };

        let Some(bytes) = payload.get(start as usize..end as usize) else {
            log::warn!("offset entry {row} points past the payload file");
            continue;
        };

        if matcher(bytes) {
            hits.set(row);
        }
    }

    Ok(hits.finalize())
}

fn read_offsets(path: &Path, nrows: usize) -> crate::Result<Vec<u64>> {
    let bytes = std::fs::read(path)?;
    let mut reader = &bytes[..];

    let mut offsets = Vec::with_capacity(nrows + 1);
    while let Ok(off) = reader.read_u64::<LittleEndian>() {
        offsets.push(off);
    }

    if offsets.len() != nrows + 1 {
        log::warn!(
            "offset file {path:?} holds {} entries, expected {}",
            offsets.len(),
            nrows + 1,
        );
    }

    Ok(offsets)
}

/// Meta tags answer string predicates as single-value CATEGORY columns:
/// all active rows match or none do.
fn eval_meta_tag(data: &PartData, pred: &Predicate) -> crate::Result<Bitvector> {
    let name = pred.column();

    let Some(tag) = data.meta_tags.iter().find(|t| t.name == name) else {
        return Err(Error::UnknownColumn(name.to_owned()));
    };

    let matched = match pred {
        Predicate::StringEq { value, .. } => tag.value == *value,
        Predicate::StringIn { values, .. } => values.iter().any(|v| tag.value == *v),
        Predicate::Like { pattern, .. } => like_match(pattern, &tag.value),
        Predicate::Keyword { word, .. } => keywords(&tag.value).any(|k| k == word),
        Predicate::AllKeywords { words, .. } => {
            words.iter().all(|w| keywords(&tag.value).any(|k| k == w))
        }
        _ => {
            return Err(Error::UnknownColumn(name.to_owned()));
        }
    };

    Ok(if matched {
        data.mask.clone()
    } else {
        Bitvector::with_len(data.nrows, false)
    })
}

/// Reads an entire numeric column as `f64` (index build, bounds, cursors).
pub(crate) fn read_column_f64(
    inner: &PartitionInner,
    col: &Column,
    nrows: usize,
) -> crate::Result<Vec<f64>> {
    read_file_f64(col.kind(), &col.value_path(&inner.active_dir), nrows)
}

pub(crate) fn read_file_f64(
    kind: ColumnType,
    path: &Path,
    nrows: usize,
) -> crate::Result<Vec<f64>> {
    let bytes = std::fs::read(path)?;

    dispatch_scalar!(
        kind,
        T => {
            let raw = RawValues::<T>::new(&bytes);
            let avail = scan::ValueSource::<T>::len(&raw).min(nrows);

            let mut out = Vec::with_capacity(nrows);
            for i in 0..avail {
                if let Some(v) = scan::ValueSource::<T>::get(&raw, i) {
                    out.push(v.to_f64());
                }
            }

            if out.len() < nrows {
                log::warn!(
                    "value file {path:?} holds {} elements, expected {nrows}; padding with NaN",
                    out.len(),
                );
                out.resize(nrows, f64::NAN);
            }

            Ok(out)
        },
        Err(Error::UnsupportedType {
            column: path.display().to_string(),
            kind,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn widen_preserves_shape() {
        assert_eq!(Interval::<f64>::Empty, widen::<i32>(&Interval::Empty));
        assert_eq!(Interval::Eq(3.0), widen::<i32>(&Interval::Eq(3)));
        assert_eq!(
            Interval::Range {
                lo: Some((1.0, false)),
                hi: None
            },
            widen::<i32>(&Interval::Range {
                lo: Some((1, false)),
                hi: None
            }),
        );
    }
}
