// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Query predicates and the numeric-bound coercion rules.
//!
//! A continuous range arrives as `lb lop X rop rb`, each side carrying an
//! independent operator that may be undefined. Before evaluation the range
//! is *normalized* against the column's element type: floating-point bounds
//! over integer columns are tightened in the direction of the truncation
//! error, bounds outside the representable range are clamped, and
//! unsatisfiable combinations collapse to the empty interval up front.

/// Comparison operator of one range side
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum RangeOp {
    /// Side is absent
    #[default]
    Undefined,

    /// Strictly less than
    Lt,

    /// Less than or equal
    Le,

    /// Strictly greater than
    Gt,

    /// Greater than or equal
    Ge,

    /// Equal
    Eq,
}

/// A continuous range over one column: `lb lop X rop rb`
#[derive(Clone, Debug, PartialEq)]
pub struct RangePredicate {
    /// Column the range applies to
    pub column: String,

    /// Left bound
    pub lo_bound: f64,

    /// Operator between left bound and column value
    pub lo_op: RangeOp,

    /// Right bound
    pub hi_bound: f64,

    /// Operator between column value and right bound
    pub hi_op: RangeOp,
}

/// Builder for range predicates, started via [`Predicate::range`]
#[derive(Clone, Debug)]
pub struct RangeBuilder {
    column: String,
}

impl RangeBuilder {
    /// `X < bound`
    #[must_use]
    pub fn less_than(self, bound: f64) -> Predicate {
        self.one_sided(RangeOp::Lt, bound)
    }

    /// `X <= bound`
    #[must_use]
    pub fn at_most(self, bound: f64) -> Predicate {
        self.one_sided(RangeOp::Le, bound)
    }

    /// `X > bound`
    #[must_use]
    pub fn greater_than(self, bound: f64) -> Predicate {
        self.one_sided(RangeOp::Gt, bound)
    }

    /// `X >= bound`
    #[must_use]
    pub fn at_least(self, bound: f64) -> Predicate {
        self.one_sided(RangeOp::Ge, bound)
    }

    /// `X == value`
    #[must_use]
    pub fn equals(self, value: f64) -> Predicate {
        self.one_sided(RangeOp::Eq, value)
    }

    /// Inclusive two-sided range `lo <= X <= hi`
    #[must_use]
    pub fn between(self, lo: f64, hi: f64) -> Predicate {
        self.two_sided(lo, RangeOp::Le, RangeOp::Le, hi)
    }

    /// Fully explicit two-sided range `lo lop X rop hi`
    #[must_use]
    pub fn bounds(self, lo: f64, lo_op: RangeOp, hi_op: RangeOp, hi: f64) -> Predicate {
        self.two_sided(lo, lo_op, hi_op, hi)
    }

    fn one_sided(self, op: RangeOp, bound: f64) -> Predicate {
        Predicate::Range(RangePredicate {
            column: self.column,
            lo_bound: 0.0,
            lo_op: RangeOp::Undefined,
            hi_bound: bound,
            hi_op: op,
        })
    }

    fn two_sided(self, lo: f64, lo_op: RangeOp, hi_op: RangeOp, hi: f64) -> Predicate {
        Predicate::Range(RangePredicate {
            column: self.column,
            lo_bound: lo,
            lo_op,
            hi_bound: hi,
            hi_op,
        })
    }
}

/// A predicate bound to a column name
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    /// Continuous range with up to two bounds
    Range(RangePredicate),

    /// Discrete membership over floating-point values (`IN`)
    DiscreteSet {
        /// Column name
        column: String,

        /// Accepted values
        values: Vec<f64>,
    },

    /// Signed 64-bit integer membership
    IntSet {
        /// Column name
        column: String,

        /// Accepted values
        values: Vec<i64>,
    },

    /// Unsigned 64-bit integer membership
    UIntSet {
        /// Column name
        column: String,

        /// Accepted values
        values: Vec<u64>,
    },

    /// String equality (CATEGORY/TEXT, or a meta tag)
    StringEq {
        /// Column name
        column: String,

        /// Expected value
        value: String,
    },

    /// Multi-string membership
    StringIn {
        /// Column name
        column: String,

        /// Accepted values
        values: Vec<String>,
    },

    /// `LIKE` pattern with `%` and `_` wildcards
    Like {
        /// Column name
        column: String,

        /// Pattern
        pattern: String,
    },

    /// Single keyword containment in a TEXT column
    Keyword {
        /// Column name
        column: String,

        /// Keyword
        word: String,
    },

    /// All-keywords containment in a TEXT column
    AllKeywords {
        /// Column name
        column: String,

        /// Keywords, all of which must be present
        words: Vec<String>,
    },
}

impl Predicate {
    /// Starts a continuous range over `column`.
    #[must_use]
    pub fn range(column: impl Into<String>) -> RangeBuilder {
        RangeBuilder {
            column: column.into(),
        }
    }

    /// Discrete membership over `column`.
    #[must_use]
    pub fn is_in(column: impl Into<String>, values: impl Into<Vec<f64>>) -> Self {
        Self::DiscreteSet {
            column: column.into(),
            values: values.into(),
        }
    }

    /// String equality over `column`.
    #[must_use]
    pub fn string_eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self::StringEq {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Name of the column this predicate is bound to.
    #[must_use]
    pub fn column(&self) -> &str {
        match self {
            Self::Range(r) => &r.column,
            Self::DiscreteSet { column, .. }
            | Self::IntSet { column, .. }
            | Self::UIntSet { column, .. }
            | Self::StringEq { column, .. }
            | Self::StringIn { column, .. }
            | Self::Like { column, .. }
            | Self::Keyword { column, .. }
            | Self::AllKeywords { column, .. } => column,
        }
    }
}

/// Normalized interval in the column's comparison domain
///
/// Integer columns normalize to inclusive bounds; float columns keep the
/// original strictness and compare in `f64`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Interval<T> {
    /// No row can match
    Empty,

    /// Every row matches
    All,

    /// Exact equality
    Eq(T),

    /// Bounds; `(bound, strict)` per side, either side optional
    Range {
        lo: Option<(T, bool)>,
        hi: Option<(T, bool)>,
    },
}

/// Per-side constraints extracted from the raw operator pair
struct SideConstraints {
    lower: Option<(f64, bool)>,
    upper: Option<(f64, bool)>,
    eq: Option<f64>,
    empty: bool,
}

fn extract_sides(range: &RangePredicate) -> SideConstraints {
    let mut c = SideConstraints {
        lower: None,
        upper: None,
        eq: None,
        empty: false,
    };

    let add_lower = |c: &mut SideConstraints, b: f64, strict: bool| match c.lower {
        Some((prev, prev_strict)) if b > prev || (b == prev && strict && !prev_strict) => {
            c.lower = Some((b, strict));
        }
        Some(_) => {}
        None => c.lower = Some((b, strict)),
    };

    let add_upper = |c: &mut SideConstraints, b: f64, strict: bool| match c.upper {
        Some((prev, prev_strict)) if b < prev || (b == prev && strict && !prev_strict) => {
            c.upper = Some((b, strict));
        }
        Some(_) => {}
        None => c.upper = Some((b, strict)),
    };

    // left side: `lo_bound OP x`
    match range.lo_op {
        RangeOp::Undefined => {}
        RangeOp::Lt => add_lower(&mut c, range.lo_bound, true),
        RangeOp::Le => add_lower(&mut c, range.lo_bound, false),
        RangeOp::Gt => add_upper(&mut c, range.lo_bound, true),
        RangeOp::Ge => add_upper(&mut c, range.lo_bound, false),
        RangeOp::Eq => c.eq = Some(range.lo_bound),
    }

    // right side: `x OP hi_bound`
    match range.hi_op {
        RangeOp::Undefined => {}
        RangeOp::Lt => add_upper(&mut c, range.hi_bound, true),
        RangeOp::Le => add_upper(&mut c, range.hi_bound, false),
        RangeOp::Gt => add_lower(&mut c, range.hi_bound, true),
        RangeOp::Ge => add_lower(&mut c, range.hi_bound, false),
        RangeOp::Eq => match c.eq {
            Some(prev) if prev.to_bits() != range.hi_bound.to_bits() => c.empty = true,
            _ => c.eq = Some(range.hi_bound),
        },
    }

    // NaN bounds never match anything
    if range.lo_op != RangeOp::Undefined && range.lo_bound.is_nan()
        || range.hi_op != RangeOp::Undefined && range.hi_bound.is_nan()
    {
        c.empty = true;
    }

    c
}

fn satisfies(v: f64, lower: Option<(f64, bool)>, upper: Option<(f64, bool)>) -> bool {
    let lo_ok = lower.is_none_or(|(b, strict)| if strict { v > b } else { v >= b });
    let hi_ok = upper.is_none_or(|(b, strict)| if strict { v < b } else { v <= b });
    lo_ok && hi_ok
}

/// Integer element type, as seen by normalization
pub(crate) trait IntBounds: Copy {
    const MIN_F: f64;
    const MAX_F: f64;

    fn from_f64(v: f64) -> Self;
}

macro_rules! impl_int_bounds {
    ($($t:ty),+) => {
        $(impl IntBounds for $t {
            const MIN_F: f64 = <$t>::MIN as f64;
            const MAX_F: f64 = <$t>::MAX as f64;

            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            fn from_f64(v: f64) -> Self {
                v as $t
            }
        })+
    };
}

impl_int_bounds!(i8, u8, i16, u16, i32, u32, i64, u64);

/// Normalizes a range against an integer column type.
///
/// Tightening direction follows the sign of the truncation error, bounds
/// outside the representable range clamp, and equality against a
/// non-representable value decides to empty.
pub(crate) fn normalize_int<T: IntBounds + PartialOrd>(range: &RangePredicate) -> Interval<T> {
    let c = extract_sides(range);

    if c.empty {
        return Interval::Empty;
    }

    if let Some(v) = c.eq {
        if !satisfies(v, c.lower, c.upper) {
            return Interval::Empty;
        }

        // not representable in T
        if v.trunc() != v || v < T::MIN_F || v > T::MAX_F {
            return Interval::Empty;
        }

        return Interval::Eq(T::from_f64(v));
    }

    let lo = match c.lower {
        None => None,
        Some((b, strict)) => {
            let eff = if strict { b.floor() + 1.0 } else { b.ceil() };

            if eff > T::MAX_F {
                return Interval::Empty;
            }

            if eff <= T::MIN_F {
                None
            } else {
                Some((T::from_f64(eff), false))
            }
        }
    };

    let hi = match c.upper {
        None => None,
        Some((b, strict)) => {
            let eff = if strict { b.ceil() - 1.0 } else { b.floor() };

            if eff < T::MIN_F {
                return Interval::Empty;
            }

            if eff >= T::MAX_F {
                None
            } else {
                Some((T::from_f64(eff), false))
            }
        }
    };

    match (lo, hi) {
        (None, None) => Interval::All,
        (Some((l, _)), Some((h, _))) if l > h => Interval::Empty,
        (Some((l, _)), Some((h, _))) if l == h => Interval::Eq(l),
        _ => Interval::Range { lo, hi },
    }
}

/// Normalizes a range against a float column; comparison happens in `f64`.
pub(crate) fn normalize_float(range: &RangePredicate, single_precision: bool) -> Interval<f64> {
    let c = extract_sides(range);

    if c.empty {
        return Interval::Empty;
    }

    if let Some(v) = c.eq {
        if !satisfies(v, c.lower, c.upper) {
            return Interval::Empty;
        }

        // a value that does not survive the f32 roundtrip cannot equal any
        // stored single-precision element
        #[allow(clippy::cast_possible_truncation)]
        if single_precision && f64::from(v as f32) != v {
            return Interval::Empty;
        }

        return Interval::Eq(v);
    }

    match (c.lower, c.upper) {
        (None, None) => Interval::All,
        (Some((l, ls)), Some((h, hs))) if l > h || (l == h && (ls || hs)) => Interval::Empty,
        (Some((l, false)), Some((h, false))) if l == h => Interval::Eq(l),
        (lo, hi) => Interval::Range { lo, hi },
    }
}

/// Simple `LIKE` matcher supporting `%` (any run) and `_` (any one char).
pub(crate) fn like_match(pattern: &str, text: &str) -> bool {
    fn rec(p: &[char], t: &[char]) -> bool {
        match p.split_first() {
            None => t.is_empty(),
            Some(('%', rest)) => (0..=t.len()).any(|i| rec(rest, t.get(i..).unwrap_or_default())),
            Some(('_', rest)) => !t.is_empty() && rec(rest, t.get(1..).unwrap_or_default()),
            Some((c, rest)) => t.first() == Some(c) && rec(rest, t.get(1..).unwrap_or_default()),
        }
    }

    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    rec(&p, &t)
}

/// Splits text into keyword tokens (maximal alphanumeric/underscore runs).
pub(crate) fn keywords(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
}
