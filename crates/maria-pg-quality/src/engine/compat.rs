//! Column-pair compatibility between two tables.
//!
//! Every column of the first table is compared with every column of the
//! second. The codes keep the numbering operators already know:
//!
//! | code | meaning |
//! |------|---------|
//! | 0 | incompatible |
//! | 1 | fully compatible, same bucket and equivalent native type |
//! | 2 | ambiguous, joinable only through the textual form |
//! | 5 | same family, a cast is needed and may lose values |
//! | 6 | one side's domain strictly contains the other's |
//!
//! The matrix is rebuilt for every request.

use serde::Serialize;

use crate::core::schema::{ColumnInfo, TableSchema};
use crate::dialect::typemap::{equivalence_key, translate_type, TypeProfile};
use crate::dialect::Dialect;

use super::join::CastDirection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompatibilityCode {
    Incompatible,
    FullyCompatible,
    Ambiguous,
    AmbiguousNeedsCast,
    DefiniteCast,
}

impl CompatibilityCode {
    pub fn code(&self) -> u8 {
        match self {
            CompatibilityCode::Incompatible => 0,
            CompatibilityCode::FullyCompatible => 1,
            CompatibilityCode::Ambiguous => 2,
            CompatibilityCode::AmbiguousNeedsCast => 5,
            CompatibilityCode::DefiniteCast => 6,
        }
    }

    /// Preference when offering join candidates, lower is better.
    fn rank(&self) -> u8 {
        match self {
            CompatibilityCode::FullyCompatible => 0,
            CompatibilityCode::DefiniteCast => 1,
            CompatibilityCode::AmbiguousNeedsCast => 2,
            CompatibilityCode::Ambiguous => 3,
            CompatibilityCode::Incompatible => 4,
        }
    }
}

/// Classification of one column pair plus the cast direction to offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompatibilityCell {
    pub code: CompatibilityCode,
    pub cast: CastDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompatibilityMatrix {
    /// Column names of the first table.
    pub rows: Vec<String>,
    /// Column names of the second table.
    pub columns: Vec<String>,
    /// `cells[i][j]` compares `rows[i]` with `columns[j]`.
    pub cells: Vec<Vec<CompatibilityCell>>,
}

impl CompatibilityMatrix {
    pub fn get(&self, first: &str, second: &str) -> Option<CompatibilityCell> {
        let i = self.rows.iter().position(|r| r == first)?;
        let j = self.columns.iter().position(|c| c == second)?;
        Some(self.cells[i][j])
    }

    /// Joinable pairs, best first; ties keep table order.
    pub fn join_candidates(&self) -> Vec<(&str, &str, CompatibilityCell)> {
        let mut candidates: Vec<_> = self
            .rows
            .iter()
            .enumerate()
            .flat_map(|(i, row)| {
                self.columns.iter().enumerate().map(move |(j, column)| {
                    (row.as_str(), column.as_str(), self.cells[i][j])
                })
            })
            .filter(|(_, _, cell)| cell.code != CompatibilityCode::Incompatible)
            .collect();
        candidates.sort_by_key(|(_, _, cell)| cell.code.rank());
        candidates
    }
}

pub fn build_matrix(first: &TableSchema, second: &TableSchema) -> CompatibilityMatrix {
    let cells = first
        .columns()
        .iter()
        .map(|a| {
            second
                .columns()
                .iter()
                .map(|b| classify_pair(first.dialect, a, second.dialect, b))
                .collect()
        })
        .collect();
    CompatibilityMatrix {
        rows: first.column_names().iter().map(|s| s.to_string()).collect(),
        columns: second.column_names().iter().map(|s| s.to_string()).collect(),
        cells,
    }
}

/// Compare one column of each table.
pub fn classify_pair(
    first_dialect: Dialect,
    first: &ColumnInfo,
    second_dialect: Dialect,
    second: &ColumnInfo,
) -> CompatibilityCell {
    let cell = |code, cast| CompatibilityCell { code, cast };

    if first.bucket == second.bucket {
        let p1 = TypeProfile::of(first_dialect, first);
        let p2 = TypeProfile::of(second_dialect, second);
        let equivalent = translate_type(first_dialect, second_dialect, &first.native_type)
            == Some(equivalence_key(second_dialect, &second.native_type));
        return if p1 == p2 && equivalent {
            cell(CompatibilityCode::FullyCompatible, CastDirection::Auto)
        } else if p1.is_strict_superset_of(&p2) {
            cell(CompatibilityCode::DefiniteCast, CastDirection::ToFirst)
        } else if p2.is_strict_superset_of(&p1) {
            cell(CompatibilityCode::DefiniteCast, CastDirection::ToSecond)
        } else {
            cell(CompatibilityCode::AmbiguousNeedsCast, CastDirection::Auto)
        };
    }

    if first.bucket.is_text() {
        cell(CompatibilityCode::Ambiguous, CastDirection::ToFirst)
    } else if second.bucket.is_text() {
        cell(CompatibilityCode::Ambiguous, CastDirection::ToSecond)
    } else if first.bucket.is_numeric_family() && second.bucket.is_numeric_family() {
        cell(CompatibilityCode::AmbiguousNeedsCast, CastDirection::Auto)
    } else {
        cell(CompatibilityCode::Incompatible, CastDirection::Auto)
    }
}
