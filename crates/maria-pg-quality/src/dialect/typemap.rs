//! Native type classification and cross-dialect type equivalence.
//!
//! Every supported native type is listed explicitly per dialect. Nothing is
//! inferred from numeric ranges: `tinyint(1)` is MariaDB's boolean idiom while
//! PostgreSQL has no `tinyint` at all, and only a table can express that.

use crate::core::schema::{ColumnInfo, TypeBucket};
use crate::error::{QualityError, Result};

use super::Dialect;

/// Native type name split into its parts.
///
/// `bigint(20) unsigned` parses to base `bigint`, args `[20]`, unsigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeType {
    /// Lowercase name without arguments or sign modifiers.
    pub base: String,
    /// Numbers found inside the parentheses.
    pub args: Vec<u32>,
    pub unsigned: bool,
}

impl NativeType {
    pub fn parse(native: &str) -> Self {
        let lower = native.trim().to_lowercase();
        let mut base = String::with_capacity(lower.len());
        let mut inner = String::new();
        let mut depth = 0usize;
        for c in lower.chars() {
            match c {
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                _ if depth > 0 => inner.push(c),
                _ => base.push(c),
            }
        }

        let mut unsigned = false;
        let words: Vec<&str> = base
            .split_whitespace()
            .filter(|w| match *w {
                "unsigned" => {
                    unsigned = true;
                    false
                }
                "signed" | "zerofill" => false,
                _ => true,
            })
            .collect();

        let args = inner
            .split(',')
            .filter_map(|a| a.trim().parse::<u32>().ok())
            .collect();

        Self {
            base: words.join(" "),
            args,
            unsigned,
        }
    }
}

/// Classification result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeInfo {
    pub bucket: TypeBucket,
    /// `Some(false)` when the type itself forbids NULL (serial types).
    pub nullable: Option<bool>,
    /// Character limit carried by the type name, if any.
    pub max_length: Option<u32>,
}

impl TypeInfo {
    fn of(bucket: TypeBucket) -> Self {
        Self {
            bucket,
            nullable: None,
            max_length: None,
        }
    }

    fn not_null(mut self) -> Self {
        self.nullable = Some(false);
        self
    }

    fn with_length(mut self, max_length: Option<u32>) -> Self {
        self.max_length = max_length;
        self
    }
}

/// Classify a native column type into its bucket.
pub fn classify(dialect: Dialect, native_type: &str) -> Result<TypeInfo> {
    let native = NativeType::parse(native_type);
    let info = match dialect {
        Dialect::MariaDb => classify_mariadb(&native),
        Dialect::Postgres => classify_postgres(&native),
    };
    info.ok_or_else(|| QualityError::UnsupportedType {
        dialect: dialect.name().to_string(),
        type_name: native_type.to_string(),
    })
}

fn classify_mariadb(native: &NativeType) -> Option<TypeInfo> {
    use TypeBucket::*;

    let first_arg = native.args.first().copied();
    let info = match native.base.as_str() {
        "tinyint" if first_arg == Some(1) => TypeInfo::of(Boolean),
        "bool" | "boolean" => TypeInfo::of(Boolean),

        "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "int1"
        | "int2" | "int3" | "int4" | "int8" => TypeInfo::of(Integer),
        "serial" => TypeInfo::of(Integer).not_null(),

        "decimal" | "dec" | "numeric" | "fixed" | "float" | "double" | "double precision"
        | "real" => TypeInfo::of(Decimal),

        "char" | "varchar" | "character" | "character varying" => {
            TypeInfo::of(Text).with_length(first_arg)
        }
        "tinytext" => TypeInfo::of(Text).with_length(Some(first_arg.unwrap_or(255))),
        "text" => TypeInfo::of(Text).with_length(Some(first_arg.unwrap_or(65_535))),
        "mediumtext" => TypeInfo::of(Text).with_length(Some(16_777_215)),
        "longtext" | "enum" | "set" => TypeInfo::of(Text),

        "date" | "datetime" | "timestamp" | "time" | "year" => TypeInfo::of(Date),

        _ => return None,
    };
    Some(info)
}

fn classify_postgres(native: &NativeType) -> Option<TypeInfo> {
    use TypeBucket::*;

    let first_arg = native.args.first().copied();
    let info = match native.base.as_str() {
        "boolean" | "bool" => TypeInfo::of(Boolean),

        "smallint" | "integer" | "int" | "bigint" | "int2" | "int4" | "int8" => {
            TypeInfo::of(Integer)
        }
        "smallserial" | "serial" | "bigserial" | "serial2" | "serial4" | "serial8" => {
            TypeInfo::of(Integer).not_null()
        }

        "numeric" | "decimal" | "real" | "double precision" | "float4" | "float8" => {
            TypeInfo::of(Decimal)
        }

        "character varying" | "varchar" | "character" | "char" | "bpchar" => {
            TypeInfo::of(Text).with_length(first_arg)
        }
        "\"char\"" => TypeInfo::of(Text).with_length(Some(1)),
        "name" => TypeInfo::of(Text).with_length(Some(63)),
        "text" | "citext" => TypeInfo::of(Text),

        "date" | "time" | "time without time zone" | "time with time zone" | "timetz"
        | "timestamp" | "timestamp without time zone" | "timestamp with time zone"
        | "timestamptz" => TypeInfo::of(Date),

        _ => return None,
    };
    Some(info)
}

/// Native type names that denote the same type in the other dialect.
const MARIADB_TO_POSTGRES: &[(&str, &str)] = &[
    ("tinyint", "smallint"),
    ("smallint", "smallint"),
    ("smallint unsigned", "integer"),
    ("mediumint", "integer"),
    ("mediumint unsigned", "integer"),
    ("int", "integer"),
    ("int unsigned", "bigint"),
    ("bigint", "bigint"),
    ("bigint unsigned", "numeric(20)"),
    ("serial", "bigserial"),
    ("tinyint(1)", "boolean"),
    ("decimal", "numeric"),
    ("double", "double precision"),
    ("float", "real"),
    ("char", "character"),
    ("varchar", "character varying"),
    ("tinytext", "text"),
    ("text", "text"),
    ("mediumtext", "text"),
    ("longtext", "text"),
    ("date", "date"),
    ("datetime", "timestamp"),
    ("time", "time"),
    ("timestamp", "timestamp"),
];

const POSTGRES_TO_MARIADB: &[(&str, &str)] = &[
    ("smallint", "smallint"),
    ("integer", "int"),
    ("bigint", "bigint"),
    ("smallserial", "serial"),
    ("serial", "serial"),
    ("bigserial", "serial"),
    ("boolean", "tinyint(1)"),
    ("double precision", "double"),
    ("numeric", "decimal"),
    ("real", "float"),
    ("\"char\"", "char"),
    ("character", "char"),
    ("character varying", "varchar"),
    ("date", "date"),
    ("time", "time"),
    ("timestamp", "timestamp"),
];

/// Normalized name used as the key of the equivalence tables.
pub fn equivalence_key(dialect: Dialect, native_type: &str) -> String {
    let native = NativeType::parse(native_type);
    match dialect {
        Dialect::MariaDb => {
            let base = match native.base.as_str() {
                "tinyint" if native.args.first() == Some(&1) => return "tinyint(1)".into(),
                "bool" | "boolean" => return "tinyint(1)".into(),
                "integer" | "int4" => "int",
                "int1" => "tinyint",
                "int2" => "smallint",
                "int3" => "mediumint",
                "int8" => "bigint",
                "dec" | "numeric" | "fixed" => "decimal",
                "double precision" | "real" => "double",
                other => other,
            };
            if native.unsigned {
                format!("{} unsigned", base)
            } else {
                base.to_string()
            }
        }
        Dialect::Postgres => {
            let base = match native.base.as_str() {
                "int" | "int4" => "integer",
                "int2" => "smallint",
                "int8" => "bigint",
                "serial4" => "serial",
                "serial2" => "smallserial",
                "serial8" => "bigserial",
                "bool" => "boolean",
                "float4" => "real",
                "float8" => "double precision",
                "decimal" => "numeric",
                "varchar" => "character varying",
                "char" | "bpchar" => "character",
                "time without time zone" => "time",
                "timestamp without time zone" => "timestamp",
                other => other,
            };
            if base == "numeric" && native.args.len() == 1 {
                format!("numeric({})", native.args[0])
            } else {
                base.to_string()
            }
        }
    }
}

/// Equivalent native type in `to` for a native type of `from`.
pub fn translate_type(from: Dialect, to: Dialect, native_type: &str) -> Option<String> {
    let key = equivalence_key(from, native_type);
    if from == to {
        return Some(key);
    }
    let table = match from {
        Dialect::MariaDb => MARIADB_TO_POSTGRES,
        Dialect::Postgres => POSTGRES_TO_MARIADB,
    };
    table
        .iter()
        .find(|(source, _)| *source == key)
        .map(|(_, target)| target.to_string())
}

/// Value domain of a column, used to decide whether one type contains another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeProfile {
    Integer { bits: u8, unsigned: bool },
    Float { bits: u8 },
    Fixed { precision: Option<u32>, scale: u32 },
    Text { max_length: Option<u32>, fixed: bool },
    Boolean,
    Temporal(TemporalKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalKind {
    Date,
    Time,
    DateTime,
    Year,
}

impl TypeProfile {
    pub fn of(dialect: Dialect, column: &ColumnInfo) -> Self {
        let native = NativeType::parse(&column.native_type);
        let base = native.base.as_str();
        match column.bucket {
            TypeBucket::Boolean => TypeProfile::Boolean,
            TypeBucket::Integer => {
                let (bits, unsigned) = match base {
                    "tinyint" | "int1" => (8, native.unsigned),
                    "smallint" | "int2" | "smallserial" | "serial2" => (16, native.unsigned),
                    "mediumint" | "int3" => (24, native.unsigned),
                    "bigint" | "int8" | "bigserial" | "serial8" => (64, native.unsigned),
                    // MariaDB's serial is bigint unsigned
                    "serial" if dialect == Dialect::MariaDb => (64, true),
                    _ => (32, native.unsigned),
                };
                TypeProfile::Integer { bits, unsigned }
            }
            TypeBucket::Decimal => match base {
                "float" | "real" | "float4" => TypeProfile::Float { bits: 32 },
                "double" | "double precision" | "float8" => TypeProfile::Float { bits: 64 },
                _ => TypeProfile::Fixed {
                    precision: column.precision.or(native.args.first().copied()),
                    scale: column
                        .scale
                        .or(native.args.get(1).copied())
                        .unwrap_or(0),
                },
            },
            TypeBucket::Text => TypeProfile::Text {
                max_length: column.max_length.or(native.args.first().copied()),
                fixed: matches!(base, "char" | "character" | "bpchar" | "\"char\""),
            },
            TypeBucket::Date => TypeProfile::Temporal(match base {
                "date" => TemporalKind::Date,
                "year" => TemporalKind::Year,
                "time" | "time without time zone" | "time with time zone" | "timetz" => {
                    TemporalKind::Time
                }
                _ => TemporalKind::DateTime,
            }),
        }
    }

    /// Whether every value of `other` is representable in `self`, and
    /// `self` is strictly larger.
    pub fn is_strict_superset_of(&self, other: &TypeProfile) -> bool {
        use TypeProfile::*;
        match (self, other) {
            (
                Integer { bits: a, unsigned: ua },
                Integer { bits: b, unsigned: ub },
            ) => a > b && (!ua || *ub),
            (Float { bits: a }, Float { bits: b }) => a > b,
            (
                Fixed { precision: pa, scale: sa },
                Fixed { precision: pb, scale: sb },
            ) => match (pa, pb) {
                (None, Some(_)) => true,
                (Some(pa), Some(pb)) => {
                    let whole_a = pa.saturating_sub(*sa);
                    let whole_b = pb.saturating_sub(*sb);
                    whole_a >= whole_b && sa >= sb && (pa, sa) != (pb, sb)
                }
                _ => false,
            },
            (Text { max_length: la, .. }, Text { max_length: lb, .. }) => match (la, lb) {
                (None, Some(_)) => true,
                (Some(a), Some(b)) => a > b,
                _ => false,
            },
            (Temporal(TemporalKind::DateTime), Temporal(TemporalKind::Date)) => true,
            _ => false,
        }
    }
}
