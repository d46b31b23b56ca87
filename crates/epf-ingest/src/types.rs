//! Column type descriptors
//!
//! The `dbTypes` header line carries one descriptor per column, either a bare
//! name (`TEXT`) or a name with an argument (`VARCHAR(255)`). Descriptors are
//! resolved against a fixed table of base types and rendered as Postgres DDL.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static PARAMETERIZED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)\((.+)\)$").expect("descriptor pattern is valid"));

/// Database column types understood by the importer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseType {
    Varchar,
    Char,
    Text,
    Integer,
    BigInt,
    SmallInt,
    Real,
    Double,
    Numeric,
    Boolean,
    Date,
    Timestamp,
    Time,
    Binary,
}

impl BaseType {
    /// Resolve a descriptor name, ignoring case
    pub fn from_name(name: &str) -> Option<Self> {
        let base = match name.trim().to_ascii_uppercase().as_str() {
            "VARCHAR" | "STRING" | "NVARCHAR" | "UNICODE" => BaseType::Varchar,
            "CHAR" | "NCHAR" => BaseType::Char,
            "TEXT" | "CLOB" | "UNICODETEXT" | "LONGTEXT" | "MEDIUMTEXT" | "TINYTEXT" => {
                BaseType::Text
            },
            "INT" | "INTEGER" => BaseType::Integer,
            "BIGINT" | "BIGINTEGER" => BaseType::BigInt,
            "SMALLINT" | "SMALLINTEGER" | "TINYINT" => BaseType::SmallInt,
            "REAL" => BaseType::Real,
            "FLOAT" | "DOUBLE" | "DOUBLE_PRECISION" => BaseType::Double,
            "NUMERIC" | "DECIMAL" => BaseType::Numeric,
            "BOOLEAN" | "BOOL" => BaseType::Boolean,
            "DATE" => BaseType::Date,
            "DATETIME" | "TIMESTAMP" => BaseType::Timestamp,
            "TIME" => BaseType::Time,
            "BLOB" | "BINARY" | "VARBINARY" | "LARGEBINARY" => BaseType::Binary,
            _ => return None,
        };
        Some(base)
    }

    /// Postgres spelling of the type
    pub fn sql_name(&self) -> &'static str {
        match self {
            BaseType::Varchar => "VARCHAR",
            BaseType::Char => "CHAR",
            BaseType::Text => "TEXT",
            BaseType::Integer => "INTEGER",
            BaseType::BigInt => "BIGINT",
            BaseType::SmallInt => "SMALLINT",
            BaseType::Real => "REAL",
            BaseType::Double => "DOUBLE PRECISION",
            BaseType::Numeric => "NUMERIC",
            BaseType::Boolean => "BOOLEAN",
            BaseType::Date => "DATE",
            BaseType::Timestamp => "TIMESTAMP",
            BaseType::Time => "TIME",
            BaseType::Binary => "BYTEA",
        }
    }

    /// Whether Postgres accepts a length/precision argument for this type
    fn accepts_param(&self) -> bool {
        matches!(
            self,
            BaseType::Varchar
                | BaseType::Char
                | BaseType::Numeric
                | BaseType::Timestamp
                | BaseType::Time
        )
    }
}

/// Argument of a parameterized descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeParam {
    /// Purely numeric argument, e.g. the `255` of `VARCHAR(255)`
    Int(u32),
    /// Anything else, kept verbatim, e.g. the `10,2` of `DECIMAL(10,2)`
    Raw(String),
}

impl TypeParam {
    fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.parse::<u32>() {
            Ok(n) if raw.chars().all(|c| c.is_ascii_digit()) => TypeParam::Int(n),
            _ => TypeParam::Raw(raw.to_string()),
        }
    }

    /// Raw arguments are only rendered when they are a comma list of integers
    fn render(&self) -> Option<String> {
        match self {
            TypeParam::Int(n) => Some(n.to_string()),
            TypeParam::Raw(raw) => {
                let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
                parts
                    .iter()
                    .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
                    .then(|| parts.join(","))
            },
        }
    }
}

impl fmt::Display for TypeParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeParam::Int(n) => write!(f, "{}", n),
            TypeParam::Raw(raw) => f.write_str(raw),
        }
    }
}

/// A resolved column type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnType {
    pub base: BaseType,
    pub param: Option<TypeParam>,
}

impl ColumnType {
    pub fn new(base: BaseType, param: Option<TypeParam>) -> Self {
        Self { base, param }
    }

    /// Resolve a raw descriptor, returning `None` for unknown type names
    pub fn parse(descriptor: &str) -> Option<Self> {
        let descriptor = descriptor.trim();
        match PARAMETERIZED.captures(descriptor) {
            Some(caps) => {
                let base = BaseType::from_name(&caps[1])?;
                Some(Self::new(base, Some(TypeParam::parse(&caps[2]))))
            },
            None => BaseType::from_name(descriptor).map(|base| Self::new(base, None)),
        }
    }

    /// DDL fragment for this column type
    ///
    /// Arguments on types that take none in Postgres (MySQL display widths
    /// such as `INT(11)`) are dropped.
    pub fn sql(&self) -> String {
        let rendered = self
            .param
            .as_ref()
            .filter(|_| self.base.accepts_param())
            .and_then(TypeParam::render);

        match rendered {
            Some(p) => format!("{}({})", self.base.sql_name(), p),
            None => self.base.sql_name().to_string(),
        }
    }

    /// Type a bound text value is cast to before it is stored
    ///
    /// Never carries a length or precision: the column's declared limits
    /// apply on assignment, so an over-long value is rejected instead of
    /// being truncated by the cast.
    pub fn cast_sql(&self) -> &'static str {
        match self.base {
            BaseType::Varchar | BaseType::Char | BaseType::Text => "TEXT",
            other => other.sql_name(),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql())
    }
}
