//! Tagged values and their transformations.
//!
//! [`Value`] is the payload type used for experiment conditions, simulation
//! results and observations. It is a closed set of variants; containers own
//! their children, so every value is a tree and `clone` is a deep copy.
//!
//! Three renderings are available:
//!
//! * [`Value::to_text`] - compact human readable form, also used by
//!   `Display`,
//! * [`Value::to_file`] - flat whitespace separated form for tabular output
//!   files,
//! * [`Value::to_xml`] - the form stored inside experiment files, parsed
//!   back by [`Value::from_xml`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde_repr::*;

use crate::error::{Error, Result};
use crate::xml::{self, Element};

const BOOLEAN_KIND_NAME: &str = "boolean";
const INTEGER_KIND_NAME: &str = "integer";
const DOUBLE_KIND_NAME: &str = "double";
const STRING_KIND_NAME: &str = "string";
const SET_KIND_NAME: &str = "set";
const MAP_KIND_NAME: &str = "map";
const TUPLE_KIND_NAME: &str = "tuple";
const TABLE_KIND_NAME: &str = "table";
const XML_KIND_NAME: &str = "xml";
const NULL_KIND_NAME: &str = "null";
const MATRIX_KIND_NAME: &str = "matrix";

/// Tag used for the entries of a map in the xml form.
const MAP_KEY_TAG: &str = "key";

/// Text used for the null value in text and file forms.
const NULL_TEXT: &str = "NA";

/// Defines all possible kinds of values.
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize_repr, Deserialize_repr,
)]
#[repr(u8)]
pub enum ValueKind {
    Boolean,
    Integer,
    Double,
    String,
    Set,
    Map,
    Tuple,
    Table,
    Xml,
    Null,
    Matrix,
}

/// List of all value kind names.
pub static VALUE_KINDS: &[&str; 11] = &[
    BOOLEAN_KIND_NAME,
    INTEGER_KIND_NAME,
    DOUBLE_KIND_NAME,
    STRING_KIND_NAME,
    SET_KIND_NAME,
    MAP_KIND_NAME,
    TUPLE_KIND_NAME,
    TABLE_KIND_NAME,
    XML_KIND_NAME,
    NULL_KIND_NAME,
    MATRIX_KIND_NAME,
];

impl ValueKind {
    /// Returns string literal name of the `ValueKind`.
    pub fn to_str(&self) -> &'static str {
        match self {
            ValueKind::Boolean => BOOLEAN_KIND_NAME,
            ValueKind::Integer => INTEGER_KIND_NAME,
            ValueKind::Double => DOUBLE_KIND_NAME,
            ValueKind::String => STRING_KIND_NAME,
            ValueKind::Set => SET_KIND_NAME,
            ValueKind::Map => MAP_KIND_NAME,
            ValueKind::Tuple => TUPLE_KIND_NAME,
            ValueKind::Table => TABLE_KIND_NAME,
            ValueKind::Xml => XML_KIND_NAME,
            ValueKind::Null => NULL_KIND_NAME,
            ValueKind::Matrix => MATRIX_KIND_NAME,
        }
    }
}

impl FromStr for ValueKind {
    type Err = Error;
    fn from_str(s: &str) -> Result<ValueKind> {
        let kind = match s {
            BOOLEAN_KIND_NAME | "bool" => ValueKind::Boolean,
            INTEGER_KIND_NAME | "int" => ValueKind::Integer,
            DOUBLE_KIND_NAME | "float" => ValueKind::Double,
            STRING_KIND_NAME | "str" => ValueKind::String,
            SET_KIND_NAME => ValueKind::Set,
            MAP_KIND_NAME => ValueKind::Map,
            TUPLE_KIND_NAME => ValueKind::Tuple,
            TABLE_KIND_NAME => ValueKind::Table,
            XML_KIND_NAME => ValueKind::Xml,
            NULL_KIND_NAME => ValueKind::Null,
            MATRIX_KIND_NAME => ValueKind::Matrix,
            _ => return Err(Error::InvalidValueKind(s.to_string())),
        };
        Ok(kind)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "{}", self.to_str())
    }
}

/// Number of cells of a `first` by `second` grid, failing when it doesn't
/// fit in memory addressing.
fn cell_count(kind: ValueKind, first: usize, second: usize) -> Result<usize> {
    first.checked_mul(second).ok_or_else(|| {
        Error::InvalidValue(format!(
            "{} of {}x{} is too large",
            kind, first, second
        ))
    })
}

/// Fixed size two-dimensional grid of doubles, stored row by row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTable")]
pub struct Table {
    width: usize,
    height: usize,
    cells: Vec<f64>,
}

/// Unchecked wire form of a [`Table`].
#[derive(Deserialize)]
struct RawTable {
    width: usize,
    height: usize,
    cells: Vec<f64>,
}

impl std::convert::TryFrom<RawTable> for Table {
    type Error = Error;
    fn try_from(raw: RawTable) -> Result<Table> {
        Table::from_cells(raw.width, raw.height, raw.cells)
    }
}

impl Table {
    /// Creates a zero-filled table.
    pub fn new(width: usize, height: usize) -> Result<Self> {
        let count = cell_count(ValueKind::Table, width, height)?;
        Ok(Self {
            width,
            height,
            cells: vec![0.; count],
        })
    }

    /// Creates a table from row-major cells. The number of cells has to
    /// match the dimensions.
    pub fn from_cells(width: usize, height: usize, cells: Vec<f64>) -> Result<Self> {
        let count = cell_count(ValueKind::Table, width, height)?;
        if cells.len() != count {
            return Err(Error::InvalidValue(format!(
                "table of {}x{} needs {} cells, got {}",
                width,
                height,
                count,
                cells.len()
            )));
        }
        Ok(Self {
            width,
            height,
            cells,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn cells(&self) -> &[f64] {
        &self.cells
    }

    pub fn get(&self, x: usize, y: usize) -> Option<f64> {
        if x < self.width && y < self.height {
            self.cells.get(y * self.width + x).copied()
        } else {
            None
        }
    }

    pub fn set(&mut self, x: usize, y: usize, value: f64) -> Result<()> {
        if x >= self.width || y >= self.height {
            return Err(Error::InvalidValue(format!(
                "cell ({}, {}) is outside of {}x{} table",
                x, y, self.width, self.height
            )));
        }
        match self.cells.get_mut(y * self.width + x) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(Error::InternalError("table cells out of sync".to_string())),
        }
    }

    /// Iterates over the rows of the table.
    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        // chunks panics on zero
        self.cells.chunks(self.width.max(1))
    }
}

/// Fixed size two-dimensional grid of values, stored row by row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMatrix")]
pub struct Matrix {
    columns: usize,
    rows: usize,
    cells: Vec<Value>,
}

/// Unchecked wire form of a [`Matrix`].
#[derive(Deserialize)]
struct RawMatrix {
    columns: usize,
    rows: usize,
    cells: Vec<Value>,
}

impl std::convert::TryFrom<RawMatrix> for Matrix {
    type Error = Error;
    fn try_from(raw: RawMatrix) -> Result<Matrix> {
        Matrix::from_cells(raw.columns, raw.rows, raw.cells)
    }
}

impl Matrix {
    /// Creates a matrix filled with null values.
    pub fn new(columns: usize, rows: usize) -> Result<Self> {
        let count = cell_count(ValueKind::Matrix, columns, rows)?;
        Ok(Self {
            columns,
            rows,
            cells: vec![Value::Null; count],
        })
    }

    pub fn from_cells(columns: usize, rows: usize, cells: Vec<Value>) -> Result<Self> {
        let count = cell_count(ValueKind::Matrix, columns, rows)?;
        if cells.len() != count {
            return Err(Error::InvalidValue(format!(
                "matrix of {}x{} needs {} cells, got {}",
                columns,
                rows,
                count,
                cells.len()
            )));
        }
        Ok(Self {
            columns,
            rows,
            cells,
        })
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cells(&self) -> &[Value] {
        &self.cells
    }

    pub fn get(&self, column: usize, row: usize) -> Option<&Value> {
        if column < self.columns && row < self.rows {
            self.cells.get(row * self.columns + column)
        } else {
            None
        }
    }

    pub fn set(&mut self, column: usize, row: usize, value: Value) -> Result<()> {
        if column >= self.columns || row >= self.rows {
            return Err(Error::InvalidValue(format!(
                "cell ({}, {}) is outside of {}x{} matrix",
                column, row, self.columns, self.rows
            )));
        }
        match self.cells.get_mut(row * self.columns + column) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(Error::InternalError("matrix cells out of sync".to_string())),
        }
    }

    fn row_iter(&self) -> impl Iterator<Item = &[Value]> {
        self.cells.chunks(self.columns.max(1))
    }
}

/// Abstraction over all available values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Set(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Tuple(Vec<f64>),
    Table(Table),
    /// Opaque markup, never interpreted.
    Xml(String),
    Null,
    Matrix(Matrix),
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Integer(_) => ValueKind::Integer,
            Value::Double(_) => ValueKind::Double,
            Value::String(_) => ValueKind::String,
            Value::Set(_) => ValueKind::Set,
            Value::Map(_) => ValueKind::Map,
            Value::Tuple(_) => ValueKind::Tuple,
            Value::Table(_) => ValueKind::Table,
            Value::Xml(_) => ValueKind::Xml,
            Value::Null => ValueKind::Null,
            Value::Matrix(_) => ValueKind::Matrix,
        }
    }

    /// Creates an empty map value.
    pub fn new_map() -> Self {
        Value::Map(BTreeMap::new())
    }

    /// Creates an empty set value.
    pub fn new_set() -> Self {
        Value::Set(Vec::new())
    }
}

/// Type-strict `is_kind` checkers.
impl Value {
    pub fn is_boolean(&self) -> bool {
        matches!(self, Value::Boolean(_))
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Value::Integer(_))
    }

    pub fn is_double(&self) -> bool {
        matches!(self, Value::Double(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    pub fn is_set(&self) -> bool {
        matches!(self, Value::Set(_))
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Value::Map(_))
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self, Value::Tuple(_))
    }

    pub fn is_table(&self) -> bool {
        matches!(self, Value::Table(_))
    }

    pub fn is_xml(&self) -> bool {
        matches!(self, Value::Xml(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_matrix(&self) -> bool {
        matches!(self, Value::Matrix(_))
    }
}

/// Type-strict `as_kind` getters.
impl Value {
    fn kind_error(&self, expected: ValueKind) -> Error {
        Error::InvalidValueKind(format!("expected {}, got {}", expected, self.kind()))
    }

    pub fn as_boolean(&self) -> Result<bool> {
        match self {
            Value::Boolean(v) => Ok(*v),
            _ => Err(self.kind_error(ValueKind::Boolean)),
        }
    }

    pub fn as_integer(&self) -> Result<i64> {
        match self {
            Value::Integer(v) => Ok(*v),
            _ => Err(self.kind_error(ValueKind::Integer)),
        }
    }

    pub fn as_double(&self) -> Result<f64> {
        match self {
            Value::Double(v) => Ok(*v),
            _ => Err(self.kind_error(ValueKind::Double)),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::String(v) => Ok(v),
            _ => Err(self.kind_error(ValueKind::String)),
        }
    }

    pub fn as_set(&self) -> Result<&Vec<Value>> {
        match self {
            Value::Set(v) => Ok(v),
            _ => Err(self.kind_error(ValueKind::Set)),
        }
    }

    pub fn as_set_mut(&mut self) -> Result<&mut Vec<Value>> {
        match self {
            Value::Set(v) => Ok(v),
            _ => Err(self.kind_error(ValueKind::Set)),
        }
    }

    pub fn as_map(&self) -> Result<&BTreeMap<String, Value>> {
        match self {
            Value::Map(v) => Ok(v),
            _ => Err(self.kind_error(ValueKind::Map)),
        }
    }

    pub fn as_map_mut(&mut self) -> Result<&mut BTreeMap<String, Value>> {
        match self {
            Value::Map(v) => Ok(v),
            _ => Err(self.kind_error(ValueKind::Map)),
        }
    }

    pub fn as_tuple(&self) -> Result<&Vec<f64>> {
        match self {
            Value::Tuple(v) => Ok(v),
            _ => Err(self.kind_error(ValueKind::Tuple)),
        }
    }

    pub fn as_table(&self) -> Result<&Table> {
        match self {
            Value::Table(v) => Ok(v),
            _ => Err(self.kind_error(ValueKind::Table)),
        }
    }

    pub fn as_xml(&self) -> Result<&str> {
        match self {
            Value::Xml(v) => Ok(v),
            _ => Err(self.kind_error(ValueKind::Xml)),
        }
    }

    pub fn as_matrix(&self) -> Result<&Matrix> {
        match self {
            Value::Matrix(v) => Ok(v),
            _ => Err(self.kind_error(ValueKind::Matrix)),
        }
    }
}

impl Value {
    /// Transforms the value into a compact human readable string.
    pub fn to_text(&self) -> String {
        match self {
            Value::Boolean(v) => v.to_string(),
            Value::Integer(v) => v.to_string(),
            Value::Double(v) => v.to_string(),
            Value::String(v) => v.clone(),
            Value::Set(v) => format!(
                "({})",
                v.iter().map(|i| i.to_text()).collect::<Vec<_>>().join(",")
            ),
            Value::Map(v) => format!(
                "({})",
                v.iter()
                    .map(|(key, value)| format!("({},{})", key, value.to_text()))
                    .collect::<Vec<_>>()
                    .join(",")
            ),
            Value::Tuple(v) => format!("({})", join_doubles(v, ",")),
            Value::Table(v) => format!(
                "({})",
                v.rows()
                    .map(|row| format!("({})", join_doubles(row, ",")))
                    .collect::<Vec<_>>()
                    .join(",")
            ),
            Value::Xml(v) => v.clone(),
            Value::Null => NULL_TEXT.to_string(),
            Value::Matrix(v) => format!(
                "({})",
                v.row_iter()
                    .map(|row| format!(
                        "({})",
                        row.iter().map(|c| c.to_text()).collect::<Vec<_>>().join(",")
                    ))
                    .collect::<Vec<_>>()
                    .join(",")
            ),
        }
    }

    /// Transforms the value into a flat string suited for text output files.
    pub fn to_file(&self) -> String {
        match self {
            Value::Set(v) => v.iter().map(|i| i.to_file()).collect::<Vec<_>>().join(" "),
            Value::Map(v) => v
                .iter()
                .map(|(key, value)| format!("{} {}", key, value.to_file()))
                .collect::<Vec<_>>()
                .join(" "),
            Value::Tuple(v) => join_doubles(v, " "),
            Value::Table(v) => v
                .rows()
                .map(|row| join_doubles(row, " "))
                .collect::<Vec<_>>()
                .join("\n"),
            Value::Matrix(v) => v
                .row_iter()
                .map(|row| row.iter().map(|c| c.to_file()).collect::<Vec<_>>().join(" "))
                .collect::<Vec<_>>()
                .join("\n"),
            _ => self.to_text(),
        }
    }

    /// Transforms the value into its xml representation.
    pub fn to_xml(&self) -> String {
        match self {
            Value::Boolean(v) => format!("<{0}>{1}</{0}>", BOOLEAN_KIND_NAME, v),
            Value::Integer(v) => format!("<{0}>{1}</{0}>", INTEGER_KIND_NAME, v),
            Value::Double(v) => format!("<{0}>{1}</{0}>", DOUBLE_KIND_NAME, v),
            Value::String(v) => format!("<{0}>{1}</{0}>", STRING_KIND_NAME, xml::escape(v)),
            Value::Set(v) => format!(
                "<{0}>{1}</{0}>",
                SET_KIND_NAME,
                v.iter().map(|i| i.to_xml()).collect::<String>()
            ),
            Value::Map(v) => format!(
                "<{0}>{1}</{0}>",
                MAP_KIND_NAME,
                v.iter()
                    .map(|(key, value)| format!(
                        "<{0} name=\"{1}\">{2}</{0}>",
                        MAP_KEY_TAG,
                        xml::escape(key),
                        value.to_xml()
                    ))
                    .collect::<String>()
            ),
            Value::Tuple(v) => format!("<{0}>{1}</{0}>", TUPLE_KIND_NAME, join_doubles(v, " ")),
            Value::Table(v) => format!(
                "<{0} width=\"{1}\" height=\"{2}\">{3}</{0}>",
                TABLE_KIND_NAME,
                v.width,
                v.height,
                join_doubles(&v.cells, " ")
            ),
            Value::Xml(v) => format!("<{0}>{1}</{0}>", XML_KIND_NAME, xml::cdata(v)),
            Value::Null => format!("<{} />", NULL_KIND_NAME),
            Value::Matrix(v) => format!(
                "<{0} columns=\"{1}\" rows=\"{2}\">{3}</{0}>",
                MATRIX_KIND_NAME,
                v.columns,
                v.rows,
                v.cells.iter().map(|c| c.to_xml()).collect::<String>()
            ),
        }
    }

    /// Parses a value from its xml representation.
    pub fn from_xml(text: &str) -> Result<Value> {
        let element = Element::parse(text)?;
        Value::from_element(&element)
    }

    /// Interprets an already parsed element as a value.
    pub fn from_element(element: &Element) -> Result<Value> {
        let kind = element.name.parse::<ValueKind>()?;
        let value = match kind {
            ValueKind::Boolean => Value::Boolean(element.text.trim().parse()?),
            ValueKind::Integer => Value::Integer(element.text.trim().parse()?),
            ValueKind::Double => Value::Double(element.text.trim().parse()?),
            ValueKind::String => Value::String(element.text.clone()),
            ValueKind::Set => Value::Set(
                element
                    .children
                    .iter()
                    .map(Value::from_element)
                    .collect::<Result<Vec<_>>>()?,
            ),
            ValueKind::Map => {
                let mut map = BTreeMap::new();
                for entry in &element.children {
                    entry.expect_name(MAP_KEY_TAG)?;
                    let key = entry.required_attr("name")?;
                    let value = match entry.children.as_slice() {
                        [single] => Value::from_element(single)?,
                        _ => {
                            return Err(Error::InvalidValue(format!(
                                "map key '{}' must hold exactly one value",
                                key
                            )))
                        }
                    };
                    map.insert(key.to_string(), value);
                }
                Value::Map(map)
            }
            ValueKind::Tuple => Value::Tuple(parse_doubles(&element.text)?),
            ValueKind::Table => {
                let width = element.required_attr("width")?.parse()?;
                let height = element.required_attr("height")?.parse()?;
                Value::Table(Table::from_cells(
                    width,
                    height,
                    parse_doubles(&element.text)?,
                )?)
            }
            ValueKind::Xml => Value::Xml(element.text.clone()),
            ValueKind::Null => Value::Null,
            ValueKind::Matrix => {
                let columns = element.required_attr("columns")?.parse()?;
                let rows = element.required_attr("rows")?.parse()?;
                let cells = element
                    .children
                    .iter()
                    .map(Value::from_element)
                    .collect::<Result<Vec<_>>>()?;
                Value::Matrix(Matrix::from_cells(columns, rows, cells)?)
            }
        };
        Ok(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_text())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Set(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

fn join_doubles(values: &[f64], separator: &str) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(separator)
}

fn parse_doubles(text: &str) -> Result<Vec<f64>> {
    text.split_whitespace()
        .map(|s| s.parse::<f64>().map_err(Error::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_values() -> Vec<Value> {
        let mut inner = BTreeMap::new();
        inner.insert("alpha".to_string(), Value::Integer(-3));
        inner.insert("beta".to_string(), Value::Tuple(vec![0.5, 1.5]));

        let mut outer = BTreeMap::new();
        outer.insert("nested".to_string(), Value::Map(inner));
        outer.insert(
            "list".to_string(),
            Value::Set(vec![Value::Null, Value::from("x < y"), Value::from(true)]),
        );

        vec![
            Value::Boolean(false),
            Value::Integer(42),
            Value::Double(2.25),
            Value::from("plain text"),
            Value::Set(vec![Value::Integer(1), Value::Set(vec![Value::Double(0.1)])]),
            Value::Map(outer),
            Value::Tuple(vec![1., 2., 3.]),
            Value::Table(Table::from_cells(2, 2, vec![1., 2., 3., 4.]).unwrap()),
            Value::Xml("<model><port/></model>".to_string()),
            Value::Null,
            Value::Matrix(
                Matrix::from_cells(
                    2,
                    1,
                    vec![Value::Integer(7), Value::Set(vec![Value::from("m")])],
                )
                .unwrap(),
            ),
        ]
    }

    #[test]
    fn every_value_reports_its_kind() {
        let kinds = sample_values()
            .iter()
            .map(|v| v.kind().to_str())
            .collect::<Vec<_>>();
        assert_eq!(kinds.as_slice(), &VALUE_KINDS[..]);
    }

    #[test]
    fn clone_renders_identically() {
        for value in sample_values() {
            let copy = value.clone();
            assert_eq!(copy.to_text(), value.to_text());
            assert_eq!(copy.to_xml(), value.to_xml());
            assert_eq!(copy, value);
        }
    }

    #[test]
    fn clone_is_deep() {
        let mut original = Value::Set(vec![Value::Integer(1)]);
        let copy = original.clone();
        original.as_set_mut().unwrap().push(Value::Integer(2));
        assert_eq!(copy.to_text(), "(1)");
        assert_eq!(original.to_text(), "(1,2)");
    }

    #[test]
    fn text_forms() {
        let table = Value::Table(Table::from_cells(2, 2, vec![1., 2., 3., 4.5]).unwrap());
        assert_eq!(table.to_text(), "((1,2),(3,4.5))");
        assert_eq!(table.to_file(), "1 2\n3 4.5");

        let mut map = BTreeMap::new();
        map.insert("b".to_string(), Value::Integer(2));
        map.insert("a".to_string(), Value::Boolean(true));
        assert_eq!(Value::Map(map).to_text(), "((a,true),(b,2))");

        assert_eq!(Value::Null.to_text(), "NA");
        assert_eq!(Value::Tuple(vec![1., 0.5]).to_file(), "1 0.5");
    }

    #[test]
    fn xml_form_parses_back() {
        for value in sample_values() {
            let parsed = Value::from_xml(&value.to_xml()).unwrap();
            assert_eq!(parsed, value, "xml: {}", value.to_xml());
        }
    }

    #[test]
    fn malformed_xml_values_are_rejected() {
        assert!(Value::from_xml("<integer>abc</integer>").is_err());
        assert!(Value::from_xml("<table width=\"2\" height=\"2\">1 2 3</table>").is_err());
        assert!(Value::from_xml("<map><entry name=\"a\"><null/></entry></map>").is_err());
        assert!(Value::from_xml("<map><key name=\"a\"></key></map>").is_err());
        assert!(Value::from_xml("<complex>1</complex>").is_err());
    }

    #[test]
    fn strict_getters() {
        let value = Value::Integer(5);
        assert_eq!(value.as_integer().unwrap(), 5);
        assert!(value.as_double().is_err());
        assert!(value.is_integer());
        assert!(!value.is_null());
    }

    #[test]
    fn table_bounds() {
        let mut table = Table::new(3, 2).unwrap();
        table.set(2, 1, 9.).unwrap();
        assert_eq!(table.get(2, 1), Some(9.));
        assert_eq!(table.get(3, 0), None);
        assert!(table.set(0, 2, 1.).is_err());
        assert!(Table::from_cells(2, 2, vec![0.; 3]).is_err());
    }

    #[test]
    fn oversized_dimensions_are_rejected() {
        let huge = "4294967296";
        let table = format!("<table width=\"{0}\" height=\"{0}\"></table>", huge);
        assert!(Value::from_xml(&table).is_err());
        let matrix = format!("<matrix columns=\"{0}\" rows=\"{0}\"></matrix>", huge);
        assert!(Value::from_xml(&matrix).is_err());
        assert!(Table::new(usize::MAX, 2).is_err());
        assert!(Matrix::new(2, usize::MAX).is_err());
        assert!(Table::from_cells(usize::MAX, usize::MAX, Vec::new()).is_err());
    }

    #[test]
    fn decoded_grids_keep_their_shape() {
        let valid = Value::Table(Table::from_cells(2, 1, vec![1., 2.]).unwrap());
        let bytes = bincode::serialize(&valid).unwrap();
        assert_eq!(bincode::deserialize::<Value>(&bytes).unwrap(), valid);

        #[derive(Serialize)]
        struct Grid<T> {
            a: usize,
            b: usize,
            cells: Vec<T>,
        }
        let short_table = bincode::serialize(&Grid::<f64> {
            a: 2,
            b: 2,
            cells: Vec::new(),
        })
        .unwrap();
        assert!(bincode::deserialize::<Table>(&short_table).is_err());

        let short_matrix = bincode::serialize(&Grid {
            a: 3,
            b: 1,
            cells: vec![Value::Null],
        })
        .unwrap();
        assert!(bincode::deserialize::<Matrix>(&short_matrix).is_err());
    }

    #[test]
    fn kind_names_parse() {
        for name in VALUE_KINDS.iter() {
            let kind: ValueKind = name.parse().unwrap();
            assert_eq!(kind.to_str(), *name);
        }
        assert!("complex".parse::<ValueKind>().is_err());
    }
}
