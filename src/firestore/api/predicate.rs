//! Typed predicate expressions and their compilation into query clauses.
//!
//! Predicates are built with a small fluent builder instead of a query
//! language:
//!
//! ```
//! use firestore_query_core::firestore::api::predicate::{field, list};
//!
//! let adults_named_john = field("age").gte(18) & field("name").eq("John");
//! let in_europe = list(["IT", "FR"]).contains(field("country"));
//! let not_in_europe = !list(["IT", "FR"]).contains(field("country"));
//! let tagged = field("tags").contains("rust");
//! # let _ = (adults_named_john, in_europe, not_in_europe, tagged);
//! ```
//!
//! Only conjunctions of comparisons, membership tests and array-contains
//! checks compile. Every other shape is rejected with
//! `firestore/unsupported-predicate` naming the offending construct.

use std::fmt::{Debug, Display, Formatter};
use std::ops::{BitAnd, BitOr, Not};
use std::sync::Arc;

use crate::firestore::error::{unsupported_predicate, FirestoreResult};
use crate::firestore::model::{FieldPath, Timestamp};
use crate::firestore::value::{FirestoreValue, ValueKind};

use super::query::{FieldFilter, FilterOperator};

/// Binary comparison operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
        }
    }

    /// The operator obtained by swapping the operands (`a < b` ⇔ `b > a`).
    pub fn mirror(&self) -> Self {
        match self {
            CompareOp::Eq => CompareOp::Eq,
            CompareOp::Ne => CompareOp::Ne,
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Lte => CompareOp::Gte,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::Gte => CompareOp::Lte,
        }
    }

    fn filter_operator(&self) -> FilterOperator {
        match self {
            CompareOp::Eq => FilterOperator::Equal,
            CompareOp::Ne => FilterOperator::NotEqual,
            CompareOp::Lt => FilterOperator::LessThan,
            CompareOp::Lte => FilterOperator::LessThanOrEqual,
            CompareOp::Gt => FilterOperator::GreaterThan,
            CompareOp::Gte => FilterOperator::GreaterThanOrEqual,
        }
    }
}

/// A value captured from the caller's scope, evaluated when the predicate
/// is compiled.
#[derive(Clone)]
pub struct CapturedValue {
    name: String,
    thunk: Arc<dyn Fn() -> FirestoreValue + Send + Sync>,
}

impl CapturedValue {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn evaluate(&self) -> FirestoreValue {
        (self.thunk)()
    }
}

impl Debug for CapturedValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedValue")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Leaf of a predicate expression.
#[derive(Clone, Debug)]
pub enum Operand {
    /// Dot-separated path of a field on the queried record.
    Field(String),
    Literal(FirestoreValue),
    Captured(CapturedValue),
    /// Member access on another operand (`base.name`).
    Member { base: Box<Operand>, name: String },
    /// An arbitrary function call. Never compiles; kept so callers get a
    /// precise error instead of a silently different query.
    Call { function: String, args: Vec<Operand> },
}

/// Boolean predicate over the fields of a single record.
#[derive(Clone, Debug)]
pub enum Expr {
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    /// `collection.contains(element)`: membership when `collection` is a
    /// value list, array-contains when it is a field.
    Contains { collection: Operand, element: Operand },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Call { function: String, args: Vec<Operand> },
}

/// References a field of the queried record.
pub fn field(path: impl Into<String>) -> Operand {
    Operand::Field(path.into())
}

/// A literal value.
pub fn lit(value: impl Into<FirestoreValue>) -> Operand {
    Operand::Literal(value.into())
}

/// A literal list of values, the left side of a membership test.
pub fn list<I, V>(values: I) -> Operand
where
    I: IntoIterator<Item = V>,
    V: Into<FirestoreValue>,
{
    Operand::Literal(FirestoreValue::from_array(
        values.into_iter().map(Into::into).collect(),
    ))
}

/// A variable captured from the surrounding scope.
///
/// `thunk` runs during compilation, so a query built once and filtered later
/// observes the value at filter time.
pub fn captured<F>(name: impl Into<String>, thunk: F) -> Operand
where
    F: Fn() -> FirestoreValue + Send + Sync + 'static,
{
    Operand::Captured(CapturedValue {
        name: name.into(),
        thunk: Arc::new(thunk),
    })
}

/// A function call operand.
pub fn call<I>(function: impl Into<String>, args: I) -> Operand
where
    I: IntoIterator<Item = Operand>,
{
    Operand::Call {
        function: function.into(),
        args: args.into_iter().collect(),
    }
}

impl Operand {
    /// Accesses member `name` of this operand. On a field this addresses a
    /// nested field; on a captured map it reads the entry.
    pub fn member(self, name: impl Into<String>) -> Operand {
        Operand::Member {
            base: Box::new(self),
            name: name.into(),
        }
    }

    pub fn eq(self, other: impl Into<Operand>) -> Expr {
        self.compare(CompareOp::Eq, other)
    }

    pub fn ne(self, other: impl Into<Operand>) -> Expr {
        self.compare(CompareOp::Ne, other)
    }

    pub fn lt(self, other: impl Into<Operand>) -> Expr {
        self.compare(CompareOp::Lt, other)
    }

    pub fn lte(self, other: impl Into<Operand>) -> Expr {
        self.compare(CompareOp::Lte, other)
    }

    pub fn gt(self, other: impl Into<Operand>) -> Expr {
        self.compare(CompareOp::Gt, other)
    }

    pub fn gte(self, other: impl Into<Operand>) -> Expr {
        self.compare(CompareOp::Gte, other)
    }

    pub fn compare(self, op: CompareOp, other: impl Into<Operand>) -> Expr {
        Expr::Compare {
            left: self,
            op,
            right: other.into(),
        }
    }

    pub fn contains(self, element: impl Into<Operand>) -> Expr {
        Expr::Contains {
            collection: self,
            element: element.into(),
        }
    }
}

impl Expr {
    pub fn and(self, other: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Expr) -> Expr {
        Expr::Or(Box::new(self), Box::new(other))
    }

    pub fn negate(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    /// A predicate consisting of a bare function call.
    pub fn call<I>(function: impl Into<String>, args: I) -> Expr
    where
        I: IntoIterator<Item = Operand>,
    {
        Expr::Call {
            function: function.into(),
            args: args.into_iter().collect(),
        }
    }
}

impl BitAnd for Expr {
    type Output = Expr;

    fn bitand(self, rhs: Expr) -> Expr {
        self.and(rhs)
    }
}

impl BitOr for Expr {
    type Output = Expr;

    fn bitor(self, rhs: Expr) -> Expr {
        self.or(rhs)
    }
}

impl Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        self.negate()
    }
}

macro_rules! literal_operand {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Operand {
                fn from(value: $ty) -> Self {
                    Operand::Literal(value.into())
                }
            }
        )*
    };
}

literal_operand!(bool, i32, i64, u32, f64, &str, String, Timestamp, FirestoreValue);

impl Display for Operand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Field(path) => write!(f, "{path}"),
            Operand::Literal(value) => write!(f, "{}", value.to_json()),
            Operand::Captured(captured) => write!(f, "{}", captured.name),
            Operand::Member { base, name } => write!(f, "{base}.{name}"),
            Operand::Call { function, args } => write_call(f, function, args),
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Compare { left, op, right } => write!(f, "{left} {} {right}", op.symbol()),
            Expr::Contains {
                collection,
                element,
            } => write!(f, "{collection}.contains({element})"),
            Expr::Not(inner) => write!(f, "!({inner})"),
            Expr::And(left, right) => write!(f, "({left} && {right})"),
            Expr::Or(left, right) => write!(f, "({left} || {right})"),
            Expr::Call { function, args } => write_call(f, function, args),
        }
    }
}

fn write_call(f: &mut Formatter<'_>, function: &str, args: &[Operand]) -> std::fmt::Result {
    write!(f, "{function}(")?;
    for (index, arg) in args.iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{arg}")?;
    }
    f.write_str(")")
}

/// Compiles a predicate into the ordered list of clauses the backend ANDs
/// together.
pub fn compile_predicate(expr: &Expr) -> FirestoreResult<Vec<FieldFilter>> {
    let mut clauses = Vec::new();
    compile_into(expr, &mut clauses)?;
    Ok(clauses)
}

fn compile_into(expr: &Expr, clauses: &mut Vec<FieldFilter>) -> FirestoreResult<()> {
    match expr {
        Expr::And(left, right) => {
            compile_into(left, clauses)?;
            compile_into(right, clauses)
        }
        Expr::Compare { left, op, right } => {
            clauses.push(compile_comparison(expr, left, *op, right)?);
            Ok(())
        }
        Expr::Contains {
            collection,
            element,
        } => {
            clauses.push(compile_contains(expr, collection, element, false)?);
            Ok(())
        }
        Expr::Not(inner) => match inner.as_ref() {
            Expr::Contains {
                collection,
                element,
            } => {
                clauses.push(compile_contains(expr, collection, element, true)?);
                Ok(())
            }
            Expr::Not(_) => Err(unsupported_predicate(format!(
                "double negation in `{expr}`"
            ))),
            Expr::Compare { op, .. } => Err(unsupported_predicate(format!(
                "negated comparison `{expr}`; invert the `{}` operator instead",
                op.symbol()
            ))),
            _ => Err(unsupported_predicate(format!(
                "negation of a compound expression in `{expr}`"
            ))),
        },
        Expr::Or(_, _) => Err(unsupported_predicate(format!(
            "disjunction `||` in `{expr}`; only conjunctions are supported"
        ))),
        Expr::Call { function, .. } => Err(unsupported_predicate(format!(
            "function call `{function}` in `{expr}`"
        ))),
    }
}

enum Resolved {
    Field(FieldPath),
    Value(FirestoreValue),
}

fn compile_comparison(
    expr: &Expr,
    left: &Operand,
    op: CompareOp,
    right: &Operand,
) -> FirestoreResult<FieldFilter> {
    match (resolve(expr, left)?, resolve(expr, right)?) {
        (Resolved::Field(field), Resolved::Value(value)) => {
            FieldFilter::new(field, op.filter_operator(), value)
        }
        (Resolved::Value(value), Resolved::Field(field)) => {
            FieldFilter::new(field, op.mirror().filter_operator(), value)
        }
        (Resolved::Field(_), Resolved::Field(_)) => Err(unsupported_predicate(format!(
            "comparison between two fields in `{expr}`"
        ))),
        (Resolved::Value(_), Resolved::Value(_)) => Err(unsupported_predicate(format!(
            "comparison without a field operand in `{expr}`"
        ))),
    }
}

fn compile_contains(
    expr: &Expr,
    collection: &Operand,
    element: &Operand,
    negated: bool,
) -> FirestoreResult<FieldFilter> {
    match (resolve(expr, collection)?, resolve(expr, element)?) {
        (Resolved::Value(values), Resolved::Field(field)) => {
            if !matches!(values.kind(), ValueKind::Array(_)) {
                return Err(unsupported_predicate(format!(
                    "membership test against a non-list {} value in `{expr}`",
                    values.type_name()
                )));
            }
            let operator = if negated {
                FilterOperator::NotIn
            } else {
                FilterOperator::In
            };
            FieldFilter::new(field, operator, values)
        }
        (Resolved::Field(field), Resolved::Value(value)) => {
            if negated {
                return Err(unsupported_predicate(format!(
                    "negated array-contains in `{expr}`"
                )));
            }
            FieldFilter::new(field, FilterOperator::ArrayContains, value)
        }
        (Resolved::Field(_), Resolved::Field(_)) => Err(unsupported_predicate(format!(
            "contains between two fields in `{expr}`"
        ))),
        (Resolved::Value(_), Resolved::Value(_)) => Err(unsupported_predicate(format!(
            "contains without a field operand in `{expr}`"
        ))),
    }
}

fn resolve(expr: &Expr, operand: &Operand) -> FirestoreResult<Resolved> {
    let resolved = match operand {
        Operand::Field(path) => Resolved::Field(FieldPath::from_dot_separated(path)?),
        Operand::Literal(value) => Resolved::Value(value.clone()),
        Operand::Captured(captured) => Resolved::Value(captured.evaluate()),
        Operand::Member { base, name } => match resolve(expr, base)? {
            Resolved::Field(path) => Resolved::Field(path.child(name.as_str())?),
            Resolved::Value(value) => match value.as_map().and_then(|map| map.get(name)) {
                Some(member) => Resolved::Value(member.clone()),
                None => {
                    return Err(unsupported_predicate(format!(
                        "member `{name}` does not exist on `{base}` in `{expr}`"
                    )))
                }
            },
        },
        Operand::Call { function, .. } => {
            return Err(unsupported_predicate(format!(
                "function call `{function}` used as an operand in `{expr}`"
            )))
        }
    };

    if let Resolved::Value(value) = &resolved {
        if value.contains_sentinel() {
            return Err(unsupported_predicate(format!(
                "write sentinel used as a filter value in `{expr}`"
            )));
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn operators(clauses: &[FieldFilter]) -> Vec<&'static str> {
        clauses.iter().map(|clause| clause.operator().symbol()).collect()
    }

    #[test]
    fn conjunction_compiles_left_to_right() {
        let predicate = field("age").gt(18) & field("name").eq("John");
        let clauses = compile_predicate(&predicate).unwrap();
        assert_eq!(operators(&clauses), [">", "=="]);
        assert_eq!(clauses[0].field().canonical_string(), "age");
        assert_eq!(clauses[1].value(), &FirestoreValue::from("John"));
    }

    #[test]
    fn literal_on_the_left_is_mirrored() {
        let mirrored = compile_predicate(&lit(18).lt(field("age"))).unwrap();
        let direct = compile_predicate(&field("age").gt(18)).unwrap();
        assert_eq!(mirrored, direct);
    }

    #[test]
    fn membership_and_structural_negation() {
        let clauses = compile_predicate(
            &(list(["IT", "FR"]).contains(field("country"))
                & !list([1, 2]).contains(field("rank"))),
        )
        .unwrap();
        assert_eq!(operators(&clauses), ["in", "not-in"]);
        assert_eq!(
            clauses[0].value(),
            &FirestoreValue::from(vec!["IT", "FR"])
        );
    }

    #[test]
    fn array_contains_accepts_captured_and_member_values() {
        let tag = "rust".to_string();
        let settings = FirestoreValue::from_map(BTreeMap::from([(
            "preferred".to_string(),
            FirestoreValue::from("async"),
        )]));

        let predicate = field("tags").contains("db")
            & field("tags").contains(captured("tag", move || FirestoreValue::from(tag.as_str())))
            & field("tags").contains(captured("settings", move || settings.clone()).member("preferred"));
        let clauses = compile_predicate(&predicate).unwrap();
        assert_eq!(
            operators(&clauses),
            ["array-contains", "array-contains", "array-contains"]
        );
        assert_eq!(clauses[1].value(), &FirestoreValue::from("rust"));
        assert_eq!(clauses[2].value(), &FirestoreValue::from("async"));
    }

    #[test]
    fn member_access_on_field_addresses_nested_field() {
        let clauses = compile_predicate(&field("address").member("city").eq("Rome")).unwrap();
        assert_eq!(clauses[0].field().canonical_string(), "address.city");
    }

    #[test]
    fn disjunction_is_rejected() {
        let err = compile_predicate(&(field("a").eq(1) | field("b").eq(2))).unwrap_err();
        assert_eq!(err.code_str(), "firestore/unsupported-predicate");
        assert!(err.message().contains("||"));
        assert!(err.is_caller_error());
    }

    #[test]
    fn double_negation_fails_closed() {
        let predicate = !!list([1]).contains(field("rank"));
        let err = compile_predicate(&predicate).unwrap_err();
        assert!(err.message().contains("double negation"));
    }

    #[test]
    fn negated_comparison_is_rejected() {
        let err = compile_predicate(&!field("age").gt(18)).unwrap_err();
        assert!(err.message().contains("negated comparison"));
    }

    #[test]
    fn calls_and_fieldless_comparisons_are_rejected() {
        let call_err =
            compile_predicate(&call("lower", [field("name")]).eq("john")).unwrap_err();
        assert!(call_err.message().contains("lower"));

        let bare = compile_predicate(&Expr::call("is_active", [])).unwrap_err();
        assert!(bare.message().contains("is_active"));

        let constant = compile_predicate(&lit(1).eq(1)).unwrap_err();
        assert!(constant.message().contains("without a field"));

        let two_fields = compile_predicate(&field("a").lt(field("b"))).unwrap_err();
        assert!(two_fields.message().contains("two fields"));
    }

    #[test]
    fn sentinels_are_not_filter_values() {
        let err = compile_predicate(&field("updated").eq(FirestoreValue::server_timestamp()))
            .unwrap_err();
        assert_eq!(err.code_str(), "firestore/unsupported-predicate");
    }
}
