//! AST for the tenant script DSL and the restricted arithmetic grammar
//! used by calculated fields.

/// A compiled script body: top-level statements plus an optional
/// `invoke(form) { ... }` entry point.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ScriptDef {
    pub statements: Vec<Statement>,
    pub invoke: Option<InvokeDef>,
}

/// The conventional entry point. `param` is the name the capability object
/// is bound to while the body runs.
#[derive(Clone, Debug, PartialEq)]
pub struct InvokeDef {
    pub param: String,
    pub body: Vec<Statement>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    Let {
        name: String,
        value: Expression,
    },
    Assignment {
        target: String,
        value: Expression,
    },
    If {
        condition: Expression,
        then_block: Vec<Statement>,
        else_block: Option<Vec<Statement>>,
    },
    Return(Option<Expression>),
    Expression(Expression),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
    Literal(Literal),
    Variable(String),
    UnaryOp {
        op: UnaryOperator,
        operand: Box<Expression>,
    },
    BinaryOp {
        op: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    /// `object.method(args)`, the only call form in the DSL. `object` must
    /// resolve to the bound capability parameter at evaluation time.
    CapabilityCall {
        object: String,
        method: String,
        args: Vec<Expression>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Number(f64),
    String(String),
    Boolean(bool),
    Null,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOperator {
    Minus,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    LessThan,
    GreaterThan,
    LessThanEqual,
    GreaterThanEqual,
    And,
    Or,
}
