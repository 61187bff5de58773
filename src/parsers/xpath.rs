//! XPath 1.0 expressions evaluated over `roxmltree` documents.
//!
//! Covers the full expression grammar: location paths on every axis except
//! `namespace`, predicates, unions, arithmetic, comparisons, `and`/`or`,
//! `$variables` and the core function library. Prefixes resolve through
//! the caller's [`Namespaces`]; unprefixed names only match nodes without
//! a namespace.
//!
//! An expression can also run without a document. Location paths then
//! select nothing, which is how value transformations evaluate
//! expressions over `$fieldValue` and friends.

use std::collections::HashMap;
use std::fmt;

use roxmltree::{Attribute, Document, ExpandedName, Node};

pub const XML_NS_URI: &str = "http://www.w3.org/XML/1998/namespace";

/// Prefix to URI bindings used when evaluating paths.
#[derive(Debug, Clone, PartialEq)]
pub struct Namespaces {
    bindings: HashMap<String, String>,
}

impl Namespaces {
    pub fn new() -> Self {
        let mut bindings = HashMap::new();
        bindings.insert("xml".to_string(), XML_NS_URI.to_string());
        Self { bindings }
    }

    pub fn bind(&mut self, prefix: impl Into<String>, uri: impl Into<String>) {
        self.bindings.insert(prefix.into(), uri.into());
    }

    pub fn uri(&self, prefix: &str) -> Option<&str> {
        self.bindings.get(prefix).map(String::as_str)
    }
}

impl Default for Namespaces {
    fn default() -> Self {
        Self::new()
    }
}

/// Values bound to `$name` references. Unbound names read as `""`.
pub type Variables = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq)]
struct QName {
    prefix: Option<String>,
    local: String,
}

impl QName {
    fn matches(&self, local: &str, namespace: Option<&str>, ns: &Namespaces) -> bool {
        local == self.local && namespace_matches(self.prefix.as_deref(), namespace, ns)
    }
}

fn namespace_matches(prefix: Option<&str>, namespace: Option<&str>, ns: &Namespaces) -> bool {
    match prefix {
        None => namespace.is_none(),
        Some(p) => ns.uri(p).is_some_and(|uri| namespace == Some(uri)),
    }
}

// ---------------------------------------------------------------------------
// Tokens

#[derive(Debug, Clone, PartialEq)]
enum NameTest {
    Any,
    AnyIn(String),
    Named(QName),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Slash,
    DoubleSlash,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    DotDot,
    At,
    Comma,
    Pipe,
    Plus,
    Minus,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Mod,
    Div,
    Multiply,
    Literal(String),
    Number(f64),
    Variable(String),
    /// `name::`
    Axis(String),
    /// A name directly followed by `(`.
    Function(String),
    NodeType(String),
    Name(NameTest),
}

impl Token {
    /// Whether a `*` or operator name after this token is an operator.
    fn ends_operand(&self) -> bool {
        matches!(
            self,
            Token::RParen
                | Token::RBracket
                | Token::Dot
                | Token::DotDot
                | Token::Literal(_)
                | Token::Number(_)
                | Token::Variable(_)
                | Token::Name(_)
        )
    }

    fn starts_step(&self) -> bool {
        matches!(
            self,
            Token::Dot | Token::DotDot | Token::At | Token::Axis(_) | Token::Name(_) | Token::NodeType(_)
        )
    }
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

struct Lexer<'s> {
    chars: Vec<char>,
    pos: usize,
    source: &'s str,
}

impl<'s> Lexer<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            source,
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek(0).is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn ncname(&mut self) -> String {
        let start = self.pos;
        while self.peek(0).is_some_and(is_name_char) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    /// Next non-whitespace character without consuming anything.
    fn lookahead(&self) -> (Option<char>, Option<char>) {
        let mut i = self.pos;
        while self.chars.get(i).is_some_and(|c| c.is_whitespace()) {
            i += 1;
        }
        (self.chars.get(i).copied(), self.chars.get(i + 1).copied())
    }

    fn tokenize(mut self) -> Result<Vec<Token>, String> {
        let mut tokens: Vec<Token> = Vec::new();
        loop {
            self.skip_whitespace();
            let Some(c) = self.peek(0) else {
                return Ok(tokens);
            };
            let operator_position = tokens.last().is_some_and(Token::ends_operand);

            let token = match c {
                '/' if self.peek(1) == Some('/') => {
                    self.pos += 2;
                    Token::DoubleSlash
                }
                '/' => self.single(Token::Slash),
                '(' => self.single(Token::LParen),
                ')' => self.single(Token::RParen),
                '[' => self.single(Token::LBracket),
                ']' => self.single(Token::RBracket),
                '@' => self.single(Token::At),
                ',' => self.single(Token::Comma),
                '|' => self.single(Token::Pipe),
                '+' => self.single(Token::Plus),
                '-' => self.single(Token::Minus),
                '=' => self.single(Token::Eq),
                '!' if self.peek(1) == Some('=') => {
                    self.pos += 2;
                    Token::NotEq
                }
                '<' if self.peek(1) == Some('=') => {
                    self.pos += 2;
                    Token::LtEq
                }
                '<' => self.single(Token::Lt),
                '>' if self.peek(1) == Some('=') => {
                    self.pos += 2;
                    Token::GtEq
                }
                '>' => self.single(Token::Gt),
                '.' if self.peek(1) == Some('.') => {
                    self.pos += 2;
                    Token::DotDot
                }
                '.' if self.peek(1).is_some_and(|d| d.is_ascii_digit()) => self.number()?,
                '.' => self.single(Token::Dot),
                d if d.is_ascii_digit() => self.number()?,
                '"' | '\'' => self.literal(c)?,
                '$' => {
                    self.pos += 1;
                    match self.name_test()? {
                        NameTest::Named(q) => Token::Variable(match q.prefix {
                            Some(p) => format!("{}:{}", p, q.local),
                            None => q.local,
                        }),
                        _ => return Err(format!("invalid variable reference in '{}'", self.source)),
                    }
                }
                '*' if operator_position => self.single(Token::Multiply),
                '*' => self.single(Token::Name(NameTest::Any)),
                c if is_name_start(c) => {
                    let start = self.pos;
                    let name = self.ncname();
                    match name.as_str() {
                        "and" if operator_position => Token::And,
                        "or" if operator_position => Token::Or,
                        "mod" if operator_position => Token::Mod,
                        "div" if operator_position => Token::Div,
                        _ => {
                            self.pos = start;
                            self.name_token()?
                        }
                    }
                }
                other => return Err(format!("unexpected '{}' in '{}'", other, self.source)),
            };
            tokens.push(token);
        }
    }

    fn single(&mut self, token: Token) -> Token {
        self.pos += 1;
        token
    }

    fn number(&mut self) -> Result<Token, String> {
        let start = self.pos;
        while self.peek(0).is_some_and(|c| c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| format!("invalid number '{}' in '{}'", text, self.source))
    }

    fn literal(&mut self, quote: char) -> Result<Token, String> {
        self.pos += 1;
        let start = self.pos;
        while self.peek(0).is_some_and(|c| c != quote) {
            self.pos += 1;
        }
        if self.peek(0).is_none() {
            return Err(format!("unterminated literal in '{}'", self.source));
        }
        let text = self.chars[start..self.pos].iter().collect();
        self.pos += 1;
        Ok(Token::Literal(text))
    }

    /// `local`, `prefix:local` or `prefix:*`.
    fn name_test(&mut self) -> Result<NameTest, String> {
        if !self.peek(0).is_some_and(is_name_start) {
            return Err(format!("expected a name in '{}'", self.source));
        }
        let first = self.ncname();
        if self.peek(0) == Some(':') && self.peek(1) != Some(':') {
            self.pos += 1;
            if self.peek(0) == Some('*') {
                self.pos += 1;
                return Ok(NameTest::AnyIn(first));
            }
            if !self.peek(0).is_some_and(is_name_start) {
                return Err(format!("invalid name '{}:' in '{}'", first, self.source));
            }
            let local = self.ncname();
            return Ok(NameTest::Named(QName {
                prefix: Some(first),
                local,
            }));
        }
        Ok(NameTest::Named(QName {
            prefix: None,
            local: first,
        }))
    }

    /// A name in operand position: axis, function, node type or name test.
    fn name_token(&mut self) -> Result<Token, String> {
        let test = self.name_test()?;
        let (next, after) = self.lookahead();
        match (&test, next, after) {
            (NameTest::Named(QName { prefix: None, local }), Some(':'), Some(':')) => {
                let local = local.clone();
                self.skip_whitespace();
                self.pos += 2;
                Ok(Token::Axis(local))
            }
            (NameTest::Named(q), Some('('), _) => {
                let name = match &q.prefix {
                    Some(p) => format!("{}:{}", p, q.local),
                    None => q.local.clone(),
                };
                Ok(match name.as_str() {
                    "comment" | "text" | "processing-instruction" | "node" => Token::NodeType(name),
                    _ => Token::Function(name),
                })
            }
            _ => Ok(Token::Name(test)),
        }
    }
}

// ---------------------------------------------------------------------------
// Syntax tree

#[derive(Debug, Clone, Copy, PartialEq)]
enum Axis {
    Ancestor,
    AncestorOrSelf,
    Attribute,
    Child,
    Descendant,
    DescendantOrSelf,
    Following,
    FollowingSibling,
    Parent,
    Preceding,
    PrecedingSibling,
    SelfAxis,
}

impl Axis {
    fn from_name(name: &str) -> Result<Self, String> {
        Ok(match name {
            "ancestor" => Axis::Ancestor,
            "ancestor-or-self" => Axis::AncestorOrSelf,
            "attribute" => Axis::Attribute,
            "child" => Axis::Child,
            "descendant" => Axis::Descendant,
            "descendant-or-self" => Axis::DescendantOrSelf,
            "following" => Axis::Following,
            "following-sibling" => Axis::FollowingSibling,
            "parent" => Axis::Parent,
            "preceding" => Axis::Preceding,
            "preceding-sibling" => Axis::PrecedingSibling,
            "self" => Axis::SelfAxis,
            "namespace" => return Err("the namespace axis is not supported".to_string()),
            other => return Err(format!("unknown axis '{}'", other)),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum NodeTest {
    Name(NameTest),
    Text,
    Comment,
    ProcessingInstruction(Option<String>),
    Node,
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Expr>,
}

impl Step {
    fn descendant_or_self() -> Self {
        Step {
            axis: Axis::DescendantOrSelf,
            test: NodeTest::Node,
            predicates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum PathStart {
    Root,
    Context,
    Expr(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Function {
    Last,
    Position,
    Count,
    LocalName,
    NamespaceUri,
    Name,
    String,
    Concat,
    StartsWith,
    Contains,
    SubstringBefore,
    SubstringAfter,
    Substring,
    StringLength,
    NormalizeSpace,
    Translate,
    Boolean,
    Not,
    True,
    False,
    Lang,
    Number,
    Sum,
    Floor,
    Ceiling,
    Round,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "last" => Function::Last,
            "position" => Function::Position,
            "count" => Function::Count,
            "local-name" => Function::LocalName,
            "namespace-uri" => Function::NamespaceUri,
            "name" => Function::Name,
            "string" => Function::String,
            "concat" => Function::Concat,
            "starts-with" => Function::StartsWith,
            "contains" => Function::Contains,
            "substring-before" => Function::SubstringBefore,
            "substring-after" => Function::SubstringAfter,
            "substring" => Function::Substring,
            "string-length" => Function::StringLength,
            "normalize-space" => Function::NormalizeSpace,
            "translate" => Function::Translate,
            "boolean" => Function::Boolean,
            "not" => Function::Not,
            "true" => Function::True,
            "false" => Function::False,
            "lang" => Function::Lang,
            "number" => Function::Number,
            "sum" => Function::Sum,
            "floor" => Function::Floor,
            "ceiling" => Function::Ceiling,
            "round" => Function::Round,
            _ => return None,
        })
    }

    /// Minimum and maximum argument count.
    fn arity(self) -> (usize, usize) {
        match self {
            Function::Last | Function::Position | Function::True | Function::False => (0, 0),
            Function::LocalName
            | Function::NamespaceUri
            | Function::Name
            | Function::String
            | Function::StringLength
            | Function::NormalizeSpace
            | Function::Number => (0, 1),
            Function::Count
            | Function::Boolean
            | Function::Not
            | Function::Lang
            | Function::Sum
            | Function::Floor
            | Function::Ceiling
            | Function::Round => (1, 1),
            Function::StartsWith | Function::Contains | Function::SubstringBefore | Function::SubstringAfter => {
                (2, 2)
            }
            Function::Substring => (2, 3),
            Function::Translate => (3, 3),
            Function::Concat => (2, usize::MAX),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    Negate(Box<Expr>),
    Union(Box<Expr>, Box<Expr>),
    Literal(String),
    Number(f64),
    Variable(String),
    Call(Function, Vec<Expr>),
    Filter(Box<Expr>, Vec<Expr>),
    Path(PathStart, Vec<Step>),
}

struct Parser<'s> {
    tokens: Vec<Token>,
    pos: usize,
    source: &'s str,
}

impl<'s> Parser<'s> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), String> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {}", what)))
        }
    }

    fn error(&self, msg: &str) -> String {
        match self.peek() {
            Some(t) => format!("{} at {:?} in '{}'", msg, t, self.source),
            None => format!("{} at end of '{}'", msg, self.source),
        }
    }

    fn binary<F>(&mut self, next: F, ops: &[(Token, fn(Box<Expr>, Box<Expr>) -> Expr)]) -> Result<Expr, String>
    where
        F: Fn(&mut Self) -> Result<Expr, String>,
    {
        let mut lhs = next(self)?;
        'outer: loop {
            for (token, build) in ops {
                if self.eat(token) {
                    let rhs = next(self)?;
                    lhs = build(Box::new(lhs), Box::new(rhs));
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn or_expr(&mut self) -> Result<Expr, String> {
        self.binary(Self::and_expr, &[(Token::Or, Expr::Or)])
    }

    fn and_expr(&mut self) -> Result<Expr, String> {
        self.binary(Self::equality_expr, &[(Token::And, Expr::And)])
    }

    fn equality_expr(&mut self) -> Result<Expr, String> {
        self.binary(
            Self::relational_expr,
            &[
                (Token::Eq, |l, r| Expr::Compare(CmpOp::Eq, l, r)),
                (Token::NotEq, |l, r| Expr::Compare(CmpOp::NotEq, l, r)),
            ],
        )
    }

    fn relational_expr(&mut self) -> Result<Expr, String> {
        self.binary(
            Self::additive_expr,
            &[
                (Token::LtEq, |l, r| Expr::Compare(CmpOp::LtEq, l, r)),
                (Token::GtEq, |l, r| Expr::Compare(CmpOp::GtEq, l, r)),
                (Token::Lt, |l, r| Expr::Compare(CmpOp::Lt, l, r)),
                (Token::Gt, |l, r| Expr::Compare(CmpOp::Gt, l, r)),
            ],
        )
    }

    fn additive_expr(&mut self) -> Result<Expr, String> {
        self.binary(
            Self::multiplicative_expr,
            &[
                (Token::Plus, |l, r| Expr::Arith(ArithOp::Add, l, r)),
                (Token::Minus, |l, r| Expr::Arith(ArithOp::Sub, l, r)),
            ],
        )
    }

    fn multiplicative_expr(&mut self) -> Result<Expr, String> {
        self.binary(
            Self::unary_expr,
            &[
                (Token::Multiply, |l, r| Expr::Arith(ArithOp::Mul, l, r)),
                (Token::Div, |l, r| Expr::Arith(ArithOp::Div, l, r)),
                (Token::Mod, |l, r| Expr::Arith(ArithOp::Mod, l, r)),
            ],
        )
    }

    fn unary_expr(&mut self) -> Result<Expr, String> {
        if self.eat(&Token::Minus) {
            return Ok(Expr::Negate(Box::new(self.unary_expr()?)));
        }
        self.binary(Self::path_expr, &[(Token::Pipe, Expr::Union)])
    }

    fn path_expr(&mut self) -> Result<Expr, String> {
        let primary = matches!(
            self.peek(),
            Some(Token::Variable(_) | Token::LParen | Token::Literal(_) | Token::Number(_) | Token::Function(_))
        );
        if !primary {
            return self.location_path();
        }

        let mut expr = self.primary_expr()?;
        let predicates = self.predicates()?;
        if !predicates.is_empty() {
            expr = Expr::Filter(Box::new(expr), predicates);
        }

        let mut steps = Vec::new();
        if self.eat(&Token::Slash) {
            self.relative_steps(&mut steps)?;
        } else if self.eat(&Token::DoubleSlash) {
            steps.push(Step::descendant_or_self());
            self.relative_steps(&mut steps)?;
        } else {
            return Ok(expr);
        }
        Ok(Expr::Path(PathStart::Expr(Box::new(expr)), steps))
    }

    fn location_path(&mut self) -> Result<Expr, String> {
        let mut steps = Vec::new();
        if self.eat(&Token::Slash) {
            if self.peek().is_some_and(Token::starts_step) {
                self.relative_steps(&mut steps)?;
            }
            return Ok(Expr::Path(PathStart::Root, steps));
        }
        if self.eat(&Token::DoubleSlash) {
            steps.push(Step::descendant_or_self());
            self.relative_steps(&mut steps)?;
            return Ok(Expr::Path(PathStart::Root, steps));
        }
        self.relative_steps(&mut steps)?;
        Ok(Expr::Path(PathStart::Context, steps))
    }

    fn relative_steps(&mut self, steps: &mut Vec<Step>) -> Result<(), String> {
        steps.push(self.step()?);
        loop {
            if self.eat(&Token::Slash) {
                steps.push(self.step()?);
            } else if self.eat(&Token::DoubleSlash) {
                steps.push(Step::descendant_or_self());
                steps.push(self.step()?);
            } else {
                return Ok(());
            }
        }
    }

    fn step(&mut self) -> Result<Step, String> {
        if self.eat(&Token::Dot) {
            return Ok(Step {
                axis: Axis::SelfAxis,
                test: NodeTest::Node,
                predicates: Vec::new(),
            });
        }
        if self.eat(&Token::DotDot) {
            return Ok(Step {
                axis: Axis::Parent,
                test: NodeTest::Node,
                predicates: Vec::new(),
            });
        }

        let axis = if self.eat(&Token::At) {
            Axis::Attribute
        } else if let Some(Token::Axis(name)) = self.peek() {
            let axis = Axis::from_name(name)?;
            self.pos += 1;
            axis
        } else {
            Axis::Child
        };

        let test = match self.peek().cloned() {
            Some(Token::Name(name)) => {
                self.pos += 1;
                NodeTest::Name(name)
            }
            Some(Token::NodeType(kind)) => {
                self.pos += 1;
                self.expect(&Token::LParen, "'('")?;
                let test = match kind.as_str() {
                    "text" => NodeTest::Text,
                    "comment" => NodeTest::Comment,
                    "node" => NodeTest::Node,
                    _ => match self.peek().cloned() {
                        Some(Token::Literal(target)) => {
                            self.pos += 1;
                            NodeTest::ProcessingInstruction(Some(target))
                        }
                        _ => NodeTest::ProcessingInstruction(None),
                    },
                };
                self.expect(&Token::RParen, "')'")?;
                test
            }
            _ => return Err(self.error("expected a node test")),
        };

        Ok(Step {
            axis,
            test,
            predicates: self.predicates()?,
        })
    }

    fn predicates(&mut self) -> Result<Vec<Expr>, String> {
        let mut predicates = Vec::new();
        while self.eat(&Token::LBracket) {
            predicates.push(self.or_expr()?);
            self.expect(&Token::RBracket, "']'")?;
        }
        Ok(predicates)
    }

    fn primary_expr(&mut self) -> Result<Expr, String> {
        let token = self.peek().cloned();
        self.pos += 1;
        match token {
            Some(Token::Variable(name)) => Ok(Expr::Variable(name)),
            Some(Token::Literal(text)) => Ok(Expr::Literal(text)),
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let inner = self.or_expr()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Function(name)) => {
                let function = Function::lookup(&name).ok_or_else(|| format!("unknown function '{}()'", name))?;
                self.expect(&Token::LParen, "'('")?;
                let mut args = Vec::new();
                if !self.eat(&Token::RParen) {
                    loop {
                        args.push(self.or_expr()?);
                        if self.eat(&Token::RParen) {
                            break;
                        }
                        self.expect(&Token::Comma, "',' or ')'")?;
                    }
                }
                let (min, max) = function.arity();
                if args.len() < min || args.len() > max {
                    return Err(format!("wrong number of arguments to '{}()'", name));
                }
                Ok(Expr::Call(function, args))
            }
            _ => {
                self.pos -= 1;
                Err(self.error("expected an expression"))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation

/// A node in the data model. Attributes are addressed by owner element and
/// position, since `roxmltree` does not give them node identities.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Item<'a, 'input> {
    Node(Node<'a, 'input>),
    Attr(Node<'a, 'input>, usize),
}

impl<'a, 'input> Item<'a, 'input> {
    /// Document order: attributes sort after their element and before its
    /// children, whose ids are always larger.
    fn order_key(&self) -> (u32, usize) {
        match self {
            Item::Node(n) => (n.id().get(), 0),
            Item::Attr(owner, i) => (owner.id().get(), i + 1),
        }
    }

    fn attribute(&self) -> Option<Attribute<'a, 'input>> {
        match self {
            Item::Attr(owner, i) => owner.attributes().nth(*i),
            Item::Node(_) => None,
        }
    }

    fn owner(&self) -> Node<'a, 'input> {
        match self {
            Item::Node(n) | Item::Attr(n, _) => *n,
        }
    }

    fn string_value(&self) -> String {
        match self {
            Item::Attr(..) => self.attribute().map(|a| a.value().to_string()).unwrap_or_default(),
            Item::Node(n) if n.is_text() || n.is_comment() => n.text().unwrap_or_default().to_string(),
            Item::Node(n) if n.is_pi() => n.pi().and_then(|pi| pi.value).unwrap_or_default().to_string(),
            Item::Node(n) => n
                .descendants()
                .filter(Node::is_text)
                .filter_map(|t| t.text())
                .collect(),
        }
    }

    fn local_name(&self) -> String {
        match self {
            Item::Attr(..) => self.attribute().map(|a| a.name().to_string()).unwrap_or_default(),
            Item::Node(n) if n.is_element() => n.tag_name().name().to_string(),
            Item::Node(n) if n.is_pi() => n.pi().map(|pi| pi.target.to_string()).unwrap_or_default(),
            Item::Node(_) => String::new(),
        }
    }

    fn namespace_uri(&self) -> String {
        let ns = match self {
            Item::Attr(..) => self.attribute().and_then(|a| a.namespace()),
            Item::Node(n) if n.is_element() => n.tag_name().namespace(),
            Item::Node(_) => None,
        };
        ns.unwrap_or_default().to_string()
    }

    fn qualified_name(&self) -> String {
        let local = self.local_name();
        let uri = self.namespace_uri();
        if uri.is_empty() {
            return local;
        }
        match self.owner().lookup_prefix(&uri) {
            Some(prefix) if !prefix.is_empty() => format!("{}:{}", prefix, local),
            _ => local,
        }
    }

    fn matches(&self, axis: Axis, test: &NodeTest, ns: &Namespaces) -> bool {
        match (self, test) {
            (Item::Attr(..), NodeTest::Node) => true,
            (Item::Attr(..), NodeTest::Name(name)) if axis == Axis::Attribute => {
                let Some(attr) = self.attribute() else {
                    return false;
                };
                match name {
                    NameTest::Any => true,
                    NameTest::AnyIn(prefix) => namespace_matches(Some(prefix.as_str()), attr.namespace(), ns),
                    NameTest::Named(q) => q.matches(attr.name(), attr.namespace(), ns),
                }
            }
            (Item::Attr(..), _) => false,
            (Item::Node(n), NodeTest::Name(name)) => {
                // attribute steps only ever select attributes
                if axis == Axis::Attribute || !n.is_element() {
                    return false;
                }
                let tag: ExpandedName<'_, '_> = n.tag_name();
                match name {
                    NameTest::Any => true,
                    NameTest::AnyIn(prefix) => namespace_matches(Some(prefix.as_str()), tag.namespace(), ns),
                    NameTest::Named(q) => q.matches(tag.name(), tag.namespace(), ns),
                }
            }
            (Item::Node(n), NodeTest::Text) => n.is_text(),
            (Item::Node(n), NodeTest::Comment) => n.is_comment(),
            (Item::Node(n), NodeTest::ProcessingInstruction(target)) => match n.pi() {
                Some(pi) => target.as_deref().map_or(true, |t| t == pi.target),
                None => false,
            },
            (Item::Node(_), NodeTest::Node) => true,
        }
    }

    /// Nodes on `axis` from this node, in proximity order.
    fn axis(&self, axis: Axis) -> Vec<Item<'a, 'input>> {
        let node = |n: Node<'a, 'input>| Item::Node(n);
        match (*self, axis) {
            (_, Axis::SelfAxis) => vec![*self],
            (Item::Attr(owner, _), Axis::Parent) => vec![Item::Node(owner)],
            (Item::Attr(owner, _), Axis::Ancestor) => owner.ancestors().map(node).collect(),
            (Item::Attr(owner, _), Axis::AncestorOrSelf) => {
                std::iter::once(*self).chain(owner.ancestors().map(node)).collect()
            }
            (Item::Attr(owner, _), Axis::Following) => owner
                .descendants()
                .skip(1)
                .chain(following(owner))
                .map(node)
                .collect(),
            (Item::Attr(owner, _), Axis::Preceding) => preceding(owner).into_iter().map(node).collect(),
            (Item::Attr(..), _) => Vec::new(),
            (Item::Node(n), Axis::Child) => n.children().map(node).collect(),
            (Item::Node(n), Axis::Descendant) => n.descendants().skip(1).map(node).collect(),
            (Item::Node(n), Axis::DescendantOrSelf) => n.descendants().map(node).collect(),
            (Item::Node(n), Axis::Parent) => n.parent().map(node).into_iter().collect(),
            (Item::Node(n), Axis::Ancestor) => n.ancestors().skip(1).map(node).collect(),
            (Item::Node(n), Axis::AncestorOrSelf) => n.ancestors().map(node).collect(),
            (Item::Node(n), Axis::FollowingSibling) => n.next_siblings().skip(1).map(node).collect(),
            (Item::Node(n), Axis::PrecedingSibling) => n.prev_siblings().skip(1).map(node).collect(),
            (Item::Node(n), Axis::Following) => following(n).map(node).collect(),
            (Item::Node(n), Axis::Preceding) => preceding(n).into_iter().map(node).collect(),
            (Item::Node(n), Axis::Attribute) if n.is_element() => {
                (0..n.attributes().len()).map(|i| Item::Attr(n, i)).collect()
            }
            (Item::Node(_), Axis::Attribute) => Vec::new(),
        }
    }
}

/// Nodes after `n` in document order, minus its descendants.
fn following<'a, 'input>(n: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    n.ancestors()
        .flat_map(|a| a.next_siblings().skip(1))
        .flat_map(|s| s.descendants())
}

/// Nodes before `n` in document order minus its ancestors, nearest first.
fn preceding<'a, 'input>(n: Node<'a, 'input>) -> Vec<Node<'a, 'input>> {
    let root = n.document().root();
    let ancestors: Vec<Node<'a, 'input>> = n.ancestors().collect();
    let mut before: Vec<Node<'a, 'input>> = root
        .descendants()
        .take_while(|d| *d != n)
        .filter(|d| !ancestors.contains(d))
        .collect();
    before.reverse();
    before
}

fn sort_document_order(items: &mut Vec<Item<'_, '_>>) {
    items.sort_by_key(Item::order_key);
    items.dedup_by_key(|i| i.order_key());
}

#[derive(Debug, Clone)]
enum Value<'a, 'input> {
    Nodes(Vec<Item<'a, 'input>>),
    Boolean(bool),
    Number(f64),
    String(String),
}

impl Value<'_, '_> {
    fn to_bool(&self) -> bool {
        match self {
            Value::Nodes(items) => !items.is_empty(),
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
        }
    }

    fn to_number(&self) -> f64 {
        match self {
            Value::Number(n) => *n,
            Value::Boolean(b) => f64::from(u8::from(*b)),
            other => parse_number(&other.to_text()),
        }
    }

    fn to_text(&self) -> String {
        match self {
            Value::Nodes(items) => items.first().map(Item::string_value).unwrap_or_default(),
            Value::Boolean(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
        }
    }
}

fn parse_number(text: &str) -> f64 {
    let t = text.trim();
    let digits = t.strip_prefix('-').unwrap_or(t);
    let valid = !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits.chars().filter(|c| *c == '.').count() <= 1
        && digits.chars().any(|c| c.is_ascii_digit());
    if valid {
        t.parse().unwrap_or(f64::NAN)
    } else {
        f64::NAN
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let sign = if n > 0.0 { "" } else { "-" };
        format!("{}Infinity", sign)
    } else if n == 0.0 {
        "0".to_string()
    } else {
        n.to_string()
    }
}

/// XPath `round()`: halves round toward positive infinity.
fn round_half_up(n: f64) -> f64 {
    if n.is_finite() {
        (n + 0.5).floor()
    } else {
        n
    }
}

enum Atom {
    Bool(bool),
    Num(f64),
    Str(String),
}

impl Atom {
    fn to_bool(&self) -> bool {
        match self {
            Atom::Bool(b) => *b,
            Atom::Num(n) => *n != 0.0 && !n.is_nan(),
            Atom::Str(s) => !s.is_empty(),
        }
    }

    fn to_number(&self) -> f64 {
        match self {
            Atom::Bool(b) => f64::from(u8::from(*b)),
            Atom::Num(n) => *n,
            Atom::Str(s) => parse_number(s),
        }
    }
}

fn atoms(value: Value<'_, '_>) -> Vec<Atom> {
    match value {
        Value::Nodes(items) => items.iter().map(|i| Atom::Str(i.string_value())).collect(),
        Value::Boolean(b) => vec![Atom::Bool(b)],
        Value::Number(n) => vec![Atom::Num(n)],
        Value::String(s) => vec![Atom::Str(s)],
    }
}

fn compare_atoms(op: CmpOp, a: &Atom, b: &Atom) -> bool {
    let equal = || match (a, b) {
        (Atom::Bool(_), _) | (_, Atom::Bool(_)) => a.to_bool() == b.to_bool(),
        (Atom::Num(_), _) | (_, Atom::Num(_)) => a.to_number() == b.to_number(),
        (Atom::Str(x), Atom::Str(y)) => x == y,
    };
    match op {
        CmpOp::Eq => equal(),
        CmpOp::NotEq => !equal(),
        CmpOp::Lt => a.to_number() < b.to_number(),
        CmpOp::LtEq => a.to_number() <= b.to_number(),
        CmpOp::Gt => a.to_number() > b.to_number(),
        CmpOp::GtEq => a.to_number() >= b.to_number(),
    }
}

fn compare(op: CmpOp, lhs: Value<'_, '_>, rhs: Value<'_, '_>) -> bool {
    match (lhs, rhs) {
        (l @ Value::Nodes(_), Value::Boolean(b)) => compare_atoms(op, &Atom::Bool(l.to_bool()), &Atom::Bool(b)),
        (Value::Boolean(b), r @ Value::Nodes(_)) => compare_atoms(op, &Atom::Bool(b), &Atom::Bool(r.to_bool())),
        (l, r) => {
            let left = atoms(l);
            let right = atoms(r);
            left.iter().any(|a| right.iter().any(|b| compare_atoms(op, a, b)))
        }
    }
}

struct Env<'e> {
    ns: &'e Namespaces,
    vars: &'e Variables,
}

#[derive(Clone, Copy)]
struct Context<'e, 'a, 'input> {
    node: Option<Item<'a, 'input>>,
    position: usize,
    size: usize,
    env: &'e Env<'e>,
}

impl<'e, 'a, 'input> Context<'e, 'a, 'input> {
    fn at(&self, node: Item<'a, 'input>, position: usize, size: usize) -> Self {
        Self {
            node: Some(node),
            position,
            size,
            env: self.env,
        }
    }

    fn eval(&self, expr: &Expr) -> Result<Value<'a, 'input>, String> {
        Ok(match expr {
            Expr::Or(l, r) => Value::Boolean(self.eval(l)?.to_bool() || self.eval(r)?.to_bool()),
            Expr::And(l, r) => Value::Boolean(self.eval(l)?.to_bool() && self.eval(r)?.to_bool()),
            Expr::Compare(op, l, r) => Value::Boolean(compare(*op, self.eval(l)?, self.eval(r)?)),
            Expr::Arith(op, l, r) => {
                let a = self.eval(l)?.to_number();
                let b = self.eval(r)?.to_number();
                Value::Number(match op {
                    ArithOp::Add => a + b,
                    ArithOp::Sub => a - b,
                    ArithOp::Mul => a * b,
                    ArithOp::Div => a / b,
                    ArithOp::Mod => a % b,
                })
            }
            Expr::Negate(e) => Value::Number(-self.eval(e)?.to_number()),
            Expr::Union(l, r) => {
                let mut items = self.nodes(l)?;
                items.extend(self.nodes(r)?);
                sort_document_order(&mut items);
                Value::Nodes(items)
            }
            Expr::Literal(s) => Value::String(s.clone()),
            Expr::Number(n) => Value::Number(*n),
            Expr::Variable(name) => Value::String(self.env.vars.get(name).cloned().unwrap_or_default()),
            Expr::Call(function, args) => self.call(*function, args)?,
            Expr::Filter(primary, predicates) => {
                let mut items = self.nodes(primary)?;
                for predicate in predicates {
                    items = self.filter(items, predicate)?;
                }
                Value::Nodes(items)
            }
            Expr::Path(start, steps) => Value::Nodes(self.path(start, steps)?),
        })
    }

    fn nodes(&self, expr: &Expr) -> Result<Vec<Item<'a, 'input>>, String> {
        match self.eval(expr)? {
            Value::Nodes(items) => Ok(items),
            _ => Err("expression does not select nodes".to_string()),
        }
    }

    fn filter(&self, items: Vec<Item<'a, 'input>>, predicate: &Expr) -> Result<Vec<Item<'a, 'input>>, String> {
        let size = items.len();
        let mut kept = Vec::new();
        for (i, item) in items.into_iter().enumerate() {
            let keep = match self.at(item, i + 1, size).eval(predicate)? {
                Value::Number(n) => n == (i + 1) as f64,
                other => other.to_bool(),
            };
            if keep {
                kept.push(item);
            }
        }
        Ok(kept)
    }

    fn path(&self, start: &PathStart, steps: &[Step]) -> Result<Vec<Item<'a, 'input>>, String> {
        let mut current: Vec<Item<'a, 'input>> = match start {
            PathStart::Root => self
                .node
                .map(|n| Item::Node(n.owner().document().root()))
                .into_iter()
                .collect(),
            PathStart::Context => self.node.into_iter().collect(),
            PathStart::Expr(e) => self.nodes(e)?,
        };

        for step in steps {
            let mut next = Vec::new();
            for item in &current {
                let mut selected: Vec<Item<'a, 'input>> = item
                    .axis(step.axis)
                    .into_iter()
                    .filter(|c| c.matches(step.axis, &step.test, self.env.ns))
                    .collect();
                for predicate in &step.predicates {
                    selected = self.filter(selected, predicate)?;
                }
                next.extend(selected);
            }
            sort_document_order(&mut next);
            if next.is_empty() {
                return Ok(next);
            }
            current = next;
        }
        Ok(current)
    }

    /// Argument `i` as text, or the context node's string value when absent.
    fn text_arg(&self, args: &[Expr], i: usize) -> Result<String, String> {
        match args.get(i) {
            Some(arg) => Ok(self.eval(arg)?.to_text()),
            None => Ok(self.node.map(|n| n.string_value()).unwrap_or_default()),
        }
    }

    /// First node of the optional node-set argument, else the context node.
    fn node_arg(&self, args: &[Expr]) -> Result<Option<Item<'a, 'input>>, String> {
        match args.first() {
            Some(arg) => Ok(self.nodes(arg)?.into_iter().next()),
            None => Ok(self.node),
        }
    }

    fn call(&self, function: Function, args: &[Expr]) -> Result<Value<'a, 'input>, String> {
        let text = |i: usize| self.text_arg(args, i);
        let number = |i: usize| -> Result<f64, String> {
            match args.get(i) {
                Some(arg) => Ok(self.eval(arg)?.to_number()),
                None => Ok(parse_number(&self.text_arg(args, i)?)),
            }
        };

        Ok(match function {
            Function::Last => Value::Number(self.size as f64),
            Function::Position => Value::Number(self.position as f64),
            Function::Count => Value::Number(self.nodes(&args[0])?.len() as f64),
            Function::LocalName => Value::String(self.node_arg(args)?.map(|n| n.local_name()).unwrap_or_default()),
            Function::NamespaceUri => {
                Value::String(self.node_arg(args)?.map(|n| n.namespace_uri()).unwrap_or_default())
            }
            Function::Name => Value::String(self.node_arg(args)?.map(|n| n.qualified_name()).unwrap_or_default()),
            Function::String => Value::String(text(0)?),
            Function::Concat => {
                let mut joined = String::new();
                for arg in args {
                    joined.push_str(&self.eval(arg)?.to_text());
                }
                Value::String(joined)
            }
            Function::StartsWith => Value::Boolean(text(0)?.starts_with(text(1)?.as_str())),
            Function::Contains => Value::Boolean(text(0)?.contains(text(1)?.as_str())),
            Function::SubstringBefore => {
                let (s, sep) = (text(0)?, text(1)?);
                Value::String(s.find(sep.as_str()).map(|i| s[..i].to_string()).unwrap_or_default())
            }
            Function::SubstringAfter => {
                let (s, sep) = (text(0)?, text(1)?);
                Value::String(
                    s.find(sep.as_str())
                        .map(|i| s[i + sep.len()..].to_string())
                        .unwrap_or_default(),
                )
            }
            Function::Substring => {
                let s = text(0)?;
                let start = round_half_up(number(1)?);
                let end = match args.get(2) {
                    Some(_) => start + round_half_up(number(2)?),
                    None => f64::INFINITY,
                };
                Value::String(
                    s.chars()
                        .enumerate()
                        .filter(|(i, _)| {
                            let p = (*i + 1) as f64;
                            p >= start && p < end
                        })
                        .map(|(_, c)| c)
                        .collect(),
                )
            }
            Function::StringLength => Value::Number(text(0)?.chars().count() as f64),
            Function::NormalizeSpace => Value::String(text(0)?.split_whitespace().collect::<Vec<_>>().join(" ")),
            Function::Translate => {
                let (s, from, to) = (text(0)?, text(1)?, text(2)?);
                let from: Vec<char> = from.chars().collect();
                let to: Vec<char> = to.chars().collect();
                Value::String(
                    s.chars()
                        .filter_map(|c| match from.iter().position(|f| *f == c) {
                            Some(i) => to.get(i).copied(),
                            None => Some(c),
                        })
                        .collect(),
                )
            }
            Function::Boolean => Value::Boolean(self.eval(&args[0])?.to_bool()),
            Function::Not => Value::Boolean(!self.eval(&args[0])?.to_bool()),
            Function::True => Value::Boolean(true),
            Function::False => Value::Boolean(false),
            Function::Lang => {
                let wanted = text(0)?.to_ascii_lowercase();
                let lang = self.node.and_then(|n| {
                    n.owner()
                        .ancestors()
                        .find_map(|a| a.attribute((XML_NS_URI, "lang")))
                        .map(str::to_ascii_lowercase)
                });
                Value::Boolean(lang.is_some_and(|l| {
                    l == wanted || (l.starts_with(&wanted) && l[wanted.len()..].starts_with('-'))
                }))
            }
            Function::Number => Value::Number(number(0)?),
            Function::Sum => Value::Number(
                self.nodes(&args[0])?
                    .iter()
                    .map(|n| parse_number(&n.string_value()))
                    .sum(),
            ),
            Function::Floor => Value::Number(number(0)?.floor()),
            Function::Ceiling => Value::Number(number(0)?.ceil()),
            Function::Round => Value::Number(round_half_up(number(0)?)),
        })
    }
}

// ---------------------------------------------------------------------------
// Public surface

/// A compiled XPath expression.
#[derive(Debug, Clone, PartialEq)]
pub struct XPath {
    raw: String,
    expr: Expr,
}

/// Result of an evaluation, reduced to what field mapping needs.
#[derive(Debug, Clone, PartialEq)]
pub struct XPathMatch {
    /// String value of the result: the first selected node's string value
    /// for node-sets, the converted value otherwise.
    pub value: String,
    /// Attributes of the first selected node when it is an element, by
    /// local name.
    pub attributes: Vec<(String, String)>,
}

impl XPath {
    /// Compile `expr`.
    ///
    /// # Example
    ///
    /// ```
    /// use activity_streams::parsers::xpath::{Namespaces, XPath};
    ///
    /// let doc = roxmltree::Document::parse("<evt id='7'><name> login </name></evt>").unwrap();
    /// let ns = Namespaces::new();
    /// let eval = |e: &str| XPath::compile(e).unwrap().evaluate(&doc, &ns).unwrap().unwrap().value;
    /// assert_eq!(eval("/evt/@id"), "7");
    /// assert_eq!(eval("normalize-space(//name)"), "login");
    /// assert_eq!(eval("count(/evt/*) + 1"), "2");
    /// ```
    pub fn compile(expr: &str) -> Result<Self, String> {
        let raw = expr.trim();
        if raw.is_empty() {
            return Err("empty expression".to_string());
        }
        let tokens = Lexer::new(raw).tokenize()?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            source: raw,
        };
        let expr = parser.or_expr()?;
        if parser.peek().is_some() {
            return Err(parser.error("unexpected token"));
        }
        Ok(Self {
            raw: raw.to_string(),
            expr,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Evaluate with the document root as context node.
    ///
    /// # Returns
    /// `None` when the expression selects an empty node-set
    ///
    /// # Errors
    /// A description of the failure when the expression applies a path or
    /// predicate to something that is not a node-set
    pub fn evaluate(&self, doc: &Document<'_>, ns: &Namespaces) -> Result<Option<XPathMatch>, String> {
        let vars = Variables::new();
        let env = Env { ns, vars: &vars };
        let ctx = Context {
            node: Some(Item::Node(doc.root())),
            position: 1,
            size: 1,
            env: &env,
        };
        Ok(match ctx.eval(&self.expr)? {
            Value::Nodes(items) => items.first().map(|first| XPathMatch {
                value: first.string_value(),
                attributes: match first {
                    Item::Node(n) if n.is_element() => n
                        .attributes()
                        .map(|a| (a.name().to_string(), a.value().to_string()))
                        .collect(),
                    _ => Vec::new(),
                },
            }),
            other => Some(XPathMatch {
                value: other.to_text(),
                attributes: Vec::new(),
            }),
        })
    }

    /// Evaluate without a document, as a string. Location paths select
    /// nothing; `$name` references read from `vars`.
    pub fn evaluate_detached(&self, vars: &Variables, ns: &Namespaces) -> Result<String, String> {
        let env = Env { ns, vars };
        let ctx = Context {
            node: None,
            position: 1,
            size: 1,
            env: &env,
        };
        Ok(ctx.eval(&self.expr)?.to_text())
    }
}

impl fmt::Display for XPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<?xml version="1.0"?>
<batch xmlns:m="urn:mq" xml:lang="en-US">
  <evt type="SEND" units="Milliseconds" k="x" v="1">
    <name> put </name>
    <m:queue>Q1</m:queue>
    <size>10</size>
  </evt>
  <!-- second -->
  <evt type="RECEIVE" k="y"><name>get</name><size>32</size></evt>
</batch>"#;

    fn eval(expr: &str, ns: &Namespaces) -> Option<String> {
        let doc = Document::parse(DOC).unwrap();
        XPath::compile(expr).unwrap().evaluate(&doc, ns).unwrap().map(|m| m.value)
    }

    fn plain(expr: &str) -> Option<String> {
        eval(expr, &Namespaces::new())
    }

    #[test]
    fn test_child_and_attribute_steps() {
        assert_eq!(plain("/batch/evt/@type").as_deref(), Some("SEND"));
        assert_eq!(plain("/batch/evt[2]/name").as_deref(), Some("get"));
        assert_eq!(plain("/batch/evt[last()]/@type").as_deref(), Some("RECEIVE"));
        assert_eq!(plain("batch/evt/name").as_deref(), Some(" put "));
        assert_eq!(plain("/batch/evt[0]"), None);
    }

    #[test]
    fn test_descendant_and_predicates() {
        assert_eq!(plain("//evt[@type='RECEIVE']/name").as_deref(), Some("get"));
        assert_eq!(plain("//evt[name='get']/@type").as_deref(), Some("RECEIVE"));
        assert_eq!(plain("//name/text()").as_deref(), Some(" put "));
        assert_eq!(plain("//evt[@k='x' and @v]/@type").as_deref(), Some("SEND"));
        assert_eq!(plain("//evt[@k='y' or @v='9']/@type").as_deref(), Some("RECEIVE"));
        assert_eq!(plain("//evt[size > 20]/name").as_deref(), Some("get"));
        assert_eq!(plain("//evt[not(@v)]/@k").as_deref(), Some("y"));
        assert_eq!(plain("//missing"), None);
    }

    #[test]
    fn test_functions() {
        assert_eq!(plain("normalize-space(/batch/evt/name)").as_deref(), Some("put"));
        assert_eq!(plain("concat(//evt[2]/name, '-', //evt[2]/@k)").as_deref(), Some("get-y"));
        assert_eq!(plain("count(/batch/evt)").as_deref(), Some("2"));
        assert_eq!(plain("name(/*)").as_deref(), Some("batch"));
        assert_eq!(plain("sum(//size) div 4").as_deref(), Some("10.5"));
        assert_eq!(plain("substring('12345', 1.5, 2.6)").as_deref(), Some("234"));
        assert_eq!(plain("substring-after('a=b', '=')").as_deref(), Some("b"));
        assert_eq!(plain("translate('bar', 'abc', 'ABC')").as_deref(), Some("BAr"));
        assert_eq!(plain("string-length(//evt[2]/name)").as_deref(), Some("3"));
        assert_eq!(plain("round(2.5) + floor(-1.5) + ceiling(0.2)").as_deref(), Some("2"));
        assert_eq!(plain("boolean(//evt[3])").as_deref(), Some("false"));
        assert_eq!(plain("//evt[lang('en')][2]/@k").as_deref(), Some("y"));
        assert_eq!(plain("number('x')").as_deref(), Some("NaN"));
    }

    #[test]
    fn test_axes_and_unions() {
        assert_eq!(plain("//evt[2]/preceding-sibling::evt/@k").as_deref(), Some("x"));
        assert_eq!(plain("//size[. = 10]/following::name").as_deref(), Some("get"));
        assert_eq!(plain("//name[.='get']/ancestor::batch/@xml:lang").as_deref(), Some("en-US"));
        assert_eq!(plain("//evt[1]/@k/..//size").as_deref(), Some("10"));
        assert_eq!(plain("count(//evt/@k | //evt/@v | //evt/@k)").as_deref(), Some("3"));
        assert_eq!(plain("/batch/comment()").as_deref(), Some(" second "));
        assert_eq!(plain("(//name)[last()]").as_deref(), Some("get"));
        assert_eq!(plain("count(//evt[1]/following-sibling::*)").as_deref(), Some("1"));
    }

    #[test]
    fn test_namespace_prefixes() {
        let mut ns = Namespaces::new();
        assert_eq!(eval("//m:queue", &ns), None);
        assert_eq!(eval("//queue", &ns), None);

        ns.bind("m", "urn:mq");
        assert_eq!(eval("//m:queue", &ns).as_deref(), Some("Q1"));
        assert_eq!(eval("local-name(//m:*)", &ns).as_deref(), Some("queue"));
        assert_eq!(eval("namespace-uri(//m:queue)", &ns).as_deref(), Some("urn:mq"));
        assert_eq!(eval("name(//m:queue)", &ns).as_deref(), Some("m:queue"));
    }

    #[test]
    fn test_element_attributes_reported() {
        let doc = Document::parse(DOC).unwrap();
        let m = XPath::compile("/batch/evt")
            .unwrap()
            .evaluate(&doc, &Namespaces::new())
            .unwrap()
            .unwrap();
        assert!(m.attributes.contains(&("units".to_string(), "Milliseconds".to_string())));
    }

    #[test]
    fn test_operator_names_versus_element_names() {
        let doc = Document::parse("<r><div>6</div><mod>4</mod><and>1</and></r>").unwrap();
        let ns = Namespaces::new();
        let value = |e: &str| XPath::compile(e).unwrap().evaluate(&doc, &ns).unwrap().unwrap().value;
        assert_eq!(value("/r/div div /r/mod"), "1.5");
        assert_eq!(value("/r/div mod /r/mod * 2"), "4");
        assert_eq!(value("/r/and and /r/div"), "true");
        assert_eq!(value("-/r/mod - -1"), "-3");
    }

    #[test]
    fn test_detached_evaluation_uses_variables() {
        let mut vars = Variables::new();
        vars.insert("fieldValue".to_string(), "  order 42 ".to_string());
        vars.insert("Severity".to_string(), "ERROR".to_string());
        let ns = Namespaces::new();
        let run = |e: &str| XPath::compile(e).unwrap().evaluate_detached(&vars, &ns).unwrap();

        assert_eq!(run("normalize-space($fieldValue)"), "order 42");
        assert_eq!(run("concat($Severity, ':', substring-after($fieldValue, 'order '))"), "ERROR:42 ");
        assert_eq!(run("$unbound"), "");
        assert_eq!(run("count(/a)"), "0");
    }

    #[test]
    fn test_compile_errors() {
        for bad in [
            "",
            "/a[@b='x'",
            "/a/",
            "unknown-fn(1)",
            "count()",
            "substring('a')",
            "namespace::x",
            "1 +",
            "'open",
            "/a]",
        ] {
            assert!(XPath::compile(bad).is_err(), "{} should not compile", bad);
        }
    }

    #[test]
    fn test_path_over_string_is_an_evaluation_error() {
        let doc = Document::parse("<a/>").unwrap();
        let path = XPath::compile("'text'/a").unwrap();
        assert!(path.evaluate(&doc, &Namespaces::new()).is_err());
    }
}
