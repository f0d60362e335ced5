use regex::Regex;

/// Schema variable. The expression language sees a fixed activation; every
/// variable path is resolved at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarRef {
    ActionType,
    ActionName,
    ActionTarget,
    ActionParams,
    SessionId,
    SessionAgentId,
    SessionCost,
    SessionActionCount,
    AgentId,
    AgentName,
    AgentDailyCost,
}

impl VarRef {
    pub fn resolve(root: &str, field: &str) -> Option<VarRef> {
        match (root, field) {
            ("action", "type") => Some(VarRef::ActionType),
            ("action", "name") => Some(VarRef::ActionName),
            ("action", "target") => Some(VarRef::ActionTarget),
            ("action", "params") => Some(VarRef::ActionParams),
            ("session", "id") => Some(VarRef::SessionId),
            ("session", "agent_id") => Some(VarRef::SessionAgentId),
            ("session", "cost") => Some(VarRef::SessionCost),
            ("session", "action_count") => Some(VarRef::SessionActionCount),
            ("agent", "id") => Some(VarRef::AgentId),
            ("agent", "name") => Some(VarRef::AgentName),
            ("agent", "daily_cost") => Some(VarRef::AgentDailyCost),
            _ => None,
        }
    }

    pub fn ty(&self) -> Type {
        match self {
            VarRef::ActionType
            | VarRef::ActionName
            | VarRef::ActionTarget
            | VarRef::SessionId
            | VarRef::SessionAgentId
            | VarRef::AgentId
            | VarRef::AgentName => Type::Str,
            VarRef::SessionCost | VarRef::AgentDailyCost => Type::Double,
            VarRef::SessionActionCount => Type::Int,
            VarRef::ActionParams => Type::Map,
        }
    }
}

/// Static type of an expression node. `Dyn` covers values pulled out of
/// `action.params`, whose shape is only known at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Bool,
    Int,
    Double,
    Str,
    List,
    Map,
    Dyn,
}

impl Type {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int | Type::Double | Type::Dyn)
    }

    pub fn accepts(&self, other: Type) -> bool {
        *self == other
            || *self == Type::Dyn
            || other == Type::Dyn
            || (self.is_numeric() && other.is_numeric())
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Type::Bool => "bool",
            Type::Int => "int",
            Type::Double => "double",
            Type::Str => "string",
            Type::List => "list",
            Type::Map => "map",
            Type::Dyn => "dyn",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Contains,
    StartsWith,
    EndsWith,
    Matches,
    Has,
    Get,
}

impl MethodKind {
    pub fn resolve(name: &str) -> Option<MethodKind> {
        match name {
            "contains" => Some(MethodKind::Contains),
            "startsWith" => Some(MethodKind::StartsWith),
            "endsWith" => Some(MethodKind::EndsWith),
            "matches" => Some(MethodKind::Matches),
            "has" => Some(MethodKind::Has),
            "get" => Some(MethodKind::Get),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncKind {
    Size,
    Double,
    Int,
}

impl FuncKind {
    pub fn resolve(name: &str) -> Option<FuncKind> {
        match name {
            "size" => Some(FuncKind::Size),
            "double" => Some(FuncKind::Double),
            "int" => Some(FuncKind::Int),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Literal),
    Var(VarRef),
    List(Vec<Expr>),
    Not(Box<Expr>),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Method {
        receiver: Box<Expr>,
        method: MethodKind,
        args: Vec<Expr>,
    },
    /// `.matches(<literal>)` with the pattern compiled at load time.
    MatchesLit {
        receiver: Box<Expr>,
        regex: Regex,
    },
    Call {
        func: FuncKind,
        args: Vec<Expr>,
    },
}
