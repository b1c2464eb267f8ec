use std::fmt;
use std::rc::Rc;

/// An unexpanded word, kept exactly as written (quotes included).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word(pub String);

impl Word {
    pub fn new(text: impl Into<String>) -> Self {
        Word(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectKind {
    In,        // <
    Out,       // >
    Append,    // >>
    Clobber,   // >|
    ReadWrite, // <>
    DupIn,     // <&
    DupOut,    // >&
    OutAndErr, // &>
    /// The target holds the body. `expand` is false when the delimiter was quoted.
    HereDoc { expand: bool },
}

impl RedirectKind {
    pub fn default_fd(&self) -> i32 {
        match self {
            RedirectKind::In
            | RedirectKind::ReadWrite
            | RedirectKind::DupIn
            | RedirectKind::HereDoc { .. } => 0,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub fd: Option<i32>,
    pub kind: RedirectKind,
    pub target: Word,
}

impl Redirect {
    pub fn fd(&self) -> i32 {
        self.fd.unwrap_or_else(|| self.kind.default_fd())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignValue {
    Scalar(Word),
    Array(Vec<Word>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub name: String,
    /// Raw subscript text for `name[sub]=value`.
    pub index: Option<String>,
    pub value: AssignValue,
    pub append: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandNode {
    pub name: Option<Word>,
    pub args: Vec<Word>,
    pub redirects: Vec<Redirect>,
    pub assignments: Vec<Assignment>,
    /// Arguments of a declaration builtin written as assignments, keyed by
    /// their position in `args`.
    pub declarations: Vec<(usize, Assignment)>,
}

impl CommandNode {
    pub fn declaration(&self, arg: usize) -> Option<&Assignment> {
        self.declarations.iter().find(|(i, _)| *i == arg).map(|(_, a)| a)
    }

    /// Name followed by arguments, the words that undergo full expansion.
    pub fn words(&self) -> Vec<Word> {
        self.name.iter().chain(self.args.iter()).cloned().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOp {
    And,
    Or,
    Seq,
    Background,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseArm {
    pub patterns: Vec<Word>,
    pub body: Option<AstNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AstNode {
    Command(CommandNode),
    Pipeline {
        commands: Vec<AstNode>,
        negate: bool,
    },
    List {
        left: Box<AstNode>,
        op: ListOp,
        right: Option<Box<AstNode>>,
    },
    If {
        cond: Box<AstNode>,
        then_branch: Box<AstNode>,
        else_branch: Option<Box<AstNode>>,
    },
    For {
        var: String,
        /// `None` when the `in` clause is omitted and `"$@"` is iterated.
        words: Option<Vec<Word>>,
        body: Box<AstNode>,
    },
    /// `negate` turns the loop into `until`.
    While {
        cond: Box<AstNode>,
        body: Box<AstNode>,
        negate: bool,
    },
    Case {
        word: Word,
        arms: Vec<CaseArm>,
    },
    Group(Box<AstNode>),
    Subshell(Box<AstNode>),
    FunctionDef {
        name: String,
        body: Rc<AstNode>,
    },
    Redirect {
        node: Box<AstNode>,
        redirects: Vec<Redirect>,
    },
}

fn write_redirect(f: &mut fmt::Formatter<'_>, r: &Redirect) -> fmt::Result {
    if let Some(fd) = r.fd {
        write!(f, "{fd}")?;
    }
    let op = match &r.kind {
        RedirectKind::In => "<",
        RedirectKind::Out => ">",
        RedirectKind::Append => ">>",
        RedirectKind::Clobber => ">|",
        RedirectKind::ReadWrite => "<>",
        RedirectKind::DupIn => "<&",
        RedirectKind::DupOut => ">&",
        RedirectKind::OutAndErr => "&>",
        RedirectKind::HereDoc { .. } => return write!(f, "<<EOF"),
    };
    write!(f, "{op}{}", r.target)
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(index) = &self.index {
            write!(f, "[{index}]")?;
        }
        f.write_str(if self.append { "+=" } else { "=" })?;
        match &self.value {
            AssignValue::Scalar(w) => write!(f, "{w}"),
            AssignValue::Array(items) => {
                let items: Vec<&str> = items.iter().map(Word::as_str).collect();
                write!(f, "({})", items.join(" "))
            }
        }
    }
}

/// Renders a node back to shell syntax, used for job listings and traces.
impl fmt::Display for AstNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AstNode::Command(cmd) => {
                let mut parts: Vec<String> = cmd.assignments.iter().map(|a| a.to_string()).collect();
                parts.extend(cmd.words().into_iter().map(|w| w.0));
                f.write_str(&parts.join(" "))?;
                for r in &cmd.redirects {
                    f.write_str(" ")?;
                    write_redirect(f, r)?;
                }
                Ok(())
            }
            AstNode::Pipeline { commands, negate } => {
                if *negate {
                    f.write_str("! ")?;
                }
                for (i, c) in commands.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{c}")?;
                }
                Ok(())
            }
            AstNode::List { left, op, right } => {
                let sep = match op {
                    ListOp::And => " && ",
                    ListOp::Or => " || ",
                    ListOp::Seq => "; ",
                    ListOp::Background => " & ",
                };
                write!(f, "{left}")?;
                match right {
                    Some(r) => write!(f, "{sep}{r}"),
                    None if *op == ListOp::Background => f.write_str(" &"),
                    None => Ok(()),
                }
            }
            AstNode::If { cond, then_branch, else_branch } => {
                write!(f, "if {cond}; then {then_branch}; ")?;
                if let Some(e) = else_branch {
                    write!(f, "else {e}; ")?;
                }
                f.write_str("fi")
            }
            AstNode::For { var, words, body } => {
                write!(f, "for {var}")?;
                if let Some(words) = words {
                    f.write_str(" in")?;
                    for w in words {
                        write!(f, " {w}")?;
                    }
                }
                write!(f, "; do {body}; done")
            }
            AstNode::While { cond, body, negate } => {
                let kw = if *negate { "until" } else { "while" };
                write!(f, "{kw} {cond}; do {body}; done")
            }
            AstNode::Case { word, arms } => {
                write!(f, "case {word} in")?;
                for arm in arms {
                    let pats: Vec<&str> = arm.patterns.iter().map(Word::as_str).collect();
                    write!(f, " {})", pats.join("|"))?;
                    if let Some(body) = &arm.body {
                        write!(f, " {body}")?;
                    }
                    f.write_str(";;")?;
                }
                f.write_str(" esac")
            }
            AstNode::Group(body) => write!(f, "{{ {body}; }}"),
            AstNode::Subshell(body) => write!(f, "({body})"),
            AstNode::FunctionDef { name, body } => write!(f, "{name}() {body}"),
            AstNode::Redirect { node, redirects } => {
                write!(f, "{node}")?;
                for r in redirects {
                    f.write_str(" ")?;
                    write_redirect(f, r)?;
                }
                Ok(())
            }
        }
    }
}
