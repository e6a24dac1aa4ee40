//! The swappable surface grammar. A `Syntax` is an immutable bag of marker
//! tokens and operator symbols; the normalizer and both parsers match raw
//! statement text against it, so registering a new descriptor changes the
//! whole surface language without touching any parsing code.

use std::collections::HashMap;
use std::rc::Rc;

use regex::Regex;

// ─── Markers ─────────────────────────────────────────────────────────────────

/// Where a marker token sits inside a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anchor {
    /// Marker opens the statement; the header content follows it.
    Start,
    /// Marker closes the statement; the header content precedes it.
    End,
    /// Marker is the whole statement.
    Exact,
    /// Marker opens the statement and the given token closes the header,
    /// with the header content between the two.
    Around(String),
}

#[derive(Debug, Clone)]
pub struct Marker {
    pub text: String,
    pub anchor: Anchor,
}

impl Marker {
    pub fn start(text: &str) -> Self {
        Self { text: text.to_string(), anchor: Anchor::Start }
    }

    pub fn end(text: &str) -> Self {
        Self { text: text.to_string(), anchor: Anchor::End }
    }

    pub fn exact(text: &str) -> Self {
        Self { text: text.to_string(), anchor: Anchor::Exact }
    }

    pub fn around(open: &str, close: &str) -> Self {
        Self { text: open.to_string(), anchor: Anchor::Around(close.to_string()) }
    }

    /// Matches a whole trimmed statement against this marker, returning the
    /// header content (empty for `Exact`).
    pub fn apply<'a>(&self, stmt: &'a str) -> Option<&'a str> {
        let stmt = stmt.trim();
        match &self.anchor {
            Anchor::Start => strip_word_prefix(stmt, &self.text),
            Anchor::End => stmt.strip_suffix(self.text.as_str()).map(str::trim),
            Anchor::Exact => (stmt == self.text).then_some(""),
            Anchor::Around(close) => {
                let rest = stmt.strip_prefix(self.text.as_str())?;
                rest.strip_suffix(close.as_str()).map(str::trim)
            }
        }
    }

    /// True when the trimmed statement is exactly this `Exact` marker.
    pub fn matches_exact(&self, stmt: &str) -> bool {
        self.anchor == Anchor::Exact && stmt.trim() == self.text
    }
}

/// Strips `marker` off the front of `stmt`. Alphanumeric markers must end at
/// a word boundary so `iffy` never matches `if`.
fn strip_word_prefix<'a>(stmt: &'a str, marker: &str) -> Option<&'a str> {
    let rest = stmt.strip_prefix(marker)?;
    if marker.chars().last().is_some_and(|c| c.is_ascii_alphanumeric()) {
        if let Some(c) = rest.chars().next() {
            if c.is_ascii_alphanumeric() || c == '_' {
                return None;
            }
        }
    }
    Some(rest.trim())
}

/// First occurrence of `token` in `s`. Tokens that start with a word
/// character only match on word boundaries.
pub(crate) fn find_token(s: &str, token: &str) -> Option<usize> {
    if token.is_empty() {
        return None;
    }
    let wordish = token.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
    let mut from = 0;
    while let Some(off) = s[from..].find(token) {
        let i = from + off;
        if !wordish {
            return Some(i);
        }
        let before_ok = s[..i]
            .chars()
            .last()
            .is_none_or(|c| !c.is_ascii_alphanumeric() && c != '_');
        let after_ok = s[i + token.len()..]
            .chars()
            .next()
            .is_none_or(|c| !c.is_ascii_alphanumeric() && c != '_');
        if before_ok && after_ok {
            return Some(i);
        }
        from = i + token.len();
    }
    None
}

// ─── Operators ───────────────────────────────────────────────────────────────

/// Operator symbol table. `add`/`sub` are the low-priority arithmetic tier,
/// `mul`/`div`/`rem` the high-priority one.
#[derive(Debug, Clone)]
pub struct Operators {
    pub add: String,
    pub sub: String,
    pub mul: String,
    pub div: String,
    pub rem: String,
    pub and: String,
    pub or: String,
    pub eq: String,
    pub ne: String,
    pub lt: String,
    pub gt: String,
    pub le: String,
    pub ge: String,
}

impl Operators {
    pub fn symbolic() -> Self {
        Self {
            add: "+".into(),
            sub: "-".into(),
            mul: "*".into(),
            div: "/".into(),
            rem: "%".into(),
            and: "&".into(),
            or: "|".into(),
            eq: "=".into(),
            ne: "!=".into(),
            lt: "<".into(),
            gt: ">".into(),
            le: "<=".into(),
            ge: ">=".into(),
        }
    }

    /// All arithmetic operator tokens.
    pub fn arithmetic(&self) -> [&str; 5] {
        [&self.add, &self.sub, &self.mul, &self.div, &self.rem]
    }

    pub fn low_priority(&self) -> [&str; 2] {
        [&self.add, &self.sub]
    }

    pub fn high_priority(&self) -> [&str; 3] {
        [&self.mul, &self.div, &self.rem]
    }

    /// Relational tokens, longest first so compound markers mask the bare
    /// ones at the same position.
    pub fn relational(&self) -> [&str; 6] {
        [&self.le, &self.ge, &self.ne, &self.eq, &self.lt, &self.gt]
    }

    pub fn logical(&self) -> [&str; 2] {
        [&self.and, &self.or]
    }
}

// ─── Syntax ──────────────────────────────────────────────────────────────────

/// One concrete surface grammar. Immutable once built; shared by `Rc` through
/// the registry. Two descriptors ship built in: the compact symbol grammar
/// (`"sedge"`) and a keyword grammar (`"basic"`).
#[derive(Debug, Clone)]
pub struct Syntax {
    pub name: String,
    /// Line-leading comment markers; matching lines are dropped whole.
    pub comment: Vec<String>,
    /// Statement terminator within a line.
    pub separator: char,

    pub if_begin: Marker,
    pub if_else_if: Marker,
    pub if_else: Marker,
    pub if_end: Marker,

    pub loop_begin: Marker,
    pub loop_end: Marker,

    pub function_begin: Marker,
    pub function_end: Marker,

    pub try_begin: Marker,
    pub try_catch: Marker,
    pub try_finally: Marker,
    pub try_end: Marker,

    pub return_marker: Marker,
    pub import_marker: Marker,
    pub break_marker: Marker,
    pub continue_marker: Marker,

    /// The null literal.
    pub null_keyword: String,
    /// Prefix addressing the root context (`.x`).
    pub root_prefix: String,
    /// Separator between a loop label and its header.
    pub label_suffix: char,

    pub call_open: char,
    pub call_close: char,
    pub call_separator: char,

    pub operators: Operators,

    number: Regex,
    identifier: Regex,
}

impl Syntax {
    /// The compact symbol grammar:
    ///
    /// ```text
    /// x < 10 ?            // if
    /// ? x < 20 ?          // elseif
    /// ??                  // else
    /// ?                   // end if
    /// outer: x < 10 @     // labeled loop … @ ends it
    /// inc(a) #            // function … # ends it
    /// e ^                 // try … ^^ catch, ^^^ finally, ^ end
    /// ~ x + 1             // return
    /// $host.math          // import
    /// !! outer            // break,  !!! continues
    /// ```
    pub fn compact() -> Self {
        Self {
            name: "sedge".into(),
            comment: vec!["//".into(), "--".into()],
            separator: ';',
            if_begin: Marker::end("?"),
            if_else_if: Marker::around("?", "?"),
            if_else: Marker::exact("??"),
            if_end: Marker::exact("?"),
            loop_begin: Marker::end("@"),
            loop_end: Marker::exact("@"),
            function_begin: Marker::end("#"),
            function_end: Marker::exact("#"),
            try_begin: Marker::end("^"),
            try_catch: Marker::exact("^^"),
            try_finally: Marker::exact("^^^"),
            try_end: Marker::exact("^"),
            return_marker: Marker::start("~"),
            import_marker: Marker::start("$"),
            break_marker: Marker::start("!!"),
            continue_marker: Marker::start("!!!"),
            null_keyword: "$".into(),
            root_prefix: ".".into(),
            label_suffix: ':',
            call_open: '(',
            call_close: ')',
            call_separator: ',',
            operators: Operators::symbolic(),
            number: number_pattern(),
            identifier: identifier_pattern(),
        }
    }

    /// The keyword grammar: `if/elseif/else/end if`, `while/end while`,
    /// `function/end function`, `try/catch/finally/end try`, `return`,
    /// `use`, `exit`/`next`, `null`.
    pub fn keyword() -> Self {
        Self {
            name: "basic".into(),
            comment: vec!["#".into(), "//".into()],
            separator: ';',
            if_begin: Marker::start("if"),
            if_else_if: Marker::start("elseif"),
            if_else: Marker::exact("else"),
            if_end: Marker::exact("end if"),
            loop_begin: Marker::start("while"),
            loop_end: Marker::exact("end while"),
            function_begin: Marker::start("function"),
            function_end: Marker::exact("end function"),
            try_begin: Marker::start("try"),
            try_catch: Marker::exact("catch"),
            try_finally: Marker::exact("finally"),
            try_end: Marker::exact("end try"),
            return_marker: Marker::start("return"),
            import_marker: Marker::start("use"),
            break_marker: Marker::start("exit"),
            continue_marker: Marker::start("next"),
            null_keyword: "null".into(),
            root_prefix: ".".into(),
            label_suffix: ':',
            call_open: '(',
            call_close: ')',
            call_separator: ',',
            operators: Operators::symbolic(),
            number: number_pattern(),
            identifier: identifier_pattern(),
        }
    }

    pub fn is_number(&self, s: &str) -> bool {
        self.number.is_match(s)
    }

    pub fn is_identifier(&self, s: &str) -> bool {
        self.identifier.is_match(s)
    }

    /// Every block-construct marker, for the normalizer's header splitting.
    pub fn construct_markers(&self) -> [&Marker; 12] {
        [
            &self.if_begin,
            &self.if_else_if,
            &self.if_else,
            &self.if_end,
            &self.loop_begin,
            &self.loop_end,
            &self.function_begin,
            &self.function_end,
            &self.try_begin,
            &self.try_catch,
            &self.try_finally,
            &self.try_end,
        ]
    }

    /// End-of-block style markers that cannot open a statement sequence.
    pub fn closing_markers(&self) -> [&Marker; 7] {
        [
            &self.if_else_if,
            &self.if_else,
            &self.if_end,
            &self.loop_end,
            &self.function_end,
            &self.try_catch,
            &self.try_finally,
        ]
    }
}

fn number_pattern() -> Regex {
    Regex::new(r"^[+-]?[0-9]+(\.[0-9]+)?$").expect("number pattern")
}

fn identifier_pattern() -> Regex {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern")
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Named descriptors available to one engine. Deliberately plain owned state
/// rather than a process-wide singleton.
pub struct SyntaxRegistry {
    entries: HashMap<String, Rc<Syntax>>,
}

impl SyntaxRegistry {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register(Syntax::compact());
        reg.register(Syntax::keyword());
        reg
    }

    pub fn register(&mut self, syntax: Syntax) {
        self.entries.insert(syntax.name.clone(), Rc::new(syntax));
    }

    pub fn get(&self, name: &str) -> Option<Rc<Syntax>> {
        self.entries.get(name).cloned()
    }
}

impl Default for SyntaxRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
