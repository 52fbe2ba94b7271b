//! Ordered pattern substitution of volatile fields.
//!
//! A line is kept as a list of segments. Each rule only searches the
//! segments that are still plain text, so text masked by an earlier rule can
//! never be re-matched by a later one, regardless of the placeholder's shape.

use std::fmt;
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::corpus::LogLine;
use crate::error::Result;
use crate::intern::{DictionarySink, InternTables};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Timestamp,
    BlockId,
    IpPort,
    Path,
    Number,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timestamp => "timestamp",
            Self::BlockId => "block_id",
            Self::IpPort => "ip_port",
            Self::Path => "path",
            Self::Number => "number",
        }
    }

    /// Literal placeholder used by the fixed-token policy.
    pub fn fixed_token(&self) -> &'static str {
        match self {
            Self::Timestamp => "<TIMESTAMP>",
            Self::BlockId => "<BLOCK>",
            Self::IpPort => "<IP_PORT>",
            Self::Path => "<PATH>",
            Self::Number => "<NUM>",
        }
    }

    /// Prefix of interned placeholders. Numbers are never interned.
    pub fn sigil(&self) -> Option<char> {
        match self {
            Self::IpPort => Some('@'),
            Self::BlockId => Some('#'),
            Self::Timestamp => Some('^'),
            Self::Path => Some('/'),
            Self::Number => None,
        }
    }

    fn from_fixed_token(token: &str) -> Option<Category> {
        [
            Self::Timestamp,
            Self::BlockId,
            Self::IpPort,
            Self::Path,
            Self::Number,
        ]
        .into_iter()
        .find(|c| c.fixed_token().eq_ignore_ascii_case(token))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// Lowercase the line and replace matches with a shared literal token.
    #[default]
    FixedToken,
    /// Keep case and replace matches with `sigil + dense id`.
    Interning,
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub category: Category,
    pattern: Regex,
}

impl Rule {
    pub fn new(category: Category, pattern: &str) -> std::result::Result<Rule, regex::Error> {
        Ok(Rule {
            category,
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }
}

static TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{6} \d{6}\b").unwrap());
static BLOCK_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"blk_[-+]?\d+").unwrap());
static IP_PORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}(?::\d+)?\b").unwrap()
});
static PATH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/[\w/.\-]+").unwrap());
static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d+\b").unwrap());
// Placeholders left by a previous fixed-token pass (after lowercasing).
static FIXED_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(?:timestamp|block|ip_port|path|num)>").unwrap());

fn builtin(category: Category, pattern: &LazyLock<Regex>) -> Rule {
    Rule {
        category,
        pattern: Regex::clone(pattern),
    }
}

/// The built-in rule order. The generic number rule only applies to the
/// fixed-token policy.
pub fn default_rules(policy: Policy) -> Vec<Rule> {
    let mut rules = vec![
        builtin(Category::Timestamp, &TIMESTAMP),
        builtin(Category::BlockId, &BLOCK_ID),
        builtin(Category::IpPort, &IP_PORT),
        builtin(Category::Path, &PATH),
    ];
    if policy == Policy::FixedToken {
        rules.push(builtin(Category::Number, &NUMBER));
    }
    rules
}

#[derive(Debug)]
enum Segment<'a> {
    Text(&'a str),
    Masked { category: Category, value: &'a str },
}

fn apply_rule<'a>(segments: Vec<Segment<'a>>, category: Category, re: &Regex) -> Vec<Segment<'a>> {
    let mut out = Vec::with_capacity(segments.len());
    for segment in segments {
        let text = match segment {
            Segment::Text(text) => text,
            masked => {
                out.push(masked);
                continue;
            }
        };
        let mut last_index = 0;
        for mmatch in re.find_iter(text) {
            if mmatch.start() > last_index {
                out.push(Segment::Text(&text[last_index..mmatch.start()]));
            }
            out.push(Segment::Masked {
                category,
                value: mmatch.as_str(),
            });
            last_index = mmatch.end();
        }
        if last_index != text.len() {
            out.push(Segment::Text(&text[last_index..]));
        }
    }
    out
}

/// A placeholder emitted by the interning policy. `span` addresses the
/// placeholder inside [`NormalizedLine::text`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternedToken {
    pub category: Category,
    pub id: u32,
    pub span: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedLine {
    pub index: usize,
    pub text: String,
    /// Empty under the fixed-token policy.
    pub interned: Vec<InternedToken>,
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    policy: Policy,
    rules: Vec<Rule>,
}

impl Normalizer {
    pub fn new(policy: Policy) -> Self {
        Self::with_rules(policy, default_rules(policy))
    }

    /// Rules are applied in the given order.
    pub fn with_rules(policy: Policy, rules: Vec<Rule>) -> Self {
        Self { policy, rules }
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    fn segments<'a>(&self, line: &'a str) -> Vec<Segment<'a>> {
        let mut segments = vec![Segment::Text(line)];
        if self.policy == Policy::FixedToken {
            segments = apply_rule(segments, Category::Number, &FIXED_TOKEN)
                .into_iter()
                .map(|s| match s {
                    Segment::Masked { value, .. } => Segment::Masked {
                        category: Category::from_fixed_token(value).unwrap_or(Category::Number),
                        value,
                    },
                    text => text,
                })
                .collect();
        }
        for rule in &self.rules {
            segments = apply_rule(segments, rule.category, &rule.pattern);
        }
        segments
    }

    /// Fixed-token normalization. Pure and idempotent: placeholders already
    /// present in the input are preserved.
    pub fn normalize_fixed(&self, line: &str) -> String {
        let lowered = line.to_lowercase();
        let mut out = String::with_capacity(lowered.len());
        for segment in self.segments(&lowered) {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Masked { category, .. } => out.push_str(category.fixed_token()),
            }
        }
        out.trim().to_string()
    }

    /// Interning normalization. Case and spacing are preserved; every match
    /// is interned in `tables` and replaced with its sigil and id.
    pub fn normalize_interned(
        &self,
        line: &LogLine,
        tables: &mut InternTables,
        mut sink: Option<&mut (dyn DictionarySink + '_)>,
    ) -> Result<NormalizedLine> {
        let mut text = String::with_capacity(line.text.len());
        let mut interned = Vec::new();
        for segment in self.segments(&line.text) {
            match segment {
                Segment::Text(t) => text.push_str(t),
                Segment::Masked { category, value } => match category.sigil() {
                    Some(sigil) => {
                        let id = tables.intern(category, value, sink.as_deref_mut())?;
                        let start = text.len();
                        text.push(sigil);
                        text.push_str(&id.to_string());
                        interned.push(InternedToken {
                            category,
                            id,
                            span: start..text.len(),
                        });
                    }
                    None => text.push_str(value),
                },
            }
        }
        Ok(NormalizedLine {
            index: line.index,
            text,
            interned,
        })
    }

    /// Normalizes one line under this normalizer's policy.
    pub fn normalize(
        &self,
        line: &LogLine,
        tables: &mut InternTables,
        sink: Option<&mut (dyn DictionarySink + '_)>,
    ) -> Result<NormalizedLine> {
        match self.policy {
            Policy::FixedToken => Ok(NormalizedLine {
                index: line.index,
                text: self.normalize_fixed(&line.text),
                interned: Vec::new(),
            }),
            Policy::Interning => self.normalize_interned(line, tables, sink),
        }
    }
}
