//! Ordered regex rewrite pipelines
//!
//! A [`RewritePipeline`] is a list of [`RewriteRule`]s applied left to right,
//! each rule replacing every non-overlapping match in the output of the
//! previous one. Replacements use `regex` syntax for captures (`$1`, `${1}`,
//! `${name}`).
//!
//! Two pipelines are built in:
//!
//! - [`super_call`] rewrites `this._super(Class, "method", args)` into
//!   `Class.prototype.method.apply(this, args)`.
//! - [`shader_minify`] strips comments and whitespace from shader source.
//!   Stage order matters: comments go first so that punctuation inside them
//!   is never tightened, and line breaks are collapsed before whitespace
//!   around operators is removed.

use std::borrow::Cow;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{DistError, Result};

const SUPER_CALL: &str = r#"this\._super\(\s*([\w.]+)\s*,\s*"(\w+)"\s*(,\s*)?"#;
const SUPER_CALL_REPLACEMENT: &str = "${1}.prototype.${2}.apply(this${3}";

const COMMENTS: &str = r"/\*[\s\S]*?\*/|//[^\r\n]*";
const LINE_EDGE_WHITESPACE: &str = r"\n\s+|\s+\n";
const LINE_BREAKS: &str = r"[\r\n]+";
const OPERATOR_WHITESPACE: &str = r"\s*([;,\[\](){}\\/\-+*|\^&!=<>?\~%])\s*";

/// A single find-and-replace rule
#[derive(Clone)]
pub struct RewriteRule {
    pattern: Regex,
    replacement: String,
}

impl RewriteRule {
    /// Compile a rule; a malformed pattern is reported as `InvalidPattern`
    pub fn new(pattern: &str, replacement: impl Into<String>) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|source| DistError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;

        Ok(Self {
            pattern: regex,
            replacement: replacement.into(),
        })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn replacement(&self) -> &str {
        &self.replacement
    }

    pub fn apply<'t>(&self, text: &'t str) -> Cow<'t, str> {
        self.pattern.replace_all(text, self.replacement.as_str())
    }
}

impl fmt::Debug for RewriteRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RewriteRule")
            .field("pattern", &self.pattern.as_str())
            .field("replacement", &self.replacement)
            .finish()
    }
}

/// Ordered list of rules, each feeding the next
#[derive(Debug, Clone, Default)]
pub struct RewritePipeline {
    rules: Vec<RewriteRule>,
}

impl RewritePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: RewriteRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn push(&mut self, rule: RewriteRule) {
        self.rules.push(rule);
    }

    /// Append all rules of another pipeline, keeping their order
    pub fn extend(&mut self, other: &RewritePipeline) {
        self.rules.extend(other.rules.iter().cloned());
    }

    pub fn rules(&self) -> &[RewriteRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn apply(&self, text: &str) -> String {
        let mut current = text.to_string();
        for rule in &self.rules {
            if let Cow::Owned(next) = rule.apply(&current) {
                current = next;
            }
        }
        current
    }
}

/// Pipelines that can be named from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuiltinPipeline {
    SuperCall,
    ShaderMinify,
    StripComments,
}

impl BuiltinPipeline {
    pub fn pipeline(self) -> &'static RewritePipeline {
        match self {
            BuiltinPipeline::SuperCall => super_call(),
            BuiltinPipeline::ShaderMinify => shader_minify(),
            BuiltinPipeline::StripComments => strip_comments(),
        }
    }
}

fn builtin(rules: &[(&str, &str)]) -> RewritePipeline {
    rules.iter().fold(RewritePipeline::new(), |pipeline, (pattern, replacement)| {
        pipeline.with_rule(
            RewriteRule::new(pattern, *replacement).expect("built-in rewrite rules compile"),
        )
    })
}

static SUPER_CALL_PIPELINE: Lazy<RewritePipeline> =
    Lazy::new(|| builtin(&[(SUPER_CALL, SUPER_CALL_REPLACEMENT)]));

static SHADER_MINIFY_PIPELINE: Lazy<RewritePipeline> = Lazy::new(|| {
    builtin(&[
        (COMMENTS, ""),
        (LINE_EDGE_WHITESPACE, ""),
        (LINE_BREAKS, ""),
        (OPERATOR_WHITESPACE, "$1"),
    ])
});

static STRIP_COMMENTS_PIPELINE: Lazy<RewritePipeline> = Lazy::new(|| builtin(&[(COMMENTS, "")]));

/// Legacy super-call rewrite
pub fn super_call() -> &'static RewritePipeline {
    &SUPER_CALL_PIPELINE
}

/// Four-stage shader minification
pub fn shader_minify() -> &'static RewritePipeline {
    &SHADER_MINIFY_PIPELINE
}

/// Comment removal only (the first shader-minify stage)
pub fn strip_comments() -> &'static RewritePipeline {
    &STRIP_COMMENTS_PIPELINE
}
