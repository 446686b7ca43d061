use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const DEFAULT_INDEX_WIDTH: usize = 2;
/// A padded index never needs to exceed a file name.
pub const MAX_INDEX_WIDTH: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplatePart {
    Literal(String),
    Variable(Variable),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variable {
    Index,
    Name,
    Date,
}

/// A compiled naming pattern. Only obtainable through [`compile`], so every
/// variable it holds is a recognized one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    parts: Vec<TemplatePart>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template is empty")]
    Empty,
    #[error("template has unbalanced braces")]
    UnbalancedBraces,
    #[error("unknown template variable: {{{0}}}")]
    UnknownVariable(String),
}

/// Values substituted into one rendered name.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub index: usize,
    pub name: &'a str,
    pub date: &'a str,
    pub index_format: IndexFormat,
}

impl Template {
    pub fn parts(&self) -> &[TemplatePart] {
        &self.parts
    }

    pub fn render(&self, ctx: &RenderContext<'_>) -> String {
        let mut output = String::new();
        for part in &self.parts {
            match part {
                TemplatePart::Literal(s) => output.push_str(s),
                TemplatePart::Variable(Variable::Index) => {
                    output.push_str(&ctx.index_format.format(ctx.index))
                }
                TemplatePart::Variable(Variable::Name) => output.push_str(ctx.name),
                TemplatePart::Variable(Variable::Date) => output.push_str(ctx.date),
            }
        }
        output
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

pub fn compile(input: &str) -> Result<Template, TemplateError> {
    if input.is_empty() {
        return Err(TemplateError::Empty);
    }

    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut chars = input.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '{' => {
                if !literal.is_empty() {
                    parts.push(TemplatePart::Literal(std::mem::take(&mut literal)));
                }
                let mut token = String::new();
                let mut found_close = false;
                for next in chars.by_ref() {
                    if next == '}' {
                        found_close = true;
                        break;
                    }
                    if next == '{' {
                        return Err(TemplateError::UnbalancedBraces);
                    }
                    token.push(next);
                }
                if !found_close || token.is_empty() {
                    return Err(TemplateError::UnbalancedBraces);
                }
                parts.push(TemplatePart::Variable(parse_variable(&token)?));
            }
            '}' => return Err(TemplateError::UnbalancedBraces),
            _ => literal.push(ch),
        }
    }

    if !literal.is_empty() {
        parts.push(TemplatePart::Literal(literal));
    }

    Ok(Template {
        source: input.to_string(),
        parts,
    })
}

fn parse_variable(token: &str) -> Result<Variable, TemplateError> {
    match token {
        "index" => Ok(Variable::Index),
        "name" => Ok(Variable::Name),
        "date" => Ok(Variable::Date),
        other => Err(TemplateError::UnknownVariable(other.to_string())),
    }
}

/// Zero-padding applied to `{index}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct IndexFormat {
    width: usize,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexFormatError {
    #[error("index width must be at least 1")]
    ZeroWidth,
    #[error("index width {0} is too wide (at most {max})", max = MAX_INDEX_WIDTH)]
    TooWide(usize),
    #[error("unsupported index format: {0} (expected e.g. {{:03}} or 3)")]
    Unsupported(String),
}

impl IndexFormat {
    pub fn new(width: usize) -> Result<Self, IndexFormatError> {
        if width == 0 {
            return Err(IndexFormatError::ZeroWidth);
        }
        if width > MAX_INDEX_WIDTH {
            return Err(IndexFormatError::TooWide(width));
        }
        Ok(Self { width })
    }

    /// Accepts the zero-padded form `{:03}` or a bare width such as `3`.
    /// `{:3}` is rejected since it would mean space padding.
    pub fn parse(input: &str) -> Result<Self, IndexFormatError> {
        let trimmed = input.trim();
        let digits = match trimmed.strip_prefix("{:0").and_then(|s| s.strip_suffix('}')) {
            Some(spec) => spec,
            None => trimmed,
        };
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(IndexFormatError::Unsupported(input.to_string()));
        }
        let width = digits
            .parse::<usize>()
            .map_err(|_| IndexFormatError::Unsupported(input.to_string()))?;
        Self::new(width)
    }

    pub fn width(self) -> usize {
        self.width
    }

    pub fn format(self, index: usize) -> String {
        format!("{:0width$}", index, width = self.width)
    }
}

impl Default for IndexFormat {
    fn default() -> Self {
        Self {
            width: DEFAULT_INDEX_WIDTH,
        }
    }
}

impl TryFrom<usize> for IndexFormat {
    type Error = IndexFormatError;

    fn try_from(width: usize) -> Result<Self, Self::Error> {
        Self::new(width)
    }
}

impl From<IndexFormat> for usize {
    fn from(value: IndexFormat) -> Self {
        value.width
    }
}
