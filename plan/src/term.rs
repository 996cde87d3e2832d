//! The parsed query tree and its canonical text form.

use std::fmt;

/// A parsed query expression, arena-allocated.
///
/// `And`/`Or` hold at least two children, stored in source order.
/// The canonical formatter prints multi-child lists in reverse, the
/// order a prepend-built child list would naturally carry.
#[derive(Debug, PartialEq, Eq)]
pub enum TermNode<'a> {
    Unigram { text: &'a str, stream: u8 },
    Phrase { stream: u8, grams: &'a [&'a str] },
    And { children: &'a [&'a TermNode<'a>] },
    Or { children: &'a [&'a TermNode<'a>] },
    Not { child: &'a TermNode<'a> },
}

impl TermNode<'_> {
    /// Write the canonical text form.
    pub fn format<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        self.format_at(out, 0)
    }

    fn format_at<W: fmt::Write>(&self, out: &mut W, level: usize) -> fmt::Result {
        match self {
            TermNode::Unigram { text, stream } => {
                out.write_str("Unigram(")?;
                write_quoted(out, text)?;
                write!(out, ", {stream})")
            }
            TermNode::Phrase { stream, grams } => {
                out.write_str("Phrase {\n")?;
                indent(out, level + 1)?;
                write!(out, "StreamId: {stream},\n")?;
                indent(out, level + 1)?;
                out.write_str("Grams: [\n")?;
                for (i, gram) in grams.iter().enumerate() {
                    indent(out, level + 2)?;
                    write_quoted(out, gram)?;
                    out.write_str(if i + 1 < grams.len() { ",\n" } else { "\n" })?;
                }
                indent(out, level + 1)?;
                out.write_str("]\n")?;
                indent(out, level)?;
                out.write_str("}")
            }
            TermNode::And { children } => format_list(out, level, "And", children),
            TermNode::Or { children } => format_list(out, level, "Or", children),
            TermNode::Not { child } => {
                out.write_str("Not {\n")?;
                indent(out, level + 1)?;
                out.write_str("Child: ")?;
                child.format_at(out, level + 1)?;
                out.write_str("\n")?;
                indent(out, level)?;
                out.write_str("}")
            }
        }
    }
}

fn format_list<W: fmt::Write>(
    out: &mut W,
    level: usize,
    name: &str,
    children: &[&TermNode<'_>],
) -> fmt::Result {
    write!(out, "{name} {{\n")?;
    indent(out, level + 1)?;
    out.write_str("Children: [\n")?;
    // Reverse insertion order.
    for (i, child) in children.iter().rev().enumerate() {
        indent(out, level + 2)?;
        child.format_at(out, level + 2)?;
        out.write_str(if i + 1 < children.len() { ",\n" } else { "\n" })?;
    }
    indent(out, level + 1)?;
    out.write_str("]\n")?;
    indent(out, level)?;
    out.write_str("}")
}

fn indent<W: fmt::Write>(out: &mut W, level: usize) -> fmt::Result {
    for _ in 0..level {
        out.write_str("  ")?;
    }
    Ok(())
}

/// Quoted text with embedded `"` and `\` escaped.
fn write_quoted<W: fmt::Write>(out: &mut W, text: &str) -> fmt::Result {
    out.write_char('"')?;
    for c in text.chars() {
        if c == '"' || c == '\\' {
            out.write_char('\\')?;
        }
        out.write_char(c)?;
    }
    out.write_char('"')
}

impl fmt::Display for TermNode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.format_at(f, 0)
    }
}
