//! Final-output shaping for the notification channel.
//!
//! The channel takes plain text with a hard size limit, so the model's
//! markdown is rendered down and split into chunks before sending.

use comrak::nodes::{AstNode, NodeValue};
use comrak::{parse_document, Arena, Options};

/// Hard per-message character limit of the channel.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Render markdown to plain text.
///
/// Markup is dropped; text, inline code, code blocks and list structure
/// survive. Unknown node kinds degrade to their inline text.
#[must_use]
pub fn markdown_to_text(markdown: &str) -> String {
    let arena = Arena::new();
    let root = parse_document(&arena, markdown, &Options::default());

    let mut out = String::new();
    render_block(root, &mut out);
    out
}

fn render_block<'a>(node: &'a AstNode<'a>, out: &mut String) {
    match &node.data.borrow().value {
        NodeValue::Document | NodeValue::List(_) | NodeValue::BlockQuote => {
            for child in node.children() {
                render_block(child, out);
            }
        }
        NodeValue::Paragraph | NodeValue::Heading(_) => {
            let mut line = String::new();
            render_inline_children(node, &mut line);
            push_block(out, &line);
        }
        NodeValue::CodeBlock(block) => {
            push_block(out, block.literal.trim_end());
        }
        NodeValue::Item(_) => {
            let mut line = String::new();
            for child in node.children() {
                render_inline_children(child, &mut line);
            }
            push_block(out, &format!("- {line}"));
        }
        NodeValue::ThematicBreak => push_block(out, "---"),
        _ => {
            let mut line = String::new();
            render_inline(node, &mut line);
            if !line.is_empty() {
                push_block(out, &line);
            }
        }
    }
}

fn render_inline_children<'a>(node: &'a AstNode<'a>, out: &mut String) {
    for child in node.children() {
        render_inline(child, out);
    }
}

fn render_inline<'a>(node: &'a AstNode<'a>, out: &mut String) {
    match &node.data.borrow().value {
        NodeValue::Text(text) => out.push_str(text),
        NodeValue::Code(code) => out.push_str(&code.literal),
        NodeValue::SoftBreak | NodeValue::LineBreak => out.push('\n'),
        _ => render_inline_children(node, out),
    }
}

fn push_block(out: &mut String, block: &str) {
    if block.is_empty() {
        return;
    }
    if !out.is_empty() {
        out.push_str("\n\n");
    }
    out.push_str(block);
}

/// Split text into chunks of at most `limit` characters.
///
/// Splits prefer line boundaries; a single line longer than the limit is
/// hard-split on a character boundary. Empty input yields no chunks.
#[must_use]
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for line in text.split('\n') {
        let line_chars = line.chars().count();
        let joined = current_chars + line_chars + usize::from(!current.is_empty());

        if joined <= limit {
            if !current.is_empty() {
                current.push('\n');
                current_chars += 1;
            }
            current.push_str(line);
            current_chars += line_chars;
            continue;
        }

        if !current.is_empty() {
            parts.push(std::mem::take(&mut current));
            current_chars = 0;
        }

        if line_chars <= limit {
            current.push_str(line);
            current_chars = line_chars;
        } else {
            // Hard-split an overlong line into limit-sized pieces; the
            // last piece stays open so following lines can join it.
            let chars: Vec<char> = line.chars().collect();
            let mut chunks = chars.chunks(limit).peekable();
            while let Some(chunk) = chunks.next() {
                let piece: String = chunk.iter().collect();
                if chunks.peek().is_some() {
                    parts.push(piece);
                } else {
                    current_chars = piece.chars().count();
                    current = piece;
                }
            }
        }
    }

    if !current.is_empty() {
        parts.push(current);
    }
    parts
}
