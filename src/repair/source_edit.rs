//! Text edits applied to Python test files: import merging and function
//! replacement

use regex::Regex;

/// Add `imports` that are not already present, after the last top-level
/// import (or after the module docstring, or at the top). Returns the new
/// content and the number of lines added.
pub fn merge_imports(content: &str, imports: &[String]) -> (String, usize) {
    let lines: Vec<&str> = content.lines().collect();

    let mut new_imports: Vec<&str> = Vec::new();
    for import in imports.iter().map(|i| i.trim()).filter(|i| !i.is_empty()) {
        let present = lines.iter().any(|line| line.trim_end() == import);
        if !present && !new_imports.contains(&import) {
            new_imports.push(import);
        }
    }
    if new_imports.is_empty() {
        return (content.to_string(), 0);
    }

    let insert_at = match lines.iter().rposition(|line| is_top_level_import(line)) {
        Some(index) => index + 1,
        None => module_docstring_end(&lines).unwrap_or(0),
    };

    let mut merged: Vec<&str> = Vec::with_capacity(lines.len() + new_imports.len());
    merged.extend_from_slice(&lines[..insert_at]);
    merged.extend(new_imports.iter().copied());
    if insert_at == 0 && !lines.is_empty() && !lines[0].trim().is_empty() {
        merged.push("");
    }
    merged.extend_from_slice(&lines[insert_at..]);

    let mut result = merged.join("\n");
    result.push('\n');
    (result, new_imports.len())
}

fn is_top_level_import(line: &str) -> bool {
    line.starts_with("import ") || line.starts_with("from ")
}

/// Line index just past a leading module docstring
fn module_docstring_end(lines: &[&str]) -> Option<usize> {
    let first = lines.iter().position(|l| !l.trim().is_empty())?;
    let opening = lines[first].trim_start();
    let quote = ["\"\"\"", "'''"]
        .into_iter()
        .find(|q| opening.starts_with(q))?;

    let rest = &opening[quote.len()..];
    if rest.contains(quote) {
        return Some(first + 1);
    }
    lines[first + 1..]
        .iter()
        .position(|l| l.contains(quote))
        .map(|offset| first + 1 + offset + 1)
}

/// Replace the top-level function `name` with `new_code`.
///
/// The replaced region runs from `def name(` (or `async def name(`) at column
/// zero up to the next top-level `def`, `async def`, `class` or decorator, or
/// to the end of the file. Returns `None` when no such function exists.
pub fn replace_function_source(content: &str, name: &str, new_code: &str) -> Option<String> {
    let start_pattern = Regex::new(&format!(
        r"(?m)^(?:async[ \t]+)?def[ \t]+{}[ \t]*\(",
        regex::escape(name)
    ))
    .ok()?;
    let start = start_pattern.find(content)?.start();

    // Search for the next definition from the line after the signature
    let after_start = content[start..]
        .find('\n')
        .map(|offset| start + offset + 1)
        .unwrap_or(content.len());
    let next_definition = Regex::new(r"(?m)^(?:async[ \t]+def[ \t]|def[ \t]|class[ \t]|@)").ok()?;
    let end = next_definition
        .find_at(content, after_start)
        .map(|m| m.start());

    let mut result = String::with_capacity(content.len() + new_code.len());
    result.push_str(&content[..start]);
    result.push_str(new_code.trim_end());
    match end {
        Some(end) => {
            result.push_str("\n\n\n");
            result.push_str(&content[end..]);
        }
        None => result.push('\n'),
    }
    Some(result)
}

/// Replace lines `start_line..=end_line` (1-based) with `new_code`,
/// re-indented to match the original first line. Used for methods of test
/// classes, which the top-level pattern cannot find.
pub fn replace_line_span(
    content: &str,
    start_line: u32,
    end_line: u32,
    new_code: &str,
) -> Option<String> {
    let lines: Vec<&str> = content.lines().collect();
    let start = start_line.checked_sub(1)? as usize;
    let end = end_line as usize;
    if start >= end || end > lines.len() {
        return None;
    }

    let indent = &lines[start][..indent_width(lines[start])];
    let replacement = reindent(new_code, indent);

    let mut result: Vec<String> = lines[..start].iter().map(|l| l.to_string()).collect();
    result.extend(replacement);
    result.extend(lines[end..].iter().map(|l| l.to_string()));

    let mut joined = result.join("\n");
    joined.push('\n');
    Some(joined)
}

fn reindent(code: &str, indent: &str) -> Vec<String> {
    let code_lines: Vec<&str> = code.trim_end().lines().collect();
    let common = code_lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| indent_width(l))
        .min()
        .unwrap_or(0);

    code_lines
        .iter()
        .map(|l| {
            if l.trim().is_empty() {
                String::new()
            } else {
                format!("{}{}", indent, &l[common..])
            }
        })
        .collect()
}

/// Byte length of a line's leading spaces and tabs. Other whitespace, such
/// as U+00A0, counts as content.
fn indent_width(line: &str) -> usize {
    line.chars().take_while(|c| *c == ' ' || *c == '\t').count()
}
