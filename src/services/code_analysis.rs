// ABOUTME: Structural validation of tool code and schema derivation from the main() signature
// ABOUTME: The sandbox owns the real Python parser; the gateway checks shape, not full syntax

//! Tool code is Python, executed only inside the sandbox. Before a tool is
//! stored the gateway validates its structure: an `async def main(...)`
//! entry point must exist, brackets and string literals must balance, and
//! the `main` signature yields the tool's `input_schema` (annotations map to
//! JSON-schema types, defaulted parameters become optional). Import
//! statements yield `code_dependencies` for module-approval bookkeeping.

use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::OnceLock;

/// Result of structural validation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CodeValidation {
    pub valid: bool,
    pub has_main: bool,
    pub error: Option<String>,
    /// Parameter names of `main`, in declaration order.
    pub parameters: Vec<String>,
}

fn main_def_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Allow decorators/whitespace before, require `async def main(`.
    RE.get_or_init(|| Regex::new(r"(?m)^[ \t]*async[ \t]+def[ \t]+main[ \t]*\(").unwrap_or_else(|_| unreachable!()))
}

fn import_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*(?:import[ \t]+([A-Za-z_][\w.]*)|from[ \t]+([A-Za-z_][\w.]*)[ \t]+import)")
            .unwrap_or_else(|_| unreachable!())
    })
}

/// Validate tool code structure.
#[must_use]
pub fn validate_python_code(code: &str) -> CodeValidation {
    if code.trim().is_empty() {
        return CodeValidation {
            valid: false,
            has_main: false,
            error: Some("code is empty".into()),
            parameters: Vec::new(),
        };
    }

    if let Err(error) = check_brackets_and_strings(code) {
        return CodeValidation {
            valid: false,
            has_main: false,
            error: Some(error),
            parameters: Vec::new(),
        };
    }

    let signature = extract_main_signature(code);
    let has_main = signature.is_some();
    let parameters = signature
        .as_deref()
        .map(parse_parameters)
        .unwrap_or_default()
        .into_iter()
        .map(|p| p.name)
        .collect();

    CodeValidation {
        valid: true,
        has_main,
        error: if has_main {
            None
        } else {
            Some("code must contain an async def main() function".into())
        },
        parameters,
    }
}

/// Derive a JSON-schema object from the `main` signature. Returns an empty
/// object schema when no parameters are declared.
#[must_use]
pub fn extract_input_schema(code: &str) -> Value {
    let parameters = extract_main_signature(code)
        .as_deref()
        .map(parse_parameters)
        .unwrap_or_default();

    let mut properties = Map::new();
    let mut required = Vec::new();

    for param in parameters {
        properties.insert(
            param.name.clone(),
            json!({ "type": annotation_to_schema_type(param.annotation.as_deref()) }),
        );
        if !param.has_default {
            required.push(json!(param.name));
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Top-level module names imported by the code, deduplicated and sorted.
#[must_use]
pub fn extract_imports(code: &str) -> Vec<String> {
    let mut modules: Vec<String> = import_regex()
        .captures_iter(code)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| {
            m.as_str()
                .split('.')
                .next()
                .unwrap_or(m.as_str())
                .to_string()
        })
        .collect();
    modules.sort();
    modules.dedup();
    modules
}

#[derive(Debug)]
struct Parameter {
    name: String,
    annotation: Option<String>,
    has_default: bool,
}

/// Scan for unbalanced brackets or unterminated string literals, skipping
/// over string and comment contents.
fn check_brackets_and_strings(code: &str) -> Result<(), String> {
    let bytes: Vec<char> = code.chars().collect();
    let mut stack: Vec<char> = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            '#' => {
                while i < bytes.len() && bytes[i] != '\n' {
                    i += 1;
                }
            }
            '"' | '\'' => {
                let quote = c;
                let triple = i + 2 < bytes.len() && bytes[i + 1] == quote && bytes[i + 2] == quote;
                let (terminator_len, allow_newline) = if triple { (3, true) } else { (1, false) };
                i += terminator_len;
                let mut closed = false;
                while i < bytes.len() {
                    if bytes[i] == '\\' {
                        i += 2;
                        continue;
                    }
                    if !allow_newline && bytes[i] == '\n' {
                        break;
                    }
                    if bytes[i] == quote
                        && (!triple
                            || (i + 2 < bytes.len()
                                && bytes[i + 1] == quote
                                && bytes[i + 2] == quote))
                    {
                        i += terminator_len;
                        closed = true;
                        break;
                    }
                    i += 1;
                }
                if !closed && triple {
                    return Err("unterminated triple-quoted string".into());
                }
                continue;
            }
            '(' | '[' | '{' => stack.push(c),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if stack.pop() != Some(expected) {
                    return Err(format!("unbalanced '{c}'"));
                }
            }
            _ => {}
        }
        i += 1;
    }

    if stack.is_empty() {
        Ok(())
    } else {
        Err("unbalanced brackets".into())
    }
}

/// The text between the parentheses of `async def main(...)`, handling
/// nested brackets in annotations and defaults.
fn extract_main_signature(code: &str) -> Option<String> {
    let m = main_def_regex().find(code)?;
    let rest = &code[m.end()..];
    let mut depth = 1usize;
    let mut out = String::new();
    for c in rest.chars() {
        match c {
            '(' | '[' | '{' => {
                depth += 1;
                out.push(c);
            }
            ')' | ']' | '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(out);
                }
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    None
}

/// Split a signature on top-level commas and parse each parameter.
fn parse_parameters(signature: &str) -> Vec<Parameter> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in signature.chars() {
        match c {
            '(' | '[' | '{' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }

    parts
        .iter()
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() || part.starts_with('*') || part == "self" || part == "/" {
                return None;
            }
            let (head, default) = match split_top_level(part, '=') {
                Some((head, default)) => (head, Some(default)),
                None => (part.to_string(), None),
            };
            let (name, annotation) = match split_top_level(&head, ':') {
                Some((name, annotation)) => (name, Some(annotation)),
                None => (head, None),
            };
            let name = name.trim().to_string();
            if name.is_empty() {
                return None;
            }
            Some(Parameter {
                name,
                annotation: annotation.map(|a| a.trim().to_string()),
                has_default: default.is_some(),
            })
        })
        .collect()
}

/// Split on the first top-level occurrence of `sep` (outside brackets).
fn split_top_level(text: &str, sep: char) -> Option<(String, String)> {
    let mut depth = 0usize;
    for (idx, c) in text.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            c if c == sep && depth == 0 => {
                return Some((text[..idx].to_string(), text[idx + c.len_utf8()..].to_string()));
            }
            _ => {}
        }
    }
    None
}

fn annotation_to_schema_type(annotation: Option<&str>) -> &'static str {
    let Some(annotation) = annotation else {
        return "string";
    };
    let base = annotation
        .split('[')
        .next()
        .unwrap_or(annotation)
        .trim()
        .to_lowercase();
    match base.as_str() {
        "int" => "integer",
        "float" => "number",
        "bool" => "boolean",
        "list" | "tuple" | "set" => "array",
        "dict" => "object",
        _ => "string",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_async_main() {
        let validation = validate_python_code("async def main():\n    return 1\n");
        assert!(validation.valid);
        assert!(validation.has_main);
        assert!(validation.parameters.is_empty());
    }

    #[test]
    fn rejects_missing_main() {
        let validation = validate_python_code("def main():\n    return 1\n");
        assert!(validation.valid);
        assert!(!validation.has_main);
    }

    #[test]
    fn rejects_unbalanced_brackets() {
        let validation = validate_python_code("async def main(:\n    return [1, 2\n");
        assert!(!validation.valid);
    }

    #[test]
    fn schema_from_signature() {
        let code = "async def main(city: str, days: int = 3, flag: bool = False):\n    pass\n";
        let schema = extract_input_schema(code);
        assert_eq!(schema["properties"]["city"]["type"], json!("string"));
        assert_eq!(schema["properties"]["days"]["type"], json!("integer"));
        assert_eq!(schema["properties"]["flag"]["type"], json!("boolean"));
        assert_eq!(schema["required"], json!(["city"]));
    }

    #[test]
    fn schema_handles_annotated_defaults_with_brackets() {
        let code = "async def main(items: list[str] = [], mapping: dict = {}):\n    pass\n";
        let schema = extract_input_schema(code);
        assert_eq!(schema["properties"]["items"]["type"], json!("array"));
        assert_eq!(schema["properties"]["mapping"]["type"], json!("object"));
        assert_eq!(schema["required"], json!([]));
    }

    #[test]
    fn imports_are_top_level_and_deduped() {
        let code = "import json\nimport xml.etree.ElementTree\nfrom yaml import safe_load\nimport json\n";
        assert_eq!(extract_imports(code), vec!["json", "xml", "yaml"]);
    }

    #[test]
    fn string_contents_do_not_confuse_bracket_scan() {
        let code = "async def main():\n    return \"unbalanced ) ] }\"\n";
        assert!(validate_python_code(code).valid);
    }
}
