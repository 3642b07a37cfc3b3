use tracing::debug;

use crate::types::FormatError;

/// A single unfolded content line: `NAME;PARAM=VALUE:value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub params: Vec<(String, String)>,
    pub value: String,
}

impl Property {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    /// Value with TEXT escapes resolved.
    pub fn text(&self) -> String {
        unescape_text(&self.value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Component {
    pub name: String,
    pub properties: Vec<Property>,
    pub children: Vec<Component>,
}

impl Component {
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn properties_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Property> + 'a {
        self.properties.iter().filter(move |p| p.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Component> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }
}

pub struct FeedParser;

impl FeedParser {
    /// Parses the first `VCALENDAR` object in `content`.
    pub fn parse(content: &str) -> Result<Component, FormatError> {
        let mut stack: Vec<Component> = Vec::new();
        let mut root = None;

        for (index, line) in unfold(content).iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            let property = parse_line(line)
                .map_err(|message| FormatError::new(format!("content line {}", index + 1), message))?;

            match property.name.as_str() {
                "BEGIN" => stack.push(Component {
                    name: property.value.trim().to_ascii_uppercase(),
                    ..Default::default()
                }),
                "END" => {
                    let name = property.value.trim().to_ascii_uppercase();
                    let component = stack
                        .pop()
                        .ok_or_else(|| FormatError::new(format!("END:{name}"), "no open component"))?;
                    if component.name != name {
                        return Err(FormatError::new(
                            format!("END:{name}"),
                            format!("expected END:{}", component.name),
                        ));
                    }
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(component),
                        None => {
                            root = Some(component);
                            break;
                        }
                    }
                }
                _ => match stack.last_mut() {
                    Some(component) => component.properties.push(property),
                    None => debug!(name = %property.name, "Ignoring property outside of any component"),
                },
            }
        }

        let root = match root {
            Some(root) => root,
            None if stack.is_empty() => {
                return Err(FormatError::new("feed", "no calendar object found"));
            }
            None => {
                return Err(FormatError::new("feed", "unterminated component"));
            }
        };

        if root.name != "VCALENDAR" {
            return Err(FormatError::new(
                format!("BEGIN:{}", root.name),
                "expected a VCALENDAR object",
            ));
        }

        debug!(
            components = root.children.len(),
            "Parsed calendar object"
        );
        Ok(root)
    }
}

/// Joins continuation lines (leading space or tab) onto their predecessor.
fn unfold(content: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in content.lines() {
        if let Some(rest) = raw.strip_prefix(' ').or_else(|| raw.strip_prefix('\t')) {
            if let Some(last) = lines.last_mut() {
                last.push_str(rest);
                continue;
            }
        }
        lines.push(raw.to_string());
    }
    lines
}

fn parse_line(line: &str) -> Result<Property, String> {
    let mut in_quotes = false;
    let mut colon = None;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ':' if !in_quotes => {
                colon = Some(index);
                break;
            }
            _ => {}
        }
    }
    let colon = colon.ok_or_else(|| format!("missing ':' in `{line}`"))?;

    let mut head = split_unquoted(&line[..colon], ';').into_iter();
    let name = head.next().unwrap_or_default().trim().to_ascii_uppercase();
    if name.is_empty() {
        return Err(format!("missing property name in `{line}`"));
    }

    let params = head
        .filter_map(|param| {
            let (key, value) = param.split_once('=')?;
            Some((
                key.trim().to_ascii_uppercase(),
                value.trim().trim_matches('"').to_string(),
            ))
        })
        .collect();

    Ok(Property {
        name,
        params,
        value: line[colon + 1..].to_string(),
    })
}

pub(crate) fn split_unquoted(s: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (index, ch) in s.char_indices() {
        if ch == '"' {
            in_quotes = !in_quotes;
        } else if ch == separator && !in_quotes {
            parts.push(&s[start..index]);
            start = index + ch.len_utf8();
        }
    }
    parts.push(&s[start..]);
    parts
}

pub fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
