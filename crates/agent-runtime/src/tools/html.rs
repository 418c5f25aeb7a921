//! Minimal HTML to text and markdown rendering for fetched pages.

/// Elements whose content is never shown
const SKIPPED: &[&str] = &[
    "script", "style", "noscript", "template", "svg", "head", "nav", "header", "footer",
];

/// Elements that start a new line
const BLOCKS: &[&str] = &[
    "p", "div", "br", "hr", "tr", "li", "ul", "ol", "table", "section", "article", "main",
    "aside", "blockquote", "pre", "form", "h1", "h2", "h3", "h4", "h5", "h6", "dt", "dd",
];

struct Tag {
    name: String,
    closing: bool,
    self_closing: bool,
    href: Option<String>,
}

impl Tag {
    /// `inner` is the text between `<` and `>`; declarations yield `None`
    fn parse(inner: &str) -> Option<Self> {
        let inner = inner.trim();
        let (closing, body) = inner
            .strip_prefix('/')
            .map_or((false, inner), |rest| (true, rest));
        let name: String = body
            .chars()
            .take_while(char::is_ascii_alphanumeric)
            .collect::<String>()
            .to_ascii_lowercase();
        if name.is_empty() {
            return None;
        }
        let href = if name == "a" && !closing {
            attribute(body, "href")
        } else {
            None
        };
        Some(Self {
            name,
            closing,
            self_closing: body.ends_with('/'),
            href,
        })
    }

    fn heading_level(&self) -> Option<usize> {
        match self.name.as_bytes() {
            [b'h', level @ b'1'..=b'6'] => Some(usize::from(level - b'0')),
            _ => None,
        }
    }
}

fn attribute(body: &str, name: &str) -> Option<String> {
    let lower = body.to_ascii_lowercase();
    let start = lower.find(&format!("{name}="))? + name.len() + 1;
    let value = &body[start..];
    let value = match value.chars().next()? {
        quote @ ('"' | '\'') => {
            let quoted = &value[1..];
            &quoted[..quoted.find(quote)?]
        }
        _ => value
            .split(|c: char| c.is_whitespace() || c == '>')
            .next()?,
    };
    Some(decode_entities(value))
}

fn entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let code = name.strip_prefix('#')?;
            let value = match code.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse().ok()?,
            };
            char::from_u32(value)
        }
    }
}

/// Decode named and numeric character references; unknown ones stay as written
pub fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail
            .find(';')
            .filter(|&end| end <= 10)
            .and_then(|end| entity(&tail[1..end]).map(|c| (c, end)));
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Text after the closing tag of `name`; script bodies may contain `<`
fn skip_element<'a>(html: &'a str, name: &str) -> &'a str {
    let lower = html.to_ascii_lowercase();
    lower
        .find(&format!("</{name}"))
        .and_then(|at| html[at..].find('>').map(|end| &html[at + end + 1..]))
        .unwrap_or("")
}

/// Append text with HTML whitespace collapsing
fn push_text(out: &mut String, raw: &str) {
    let mut spaced = out.is_empty() || out.ends_with([' ', '\n']);
    for c in decode_entities(raw).chars() {
        if c.is_whitespace() {
            if !spaced {
                out.push(' ');
                spaced = true;
            }
        } else {
            out.push(c);
            spaced = false;
        }
    }
}

/// Trim lines and keep at most one blank line between paragraphs
fn tidy(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    for line in text.lines().map(str::trim) {
        if !line.is_empty() {
            lines.push(line);
        } else if lines.last().is_some_and(|last| !last.is_empty()) {
            lines.push("");
        }
    }
    while lines.last() == Some(&"") {
        lines.pop();
    }
    lines.join("\n")
}

/// Visible text of a page. With `markdown`, headings, list items, emphasis and
/// links keep their markdown form.
pub fn render(html: &str, markdown: bool) -> String {
    let mut out = String::with_capacity(html.len() / 2);
    let mut link: Option<String> = None;
    let mut rest = html;

    while let Some(open) = rest.find('<') {
        push_text(&mut out, &rest[..open]);
        let after = &rest[open + 1..];

        if let Some(comment) = after.strip_prefix("!--") {
            rest = comment.find("-->").map_or("", |end| &comment[end + 3..]);
            continue;
        }
        let Some(close) = after.find('>') else {
            rest = "";
            break;
        };
        let tag = Tag::parse(&after[..close]);
        rest = &after[close + 1..];
        let Some(tag) = tag else { continue };

        if SKIPPED.contains(&tag.name.as_str()) {
            if !tag.closing && !tag.self_closing {
                rest = skip_element(rest, &tag.name);
            }
            continue;
        }

        if markdown {
            match (tag.name.as_str(), tag.closing) {
                ("a", false) => {
                    link = tag
                        .href
                        .filter(|h| !h.starts_with('#') && !h.starts_with("javascript:"));
                    if link.is_some() {
                        out.push('[');
                    }
                    continue;
                }
                ("a", true) => {
                    if let Some(href) = link.take() {
                        out.push_str("](");
                        out.push_str(&href);
                        out.push(')');
                    }
                    continue;
                }
                ("strong" | "b", _) => {
                    out.push_str("**");
                    continue;
                }
                ("em" | "i", _) => {
                    out.push('*');
                    continue;
                }
                ("li", false) => {
                    out.push_str("\n- ");
                    continue;
                }
                _ => {}
            }
            if let (Some(level), false) = (tag.heading_level(), tag.closing) {
                out.push_str("\n\n");
                out.push_str(&"#".repeat(level));
                out.push(' ');
                continue;
            }
        }

        // list items are opened on a new line, closing one adds nothing
        if BLOCKS.contains(&tag.name.as_str()) && !(tag.closing && tag.name == "li") {
            out.push('\n');
        }
    }
    push_text(&mut out, rest);

    tidy(&out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!DOCTYPE html>
<html><head><title>Ignored</title><style>p { color: red; }</style></head>
<body>
  <nav><a href="/home">Home</a></nav>
  <h1>Release   notes</h1>
  <!-- build 42 -->
  <p>Version <b>2.0</b> is out &amp; ready.</p>
  <ul><li>Faster</li><li>See <a href="https://example.com/docs">the docs</a></li></ul>
  <script>alert("x < y")</script>
  <p>Caf&#233; &lt;tag&gt;</p>
</body></html>"#;

    #[test]
    fn test_plain_text_drops_markup_and_chrome() {
        let text = render(PAGE, false);
        assert_eq!(
            text,
            "Release notes\n\nVersion 2.0 is out & ready.\n\nFaster\nSee the docs\n\nCafé <tag>"
        );
    }

    #[test]
    fn test_markdown_keeps_structure() {
        let md = render(PAGE, true);
        assert!(md.starts_with("# Release notes"));
        assert!(md.contains("Version **2.0** is out & ready."));
        assert!(md.contains("- Faster\n- See [the docs](https://example.com/docs)"));
        assert!(!md.contains("Home"));
        assert!(!md.contains("alert"));
    }

    #[test]
    fn test_entities() {
        assert_eq!(decode_entities("a &amp; b &#x41; &bogus; &"), "a & b A &bogus; &");
        assert_eq!(decode_entities("&quot;hi&quot;&nbsp;"), "\"hi\" ");
    }

    #[test]
    fn test_unquoted_attribute() {
        let tag = Tag::parse("a href=/path class=x").unwrap();
        assert_eq!(tag.href.as_deref(), Some("/path"));
        assert!(Tag::parse("!DOCTYPE html").is_none());
    }
}
