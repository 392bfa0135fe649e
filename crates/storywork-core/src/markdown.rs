//! Line-oriented markdown section model.
//!
//! Only ATX headings (`#` .. `######`) are recognized, and never inside
//! fenced code blocks. Each heading opens a [`Section`] that runs to the next
//! heading; its subtree runs to the next heading of the same or higher level.

/// One ATX heading and the byte ranges it governs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub level: usize,
    pub title: String,
    /// Zero-based line index of the heading.
    pub line: usize,
    /// Byte offset of the heading line.
    pub start: usize,
    /// Byte offset just past the heading line.
    pub body_start: usize,
    /// Byte offset of the next heading of any level, or end of text.
    pub end: usize,
}

#[derive(Debug, Clone)]
pub struct Document<'a> {
    text: &'a str,
    sections: Vec<Section>,
}

impl<'a> Document<'a> {
    pub fn parse(text: &'a str) -> Self {
        let mut sections: Vec<Section> = Vec::new();
        let mut fence: Option<(char, usize)> = None;
        let mut offset = 0;

        for (idx, raw_line) in text.split_inclusive('\n').enumerate() {
            let start = offset;
            offset += raw_line.len();
            let line = raw_line.trim_end_matches(['\n', '\r']);

            if let Some(marker) = fence_marker(line) {
                match fence {
                    None => fence = Some(marker),
                    Some((ch, len)) if marker.0 == ch && marker.1 >= len => fence = None,
                    Some(_) => {}
                }
                continue;
            }
            if fence.is_some() {
                continue;
            }
            if let Some((level, title)) = heading(line) {
                if let Some(prev) = sections.last_mut() {
                    prev.end = start;
                }
                sections.push(Section {
                    level,
                    title,
                    line: idx,
                    start,
                    body_start: offset,
                    end: text.len(),
                });
            }
        }

        Self { text, sections }
    }

    pub fn text(&self) -> &'a str {
        self.text
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, idx: usize) -> &Section {
        &self.sections[idx]
    }

    /// First section matching `pred`.
    pub fn find(&self, mut pred: impl FnMut(&Section) -> bool) -> Option<usize> {
        self.sections.iter().position(|s| pred(s))
    }

    /// First heading at `level` whose normalized title equals `title`,
    /// ignoring whitespace differences.
    pub fn find_title(&self, level: usize, title: &str) -> Option<usize> {
        self.find(|s| s.level == level && title_eq(&s.title, title))
    }

    /// Text between the heading line and the next heading.
    pub fn body(&self, idx: usize) -> &'a str {
        let s = &self.sections[idx];
        &self.text[s.body_start..s.end]
    }

    /// Byte offset where the subtree of `idx` ends.
    pub fn subtree_end(&self, idx: usize) -> usize {
        let level = self.sections[idx].level;
        self.sections[idx + 1..]
            .iter()
            .find(|s| s.level <= level)
            .map(|s| s.start)
            .unwrap_or(self.text.len())
    }

    /// Heading, body and every nested section of `idx`.
    pub fn subtree(&self, idx: usize) -> &'a str {
        &self.text[self.sections[idx].start..self.subtree_end(idx)]
    }

    /// Everything after the subtree of `idx`.
    pub fn after_subtree(&self, idx: usize) -> &'a str {
        &self.text[self.subtree_end(idx)..]
    }

    /// Indices of the sections nested inside `idx`.
    pub fn descendants(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        let end = self.subtree_end(idx);
        (idx + 1..self.sections.len()).take_while(move |&i| self.sections[i].start < end)
    }

    /// First nested section of `idx` whose title matches `title`.
    pub fn child_titled(&self, idx: usize, title: &str) -> Option<usize> {
        self.descendants(idx)
            .find(|&i| title_eq(&self.sections[i].title, title))
    }
}

/// `- item` / `* item` lines, trimmed. `none` placeholders are dropped.
pub fn bullet_items(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            line.strip_prefix("- ").or_else(|| line.strip_prefix("* "))
        })
        .map(str::trim)
        .filter(|item| !item.is_empty() && !item.eq_ignore_ascii_case("none"))
        .map(str::to_string)
        .collect()
}

/// Drop a leading `3. ` numbering and a trailing `(...)` qualifier.
pub fn normalize_title(title: &str) -> &str {
    let mut t = title.trim();
    if let Some(dot) = t.find(". ") {
        if dot > 0 && t[..dot].chars().all(|c| c.is_ascii_digit()) {
            t = t[dot + 2..].trim_start();
        }
    }
    if t.ends_with(')') {
        if let Some(open) = t.rfind('(') {
            if open > 0 {
                t = t[..open].trim_end();
            }
        }
    }
    t
}

/// Compare normalized titles, ignoring whitespace differences.
pub fn title_eq(a: &str, b: &str) -> bool {
    let squash = |s: &str| normalize_title(s).split_whitespace().collect::<String>();
    squash(a) == squash(b)
}

fn heading(line: &str) -> Option<(usize, String)> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > 3 {
        return None;
    }
    let rest = &line[indent..];
    let level = rest.chars().take_while(|&c| c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let after = &rest[level..];
    if !after.is_empty() && !after.starts_with([' ', '\t']) {
        return None;
    }
    let title = after.trim().trim_end_matches('#').trim_end();
    Some((level, title.to_string()))
}

fn fence_marker(line: &str) -> Option<(char, usize)> {
    let t = line.trim_start_matches(' ');
    if line.len() - t.len() > 3 {
        return None;
    }
    let ch = t.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let len = t.chars().take_while(|&c| c == ch).count();
    (len >= 3).then_some((ch, len))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "\
# Title

intro

## 🏷️ Labels (Proposed)
### Required
- status:ready-for-dev
- domain:billing

### Blocking / Risk
- none

## 1. Story Header
text
```
## not a heading
```
## 5. Business Rules (Translated to UI Behavior)
rules
";

    #[test]
    fn headings_and_offsets() {
        let doc = Document::parse(DOC);
        let titles: Vec<(usize, &str)> = doc
            .sections()
            .iter()
            .map(|s| (s.level, s.title.as_str()))
            .collect();
        assert_eq!(
            titles,
            vec![
                (1, "Title"),
                (2, "🏷️ Labels (Proposed)"),
                (3, "Required"),
                (3, "Blocking / Risk"),
                (2, "1. Story Header"),
                (2, "5. Business Rules (Translated to UI Behavior)"),
            ]
        );
        assert_eq!(doc.body(0), "\nintro\n\n");
        assert_eq!(doc.section(4).line, 12);
    }

    #[test]
    fn fenced_code_is_not_parsed() {
        let doc = Document::parse(DOC);
        assert!(doc.sections().iter().all(|s| s.title != "not a heading"));
        assert!(doc.body(4).contains("## not a heading"));
    }

    #[test]
    fn subtree_spans_nested_sections() {
        let doc = Document::parse(DOC);
        let labels = doc.find_title(2, "🏷️ Labels (Proposed)");
        // The parenthetical is a qualifier, so the bare title also matches.
        assert_eq!(labels, doc.find_title(2, "🏷️ Labels"));
        let labels = labels.unwrap();
        assert!(doc.subtree(labels).contains("status:ready-for-dev"));
        assert!(doc.after_subtree(labels).starts_with("## 1. Story Header"));
        assert_eq!(doc.descendants(labels).collect::<Vec<_>>(), vec![2, 3]);

        let required = doc.child_titled(labels, "Required").unwrap();
        assert_eq!(
            bullet_items(doc.body(required)),
            vec!["status:ready-for-dev", "domain:billing"]
        );
        let blocking = doc.child_titled(labels, "Blocking/Risk").unwrap();
        assert!(bullet_items(doc.body(blocking)).is_empty());
    }

    #[test]
    fn normalized_titles() {
        assert_eq!(normalize_title("3. Actors & Stakeholders"), "Actors & Stakeholders");
        assert_eq!(
            normalize_title("Business Rules (Translated to UI Behavior)"),
            "Business Rules"
        );
        assert_eq!(normalize_title("Story Intent"), "Story Intent");
        assert_eq!(normalize_title("v1. draft"), "v1. draft");
    }

    #[test]
    fn heading_requires_space_after_hashes() {
        let doc = Document::parse("#tag\n####### seven\n   ## Indented ##\n");
        let titles: Vec<&str> = doc.sections().iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Indented"]);
    }
}
