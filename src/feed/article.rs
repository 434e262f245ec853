use super::dialect::Detected;
use super::xml::XmlElement;
use scraper::{ElementRef, Html};

/// Characters stripped from the ends of extracted fields. Feeds such as
/// GitHub commit logs pad titles with newlines and spaces.
const FIELD_PADDING: &[char] = &['\r', '\n', ' '];

fn strip_padding(s: &str) -> &str {
    s.trim_matches(FIELD_PADDING)
}

/// Child elements of an article container keyed by tag name.
///
/// Iteration follows document order. When a tag repeats, only its first
/// occurrence is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraFields {
    entries: Vec<(String, XmlElement)>,
}

impl ExtraFields {
    /// Inserts `element` under its tag name unless the tag is already present.
    /// Returns whether it was inserted.
    pub fn insert_if_absent(&mut self, element: &XmlElement) -> bool {
        if self.contains_key(element.name()) {
            return false;
        }
        self.entries
            .push((element.name().to_string(), element.clone()));
        true
    }

    pub fn get(&self, name: &str) -> Option<&XmlElement> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, el)| el)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.entries.iter().any(|(key, _)| key == name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &XmlElement)> {
        self.entries.iter().map(|(key, el)| (key.as_str(), el))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One item or entry of a feed.
///
/// `title`, `link` and `description` are always present; a feed that omits
/// them yields empty strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    title: String,
    link: String,
    description: String,
    extra_fields: ExtraFields,
}

impl Article {
    pub fn new(
        title: impl AsRef<str>,
        link: impl AsRef<str>,
        description: impl AsRef<str>,
        extra_fields: ExtraFields,
    ) -> Self {
        Self {
            title: title.as_ref().trim().to_string(),
            link: link.as_ref().trim().to_string(),
            description: description.as_ref().trim().to_string(),
            extra_fields,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn link(&self) -> &str {
        &self.link
    }

    /// Plain-text body. HTML bodies are reduced to their text.
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn extra_fields(&self) -> &ExtraFields {
        &self.extra_fields
    }
}

/// Builds an article from one `<item>` or `<entry>` element.
///
/// Children are visited once in document order. A repeated `title`, `link`
/// or body tag overwrites the value taken from the earlier one, so an Atom
/// entry with both `<summary>` and `<content>` ends up with the content.
pub fn article_from_container(container: &XmlElement) -> Article {
    let mut title = String::new();
    let mut link = String::new();
    let mut description = String::new();
    let mut extra_fields = ExtraFields::default();

    for child in container.child_elements() {
        match child.name() {
            "title" => title = strip_padding(&child.inner_text()).to_string(),
            // Atom links live in href, RSS links in the element text
            "link" => {
                link = match child.attribute("href") {
                    Some(href) => href.to_string(),
                    None => child.inner_text(),
                }
            }
            "summary" | "content" | "description" => description = body_text(child),
            _ => {}
        }
        extra_fields.insert_if_absent(child);
    }

    Article::new(title, link, description, extra_fields)
}

fn body_text(element: &XmlElement) -> String {
    let text = element.inner_text();
    let text = strip_padding(&text);
    if element.attribute("type") == Some("html") {
        strip_padding(&html_fragment_text(text)).to_string()
    } else {
        text.to_string()
    }
}

/// Text of an HTML fragment. A top-level `<pre>` block, when present, is
/// taken on its own.
pub fn html_fragment_text(fragment: &str) -> String {
    let html = Html::parse_fragment(fragment);
    let root = html.root_element();

    let pre = root
        .children()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "pre");

    match pre {
        Some(pre) => pre.text().collect(),
        None => root.text().collect(),
    }
}

/// Extracts every article of a detected feed, in container order.
pub fn extract_articles(detected: &Detected<'_>) -> Vec<Article> {
    detected
        .containers()
        .into_iter()
        .map(article_from_container)
        .collect()
}
