//! Feed dialects and per-dialect traversal rules.
//!
//! Detection picks one [`DialectStrategy`] per refresh. Both the property
//! lookup and the article extractor then go through that strategy instead of
//! branching on the dialect themselves.

use super::xml::{XmlDocument, XmlElement};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The XML schema a feed is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// RSS 2.0, rooted at `<rss>`
    Rss2,
    /// RSS 1.0 (RDF), rooted at `<rdf:RDF>`
    Rss1,
    /// Atom, rooted at `<feed>`
    Atom,
    /// Detect from the document
    #[default]
    Infer,
}

impl Dialect {
    /// Order in which [`Dialect::Infer`] looks for tag names.
    pub const INFER_ORDER: [Dialect; 3] = [Dialect::Rss2, Dialect::Rss1, Dialect::Atom];

    /// Tag name of the element that identifies this dialect.
    pub fn root_tag(self) -> Option<&'static str> {
        strategy_for(self).ok().map(|s| s.root_tag())
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dialect::Rss2 => "rss2",
            Dialect::Rss1 => "rss1",
            Dialect::Atom => "atom",
            Dialect::Infer => "infer",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown feed dialect '{0}' (expected rss2, rss1, atom or infer)")]
pub struct UnknownDialect(String);

impl FromStr for Dialect {
    type Err = UnknownDialect;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rss2" | "rss" => Ok(Dialect::Rss2),
            "rss1" | "rdf" => Ok(Dialect::Rss1),
            "atom" => Ok(Dialect::Atom),
            "infer" | "auto" => Ok(Dialect::Infer),
            _ => Err(UnknownDialect(s.to_string())),
        }
    }
}

/// The document does not have the shape of the requested feed dialect.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("unrecognized feed: no <rss>, <rdf:RDF> or <feed> element found")]
    Unrecognized,

    #[error("invalid {dialect} feed: no <{expected}> element found")]
    Mismatch {
        dialect: Dialect,
        expected: &'static str,
    },

    #[error("invalid feed dialect: {0}")]
    InvalidDialect(Dialect),
}

/// Traversal rules for one dialect.
pub trait DialectStrategy: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Tag of the element that roots this dialect's tree.
    fn root_tag(&self) -> &'static str;

    /// First top-level feed property named `name`.
    fn property<'d>(&self, root: &'d XmlElement, name: &str) -> Option<&'d XmlElement>;

    /// Per-article container elements, in document order.
    fn containers<'d>(&self, root: &'d XmlElement) -> Vec<&'d XmlElement>;
}

struct Rss2;
struct Rss1;
struct Atom;

/// Looks one level below each child of the root. For RSS 2.0 that child is
/// the `<channel>`; for RSS 1.0 it is the `<channel>` plus its `<item>` and
/// `<image>` siblings.
fn nested_property<'d>(root: &'d XmlElement, name: &str) -> Option<&'d XmlElement> {
    root.child_elements()
        .flat_map(XmlElement::child_elements)
        .find(|el| el.name() == name)
}

impl DialectStrategy for Rss2 {
    fn dialect(&self) -> Dialect {
        Dialect::Rss2
    }

    fn root_tag(&self) -> &'static str {
        "rss"
    }

    fn property<'d>(&self, root: &'d XmlElement, name: &str) -> Option<&'d XmlElement> {
        nested_property(root, name)
    }

    fn containers<'d>(&self, root: &'d XmlElement) -> Vec<&'d XmlElement> {
        root.child_elements()
            .flat_map(XmlElement::child_elements)
            .filter(|el| el.name() == "item")
            .collect()
    }
}

impl DialectStrategy for Rss1 {
    fn dialect(&self) -> Dialect {
        Dialect::Rss1
    }

    fn root_tag(&self) -> &'static str {
        "rdf:RDF"
    }

    fn property<'d>(&self, root: &'d XmlElement, name: &str) -> Option<&'d XmlElement> {
        nested_property(root, name)
    }

    fn containers<'d>(&self, root: &'d XmlElement) -> Vec<&'d XmlElement> {
        // Items are siblings of <channel>, not nested in it
        root.child_elements()
            .filter(|el| el.name() == "item")
            .collect()
    }
}

impl DialectStrategy for Atom {
    fn dialect(&self) -> Dialect {
        Dialect::Atom
    }

    fn root_tag(&self) -> &'static str {
        "feed"
    }

    fn property<'d>(&self, root: &'d XmlElement, name: &str) -> Option<&'d XmlElement> {
        root.child_elements().find(|el| el.name() == name)
    }

    fn containers<'d>(&self, root: &'d XmlElement) -> Vec<&'d XmlElement> {
        root.child_elements()
            .filter(|el| el.name() == "entry")
            .collect()
    }
}

static RSS2: Rss2 = Rss2;
static RSS1: Rss1 = Rss1;
static ATOM: Atom = Atom;

/// Strategy for a concrete dialect. `Infer` has none.
pub fn strategy_for(dialect: Dialect) -> Result<&'static dyn DialectStrategy, FormatError> {
    match dialect {
        Dialect::Rss2 => Ok(&RSS2),
        Dialect::Rss1 => Ok(&RSS1),
        Dialect::Atom => Ok(&ATOM),
        Dialect::Infer => Err(FormatError::InvalidDialect(dialect)),
    }
}

/// A document whose dialect has been resolved.
#[derive(Clone, Copy)]
pub struct Detected<'d> {
    strategy: &'static dyn DialectStrategy,
    root: &'d XmlElement,
}

impl<'d> Detected<'d> {
    pub fn dialect(&self) -> Dialect {
        self.strategy.dialect()
    }

    pub fn root(&self) -> &'d XmlElement {
        self.root
    }

    /// Raw inner markup of a top-level feed property, or `""` when absent.
    pub fn property(&self, name: &str) -> String {
        self.strategy
            .property(self.root, name)
            .map(XmlElement::inner_xml)
            .unwrap_or_default()
    }

    pub fn containers(&self) -> Vec<&'d XmlElement> {
        self.strategy.containers(self.root)
    }
}

impl fmt::Debug for Detected<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Detected")
            .field("dialect", &self.dialect())
            .field("root", &self.root.name())
            .finish()
    }
}

/// Resolves the dialect of `doc`.
///
/// # Arguments
///
/// * `doc` - The parsed document
/// * `requested` - An explicit dialect, or [`Dialect::Infer`]
///
/// # Returns
///
/// The dialect's traversal rules together with the first element carrying
/// its tag, which extraction treats as the feed root.
///
/// # Behavior
///
/// - With [`Dialect::Infer`] the tags are tried in [`Dialect::INFER_ORDER`]
///   and the first dialect whose tag occurs anywhere in the document wins
/// - An explicit dialect requires its own tag to be present
///
/// # Errors
///
/// - [`FormatError::Unrecognized`] - Inferring found none of the three tags
/// - [`FormatError::Mismatch`] - The explicit dialect's tag is absent
pub fn detect(doc: &XmlDocument, requested: Dialect) -> Result<Detected<'_>, FormatError> {
    if requested == Dialect::Infer {
        for candidate in Dialect::INFER_ORDER {
            let strategy = strategy_for(candidate)?;
            if let Some(root) = doc.find_first(strategy.root_tag()) {
                tracing::debug!(dialect = %candidate, "Inferred feed dialect");
                return Ok(Detected { strategy, root });
            }
        }
        return Err(FormatError::Unrecognized);
    }

    let strategy = strategy_for(requested)?;
    let root = doc
        .find_first(strategy.root_tag())
        .ok_or(FormatError::Mismatch {
            dialect: requested,
            expected: strategy.root_tag(),
        })?;
    Ok(Detected { strategy, root })
}

/// Looks up a top-level feed property by tag name.
///
/// `root` must be the element [`detect`] resolved for `dialect`. Returns the
/// raw inner markup of the first match, or `""` when the feed lacks it.
pub fn feed_property(
    root: &XmlElement,
    dialect: Dialect,
    name: &str,
) -> Result<String, FormatError> {
    let strategy = strategy_for(dialect)?;
    Ok(strategy
        .property(root, name)
        .map(XmlElement::inner_xml)
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(xml: &str) -> XmlDocument {
        XmlDocument::parse(xml).unwrap()
    }

    #[test]
    fn test_dialect_round_trips_through_strings() {
        for dialect in [Dialect::Rss2, Dialect::Rss1, Dialect::Atom, Dialect::Infer] {
            assert_eq!(dialect.to_string().parse::<Dialect>().unwrap(), dialect);
        }
        assert_eq!("RSS".parse::<Dialect>().unwrap(), Dialect::Rss2);
        assert!("json".parse::<Dialect>().is_err());
    }

    #[test]
    fn test_root_tags() {
        assert_eq!(Dialect::Rss2.root_tag(), Some("rss"));
        assert_eq!(Dialect::Rss1.root_tag(), Some("rdf:RDF"));
        assert_eq!(Dialect::Atom.root_tag(), Some("feed"));
        assert_eq!(Dialect::Infer.root_tag(), None);
    }

    #[test]
    fn test_infer_each_dialect() {
        let rss2 = doc("<rss version=\"2.0\"><channel/></rss>");
        assert_eq!(detect(&rss2, Dialect::Infer).unwrap().dialect(), Dialect::Rss2);

        let rss1 = doc("<rdf:RDF><channel/></rdf:RDF>");
        assert_eq!(detect(&rss1, Dialect::Infer).unwrap().dialect(), Dialect::Rss1);

        let atom = doc("<feed xmlns=\"http://www.w3.org/2005/Atom\"/>");
        assert_eq!(detect(&atom, Dialect::Infer).unwrap().dialect(), Dialect::Atom);
    }

    #[test]
    fn test_infer_prefers_rss2_over_rss1() {
        let both = doc("<rdf:RDF><channel/><rss><channel/></rss></rdf:RDF>");
        let detected = detect(&both, Dialect::Infer).unwrap();
        assert_eq!(detected.dialect(), Dialect::Rss2);
        assert_eq!(detected.root().name(), "rss");
    }

    #[test]
    fn test_infer_prefers_rss1_over_atom() {
        let both = doc("<feed><rdf:RDF/></feed>");
        assert_eq!(detect(&both, Dialect::Infer).unwrap().dialect(), Dialect::Rss1);
    }

    #[test]
    fn test_infer_unrecognized() {
        let html = doc("<html><body/></html>");
        assert_eq!(
            detect(&html, Dialect::Infer).unwrap_err(),
            FormatError::Unrecognized
        );
    }

    #[test]
    fn test_explicit_dialect_mismatch_names_expected_tag() {
        let atom = doc("<feed/>");
        let err = detect(&atom, Dialect::Rss1).unwrap_err();
        assert_eq!(
            err,
            FormatError::Mismatch {
                dialect: Dialect::Rss1,
                expected: "rdf:RDF"
            }
        );
        assert!(err.to_string().contains("<rdf:RDF>"));
    }

    #[test]
    fn test_explicit_dialect_match() {
        let rss = doc("<rss><channel/></rss>");
        assert_eq!(detect(&rss, Dialect::Rss2).unwrap().dialect(), Dialect::Rss2);
    }

    #[test]
    fn test_rss2_property_from_channel() {
        let rss = doc("<rss><channel><title>Example &amp; Co</title></channel></rss>");
        let detected = detect(&rss, Dialect::Infer).unwrap();
        assert_eq!(detected.property("title"), "Example &amp; Co");
        assert_eq!(detected.property("description"), "");
    }

    #[test]
    fn test_rss1_property_from_channel() {
        let rss1 = doc(
            "<rdf:RDF><channel><title>Slashdot</title><description>News</description></channel>\
             <item><title>Story</title></item></rdf:RDF>",
        );
        let detected = detect(&rss1, Dialect::Rss1).unwrap();
        assert_eq!(detected.property("title"), "Slashdot");
        assert_eq!(detected.property("description"), "News");
    }

    #[test]
    fn test_atom_property_from_feed_children_only() {
        let atom = doc("<feed><title>Blog</title><entry><summary>s</summary></entry></feed>");
        let detected = detect(&atom, Dialect::Atom).unwrap();
        assert_eq!(detected.property("title"), "Blog");
        // Nested entry children are not feed properties
        assert_eq!(detected.property("summary"), "");
    }

    #[test]
    fn test_feed_property_rejects_infer() {
        let rss = doc("<rss><channel><title>T</title></channel></rss>");
        assert_eq!(
            feed_property(rss.root(), Dialect::Infer, "title").unwrap_err(),
            FormatError::InvalidDialect(Dialect::Infer)
        );
        assert_eq!(feed_property(rss.root(), Dialect::Rss2, "title").unwrap(), "T");
    }

    #[test]
    fn test_containers_per_dialect() {
        let rss2 = doc("<rss><channel><item/><title/><item/></channel></rss>");
        assert_eq!(detect(&rss2, Dialect::Rss2).unwrap().containers().len(), 2);

        // RSS 1.0 items nested under channel are only references, not articles
        let rss1 = doc("<rdf:RDF><channel><items/></channel><item/><item/><item/></rdf:RDF>");
        assert_eq!(detect(&rss1, Dialect::Rss1).unwrap().containers().len(), 3);

        let atom = doc("<feed><entry/><title/><entry/></feed>");
        assert_eq!(detect(&atom, Dialect::Atom).unwrap().containers().len(), 2);
    }
}
