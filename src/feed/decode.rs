//! Character decoding of feed bodies.
//!
//! Feeds name their own encoding, so the transport hands over raw bytes and
//! the encoding is resolved here in this order:
//!
//! 1. Byte order mark
//! 2. `encoding` in the XML declaration
//! 3. `charset` parameter of the `Content-Type` header
//! 4. UTF-8

use super::xml::XmlError;
use encoding_rs::{Encoding, UTF_8};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::borrow::Cow;

/// Decodes a feed body to text.
///
/// # Arguments
///
/// * `bytes` - The body exactly as received
/// * `content_type` - The response's `Content-Type` header, if any
///
/// # Returns
///
/// The decoded text, borrowed when the body is already BOM-less UTF-8.
///
/// # Errors
///
/// - [`XmlError::UnknownEncoding`] - The XML declaration names an encoding
///   that has no decoder
/// - [`XmlError::Decode`] - The body contains byte sequences that are invalid
///   in the resolved encoding
pub fn decode_feed<'b>(
    bytes: &'b [u8],
    content_type: Option<&str>,
) -> Result<Cow<'b, str>, XmlError> {
    let encoding = resolve_encoding(bytes, content_type)?;
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        return Err(XmlError::Decode(encoding.name().to_string()));
    }
    Ok(text)
}

fn resolve_encoding(
    bytes: &[u8],
    content_type: Option<&str>,
) -> Result<&'static Encoding, XmlError> {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return Ok(encoding);
    }

    if let Some(label) = declared_encoding(bytes) {
        let encoding = Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| XmlError::UnknownEncoding(label.clone()))?;
        // The declaration was readable as ASCII, so a UTF-16 label without a
        // BOM cannot be right
        return Ok(encoding.output_encoding());
    }

    if let Some(charset) = content_type.and_then(charset_param) {
        match Encoding::for_label(charset.as_bytes()) {
            Some(encoding) => return Ok(encoding.output_encoding()),
            None => tracing::debug!(charset = %charset, "Ignoring unknown Content-Type charset"),
        }
    }

    Ok(UTF_8)
}

/// `encoding` pseudo-attribute of a leading `<?xml ...?>` declaration.
fn declared_encoding(bytes: &[u8]) -> Option<String> {
    let mut reader = Reader::from_reader(bytes);
    match reader.read_event() {
        Ok(Event::Decl(decl)) => match decl.encoding() {
            Some(Ok(label)) => Some(String::from_utf8_lossy(&label).into_owned()),
            _ => None,
        },
        _ => None,
    }
}

fn charset_param(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches(&['"', '\''][..]))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn utf16le_with_bom(text: &str) -> Vec<u8> {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_plain_utf8_is_borrowed() {
        let body = "<rss><channel><title>Caf\u{e9}</title></channel></rss>".as_bytes();
        let text = decode_feed(body, None).unwrap();
        assert!(matches!(text, Cow::Borrowed(_)));
        assert!(text.contains("Café"));
    }

    #[test]
    fn test_declared_latin1() {
        let body = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><title>Caf\xE9</title>";
        let text = decode_feed(body, None).unwrap();
        assert!(text.ends_with("<title>Café</title>"));
    }

    #[test]
    fn test_declared_windows_1252_smart_quotes() {
        let body = b"<?xml version='1.0' encoding='windows-1252'?><t>\x93quoted\x94</t>";
        let text = decode_feed(body, None).unwrap();
        assert!(text.ends_with("<t>\u{201c}quoted\u{201d}</t>"));
    }

    #[test]
    fn test_declaration_wins_over_content_type() {
        let body = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><t>\xE9</t>";
        let text = decode_feed(body, Some("application/xml; charset=utf-8")).unwrap();
        assert!(text.ends_with("<t>é</t>"));
    }

    #[test]
    fn test_content_type_charset_without_declaration() {
        let body = b"<t>\xE9</t>";
        let text = decode_feed(body, Some("text/xml; Charset=\"ISO-8859-1\"")).unwrap();
        assert_eq!(text, "<t>é</t>");
    }

    #[test]
    fn test_unknown_content_type_charset_falls_back_to_utf8() {
        let text = decode_feed(b"<t>ok</t>", Some("text/xml; charset=klingon")).unwrap();
        assert_eq!(text, "<t>ok</t>");
    }

    #[test]
    fn test_bom_wins() {
        let body = utf16le_with_bom("<?xml version=\"1.0\" encoding=\"UTF-16\"?><t>é</t>");
        let text = decode_feed(&body, Some("text/xml; charset=iso-8859-1")).unwrap();
        assert!(text.ends_with("<t>é</t>"));
        assert!(!text.starts_with('\u{feff}'));
    }

    #[test]
    fn test_utf16_declaration_without_bom_reads_as_utf8() {
        let body = "<?xml version=\"1.0\" encoding=\"UTF-16\"?><t>é</t>".as_bytes();
        let text = decode_feed(body, None).unwrap();
        assert!(text.ends_with("<t>é</t>"));
    }

    #[test]
    fn test_unknown_declared_encoding() {
        let body = b"<?xml version=\"1.0\" encoding=\"x-made-up\"?><t/>";
        assert_eq!(
            decode_feed(body, None),
            Err(XmlError::UnknownEncoding("x-made-up".to_string()))
        );
    }

    #[test]
    fn test_invalid_utf8_is_a_decode_error() {
        assert_eq!(
            decode_feed(b"<t>\xFF\xFE</t>", None),
            Err(XmlError::Decode("UTF-8".to_string()))
        );
    }

    #[test]
    fn test_charset_param() {
        assert_eq!(charset_param("text/xml; charset=utf-8"), Some("utf-8"));
        assert_eq!(charset_param("text/xml;CHARSET='latin1'"), Some("latin1"));
        assert_eq!(charset_param("text/xml"), None);
        assert_eq!(charset_param("charset=utf-8"), None);
    }
}
