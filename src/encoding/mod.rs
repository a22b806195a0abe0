//! Encoding detection and transcoding.
//!
//! Implements byte order mark sniffing and XML declaration encoding
//! detection per XML 1.0 Section 4.3.3 and Appendix F, bridging to
//! `encoding_rs` for character conversion.
//!
//! # Detection Strategy
//!
//! 1. Classify the first four bytes against the byte order marks and the
//!    BOM-less signatures of Appendix F to pick a byte-width family.
//! 2. UTF-16 requires a real byte order mark. A UTF-16 signature without one,
//!    or an 8-bit stream declaring UTF-16, is a well-formedness error.
//! 3. Decode just enough characters to read the `encoding` pseudo-attribute
//!    of the XML declaration. Those characters are handed back in
//!    [`Detection::consumed`] so decoding replays them instead of reading
//!    them twice.
//! 4. Decode the rest with the declared encoding when it belongs to the
//!    detected family, otherwise with the autodetected one.

use std::borrow::Cow;

use encoding_rs::Encoding;
use thiserror::Error;

/// An error that occurs during encoding detection or transcoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    /// A UTF-16 stream without a byte order mark.
    #[error("{encoding} document has an invalid or missing byte order mark")]
    MissingByteOrderMark {
        /// The encoding that was autodetected or declared.
        encoding: String,
    },
    /// The declared encoding is not known to the decoder.
    #[error("unsupported encoding: {0}")]
    Unsupported(String),
    /// The bytes are not valid in the chosen encoding.
    #[error("malformed byte sequence for encoding {0}")]
    Malformed(String),
}

/// Byte-width family of a stream, established before the declaration is
/// read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// ASCII-compatible 8-bit or multi-byte encodings (UTF-8, Latin-1, ...).
    EightBit,
    /// UTF-16 little-endian.
    Utf16Le,
    /// UTF-16 big-endian.
    Utf16Be,
    /// UTF-32 little-endian.
    Utf32Le,
    /// UTF-32 big-endian.
    Utf32Be,
}

impl Family {
    fn unit_width(self) -> usize {
        match self {
            Self::EightBit => 1,
            Self::Utf16Le | Self::Utf16Be => 2,
            Self::Utf32Le | Self::Utf32Be => 4,
        }
    }
}

/// The outcome of encoding detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// The encoding chosen from the byte pattern alone.
    pub autodetected: &'static str,
    /// The byte-width family of [`autodetected`](Self::autodetected).
    pub family: Family,
    /// The value of the declaration's `encoding` pseudo-attribute, if any.
    pub declared: Option<String>,
    /// Number of byte order mark bytes at the start of the stream.
    pub bom_len: usize,
    /// Characters decoded while looking for the declaration.
    pub consumed: String,
    /// Number of bytes (after the BOM) that [`consumed`](Self::consumed)
    /// was decoded from.
    pub consumed_bytes: usize,
}

/// A fully decoded stream.
#[derive(Debug, Clone)]
pub struct Decoded {
    /// The decoded text, without the byte order mark.
    pub text: String,
    /// The encoding the bytes were decoded with.
    pub encoding: String,
    /// Detection details.
    pub detection: Detection,
    /// Non-fatal findings, such as a declared encoding that conflicts with
    /// the byte order mark and was ignored.
    pub warnings: Vec<String>,
}

/// Longest XML declaration prefix the detector will scan, in characters.
const MAX_DECL_SCAN: usize = 512;

/// Classifies the leading bytes of a stream.
///
/// Returns the autodetected encoding name, its family and the length of
/// the byte order mark. `tidy` selects the lenient default for
/// unrecognized patterns (windows-1252 instead of UTF-8).
///
/// # Errors
///
/// Returns [`EncodingError::MissingByteOrderMark`] for a UTF-16 signature
/// without a byte order mark.
///
/// # Examples
///
/// ```
/// use tidyxml::encoding::{sniff, Family};
///
/// let (enc, family, bom) = sniff(b"\xEF\xBB\xBF<root/>", false).unwrap();
/// assert_eq!((enc, family, bom), ("UTF-8", Family::EightBit, 3));
///
/// assert!(sniff(b"<\x00?\x00x\x00m\x00", false).is_err());
/// ```
pub fn sniff(bytes: &[u8], tidy: bool) -> Result<(&'static str, Family, usize), EncodingError> {
    let head = |n: usize| bytes.get(..n);
    if head(3) == Some(&[0xEF, 0xBB, 0xBF][..]) {
        return Ok(("UTF-8", Family::EightBit, 3));
    }
    if head(4) == Some(&[0x00, 0x00, 0xFE, 0xFF][..]) {
        return Ok(("UTF-32BE", Family::Utf32Be, 4));
    }
    if head(4) == Some(&[0xFF, 0xFE, 0x00, 0x00][..]) {
        return Ok(("UTF-32LE", Family::Utf32Le, 4));
    }
    if head(2) == Some(&[0xFE, 0xFF][..]) {
        return Ok(("UTF-16BE", Family::Utf16Be, 2));
    }
    if head(2) == Some(&[0xFF, 0xFE][..]) {
        return Ok(("UTF-16LE", Family::Utf16Le, 2));
    }
    match head(4) {
        Some([0x3C, 0x00, 0x3F, 0x00]) => Err(EncodingError::MissingByteOrderMark {
            encoding: "UTF-16LE".into(),
        }),
        Some([0x00, 0x3C, 0x00, 0x3F]) => Err(EncodingError::MissingByteOrderMark {
            encoding: "UTF-16BE".into(),
        }),
        Some([0x3C, 0x00, 0x00, 0x00]) => Ok(("UTF-32LE", Family::Utf32Le, 0)),
        Some([0x00, 0x00, 0x00, 0x3C]) => Ok(("UTF-32BE", Family::Utf32Be, 0)),
        Some([0x3C, 0x3F, 0x78, 0x6D]) => Ok(("UTF-8", Family::EightBit, 0)),
        _ if tidy => Ok(("windows-1252", Family::EightBit, 0)),
        _ => Ok(("UTF-8", Family::EightBit, 0)),
    }
}

/// Detects the encoding of an XML byte stream.
///
/// After [`sniff`] has fixed the byte-width family, characters are decoded
/// one at a time until the declaration's `?>` is seen or the prefix
/// provably does not start with `<?xml` followed by whitespace. When
/// `expect_decl` is set the caller requires a declaration; its absence is
/// still not an error here but [`Detection::declared`] stays `None`.
///
/// # Errors
///
/// See [`sniff`]. A declared UTF-16 encoding in a stream without a UTF-16
/// byte order mark is also reported as
/// [`EncodingError::MissingByteOrderMark`].
pub fn detect(bytes: &[u8], tidy: bool, expect_decl: bool) -> Result<Detection, EncodingError> {
    let (autodetected, family, bom_len) = sniff(bytes, tidy)?;
    let body = &bytes[bom_len..];

    let mut consumed = String::new();
    let mut consumed_bytes = 0;
    let width = family.unit_width();
    while consumed.chars().count() < MAX_DECL_SCAN {
        let Some(unit) = body.get(consumed_bytes..consumed_bytes + width) else {
            break;
        };
        let Some(ch) = decode_ascii_unit(unit, family) else {
            break;
        };
        consumed.push(ch);
        consumed_bytes += width;
        if !could_be_declaration(&consumed) || consumed.ends_with("?>") {
            break;
        }
    }

    let declared = if consumed.ends_with("?>") {
        extract_xml_decl_encoding(&consumed)
    } else {
        None
    };
    if expect_decl && declared.is_none() {
        tracing::debug!(encoding = autodetected, "no encoding declaration found");
    }

    if let Some(label) = declared.as_deref() {
        let upper = label.to_ascii_uppercase();
        if family == Family::EightBit && upper.starts_with("UTF-16") {
            return Err(EncodingError::MissingByteOrderMark { encoding: upper });
        }
    }

    Ok(Detection {
        autodetected,
        family,
        declared,
        bom_len,
        consumed,
        consumed_bytes,
    })
}

/// Decodes raw XML bytes into a `String`, detecting the encoding first.
///
/// In tidy mode malformed sequences become U+FFFD and an unknown declared
/// encoding falls back to the autodetected one; otherwise both are errors.
///
/// # Errors
///
/// Returns [`EncodingError`] if detection fails, the declared encoding is
/// unknown, or the bytes are malformed for the chosen encoding.
///
/// # Examples
///
/// ```
/// use tidyxml::encoding::decode;
///
/// let decoded = decode(b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><r>\xE9</r>", false).unwrap();
/// assert_eq!(decoded.encoding, "windows-1252");
/// assert!(decoded.text.ends_with("<r>\u{e9}</r>"));
/// ```
pub fn decode(bytes: &[u8], tidy: bool) -> Result<Decoded, EncodingError> {
    let detection = detect(bytes, tidy, false)?;
    let rest = &bytes[detection.bom_len + detection.consumed_bytes..];
    let mut warnings = Vec::new();

    let (encoding_name, tail) = match detection.family {
        Family::Utf32Le | Family::Utf32Be => {
            if let Some(label) = &detection.declared {
                if !label.to_ascii_uppercase().starts_with("UTF-32")
                    && !label.eq_ignore_ascii_case("ISO-10646-UCS-4")
                {
                    warnings.push(format!(
                        "declared encoding '{label}' conflicts with detected {}; using {}",
                        detection.autodetected, detection.autodetected
                    ));
                }
            }
            let text = decode_utf32(rest, detection.family == Family::Utf32Be, tidy)
                .ok_or_else(|| EncodingError::Malformed(detection.autodetected.into()))?;
            (detection.autodetected.to_string(), text)
        }
        Family::Utf16Le | Family::Utf16Be => {
            if let Some(label) = &detection.declared {
                if !label.to_ascii_uppercase().starts_with("UTF-16") {
                    warnings.push(format!(
                        "declared encoding '{label}' conflicts with detected {}; using {}",
                        detection.autodetected, detection.autodetected
                    ));
                }
            }
            let encoding = if detection.family == Family::Utf16Le {
                encoding_rs::UTF_16LE
            } else {
                encoding_rs::UTF_16BE
            };
            let text = transcode(rest, encoding, tidy)?;
            (encoding.name().to_string(), text)
        }
        Family::EightBit => {
            let encoding = match detection.declared.as_deref() {
                Some(label) => match Encoding::for_label(label.as_bytes()) {
                    Some(enc) => enc,
                    None if tidy => {
                        warnings.push(format!(
                            "unsupported encoding '{label}'; using {}",
                            detection.autodetected
                        ));
                        autodetected_encoding(detection.autodetected)
                    }
                    None => return Err(EncodingError::Unsupported(label.to_string())),
                },
                None => autodetected_encoding(detection.autodetected),
            };
            let text = transcode(rest, encoding, tidy)?;
            (encoding.name().to_string(), text)
        }
    };

    tracing::debug!(
        autodetected = detection.autodetected,
        declared = ?detection.declared,
        encoding = %encoding_name,
        "decoded input"
    );

    let mut text = String::with_capacity(detection.consumed.len() + tail.len());
    text.push_str(&detection.consumed);
    text.push_str(&tail);
    Ok(Decoded {
        text,
        encoding: encoding_name,
        detection,
        warnings,
    })
}

fn autodetected_encoding(name: &str) -> &'static Encoding {
    Encoding::for_label(name.as_bytes()).unwrap_or(encoding_rs::UTF_8)
}

/// Decodes `bytes` with `encoding`, without BOM sniffing.
fn transcode<'a>(
    bytes: &'a [u8],
    encoding: &'static Encoding,
    tidy: bool,
) -> Result<Cow<'a, str>, EncodingError> {
    let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
    if had_errors && !tidy {
        return Err(EncodingError::Malformed(encoding.name().to_string()));
    }
    Ok(text)
}

/// Decodes UTF-32, which `encoding_rs` does not provide.
fn decode_utf32(bytes: &[u8], big_endian: bool, tidy: bool) -> Option<Cow<'static, str>> {
    let chunks = bytes.chunks_exact(4);
    if !chunks.remainder().is_empty() && !tidy {
        return None;
    }
    let mut out = String::with_capacity(bytes.len() / 4);
    for chunk in chunks {
        let raw = [chunk[0], chunk[1], chunk[2], chunk[3]];
        let value = if big_endian {
            u32::from_be_bytes(raw)
        } else {
            u32::from_le_bytes(raw)
        };
        match char::from_u32(value) {
            Some(ch) => out.push(ch),
            None if tidy => out.push(char::REPLACEMENT_CHARACTER),
            None => return None,
        }
    }
    Some(Cow::Owned(out))
}

/// Decodes one code unit of an XML declaration. Declarations are pure
/// ASCII, so anything else ends the scan.
fn decode_ascii_unit(unit: &[u8], family: Family) -> Option<char> {
    let value = match (family, unit) {
        (Family::EightBit, [b]) => u32::from(*b),
        (Family::Utf16Le, [lo, hi]) => u32::from(u16::from_le_bytes([*lo, *hi])),
        (Family::Utf16Be, [hi, lo]) => u32::from(u16::from_be_bytes([*hi, *lo])),
        (Family::Utf32Le, [a, b, c, d]) => u32::from_le_bytes([*a, *b, *c, *d]),
        (Family::Utf32Be, [a, b, c, d]) => u32::from_be_bytes([*a, *b, *c, *d]),
        _ => return None,
    };
    if value < 0x80 {
        char::from_u32(value)
    } else {
        None
    }
}

/// Returns `true` while `prefix` may still grow into an XML declaration.
fn could_be_declaration(prefix: &str) -> bool {
    const OPEN: &str = "<?xml";
    if prefix.len() <= OPEN.len() {
        return OPEN.starts_with(prefix);
    }
    prefix.starts_with(OPEN)
        && prefix[OPEN.len()..]
            .chars()
            .next()
            .is_some_and(|c| matches!(c, ' ' | '\t' | '\r' | '\n'))
}

/// Extracts the `encoding` pseudo-attribute from a complete XML declaration.
fn extract_xml_decl_encoding(decl: &str) -> Option<String> {
    let decl = decl.strip_suffix("?>")?;
    let enc_pos = decl.find("encoding")?;
    let after_enc = decl[enc_pos + "encoding".len()..].trim_start();
    let after_enc = after_enc.strip_prefix('=')?.trim_start();
    let quote = after_enc.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let value = &after_enc[1..];
    let end = value.find(quote)?;
    Some(value[..end].to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn utf16le(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(u16::to_le_bytes).collect()
    }

    fn utf16be(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(u16::to_be_bytes).collect()
    }

    #[test]
    fn test_sniff_boms() {
        assert_eq!(
            sniff(b"\xEF\xBB\xBF<a/>", false).unwrap(),
            ("UTF-8", Family::EightBit, 3)
        );
        assert_eq!(
            sniff(b"\xFE\xFF\x00<", false).unwrap(),
            ("UTF-16BE", Family::Utf16Be, 2)
        );
        assert_eq!(
            sniff(b"\xFF\xFE<\x00", false).unwrap(),
            ("UTF-16LE", Family::Utf16Le, 2)
        );
        assert_eq!(
            sniff(b"\x00\x00\xFE\xFF", false).unwrap(),
            ("UTF-32BE", Family::Utf32Be, 4)
        );
        assert_eq!(
            sniff(b"\xFF\xFE\x00\x00", false).unwrap(),
            ("UTF-32LE", Family::Utf32Le, 4)
        );
    }

    #[test]
    fn test_sniff_utf16_without_bom_fails() {
        let err = sniff(b"\x00<\x00?", false).unwrap_err();
        assert!(err.to_string().contains("byte order mark"));
    }

    #[test]
    fn test_sniff_unrecognized_defaults() {
        assert_eq!(sniff(b"<root/>", false).unwrap().0, "UTF-8");
        assert_eq!(sniff(b"<root/>", true).unwrap().0, "windows-1252");
        assert_eq!(sniff(b"<?xml version", true).unwrap().0, "UTF-8");
    }

    #[test]
    fn test_detect_consumes_declaration_only() {
        let bytes = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><root/>";
        let det = detect(bytes, false, true).unwrap();
        assert_eq!(det.declared.as_deref(), Some("ISO-8859-1"));
        assert_eq!(det.consumed, "<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>");
        assert_eq!(det.consumed_bytes, det.consumed.len());
    }

    #[test]
    fn test_detect_stops_when_not_a_declaration() {
        let det = detect(b"<root>text</root>", false, false).unwrap();
        assert_eq!(det.consumed, "<r");
        assert_eq!(det.declared, None);

        let det = detect(b"<?xml-stylesheet href='a'?><r/>", false, false).unwrap();
        assert_eq!(det.consumed, "<?xml-");
        assert_eq!(det.declared, None);
    }

    #[test]
    fn test_declared_utf16_without_bom_fails() {
        let bytes = b"<?xml version=\"1.0\" encoding=\"UTF-16\"?><root/>";
        let err = detect(bytes, false, false).unwrap_err();
        assert_eq!(
            err,
            EncodingError::MissingByteOrderMark {
                encoding: "UTF-16".into()
            }
        );
        assert!(err.to_string().contains("invalid or missing byte order mark"));
    }

    #[test]
    fn test_decode_utf16le_with_bom() {
        let mut bytes = vec![0xFF, 0xFE];
        bytes.extend(utf16le("<?xml version=\"1.0\" encoding=\"UTF-16\"?><r>\u{e9}</r>"));
        let decoded = decode(&bytes, false).unwrap();
        assert_eq!(decoded.encoding, "UTF-16LE");
        assert_eq!(
            decoded.text,
            "<?xml version=\"1.0\" encoding=\"UTF-16\"?><r>\u{e9}</r>"
        );
    }

    #[test]
    fn test_decode_utf16be_with_bom() {
        let mut bytes = vec![0xFE, 0xFF];
        bytes.extend(utf16be("<r>\u{4e2d}</r>"));
        let decoded = decode(&bytes, false).unwrap();
        assert_eq!(decoded.encoding, "UTF-16BE");
        assert_eq!(decoded.text, "<r>\u{4e2d}</r>");
    }

    #[test]
    fn test_decode_utf32be_without_bom() {
        let bytes: Vec<u8> = "<r>\u{1F600}</r>"
            .chars()
            .flat_map(|c| (c as u32).to_be_bytes())
            .collect();
        let decoded = decode(&bytes, false).unwrap();
        assert_eq!(decoded.encoding, "UTF-32BE");
        assert_eq!(decoded.text, "<r>\u{1F600}</r>");
    }

    #[test]
    fn test_decode_latin1_declared() {
        let bytes = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><r>caf\xE9</r>";
        let decoded = decode(bytes, false).unwrap();
        assert!(decoded.text.ends_with("<r>caf\u{e9}</r>"));
    }

    #[test]
    fn test_decode_unknown_encoding() {
        let bytes = b"<?xml version=\"1.0\" encoding=\"X-NOPE\"?><r/>";
        assert_eq!(
            decode(bytes, false).unwrap_err(),
            EncodingError::Unsupported("X-NOPE".into())
        );
        let decoded = decode(bytes, true).unwrap();
        assert_eq!(decoded.warnings.len(), 1);
    }

    #[test]
    fn test_decode_invalid_utf8_strict_and_tidy() {
        let bytes = b"<?xml version=\"1.0\"?><r>\xFF</r>";
        assert!(matches!(
            decode(bytes, false),
            Err(EncodingError::Malformed(_))
        ));
        let decoded = decode(bytes, true).unwrap();
        assert!(decoded.text.contains('\u{FFFD}'));
    }

    #[test]
    fn test_decode_tidy_latin1_default() {
        let decoded = decode(b"<p>caf\xE9</p>", true).unwrap();
        assert_eq!(decoded.encoding, "windows-1252");
        assert_eq!(decoded.text, "<p>caf\u{e9}</p>");
    }
}
